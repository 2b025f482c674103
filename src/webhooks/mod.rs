//! Webhook validation: HMAC signature verification, payload types, and the
//! action/org/workflow filters.

pub mod events;
pub mod signature;
pub mod validator;

pub use events::{WorkflowRunEvent, parse_event};
pub use signature::{
    SignatureError, compute_signature, format_signature_header, validate_signature,
};
pub use validator::{EventFilter, FilterError};
