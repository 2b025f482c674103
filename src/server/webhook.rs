//! Webhook endpoint handler.
//!
//! Verifies the delivery signature over the exact raw body, applies the
//! event filters, and publishes a work request. The receiver returns 202
//! only after a successful publish; publish failures map to 5xx so the
//! forge retries the delivery.

use axum::Extension;
use axum::body::Bytes;
use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::queue::{QueueError, WorkRequest};
use crate::webhooks::{FilterError, SignatureError, parse_event, validate_signature};

use super::{AppState, RequestId};

/// Header carrying the HMAC signature.
const HEADER_SIGNATURE: &str = "x-hub-signature-256";

/// Errors that can occur while processing a webhook delivery.
#[derive(Debug, Error)]
pub enum WebhookError {
    /// Signature missing, malformed, or mismatched.
    #[error(transparent)]
    Signature(#[from] SignatureError),

    /// The body was not a parseable workflow-run event.
    #[error("malformed payload: {0}")]
    Payload(#[from] serde_json::Error),

    /// The event was filtered out.
    #[error(transparent)]
    Filtered(#[from] FilterError),

    /// The queue rejected the work request.
    #[error("failed to enqueue work request: {0}")]
    Publish(#[from] QueueError),
}

impl IntoResponse for WebhookError {
    fn into_response(self) -> Response {
        match &self {
            WebhookError::Signature(_) => {
                (StatusCode::UNAUTHORIZED, self.to_string()).into_response()
            }
            WebhookError::Payload(_) => (StatusCode::BAD_REQUEST, self.to_string()).into_response(),
            // An incomplete run is uninteresting, not forbidden.
            WebhookError::Filtered(FilterError::InvalidAction(_)) => {
                StatusCode::NO_CONTENT.into_response()
            }
            WebhookError::Filtered(_) => (StatusCode::FORBIDDEN, self.to_string()).into_response(),
            WebhookError::Publish(_) => (StatusCode::BAD_GATEWAY, self.to_string()).into_response(),
        }
    }
}

/// `POST /webhook`: validate, filter, enqueue.
pub async fn webhook_handler(
    State(state): State<AppState>,
    Extension(request_id): Extension<RequestId>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<(StatusCode, &'static str), WebhookError> {
    // Verify the signature before any parsing. Development mode disables
    // this check and nothing else.
    match state.webhook_secret() {
        Some(secret) => {
            let header = headers.get(HEADER_SIGNATURE).and_then(|v| v.to_str().ok());
            if let Err(error) = validate_signature(&body, header, secret) {
                warn!(request_id = %request_id.0, %error, "rejecting webhook delivery");
                return Err(error.into());
            }
        }
        None => {
            debug!(request_id = %request_id.0, "signature validation disabled");
        }
    }

    let event = parse_event(&body)?;

    if let Err(error) = state.filter().check(&event) {
        debug!(
            request_id = %request_id.0,
            org = %event.organization.login,
            workflow = %event.workflow_run.name,
            %error,
            "filtered webhook delivery"
        );
        return Err(error.into());
    }

    let request = WorkRequest {
        org: event.organization.login,
        repo: event.repository.name,
        workflow_run_id: event.workflow_run.id,
    };

    state.queue().publish(&request, state.shutdown()).await?;

    info!(
        request_id = %request_id.0,
        org = %request.org,
        repo = %request.repo,
        run_id = request.workflow_run_id,
        "enqueued work request"
    );

    Ok((StatusCode::ACCEPTED, "accepted"))
}
