//! Canopy - annotates pull requests with line-level code coverage derived
//! from CI coverage profiles.
//!
//! The crate is split into pure libraries (coverage engine, diff parser,
//! blob store, message queue) and a thin orchestration layer (receiver and
//! worker) that wires them to the forge.

#[cfg(test)]
pub mod test_utils;

pub mod config;
pub mod coverage;
pub mod diff;
pub mod github;
pub mod queue;
pub mod server;
pub mod storage;
pub mod types;
pub mod webhooks;
pub mod worker;
