//! Typed errors surfaced through `anyhow` chains.
//!
//! Orchestration code returns `anyhow::Result`; the binary recovers these
//! types with `downcast_ref` to pick an exit code.

use thiserror::Error;

/// Malformed or missing command-line arguments.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("usage: {0}")]
pub struct UsageError(pub String);

/// A construction-time invariant was violated (bad host spec, unmatched pool,
/// non-positive limit). Raised before any remote activity.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{0}")]
pub struct ValidationError(pub String);

impl ValidationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

/// Connection or session failure for one endpoint.
///
/// Inside the action tree this never propagates; a leaf converts it into
/// [`crate::exit_codes::TRANSPORT_FAILURE`].
#[derive(Debug, Error)]
#[error("transport failure for {endpoint}: {message}")]
pub struct TransportError {
    pub endpoint: String,
    pub message: String,
}

/// Failures of the agent line protocol. Fatal to the interactive session.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("agent channel closed")]
    ChannelClosed,
    #[error("malformed agent record: {0}")]
    Malformed(String),
    #[error("request {key} is still awaiting a reply")]
    ReplyPending { key: u64 },
    #[error("channel is not ready (state: {0})")]
    NotReady(&'static str),
}
