//! Typed error taxonomy for the proxy core.
//!
//! Mirrors the distinction the original service draws by string-matching
//! exception messages (`"Quota exceeded"`, `"connection closed"`, the
//! `ReconnectionCompleted` control-flow exception) — here each case is a
//! real variant instead of a substring match.

use thiserror::Error;

/// Errors raised while building or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing required configuration value: {0}")]
    Missing(&'static str),
    #[error("invalid value for {field}: {reason}")]
    Invalid { field: &'static str, reason: String },
}

/// Errors surfaced by the warmup pool.
#[derive(Debug, Error)]
pub enum PoolError {
    #[error("pool is shutting down")]
    ShuttingDown,
    #[error("failed to create upstream session: {0}")]
    CreateFailed(#[from] UpstreamError),
}

/// Errors surfaced by the upstream Gemini Live client.
#[derive(Debug, Error)]
pub enum UpstreamError {
    #[error("upstream connection refused or unreachable: {0}")]
    Connect(String),
    #[error("upstream credentials invalid or missing: {0}")]
    Credentials(String),
    #[error("upstream closed the connection abnormally")]
    ConnectionClosedError,
    #[error("upstream closed the connection normally")]
    ConnectionClosedOk,
    #[error("upstream message could not be decoded: {0}")]
    Protocol(String),
}

/// Errors that can terminate a session's message pump, one way or another.
///
/// This is the Rust encoding of the string-matched exception branches in
/// `handle_messages`: quota exhaustion, an expected close, and anything
/// unexpected are three different things to a caller, so they are three
/// different variants rather than one opaque `anyhow::Error`.
#[derive(Debug, Error)]
pub enum PumpError {
    #[error("quota exceeded")]
    QuotaExceeded,
    #[error("readiness handshake timed out")]
    ReadinessTimeout,
    #[error(transparent)]
    Upstream(#[from] UpstreamError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

/// Outcome of a handshake validation pass against the abuse gate.
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("client banned until quota window resets")]
    Banned,
    #[error("invalid websocket upgrade headers")]
    InvalidHeaders,
    #[error("invalid websocket upgrade request")]
    InvalidUpgrade,
}
