//! Error taxonomy.
//!
//! Per the error handling design: configuration errors are non-fatal (the
//! offending rule is skipped), protocol/resolution/network errors are
//! logged and the affected connection/request is dropped. Nothing here
//! ever panics on an expected failure.

use thiserror::Error;

/// Taxonomy of errors produced by the core proxy/resolver subsystems.
#[derive(Debug, Error)]
pub enum ProxyError {
    /// Malformed configuration, unknown action verb, or a missing
    /// required parameter. The offending rule is skipped at compile time;
    /// the rest of the system still starts.
    #[error("config error: {0}")]
    Config(String),

    /// ClientHello framing violation or SNI parse failure.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Upstream DNS unreachable, malformed answer, or no A record.
    #[error("resolution error: {0}")]
    Resolution(String),

    /// Dial timeout or read/write failure on a forwarded socket.
    #[error("network error: {0}")]
    Network(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ProxyError>;
