//! Error hierarchy for the vane broker.
//!
//! Control-path misuse (start/stop/inject) surfaces synchronously as a
//! [`ServerError`]. Session failures never reach this type: the session
//! executor owns them.

use thiserror::Error;

/// Errors surfaced by the server controller to its caller.
#[derive(Debug, Error)]
pub enum ServerError {
    /// `start` was called while the server was already running.
    #[error("the server is already started")]
    AlreadyRunning,

    /// A connection was injected while the server was stopped.
    #[error("the server is not started")]
    ServerNotStarted,

    /// The injected client identifier or transport handle is unusable.
    #[error("invalid connection: {0}")]
    InvalidConnection(String),

    /// The server options failed validation.
    #[error("invalid server options: {0}")]
    InvalidOptions(#[from] OptionsError),

    /// The transport adapter refused to start.
    #[error("transport adapter failed to start: {0}")]
    Transport(#[from] TransportError),
}

impl ServerError {
    /// Short classification string for logging/metrics.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::AlreadyRunning => "already_running",
            Self::ServerNotStarted => "server_not_started",
            Self::InvalidConnection(_) => "invalid_connection",
            Self::InvalidOptions(_) => "invalid_options",
            Self::Transport(_) => "transport",
        }
    }
}

/// Errors raised by a transport adapter.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The listening endpoint could not be bound.
    #[error("failed to bind {endpoint}: {source}")]
    Bind {
        /// `host:port` that was requested.
        endpoint: String,
        /// Underlying I/O failure.
        #[source]
        source: std::io::Error,
    },

    /// `start` was called twice without an intervening `stop`.
    #[error("transport adapter is already accepting connections")]
    AlreadyAccepting,

    /// Any other adapter-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// Reasons [`ServerOptions::validate`](crate::ServerOptions::validate) rejects a configuration.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum OptionsError {
    /// Neither the default nor the TLS endpoint is enabled.
    #[error("no endpoint is enabled")]
    NoEndpoint,

    /// The TLS endpoint is enabled but has no certificate.
    #[error("tls endpoint enabled without a certificate path")]
    MissingCertificate,

    /// `connection_backlog` is zero.
    #[error("connection backlog must be greater than zero")]
    ZeroBacklog,

    /// `communication_timeout_ms` is zero.
    #[error("communication timeout must be greater than zero")]
    ZeroTimeout,
}

/// Result type for controller operations.
pub type Result<T> = std::result::Result<T, ServerError>;
