use std::time::Duration;
use thiserror::Error;

/// The error type for linecomm operations.
///
/// Only a few of these ever leave [`LineClient::run_loop`](crate::LineClient::run_loop).
/// Connection-level failures (refused connects, resets, peer closes, connect
/// timeouts) are recovered inside the loop and reported to the handler as a
/// [`DropReason`](crate::DropReason) rather than as errors.
#[derive(Error, Debug)]
pub enum Error {
    // ============================================================================
    // I/O and Networking Errors
    // ============================================================================

    /// Low-level I/O error from the operating system.
    ///
    /// Returned from `run_loop` only when the failure is not recoverable,
    /// for example when the poller itself fails or the process has run out
    /// of file descriptors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The host string could not be parsed as `host:port`.
    #[error("Invalid endpoint '{0}', expected host:port")]
    InvalidEndpoint(String),

    /// A connect attempt was made while the endpoint list is empty.
    #[error("No endpoints configured")]
    NoEndpointsConfigured,

    /// A connect attempt stayed in the connecting state for too long.
    #[error("Connect to {endpoint} did not complete within {timeout:?}")]
    ConnectTimeoutExceeded {
        /// The endpoint that was being connected to.
        endpoint: String,
        /// The configured connect timeout.
        timeout: Duration,
    },

    /// The input buffer grew past its cap without yielding a complete line.
    #[error("Input buffer holds {len} bytes, more than the allowed {max}")]
    InputOverflow {
        /// Bytes currently buffered.
        len: usize,
        /// The configured maximum.
        max: usize,
    },

    /// A [`ClientInterface`](crate::ClientInterface) was used after its
    /// [`LineClient`](crate::LineClient) was dropped.
    #[error("Event loop terminated unexpectedly")]
    EventLoopTerminated,

    // ============================================================================
    // Configuration Errors
    // ============================================================================

    /// Configuration file parsing or key lookup failed.
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// A configuration value was present but not usable.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
