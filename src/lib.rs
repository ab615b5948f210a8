//! linecomm - a reusable client core for line-oriented TCP protocols
//!
//! linecomm owns the connection lifecycle of a single logical connection:
//! it fails over across a list of candidate `host:port` endpoints, connects
//! without blocking, detects disconnects and reconnects. All socket I/O is
//! multiplexed through one single-threaded mio event loop, inbound bytes are
//! framed into terminator-delimited lines, and protocol-specific behavior is
//! plugged in through the [`LineHandler`] hooks.
//!
//! The wire protocol itself is left entirely to the handler.

// Internal-only modules
pub(crate) mod client;
pub(crate) mod config;
pub(crate) mod error;

pub mod endpoint;
pub mod framing;
pub mod handler;

// These are the intended public API
pub use client::{ClientInterface, ConnectionState, LineClient, Session};
pub use endpoint::{Endpoint, EndpointList};
pub use error::Error;
pub use framing::InputBuffer;
pub use handler::{DropReason, LineHandler};

/// Convenient re-exports of commonly used types.
pub mod prelude {
    pub use crate::client::{ClientInterface, ConnectionState, LineClient, Session};
    pub use crate::endpoint::{Endpoint, EndpointList};
    pub use crate::error::Error;
    pub use crate::framing::InputBuffer;
    pub use crate::handler::{DropReason, LineHandler};
}
