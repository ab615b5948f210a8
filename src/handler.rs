//! Extension hooks for protocol implementations.
//!
//! A protocol sits on top of the transport by implementing [`LineHandler`]
//! and handing it to a [`LineClient`](crate::LineClient). The client owns the
//! socket and buffers; the handler only sees a [`Session`] through which it can
//! queue output, request a drop, and inspect connection state.
//!
//! # Example
//!
//! ```rust,no_run
//! use linecomm::prelude::*;
//! use std::sync::atomic::AtomicBool;
//! use std::time::Instant;
//!
//! struct Printer;
//!
//! impl LineHandler for Printer {
//!     fn on_connected(&mut self, session: &mut Session, _now: Instant) {
//!         session.send_data(b"HELLO\n");
//!     }
//!
//!     fn on_line(&mut self, _session: &mut Session, line: &[u8], _now: Instant) {
//!         println!("{}", String::from_utf8_lossy(line));
//!     }
//! }
//!
//! # fn main() -> Result<(), linecomm::Error> {
//! let mut client = LineClient::new(&config::Config::default(), Printer)?;
//! client.add_host("127.0.0.1:51000")?;
//! client.run_loop(&AtomicBool::new(false))?;
//! # Ok(())
//! # }
//! ```

use crate::client::Session;
use crate::framing::InputBuffer;
use std::fmt;
use std::time::Instant;

/// Why a session went back to [`ConnectionState::Disconnected`](crate::ConnectionState::Disconnected).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DropReason {
    /// The connect attempt was refused or failed.
    ConnectFailed,
    /// The connect attempt exceeded the connect timeout.
    ConnectTimeout,
    /// The peer closed the connection (read returned zero bytes).
    PeerClosed,
    /// A read or write failed, e.g. connection reset or broken pipe.
    SocketError,
    /// The input buffer grew past its cap without a complete line.
    InputOverflow,
    /// The handler or a [`ClientInterface`](crate::ClientInterface) asked for it.
    Requested,
    /// The loop is stopping.
    Shutdown,
}

impl fmt::Display for DropReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            DropReason::ConnectFailed => "connect failed",
            DropReason::ConnectTimeout => "connect timeout",
            DropReason::PeerClosed => "peer closed",
            DropReason::SocketError => "socket error",
            DropReason::InputOverflow => "input overflow",
            DropReason::Requested => "requested",
            DropReason::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Protocol hooks invoked by the event loop.
///
/// Every method has a no-op default. The client performs its own bookkeeping
/// (buffer resets, closing the socket, framing) around each call, so an
/// implementation only adds protocol behavior and cannot skip the base
/// behavior.
pub trait LineHandler {
    /// Called once per tick interval, whatever the connection state.
    ///
    /// Check [`Session::state`] before sending. Back-off, keepalives and read
    /// timeouts based on [`Session::last_data_received`] belong here.
    fn on_tick(&mut self, _session: &mut Session, _now: Instant) {}

    /// Called once per `Connecting -> Connected` transition, after the
    /// buffers have been reset. Protocol handshakes are sent from here.
    fn on_connected(&mut self, _session: &mut Session, _now: Instant) {}

    /// Called once per transition into `Disconnected`, and once per connect
    /// attempt that fails before a socket could be waited on (for example an
    /// unresolvable host), with [`DropReason::ConnectFailed`].
    ///
    /// The socket is already closed when this runs.
    fn on_dropped(&mut self, _session: &mut Session, _reason: DropReason, _now: Instant) {}

    /// Called once per framed line, terminator stripped.
    fn on_line(&mut self, _session: &mut Session, _line: &[u8], _now: Instant) {}

    /// Scans freshly received input.
    ///
    /// The default splits the buffer into lines and calls [`Self::on_line`]
    /// for each, in order. Override it for protocols that are not line
    /// framed, consuming bytes with [`InputBuffer::consume`].
    fn process_input(&mut self, session: &mut Session, input: &mut InputBuffer, now: Instant) {
        while let Some(line) = input.next_line() {
            session.trace_line(&line);
            self.on_line(session, &line, now);
        }
    }
}

impl<H: LineHandler + ?Sized> LineHandler for Box<H> {
    fn on_tick(&mut self, session: &mut Session, now: Instant) {
        (**self).on_tick(session, now)
    }

    fn on_connected(&mut self, session: &mut Session, now: Instant) {
        (**self).on_connected(session, now)
    }

    fn on_dropped(&mut self, session: &mut Session, reason: DropReason, now: Instant) {
        (**self).on_dropped(session, reason, now)
    }

    fn on_line(&mut self, session: &mut Session, line: &[u8], now: Instant) {
        (**self).on_line(session, line, now)
    }

    fn process_input(&mut self, session: &mut Session, input: &mut InputBuffer, now: Instant) {
        (**self).process_input(session, input, now)
    }
}
