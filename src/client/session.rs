use crate::endpoint::Endpoint;

use mio::net::TcpStream;
use mio::Interest;
use std::io::{self, ErrorKind, Read, Write};
use std::net::SocketAddr;
use std::time::Instant;
use tracing::{trace, warn};

/// The state of the single logical connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

/// Per-connection state owned by the event loop.
///
/// Handlers receive `&mut Session` in every hook. They can queue output,
/// ask for the connection to be dropped and look at the current state, but
/// the socket itself stays private to the loop.
#[derive(Debug)]
pub struct Session {
    state: ConnectionState,
    // Some iff state != Disconnected
    stream: Option<TcpStream>,
    endpoint: Option<Endpoint>,
    peer_addr: Option<SocketAddr>,
    output: Vec<u8>,
    host_count: usize,
    connect_started: Option<Instant>,
    last_data_received: Option<Instant>,
    drop_requested: bool,
    debug: u8,
}

// ============================================================================
// Public Methods
// ============================================================================

impl Session {
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn is_connected(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// The endpoint of the current or most recent connect attempt.
    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    /// The resolved address of the current or most recent connect attempt.
    pub fn peer_addr(&self) -> Option<SocketAddr> {
        self.peer_addr
    }

    /// Number of configured endpoints.
    pub fn host_count(&self) -> usize {
        self.host_count
    }

    /// When data was last read from the socket, or when the current
    /// connection was established if nothing has been read yet.
    ///
    /// The loop does not enforce read timeouts; handlers that need one can
    /// compare this against `now` in [`LineHandler::on_tick`](crate::LineHandler::on_tick).
    pub fn last_data_received(&self) -> Option<Instant> {
        self.last_data_received
    }

    /// When the current connect attempt started.
    pub fn connect_started(&self) -> Option<Instant> {
        self.connect_started
    }

    /// Queues bytes for transmission.
    ///
    /// Safe to call in any state. Whether bytes queued while disconnected
    /// survive until the next connection depends on the
    /// `retain_output_on_reconnect` setting.
    pub fn send_data(&mut self, data: &[u8]) {
        self.output.extend_from_slice(data);
    }

    /// Number of queued bytes not yet written to the socket.
    pub fn pending_output(&self) -> usize {
        self.output.len()
    }

    /// Asks the loop to drop the connection once the current hook returns.
    ///
    /// Ignored while disconnected.
    pub fn drop_connection(&mut self) {
        if self.state != ConnectionState::Disconnected {
            self.drop_requested = true;
        }
    }

    pub fn debug_level(&self) -> u8 {
        self.debug
    }

    /// True iff a live connection is eligible for read events.
    pub fn want_read(&self) -> bool {
        self.state == ConnectionState::Connected
    }

    /// True iff there is queued output and a socket to write it to.
    pub fn want_write(&self) -> bool {
        self.stream.is_some() && !self.output.is_empty()
    }

    /// True while a socket is held, i.e. in `Connecting` and `Connected`.
    pub fn has_socket(&self) -> bool {
        self.stream.is_some()
    }
}

// ============================================================================
// Internal Methods
// ============================================================================

impl Session {
    pub(crate) fn new(debug: u8) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            stream: None,
            endpoint: None,
            peer_addr: None,
            output: Vec::new(),
            host_count: 0,
            connect_started: None,
            last_data_received: None,
            drop_requested: false,
            debug,
        }
    }

    pub(crate) fn set_debug(&mut self, debug: u8) {
        self.debug = debug;
    }

    pub(crate) fn set_host_count(&mut self, host_count: usize) {
        self.host_count = host_count;
    }

    pub(crate) fn stream_mut(&mut self) -> Option<&mut TcpStream> {
        self.stream.as_mut()
    }

    pub(crate) fn stream(&self) -> Option<&TcpStream> {
        self.stream.as_ref()
    }

    pub(crate) fn drop_pending(&self) -> bool {
        self.drop_requested
    }

    pub(crate) fn take_drop_request(&mut self) -> bool {
        std::mem::take(&mut self.drop_requested)
    }

    pub(crate) fn clear_output(&mut self) {
        self.output.clear();
    }

    // The interest to register for the live socket, if any. A connecting
    // socket signals completion by becoming writable.
    pub(crate) fn interest(&self) -> Option<Interest> {
        let read = self.want_read();
        let write = self.want_write() || self.state == ConnectionState::Connecting;
        match (read, write) {
            (true, true) => Some(Interest::READABLE | Interest::WRITABLE),
            (true, false) => Some(Interest::READABLE),
            (false, true) => Some(Interest::WRITABLE),
            (false, false) => None,
        }
    }

    pub(crate) fn record_attempt(&mut self, endpoint: Endpoint, peer_addr: Option<SocketAddr>) {
        self.endpoint = Some(endpoint);
        self.peer_addr = peer_addr;
    }

    pub(crate) fn begin_connecting(
        &mut self,
        stream: TcpStream,
        endpoint: Endpoint,
        peer_addr: SocketAddr,
        now: Instant,
    ) {
        debug_assert!(self.stream.is_none(), "previous socket was not released");
        self.stream = Some(stream);
        self.endpoint = Some(endpoint);
        self.peer_addr = Some(peer_addr);
        self.state = ConnectionState::Connecting;
        self.connect_started = Some(now);
        self.drop_requested = false;
    }

    pub(crate) fn mark_connected(&mut self, now: Instant) {
        self.state = ConnectionState::Connected;
        self.connect_started = None;
        self.last_data_received = Some(now);
    }

    pub(crate) fn mark_data_received(&mut self, now: Instant) {
        self.last_data_received = Some(now);
    }

    // Releases the socket and returns it so the caller can deregister it
    // before it is closed.
    pub(crate) fn release(&mut self) -> Option<TcpStream> {
        self.state = ConnectionState::Disconnected;
        self.connect_started = None;
        self.drop_requested = false;
        self.stream.take()
    }

    pub(crate) fn read_into(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.stream.as_mut() {
            Some(stream) => stream.read(buf),
            None => Err(io::Error::from(ErrorKind::NotConnected)),
        }
    }

    // Writes as much queued output as the socket accepts and removes exactly
    // the written prefix, also when the write loop ends in an error.
    pub(crate) fn flush(&mut self) -> io::Result<usize> {
        let Some(stream) = self.stream.as_mut() else {
            return Ok(0);
        };

        let mut send_pos = 0;
        let mut result = Ok(());
        while send_pos < self.output.len() {
            match stream.write(&self.output[send_pos..]) {
                Ok(0) => {
                    warn!(
                        remaining = self.output.len() - send_pos,
                        "Write to socket returned 0"
                    );
                    break;
                }
                Ok(sz) => {
                    send_pos += sz;
                    if self.debug >= 2 {
                        trace!(
                            len = sz,
                            remaining = self.output.len() - send_pos,
                            "Wrote to socket"
                        );
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => break,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    result = Err(err);
                    break;
                }
            }
        }

        self.output.drain(..send_pos);
        result.map(|()| send_pos)
    }

    pub(crate) fn trace_line(&self, line: &[u8]) {
        if self.debug >= 2 {
            trace!(len = line.len(), line = %String::from_utf8_lossy(line), "Received line");
        }
    }
}
