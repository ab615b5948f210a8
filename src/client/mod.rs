//! The connection driver.
//!
//! [`LineClient`] owns one logical connection. It walks a list of candidate
//! endpoints round robin, connects without blocking, frames received bytes
//! into lines and drains queued output, all from a single-threaded mio event
//! loop. Protocol behavior is supplied by a [`LineHandler`].

mod interface;
mod session;

pub(crate) use interface::ClientRequest;
pub use interface::ClientInterface;
pub use session::{ConnectionState, Session};

use crate::config::{
    get_namespaced_bool, get_namespaced_string, get_namespaced_strings, get_namespaced_u64,
    get_namespaced_usize,
};
use crate::endpoint::{Endpoint, EndpointList};
use crate::error::Error;
use crate::framing::InputBuffer;
use crate::handler::{DropReason, LineHandler};
use ::config::Config;

use mio::net::TcpStream;
use mio::{Events, Poll, Token, Waker};
use std::io::{self, ErrorKind};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{
    mpsc::{channel, Receiver, Sender},
    Arc,
};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, trace, warn};

// Poll tokens. There is never more than one socket, so it has a fixed token.
const WAKE_ID: usize = 0;
const SOCKET_ID: usize = 1;

const DEFAULT_CONNECT_TIMEOUT_MS: u64 = 5_000;
const DEFAULT_TICK_INTERVAL_MS: u64 = 10;
const DEFAULT_POLL_TIMEOUT_MS: u64 = 10;
const DEFAULT_MAX_READ_SIZE: usize = 64 * 1024;
const DEFAULT_MAX_INPUT_SIZE: usize = 1024 * 1024;
const DEFAULT_POLL_CAPACITY: usize = 16;
const DEFAULT_LINE_TERMINATOR: &str = "\n";

// Reads performed per loop iteration before ticks, flushes and the stop
// flag get their turn.
const READS_PER_ITERATION: usize = 4;

// Internal data type for read_input
enum ReadOutcome {
    Open,
    Closed(DropReason),
}

/// Client for a line-oriented TCP protocol.
///
/// Not thread-safe - use [`ClientInterface`] to send data or stop the loop
/// from other threads.
///
/// # Configuration Keys
///
/// - `hosts`: list of `host:port` strings (default: empty)
/// - `connect_timeout_ms`: limit on the connecting state (default: 5000)
/// - `tick_interval_ms`: period of [`LineHandler::on_tick`] (default: 10)
/// - `poll_timeout_ms`: upper bound on one poll wait (default: 10)
/// - `max_read_size`: bytes requested per read (default: 65536)
/// - `max_input_size`: cap on unterminated input (default: 1048576)
/// - `line_terminator`: line delimiter (default: `"\n"`)
/// - `retain_output_on_reconnect`: keep queued output across drops (default: false)
/// - `poll_capacity`: mio event capacity (default: 16)
/// - `debug`: initial debug level (default: 0)
///
/// # Example
///
/// ```toml
/// hosts = ["sim-1:51000", "sim-2:51000"]
/// connect_timeout_ms = 2000
/// line_terminator = "\r\n"
/// ```
pub struct LineClient<H: LineHandler> {
    name: String,
    handler: H,
    session: Session,
    input: InputBuffer,
    endpoints: EndpointList,
    poll: Poll,
    poll_capacity: usize,
    registered: Option<mio::Interest>,
    waker: Arc<Waker>,
    sender: Sender<ClientRequest>,
    receiver: Receiver<ClientRequest>,
    stop_requested: Arc<AtomicBool>,
    running: Arc<AtomicBool>,
    read_buf: Vec<u8>,
    connect_timeout: Duration,
    tick_interval: Duration,
    poll_timeout: Duration,
    retain_output_on_reconnect: bool,
    last_tick: Option<Instant>,
    warned_no_endpoints: bool,
    // Data may still be waiting on the socket after the read budget ran
    // out. No new readiness edge is coming for it.
    read_pending: bool,
}

// ============================================================================
// Constructors
// ============================================================================

impl<H: LineHandler> LineClient<H> {
    /// Creates a new client based on configuration.
    pub fn new(config: &Config, handler: H) -> Result<Self, Error> {
        Self::new_named(config, "", handler)
    }

    /// Creates a new named client with configuration namespacing.
    ///
    /// Configuration lookup follows this priority:
    /// 1. `{name}.{key}` (e.g., `simulator.connect_timeout_ms`)
    /// 2. `{key}` (e.g., `connect_timeout_ms`)
    /// 3. Hard-coded default
    ///
    /// # Errors
    ///
    /// Returns an error if a key has the wrong type, a host string is not
    /// `host:port`, a size or interval is zero, the line terminator is empty,
    /// or the poller cannot be created.
    pub fn new_named(config: &Config, name: &str, handler: H) -> Result<Self, Error> {
        let connect_timeout = Duration::from_millis(get_namespaced_u64(
            config,
            name,
            "connect_timeout_ms",
            DEFAULT_CONNECT_TIMEOUT_MS,
        )?);
        let tick_interval = Duration::from_millis(get_namespaced_u64(
            config,
            name,
            "tick_interval_ms",
            DEFAULT_TICK_INTERVAL_MS,
        )?);
        let poll_timeout = Duration::from_millis(get_namespaced_u64(
            config,
            name,
            "poll_timeout_ms",
            DEFAULT_POLL_TIMEOUT_MS,
        )?);
        let max_read_size =
            get_namespaced_usize(config, name, "max_read_size", DEFAULT_MAX_READ_SIZE)?;
        let max_input_size =
            get_namespaced_usize(config, name, "max_input_size", DEFAULT_MAX_INPUT_SIZE)?;
        let poll_capacity =
            get_namespaced_usize(config, name, "poll_capacity", DEFAULT_POLL_CAPACITY)?;
        let terminator =
            get_namespaced_string(config, name, "line_terminator", DEFAULT_LINE_TERMINATOR)?;
        let retain_output_on_reconnect =
            get_namespaced_bool(config, name, "retain_output_on_reconnect", false)?;
        let debug = get_namespaced_u64(config, name, "debug", 0)?;
        let hosts = get_namespaced_strings(config, name, "hosts")?;

        if connect_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "connect_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if tick_interval.is_zero() {
            return Err(Error::InvalidConfig(
                "tick_interval_ms must be greater than zero".to_string(),
            ));
        }
        if poll_timeout.is_zero() {
            return Err(Error::InvalidConfig(
                "poll_timeout_ms must be greater than zero".to_string(),
            ));
        }
        if max_read_size == 0 || poll_capacity == 0 {
            return Err(Error::InvalidConfig(
                "max_read_size and poll_capacity must be greater than zero".to_string(),
            ));
        }

        let input = InputBuffer::new(terminator.into_bytes(), max_input_size)?;

        let mut endpoints = EndpointList::new();
        for host in &hosts {
            endpoints.add_host(host)?;
        }

        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), Token(WAKE_ID))?);
        let (sender, receiver) = channel();

        let mut session = Session::new(u8::try_from(debug).unwrap_or(u8::MAX));
        session.set_host_count(endpoints.len());

        Ok(Self {
            name: name.to_string(),
            handler,
            session,
            input,
            endpoints,
            poll,
            poll_capacity,
            registered: None,
            waker,
            sender,
            receiver,
            stop_requested: Arc::new(AtomicBool::new(false)),
            running: Arc::new(AtomicBool::new(false)),
            read_buf: vec![0; max_read_size],
            connect_timeout,
            tick_interval,
            poll_timeout,
            retain_output_on_reconnect,
            last_tick: None,
            warned_no_endpoints: false,
            read_pending: false,
        })
    }
}

// ============================================================================
// Public Methods
// ============================================================================

impl<H: LineHandler> LineClient<H> {
    /// Parses `host:port` and appends it to the endpoint list.
    ///
    /// No deduplication is done and insertion order is kept. The host name
    /// is resolved on each connect attempt, on the loop thread, with the
    /// blocking system resolver. A slow lookup holds up ticks and stop
    /// requests until it returns, so prefer IP literals where latency
    /// matters.
    pub fn add_host(&mut self, host: &str) -> Result<(), Error> {
        self.add_endpoint(host.parse()?);
        Ok(())
    }

    /// Appends an already parsed endpoint.
    pub fn add_endpoint(&mut self, endpoint: Endpoint) {
        debug!(%endpoint, "Adding endpoint");
        self.endpoints.push(endpoint);
        self.session.set_host_count(self.endpoints.len());
    }

    pub fn host_count(&self) -> usize {
        self.endpoints.len()
    }

    pub fn endpoints(&self) -> &EndpointList {
        &self.endpoints
    }

    /// Sets the diagnostic verbosity. Has no effect on protocol behavior.
    ///
    /// - 0: lifecycle events only
    /// - 1: adds per-read and per-write events
    /// - 2: adds per-line events
    pub fn set_debug(&mut self, level: u8) {
        self.session.set_debug(level);
    }

    pub fn debug_level(&self) -> u8 {
        self.session.debug_level()
    }

    /// Queues bytes for transmission. See [`Session::send_data`].
    pub fn send_data(&mut self, data: &[u8]) {
        self.session.send_data(data);
    }

    /// Asks the loop to drop the current connection.
    pub fn drop_connection(&mut self) {
        self.session.drop_connection();
    }

    pub fn state(&self) -> ConnectionState {
        self.session.state()
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn handler(&self) -> &H {
        &self.handler
    }

    pub fn handler_mut(&mut self) -> &mut H {
        &mut self.handler
    }

    pub fn into_handler(self) -> H {
        self.handler
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    /// Gets a thread-safe interface for controlling the loop from other
    /// threads.
    pub fn get_client_interface(&self) -> ClientInterface {
        ClientInterface {
            sender: self.sender.clone(),
            waker: self.waker.clone(),
            stop_requested: self.stop_requested.clone(),
            running: self.running.clone(),
        }
    }

    /// Runs the event loop until `stop` is set or a stop is requested
    /// through a [`ClientInterface`].
    ///
    /// While running, the client stays connected to one of its endpoints as
    /// much as it can, moving on to the next endpoint whenever a connect
    /// attempt fails or times out and whenever an established connection is
    /// lost. The stop flag is checked at least once per poll timeout. On
    /// return any open socket has been closed.
    ///
    /// Only returns unrecoverable errors, such as a failing poller or file
    /// descriptor exhaustion. Everything else is handled by dropping the
    /// connection and reconnecting.
    #[instrument(name = "run_loop", skip_all, fields(client = %self.name))]
    pub fn run_loop(&mut self, stop: &AtomicBool) -> Result<(), Error> {
        self.running.store(true, Ordering::Release);
        info!(hosts = self.endpoints.len(), "Event loop started");

        let result = self.run_until(stop);
        if let Err(err) = &result {
            error!(%err, "Event loop failed");
        }

        self.drop_session(DropReason::Shutdown, Instant::now());
        self.stop_requested.store(false, Ordering::Release);
        self.running.store(false, Ordering::Release);
        info!("Event loop stopped");
        result
    }
}

// ============================================================================
// Event Loop
// ============================================================================

impl<H: LineHandler> LineClient<H> {
    fn run_until(&mut self, stop: &AtomicBool) -> Result<(), Error> {
        let mut events = Events::with_capacity(self.poll_capacity);
        while !self.should_stop(stop) {
            self.iterate(&mut events)?;
        }
        Ok(())
    }

    fn should_stop(&self, stop: &AtomicBool) -> bool {
        stop.load(Ordering::Acquire) || self.stop_requested.load(Ordering::Acquire)
    }

    fn iterate(&mut self, events: &mut Events) -> Result<(), Error> {
        self.process_interface_requests();

        if self.session.state() == ConnectionState::Disconnected {
            self.start_connect(Instant::now())?;
        }

        self.update_registration()?;

        let timeout = self.wait_timeout(Instant::now());
        match self.poll.poll(events, Some(timeout)) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::Interrupted => {}
            Err(err) => return Err(err.into()),
        }

        let now = Instant::now();
        let mut readable = self.read_pending;
        let mut writable = false;
        for event in events.iter() {
            if event.token() == Token(SOCKET_ID) {
                // Errors and hang-ups are reported alongside the readiness
                // bits; the read or write attempt surfaces the actual cause.
                readable |= event.is_readable() || event.is_read_closed() || event.is_error();
                writable |= event.is_writable() || event.is_write_closed() || event.is_error();
            }
        }

        if self.session.state() == ConnectionState::Connecting
            && (readable || writable)
            && self.finish_connect(now)
        {
            // The readiness edge that completed the connect may already
            // cover data the server sent straight away.
            readable = true;
            writable = true;
        }

        if self.session.state() == ConnectionState::Connected && readable {
            if let ReadOutcome::Closed(reason) = self.read_input(now) {
                self.drop_session(reason, now);
            }
        }

        if self.session.state() == ConnectionState::Connected && writable {
            self.flush_output(now);
        }

        self.check_connect_timeout(now);

        if self.tick_due(now) {
            self.last_tick = Some(now);
            self.handler.on_tick(&mut self.session, now);
        }

        if self.session.take_drop_request() {
            self.drop_session(DropReason::Requested, now);
        }

        Ok(())
    }

    // The poll wait never exceeds the poll timeout and wakes up in time for
    // the next tick and the connect deadline. Leftover input is read without
    // waiting.
    fn wait_timeout(&self, now: Instant) -> Duration {
        if self.read_pending {
            return Duration::ZERO;
        }
        let mut timeout = self.poll_timeout;
        if let Some(last_tick) = self.last_tick {
            let next_tick = last_tick + self.tick_interval;
            timeout = timeout.min(next_tick.saturating_duration_since(now));
        } else {
            timeout = Duration::ZERO;
        }
        if let Some(started) = self.session.connect_started() {
            let deadline = started + self.connect_timeout;
            timeout = timeout.min(deadline.saturating_duration_since(now));
        }
        timeout
    }

    fn endpoint_label(&self) -> String {
        self.session
            .endpoint()
            .map(ToString::to_string)
            .unwrap_or_default()
    }

    fn tick_due(&self, now: Instant) -> bool {
        match self.last_tick {
            Some(last_tick) => now.saturating_duration_since(last_tick) >= self.tick_interval,
            None => true,
        }
    }

    fn process_interface_requests(&mut self) {
        let requests: Vec<ClientRequest> = self.receiver.try_iter().collect();

        for request in requests {
            match request {
                ClientRequest::SendData { data } => self.session.send_data(&data),
                ClientRequest::DropConnection => self.session.drop_connection(),
                ClientRequest::AddHost { endpoint } => self.add_endpoint(endpoint),
                ClientRequest::SetDebug { level } => self.set_debug(level),
            }
        }

        // A drop requested from another thread is carried out before the
        // next connect attempt.
        if self.session.take_drop_request() {
            self.drop_session(DropReason::Requested, Instant::now());
        }
    }

    fn update_registration(&mut self) -> Result<(), Error> {
        let desired = self.session.interest();
        if desired == self.registered {
            return Ok(());
        }
        if let (Some(stream), Some(interest)) = (self.session.stream_mut(), desired) {
            self.poll
                .registry()
                .reregister(stream, Token(SOCKET_ID), interest)?;
            self.registered = Some(interest);
        }
        Ok(())
    }
}

// ============================================================================
// Connection State Machine
// ============================================================================

impl<H: LineHandler> LineClient<H> {
    // Disconnected -> Connecting. An attempt that fails before there is a
    // socket to wait on leaves the state at Disconnected, is reported as
    // ConnectFailed, and the next iteration moves on to the next endpoint.
    #[instrument(skip(self, now))]
    fn start_connect(&mut self, now: Instant) -> Result<(), Error> {
        let endpoint = match self.endpoints.next_endpoint() {
            Ok(endpoint) => endpoint,
            Err(err) => {
                if !self.warned_no_endpoints {
                    warn!(%err, "Cannot connect, waiting for endpoints");
                    self.warned_no_endpoints = true;
                }
                return Ok(());
            }
        };
        self.warned_no_endpoints = false;

        let peer_addr = match endpoint.resolve() {
            Ok(addr) => addr,
            Err(err) => {
                warn!(%endpoint, %err, "Could not resolve endpoint");
                self.fail_attempt(endpoint, None, now);
                return Ok(());
            }
        };

        let mut stream = match TcpStream::connect(peer_addr) {
            Ok(stream) => stream,
            Err(err) if is_resource_exhaustion(&err) => {
                error!(%endpoint, %peer_addr, ?err, "Cannot create socket");
                return Err(err.into());
            }
            Err(err) => {
                if err.kind() == ErrorKind::ConnectionRefused {
                    info!(%endpoint, %peer_addr, "Connection refused");
                } else {
                    warn!(%endpoint, %peer_addr, ?err, "Connect failed immediately");
                }
                self.fail_attempt(endpoint, Some(peer_addr), now);
                return Ok(());
            }
        };
        if let Err(err) = stream.set_nodelay(true) {
            debug!(?err, "Could not set TCP_NODELAY");
        }

        let interest = mio::Interest::WRITABLE;
        self.poll
            .registry()
            .register(&mut stream, Token(SOCKET_ID), interest)?;
        self.registered = Some(interest);

        info!(%endpoint, %peer_addr, "Connecting");
        self.session.begin_connecting(stream, endpoint, peer_addr, now);
        Ok(())
    }

    fn fail_attempt(&mut self, endpoint: Endpoint, peer_addr: Option<SocketAddr>, now: Instant) {
        self.session.record_attempt(endpoint, peer_addr);
        self.handler
            .on_dropped(&mut self.session, DropReason::ConnectFailed, now);
    }

    // Connecting -> Connected, or Connecting -> Disconnected if the
    // handshake failed. Returns true if the connection was established.
    fn finish_connect(&mut self, now: Instant) -> bool {
        let Some(stream) = self.session.stream() else {
            return false;
        };

        let failure = match stream.take_error() {
            Ok(Some(err)) | Err(err) => Some(err),
            Ok(None) => match stream.peer_addr() {
                Ok(_) => None,
                Err(err) if err.kind() == ErrorKind::NotConnected => {
                    trace!("Connect still in progress");
                    return false;
                }
                Err(err) => Some(err),
            },
        };

        let endpoint = self.endpoint_label();
        if let Some(err) = failure {
            if err.kind() == ErrorKind::ConnectionRefused {
                info!(%endpoint, "Connection refused");
            } else {
                warn!(%endpoint, ?err, "Connection establishment failed");
            }
            self.drop_session(DropReason::ConnectFailed, now);
            return false;
        }

        info!(%endpoint, "Connection established");
        self.input.clear();
        if !self.retain_output_on_reconnect {
            self.session.clear_output();
        }
        self.session.mark_connected(now);
        self.handler.on_connected(&mut self.session, now);
        true
    }

    fn check_connect_timeout(&mut self, now: Instant) {
        let Some(started) = self.session.connect_started() else {
            return;
        };
        if now.saturating_duration_since(started) < self.connect_timeout {
            return;
        }
        let err = Error::ConnectTimeoutExceeded {
            endpoint: self.endpoint_label(),
            timeout: self.connect_timeout,
        };
        warn!(%err, "Abandoning connect attempt");
        self.drop_session(DropReason::ConnectTimeout, now);
    }

    // Any state -> Disconnected. The socket is deregistered and closed
    // before the handler hears about it.
    fn drop_session(&mut self, reason: DropReason, now: Instant) {
        if self.session.state() == ConnectionState::Disconnected {
            return;
        }

        if let Some(mut stream) = self.session.release() {
            if let Err(err) = self.poll.registry().deregister(&mut stream) {
                warn!(?err, "Failed to deregister socket");
            }
            drop(stream);
        }
        self.registered = None;
        self.read_pending = false;
        self.input.clear();
        if !self.retain_output_on_reconnect {
            self.session.clear_output();
        }

        let endpoint = self.endpoint_label();
        info!(%endpoint, %reason, "Connection dropped");
        self.handler.on_dropped(&mut self.session, reason, now);
    }
}

// ============================================================================
// Connection I/O
// ============================================================================

impl<H: LineHandler> LineClient<H> {
    // Reads until the socket would block or the per-iteration budget is
    // spent, running the input-scanning hook after every successful read.
    fn read_input(&mut self, now: Instant) -> ReadOutcome {
        self.read_pending = false;
        let mut reads = 0;
        loop {
            if reads == READS_PER_ITERATION {
                self.read_pending = true;
                return ReadOutcome::Open;
            }
            match self.session.read_into(&mut self.read_buf) {
                Ok(0) => {
                    info!("Connection closed by peer");
                    return ReadOutcome::Closed(DropReason::PeerClosed);
                }
                Ok(sz) => {
                    reads += 1;
                    if self.session.debug_level() >= 1 {
                        debug!(len = sz, "Received data");
                    }
                    self.session.mark_data_received(now);
                    self.input.extend(&self.read_buf[..sz]);
                    self.handler
                        .process_input(&mut self.session, &mut self.input, now);

                    if let Err(err) = self.input.check_overflow() {
                        warn!(%err, "Dropping connection");
                        return ReadOutcome::Closed(DropReason::InputOverflow);
                    }
                    if self.session.drop_pending() {
                        return ReadOutcome::Open;
                    }
                }
                Err(err) if err.kind() == ErrorKind::WouldBlock => return ReadOutcome::Open,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => {
                    log_socket_error(&err, "Error reading from socket");
                    return ReadOutcome::Closed(DropReason::SocketError);
                }
            }
        }
    }

    fn flush_output(&mut self, now: Instant) {
        if self.session.pending_output() == 0 {
            return;
        }
        match self.session.flush() {
            Ok(written) => {
                if self.session.debug_level() >= 1 {
                    debug!(
                        len = written,
                        remaining = self.session.pending_output(),
                        "Sent data"
                    );
                }
            }
            Err(err) => {
                log_socket_error(&err, "Error writing to socket");
                self.drop_session(DropReason::SocketError, now);
            }
        }
    }
}

// ============================================================================
// Internal Helpers
// ============================================================================

fn log_socket_error(err: &io::Error, msg: &str) {
    match err.kind() {
        ErrorKind::BrokenPipe => warn!("Broken pipe"),
        ErrorKind::ConnectionReset => warn!("Connection reset"),
        ErrorKind::ConnectionAborted => warn!("Connection aborted"),
        _ => error!(?err, "{msg}"),
    }
}

// Socket creation failures that retrying another endpoint cannot fix.
fn is_resource_exhaustion(err: &io::Error) -> bool {
    if err.kind() == ErrorKind::OutOfMemory {
        return true;
    }
    #[cfg(unix)]
    {
        matches!(
            err.raw_os_error(),
            Some(libc::EMFILE | libc::ENFILE | libc::ENOBUFS | libc::ENOMEM)
        )
    }
    #[cfg(not(unix))]
    {
        false
    }
}
