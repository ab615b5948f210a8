//! Shared helpers for the integration tests.
//!
//! Use the TEST_LOG environment variable to control tracing verbosity:
//!
//! ```bash
//! TEST_LOG=3 cargo test example_scenario -- --nocapture
//! ```

#![allow(dead_code)]

use linecomm::prelude::*;
use std::io::Read;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Once};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

static INIT: Once = Once::new();

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing based on TEST_LOG environment variable
///
/// - TEST_LOG=1: Info level
/// - TEST_LOG=2: Debug level
/// - TEST_LOG=3: Trace level
pub fn init_tracing() {
    INIT.call_once(|| {
        if let Ok(level_str) = std::env::var("TEST_LOG") {
            let verbosity = level_str.parse::<u8>().unwrap_or(0);

            if verbosity > 0 {
                let level = match verbosity {
                    1 => "info",
                    2 => "debug",
                    _ => "trace", // 3 or more
                };

                let filter = format!("linecomm={}", level);
                let _ = tracing_subscriber::fmt()
                    .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
                    .with_target(true)
                    .with_test_writer()
                    .try_init();
            }
        }
    });
}

// ============================================================================
// Recording Handler
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Recorded {
    Connected(String),
    Dropped(DropReason, String),
    Line(Vec<u8>),
}

/// Handler that records every hook call and can be scripted with simple
/// protocol behavior.
#[derive(Default)]
pub struct Recorder {
    pub events: Arc<Mutex<Vec<Recorded>>>,
    pub ticks: Arc<AtomicUsize>,
    /// Ticks that arrived while the session was connected.
    pub connected_ticks: Arc<AtomicUsize>,
    pub line_count: Arc<AtomicUsize>,
    /// State and socket presence as seen by each `on_dropped` call.
    pub drop_states: Arc<Mutex<Vec<(ConnectionState, bool)>>>,
    /// Only count lines instead of recording them.
    pub count_lines_only: bool,
    /// Sent from `on_connected`.
    pub greeting: Option<Vec<u8>>,
    /// Each received line is sent back with this suffix appended.
    pub echo_suffix: Option<Vec<u8>>,
    /// Receiving this line makes the handler drop the connection.
    pub drop_on_line: Option<Vec<u8>>,
}

impl Recorder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    fn record(&self, event: Recorded) {
        self.events.lock().unwrap().push(event);
    }
}

fn endpoint_of(session: &Session) -> String {
    session
        .endpoint()
        .map(|endpoint| endpoint.to_string())
        .unwrap_or_default()
}

impl LineHandler for Recorder {
    fn on_tick(&mut self, session: &mut Session, _now: Instant) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        if session.is_connected() {
            self.connected_ticks.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn on_connected(&mut self, session: &mut Session, _now: Instant) {
        self.record(Recorded::Connected(endpoint_of(session)));
        if let Some(greeting) = &self.greeting {
            session.send_data(greeting);
        }
    }

    fn on_dropped(&mut self, session: &mut Session, reason: DropReason, _now: Instant) {
        self.drop_states
            .lock()
            .unwrap()
            .push((session.state(), session.has_socket()));
        self.record(Recorded::Dropped(reason, endpoint_of(session)));
    }

    fn on_line(&mut self, session: &mut Session, line: &[u8], _now: Instant) {
        self.line_count.fetch_add(1, Ordering::SeqCst);
        if self.count_lines_only {
            return;
        }
        self.record(Recorded::Line(line.to_vec()));
        if let Some(suffix) = &self.echo_suffix {
            let mut reply = line.to_vec();
            reply.extend_from_slice(suffix);
            session.send_data(&reply);
        }
        if self.drop_on_line.as_deref() == Some(line) {
            session.drop_connection();
        }
    }
}

// ============================================================================
// Client Helpers
// ============================================================================

pub fn build_config(hosts: &[String]) -> config::Config {
    config::Config::builder()
        .set_default("hosts", hosts.to_vec())
        .unwrap()
        .set_default("connect_timeout_ms", 1000)
        .unwrap()
        .build()
        .unwrap()
}

/// A client running its loop on a helper thread.
pub struct RunningClient {
    pub stop: Arc<AtomicBool>,
    pub interface: ClientInterface,
    pub events: Arc<Mutex<Vec<Recorded>>>,
    pub ticks: Arc<AtomicUsize>,
    pub connected_ticks: Arc<AtomicUsize>,
    pub line_count: Arc<AtomicUsize>,
    pub drop_states: Arc<Mutex<Vec<(ConnectionState, bool)>>>,
    handle: JoinHandle<(Result<(), Error>, Recorder)>,
}

impl RunningClient {
    pub fn start(mut client: LineClient<Recorder>) -> Self {
        init_tracing();
        let stop = Arc::new(AtomicBool::new(false));
        let interface = client.get_client_interface();
        let events = client.handler().events.clone();
        let ticks = client.handler().ticks.clone();
        let connected_ticks = client.handler().connected_ticks.clone();
        let line_count = client.handler().line_count.clone();
        let drop_states = client.handler().drop_states.clone();
        let loop_stop = stop.clone();
        let handle = thread::spawn(move || {
            let result = client.run_loop(&loop_stop);
            (result, client.into_handler())
        });
        Self {
            stop,
            interface,
            events,
            ticks,
            connected_ticks,
            line_count,
            drop_states,
            handle,
        }
    }

    pub fn snapshot(&self) -> Vec<Recorded> {
        self.events.lock().unwrap().clone()
    }

    /// Waits until the recorded events satisfy `cond`.
    pub fn wait_for<F>(&self, what: &str, cond: F)
    where
        F: Fn(&[Recorded]) -> bool,
    {
        let events = self.events.clone();
        wait_until(what, || cond(&events.lock().unwrap()));
    }

    /// Sets the stop flag and joins the loop thread.
    pub fn finish(self) -> Vec<Recorded> {
        self.stop.store(true, Ordering::SeqCst);
        let (result, recorder) = self.handle.join().expect("client thread panicked");
        result.expect("run_loop failed");
        recorder.snapshot()
    }
}

pub fn wait_until<F>(what: &str, cond: F)
where
    F: Fn() -> bool,
{
    let deadline = Instant::now() + Duration::from_secs(10);
    while !cond() {
        assert!(Instant::now() < deadline, "Timed out waiting for {what}");
        thread::sleep(Duration::from_millis(5));
    }
}

pub fn count_connected(events: &[Recorded]) -> usize {
    events
        .iter()
        .filter(|e| matches!(e, Recorded::Connected(_)))
        .count()
}

pub fn lines(events: &[Recorded]) -> Vec<Vec<u8>> {
    events
        .iter()
        .filter_map(|e| match e {
            Recorded::Line(line) => Some(line.clone()),
            _ => None,
        })
        .collect()
}

pub fn drops(events: &[Recorded]) -> Vec<(DropReason, String)> {
    events
        .iter()
        .filter_map(|e| match e {
            Recorded::Dropped(reason, endpoint) => Some((*reason, endpoint.clone())),
            _ => None,
        })
        .collect()
}

// ============================================================================
// Server Helpers
// ============================================================================

/// Starts a listener on an ephemeral port and runs `script` on it in a
/// helper thread.
pub fn spawn_server<F>(script: F) -> (SocketAddr, JoinHandle<()>)
where
    F: FnOnce(TcpListener) + Send + 'static,
{
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    let addr = listener.local_addr().unwrap();
    let handle = thread::spawn(move || script(listener));
    (addr, handle)
}

/// An address on which nothing is listening.
pub fn refused_addr() -> SocketAddr {
    let listener = TcpListener::bind("127.0.0.1:0").expect("Failed to bind");
    listener.local_addr().unwrap()
}

/// Reads from `stream` until `len` bytes have arrived.
pub fn read_exact_len(stream: &mut TcpStream, len: usize) -> Vec<u8> {
    let mut buf = vec![0; len];
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    stream.read_exact(&mut buf).expect("Failed to read");
    buf
}

/// Blocks until the peer closes `stream`.
pub fn wait_for_close(stream: &mut TcpStream) {
    stream
        .set_read_timeout(Some(Duration::from_secs(10)))
        .unwrap();
    let mut buf = [0; 1024];
    loop {
        match stream.read(&mut buf) {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
