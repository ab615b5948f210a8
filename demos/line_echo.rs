//! Line Echo Demo - print every line a server sends
//!
//! Connects to the first reachable host of the given list, sends an optional
//! greeting after each connect and prints every received line. Press Ctrl+D
//! on stdin to stop.
//!
//! # Usage
//!
//! ```bash
//! cargo run --example line_echo -- --greeting "sub sim/time/paused" 127.0.0.1:51000 10.0.0.2:51000
//! ```

use clap::Parser;
use config::Config;
use linecomm::prelude::*;
use std::io::{self, BufRead};
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::thread;
use std::time::Instant;
use tracing_subscriber::EnvFilter;

// ============================================================================
// Tracing Initialization
// ============================================================================

/// Initialize tracing for linecomm crate based on verbosity level
fn init_tracing(verbosity: u8) {
    let level = match verbosity {
        0 => return, // No tracing
        1 => "info",
        2 => "debug",
        _ => "trace", // 3 or more
    };

    let filter = format!("linecomm={}", level);
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

// ============================================================================
// CLI Arguments
// ============================================================================

#[derive(Parser, Debug)]
#[command(author, version, about = "Print lines received from a TCP server", long_about = None)]
struct Args {
    /// Candidate servers as host:port, tried in order
    #[arg(required = true)]
    hosts: Vec<String>,

    /// Line to send after every connect
    #[arg(short, long)]
    greeting: Option<String>,

    /// Optional configuration file
    #[arg(short, long)]
    config: Option<String>,

    /// Increase logging verbosity (-v: info, -vv: debug, -vvv: trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

// ============================================================================
// Handler
// ============================================================================

struct Printer {
    greeting: Option<String>,
}

impl LineHandler for Printer {
    fn on_connected(&mut self, session: &mut Session, _now: Instant) {
        if let Some(endpoint) = session.endpoint() {
            println!("* connected to {endpoint}");
        }
        if let Some(greeting) = &self.greeting {
            session.send_data(format!("{greeting}\n").as_bytes());
        }
    }

    fn on_dropped(&mut self, _session: &mut Session, reason: DropReason, _now: Instant) {
        if reason != DropReason::ConnectFailed {
            println!("* disconnected ({reason})");
        }
    }

    fn on_line(&mut self, _session: &mut Session, line: &[u8], _now: Instant) {
        println!("{}", String::from_utf8_lossy(line));
    }
}

// ============================================================================
// Main Entry Point
// ============================================================================

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = if let Some(config_path) = &args.config {
        match Config::builder()
            .add_source(config::File::with_name(config_path))
            .build()
        {
            Ok(c) => c,
            Err(err) => {
                eprintln!("Failed to load config file '{}': {}", config_path, err);
                return ExitCode::FAILURE;
            }
        }
    } else {
        Config::default()
    };

    let printer = Printer {
        greeting: args.greeting,
    };
    let mut client = match LineClient::new(&config, printer) {
        Ok(c) => c,
        Err(err) => {
            eprintln!("Failed to initialize client: {err}");
            return ExitCode::FAILURE;
        }
    };
    for host in &args.hosts {
        if let Err(err) = client.add_host(host) {
            eprintln!("{err}");
            return ExitCode::FAILURE;
        }
    }
    client.set_debug(args.verbose.saturating_sub(1));

    // Lines typed on stdin are forwarded to the server
    let interface = client.get_client_interface();
    thread::spawn(move || {
        for line in io::stdin().lock().lines().map_while(Result::ok) {
            if interface.send_data(format!("{line}\n")).is_err() {
                return;
            }
        }
        let _ = interface.request_stop();
    });

    match client.run_loop(&AtomicBool::new(false)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Event loop failed: {err}");
            ExitCode::FAILURE
        }
    }
}
