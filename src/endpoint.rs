//! Candidate server endpoints and round-robin failover.

use crate::error::Error;
use std::fmt;
use std::net::{SocketAddr, ToSocketAddrs};
use std::str::FromStr;

/// A `(host, port)` pair identifying one candidate server.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Endpoint {
    host: String,
    port: u16,
}

impl Endpoint {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Resolves the endpoint to its first socket address.
    ///
    /// Resolution happens on every call; nothing is cached. This is a
    /// blocking lookup through the system resolver, and the event loop
    /// calls it on its own thread for every connect attempt.
    pub fn resolve(&self) -> Result<SocketAddr, Error> {
        (self.host.as_str(), self.port)
            .to_socket_addrs()?
            .next()
            .ok_or_else(|| {
                Error::Io(std::io::Error::new(
                    std::io::ErrorKind::InvalidInput,
                    "Could not resolve address",
                ))
            })
    }
}

impl FromStr for Endpoint {
    type Err = Error;

    /// Parses `host:port`, accepting `[v6addr]:port` for IPv6 literals.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || Error::InvalidEndpoint(s.to_string());
        let trimmed = s.trim();

        let (host, port) = if let Some(rest) = trimmed.strip_prefix('[') {
            let (host, port) = rest.split_once("]:").ok_or_else(invalid)?;
            (host, port)
        } else {
            let (host, port) = trimmed.rsplit_once(':').ok_or_else(invalid)?;
            if host.contains(':') {
                return Err(invalid());
            }
            (host, port)
        };

        if host.is_empty() {
            return Err(invalid());
        }
        let port = port.parse::<u16>().map_err(|_| invalid())?;
        Ok(Self::new(host, port))
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// Ordered list of candidate endpoints with a rotating cursor.
///
/// Insertion order is preserved and duplicates are allowed. Every call to
/// [`Self::next_endpoint`] advances the cursor, wrapping at the end, so N
/// consecutive attempts visit each of N endpoints exactly once.
#[derive(Debug, Clone, Default)]
pub struct EndpointList {
    endpoints: Vec<Endpoint>,
    cursor: usize,
}

impl EndpointList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, endpoint: Endpoint) {
        self.endpoints.push(endpoint);
    }

    /// Parses `host:port` and appends it.
    pub fn add_host(&mut self, host: &str) -> Result<(), Error> {
        self.push(host.parse()?);
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.endpoints.len()
    }

    pub fn is_empty(&self) -> bool {
        self.endpoints.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Endpoint> {
        self.endpoints.iter()
    }

    /// Returns the next candidate and advances the cursor.
    pub fn next_endpoint(&mut self) -> Result<Endpoint, Error> {
        if self.endpoints.is_empty() {
            return Err(Error::NoEndpointsConfigured);
        }
        let index = self.cursor % self.endpoints.len();
        self.cursor = (index + 1) % self.endpoints.len();
        Ok(self.endpoints[index].clone())
    }
}
