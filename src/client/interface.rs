use crate::endpoint::Endpoint;
use crate::Error;
use mio::Waker;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc::Sender, Arc};

// Internal request type for cross-thread communication
#[derive(Debug)]
pub(crate) enum ClientRequest {
    SendData { data: Vec<u8> },
    DropConnection,
    AddHost { endpoint: Endpoint },
    SetDebug { level: u8 },
}

/// Thread-safe handle to a running [`LineClient`](super::LineClient).
///
/// Obtain an instance by calling
/// [`LineClient::get_client_interface()`](super::LineClient::get_client_interface).
/// Requests are queued and picked up by the event loop at the start of its
/// next iteration; the loop is woken so that happens without waiting for the
/// poll timeout.
///
/// Multiple threads can hold cloned instances.
#[derive(Debug, Clone)]
pub struct ClientInterface {
    pub(crate) sender: Sender<ClientRequest>,
    pub(crate) waker: Arc<Waker>,
    pub(crate) stop_requested: Arc<AtomicBool>,
    pub(crate) running: Arc<AtomicBool>,
}

impl ClientInterface {
    /// Queues bytes for transmission.
    ///
    /// **Note:** If thread-safety is not required, call
    /// `LineClient::send_data()` or `Session::send_data()` directly.
    pub fn send_data(&self, data: impl Into<Vec<u8>>) -> Result<(), Error> {
        self.request(ClientRequest::SendData { data: data.into() })
    }

    /// Asks the loop to drop the current connection. The loop reconnects
    /// to the next endpoint afterwards.
    pub fn drop_connection(&self) -> Result<(), Error> {
        self.request(ClientRequest::DropConnection)
    }

    /// Parses `host:port` and appends it to the endpoint list.
    ///
    /// Parse errors are returned right away; the loop never sees them.
    pub fn add_host(&self, host: &str) -> Result<(), Error> {
        let endpoint = host.parse()?;
        self.request(ClientRequest::AddHost { endpoint })
    }

    /// Changes the diagnostic verbosity of the loop.
    pub fn set_debug(&self, level: u8) -> Result<(), Error> {
        self.request(ClientRequest::SetDebug { level })
    }

    /// Asks the loop to stop. It closes any open socket and returns from
    /// `run_loop` within one poll timeout.
    pub fn request_stop(&self) -> Result<(), Error> {
        self.stop_requested.store(true, Ordering::Release);
        self.waker.wake()?;
        Ok(())
    }

    /// True while `run_loop` is executing.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    fn request(&self, request: ClientRequest) -> Result<(), Error> {
        self.sender
            .send(request)
            .map_err(|_| Error::EventLoopTerminated)?;
        self.waker.wake()?;
        Ok(())
    }
}
