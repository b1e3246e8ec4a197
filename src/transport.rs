//! Module for the byte transport between the diagnostic client and an ECU
//!
//! The client never frames or parses DoIP headers itself. A transport is an
//! opaque request/response byte channel: one diagnostic payload out, one
//! diagnostic payload back per [DiagTransport::receive] call. A DoIP socket
//! stack, an ISO-TP channel, or the [SimulationTransport] test double all
//! fit behind the same trait.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex},
    time::Duration,
};

/// Transport operation result
pub type TransportResult<T> = Result<T, TransportError>;

#[derive(Debug, Clone, thiserror::Error)]
/// Error produced by a diagnostic transport
pub enum TransportError {
    /// Underlying IO error with the transport
    #[error("IO error: {0}")]
    IoError(#[source] Arc<std::io::Error>),
    /// Timeout when writing data to the transport
    #[error("timeout writing to transport")]
    WriteTimeout,
    /// Timeout when reading from the transport
    #[error("timeout reading from transport")]
    ReadTimeout,
    /// The transport is not open
    #[error("transport interface is not open")]
    InterfaceNotOpen,
    /// Underlying API error with the transport implementation
    #[error("underlying {api_name} API error ({code}): {desc}")]
    ApiError {
        /// Name of the API, EG: 'DoIP socket'
        api_name: String,
        /// Internal API error code
        code: u8,
        /// API error description
        desc: String,
    },
}

/// Trait for a request/response diagnostic message transport.
///
/// Implementations deliver whole diagnostic payloads (service ID first byte
/// onwards). Any transport-level retry behavior lives below this trait; the
/// client above it never retries on its own.
pub trait DiagTransport: Send {
    /// Opens the transport. Called once before the first [DiagTransport::send]
    fn open(&mut self) -> TransportResult<()>;

    /// Closes and tears down the transport
    fn close(&mut self) -> TransportResult<()>;

    /// Transmits one diagnostic payload to the ECU
    fn send(&mut self, payload: &[u8]) -> TransportResult<()>;

    /// Blocks for up to `timeout` awaiting one diagnostic payload from the
    /// ECU. Expiry raises [TransportError::ReadTimeout]
    fn receive(&mut self, timeout: Duration) -> TransportResult<Vec<u8>>;
}

/// One scripted ECU reply, delivered `delay` after the read starts
#[derive(Debug, Clone)]
struct TimedReply {
    delay: Duration,
    bytes: Vec<u8>,
}

#[derive(Debug, Default)]
struct SimInner {
    open: bool,
    responses: HashMap<Vec<u8>, VecDeque<TimedReply>>,
    rx_queue: VecDeque<TimedReply>,
}

/// Simulation transport for unit testing diagnostic sessions.
///
/// Requests are matched against a scripted request→reply map. A request may
/// be scripted with a whole reply sequence (e.g. a run of response-pending
/// frames followed by the real answer), each with its own delivery delay.
/// Clones share the same scripted state.
#[derive(Debug, Clone, Default)]
pub struct SimulationTransport {
    inner: Arc<Mutex<SimInner>>,
}

impl SimulationTransport {
    /// Creates an empty simulation transport
    pub fn new() -> Self {
        Self::default()
    }

    /// Scripts a single immediate reply for `req`
    pub fn add_response(&self, req: &[u8], resp: &[u8]) {
        self.add_delayed_response(req, Duration::ZERO, resp)
    }

    /// Scripts a single reply for `req`, delivered `delay` after the read begins
    pub fn add_delayed_response(&self, req: &[u8], delay: Duration, resp: &[u8]) {
        self.add_response_sequence(req, &[(delay, resp.to_vec())])
    }

    /// Scripts an ordered reply sequence for `req`. Each entry is delivered
    /// after its own delay, one per [DiagTransport::receive] call
    pub fn add_response_sequence(&self, req: &[u8], replies: &[(Duration, Vec<u8>)]) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.insert(
            req.to_vec(),
            replies
                .iter()
                .map(|(delay, bytes)| TimedReply {
                    delay: *delay,
                    bytes: bytes.clone(),
                })
                .collect(),
        );
    }

    /// Clears all scripted responses and any queued replies
    pub fn clear_map(&self) {
        let mut inner = self.inner.lock().unwrap();
        inner.responses.clear();
        inner.rx_queue.clear();
    }
}

impl DiagTransport for SimulationTransport {
    fn open(&mut self) -> TransportResult<()> {
        self.inner.lock().unwrap().open = true;
        Ok(())
    }

    fn close(&mut self) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.open = false;
        inner.rx_queue.clear();
        Ok(())
    }

    fn send(&mut self, payload: &[u8]) -> TransportResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.open {
            return Err(TransportError::InterfaceNotOpen);
        }
        inner.rx_queue.clear();
        if let Some(replies) = inner.responses.get(payload).cloned() {
            inner.rx_queue = replies;
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> TransportResult<Vec<u8>> {
        let next = {
            let mut inner = self.inner.lock().unwrap();
            if !inner.open {
                return Err(TransportError::InterfaceNotOpen);
            }
            inner.rx_queue.pop_front()
        };
        match next {
            Some(reply) if reply.delay <= timeout => {
                std::thread::sleep(reply.delay);
                Ok(reply.bytes)
            }
            Some(mut reply) => {
                // Reply arrives later than this read window. Burn the window
                // and keep the reply queued with its remaining delay.
                std::thread::sleep(timeout);
                reply.delay -= timeout;
                self.inner.lock().unwrap().rx_queue.push_front(reply);
                Err(TransportError::ReadTimeout)
            }
            None => {
                std::thread::sleep(timeout);
                Err(TransportError::ReadTimeout)
            }
        }
    }
}
