//! UDS client session state machine
//!
//! One [UdsSession] owns one logical diagnostic connection. Requests are
//! strictly serialized: at most one request is in flight per session, a
//! second caller fails fast with [DiagError::SessionBusy]. The request
//! sequence runs `Idle → AwaitingFirstResponse → (PendingWait)* →
//! Completed | Failed`, enforcing the ISO14229-2 timing windows: `P2` until
//! the first reply, `P2*` after every response-pending frame, and an overall
//! request timeout that caps all waiting regardless of how often the server
//! pends.

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex},
    time::{Duration, Instant},
};

use automotive_diag::ByteWrapper::Standard;
use automotive_diag::uds::{UdsCommand, UdsError, UdsErrorByte};

use crate::{
    DiagError, DiagServerResult,
    did::DidCodec,
    transport::{DiagTransport, TransportError},
};

/// First byte of every negative response
pub(crate) const NEGATIVE_RESPONSE_SID: u8 = 0x7F;
/// Offset added to a request SID to form its positive response SID
pub(crate) const POSITIVE_RESPONSE_OFFSET: u8 = 0x40;

/// Computes the key for a SecurityAccess seed.
///
/// This is an extension point: key derivation is ECU specific and supplied
/// by the caller, never implemented here.
pub trait SecurityAlgorithm: Send + Sync {
    /// Derives the key to send for `seed` at security `level`
    fn compute_key(&self, level: u8, seed: &[u8]) -> DiagServerResult<Vec<u8>>;
}

#[derive(Clone)]
/// Per-session client configuration.
///
/// Held by the session it was created with; there is no process-wide
/// mutable default.
pub struct UdsClientConfig {
    /// Raise [DiagError::EcuNegativeResponse] on an NRC instead of returning
    /// a flagged [UdsResponse]
    pub exception_on_negative_response: bool,
    /// Raise on malformed/empty responses instead of returning a flagged
    /// [UdsResponse]
    pub exception_on_invalid_response: bool,
    /// Raise on service-ID/sub-function echo mismatches instead of returning
    /// a flagged [UdsResponse]
    pub exception_on_unexpected_response: bool,
    /// Ignore trailing all-zero padding when decoding responses
    pub tolerate_zero_padding: bool,
    /// Hard ceiling on the total wait for one request, pending extensions
    /// included
    pub request_timeout: Duration,
    /// Maximum wait for the first reply (ISO14229-2 P2_client)
    pub p2: Duration,
    /// Maximum wait after a response-pending frame (ISO14229-2 P2*_client)
    pub p2_star: Duration,
    /// Adopt the P2/P2* values an ECU reports in its DiagnosticSessionControl
    /// response (capped by `request_timeout`)
    pub use_server_timing: bool,
    /// SecurityAccess key derivation, when the caller intends to unlock
    pub security_algorithm: Option<Arc<dyn SecurityAlgorithm>>,
    /// Statically registered data-identifier codecs, merged into any
    /// catalog-built registry by the caller
    pub data_identifier_codecs: HashMap<u16, Arc<dyn DidCodec>>,
}

impl Default for UdsClientConfig {
    fn default() -> Self {
        Self {
            exception_on_negative_response: true,
            exception_on_invalid_response: true,
            exception_on_unexpected_response: true,
            tolerate_zero_padding: true,
            request_timeout: Duration::from_secs(5),
            p2: Duration::from_secs(1),
            p2_star: Duration::from_secs(5),
            use_server_timing: true,
            security_algorithm: None,
            data_identifier_codecs: HashMap::new(),
        }
    }
}

impl fmt::Debug for UdsClientConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdsClientConfig")
            .field(
                "exception_on_negative_response",
                &self.exception_on_negative_response,
            )
            .field(
                "exception_on_invalid_response",
                &self.exception_on_invalid_response,
            )
            .field(
                "exception_on_unexpected_response",
                &self.exception_on_unexpected_response,
            )
            .field("tolerate_zero_padding", &self.tolerate_zero_padding)
            .field("request_timeout", &self.request_timeout)
            .field("p2", &self.p2)
            .field("p2_star", &self.p2_star)
            .field("use_server_timing", &self.use_server_timing)
            .field("security_algorithm", &self.security_algorithm.is_some())
            .field(
                "data_identifier_codecs",
                &self.data_identifier_codecs.len(),
            )
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// Lifecycle of one request on a session
pub enum RequestState {
    /// No request in flight
    Idle,
    /// Request transmitted, waiting up to P2 for the first reply
    AwaitingFirstResponse,
    /// ECU pended (NRC 0x78), waiting up to P2* for the real reply
    PendingWait,
    /// Final response received (positive or negative)
    Completed,
    /// Request aborted (timeout or transport failure)
    Failed,
}

#[derive(Debug)]
/// Observable session event. Every transition and classification outcome is
/// reported; nothing is swallowed silently
pub enum SessionEvent<'a> {
    /// Request bytes handed to the transport
    Request(&'a [u8]),
    /// Request state changed
    StateTransition {
        /// State before the transition
        from: RequestState,
        /// State after the transition
        to: RequestState,
    },
    /// Raw reply received from the transport, before classification
    Response(&'a [u8]),
    /// ECU answered response-pending (NRC 0x78)
    EcuBusy,
    /// ECU answered with a final negative response
    NegativeResponse {
        /// The negative response code
        code: u8,
    },
    /// Reply did not echo the request's service ID or sub-function
    UnexpectedResponse {
        /// Byte the reply was expected to carry
        expected: u8,
        /// Byte the reply actually carried
        received: u8,
    },
    /// Reply was malformed (empty or truncated)
    InvalidResponse,
    /// The overall request timeout elapsed
    Timeout {
        /// Time spent waiting since transmission
        elapsed: Duration,
    },
}

/// Handler for observable session events (for logging/UI)
pub trait SessionEventHandler: Send {
    /// Called on every session event
    fn on_event(&mut self, event: SessionEvent<'_>);
}

#[derive(Debug, Copy, Clone, Default)]
/// Event handler that discards everything
pub struct VoidHandler;

impl SessionEventHandler for VoidHandler {
    #[inline(always)]
    fn on_event(&mut self, _event: SessionEvent<'_>) {}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
/// The session's active timing windows
pub struct SessionTimers {
    /// Maximum wait for the first reply
    pub p2: Duration,
    /// Maximum wait after each response-pending frame
    pub p2_star: Duration,
    /// Ceiling on the total wait for one request
    pub request_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// Outcome of one completed request.
///
/// With the `exception_on_*` options enabled (the default) only positive,
/// matching responses come back this way; otherwise negative, unexpected and
/// invalid outcomes are returned flagged instead of raised.
pub struct UdsResponse {
    /// True when the ECU answered positively
    pub positive: bool,
    /// True when the reply did not echo the request (wrong SID/sub-function)
    pub unexpected: bool,
    /// True when the reply was malformed
    pub invalid: bool,
    /// Negative response code, when `positive` is false because of an NRC
    pub nrc: Option<u8>,
    /// The full raw response, service ID first
    pub bytes: Vec<u8>,
    echo: Option<(u8, u8)>,
}

impl UdsResponse {
    fn positive(bytes: Vec<u8>) -> Self {
        Self {
            positive: true,
            unexpected: false,
            invalid: false,
            nrc: None,
            bytes,
            echo: None,
        }
    }

    fn negative(bytes: Vec<u8>, code: u8) -> Self {
        Self {
            positive: false,
            unexpected: false,
            invalid: false,
            nrc: Some(code),
            bytes,
            echo: None,
        }
    }

    fn unexpected(bytes: Vec<u8>, expected: u8, received: u8) -> Self {
        Self {
            positive: false,
            unexpected: true,
            invalid: false,
            nrc: None,
            bytes,
            echo: Some((expected, received)),
        }
    }

    fn invalid(bytes: Vec<u8>) -> Self {
        Self {
            positive: false,
            unexpected: false,
            invalid: true,
            nrc: None,
            bytes,
            echo: None,
        }
    }

    /// Service-specific data: everything after the response service ID
    pub fn data(&self) -> &[u8] {
        self.bytes.get(1..).unwrap_or(&[])
    }

    /// ISO14229 definition of the carried NRC, when there is one
    pub fn nrc_description(&self) -> Option<String> {
        self.nrc.map(describe_nrc)
    }

    /// Converts a flagged outcome into its error. Typed service wrappers use
    /// this: they can only produce a result from a positive response
    pub fn into_positive(self) -> DiagServerResult<UdsResponse> {
        if self.positive && !self.unexpected && !self.invalid {
            return Ok(self);
        }
        if let Some(code) = self.nrc {
            return Err(DiagError::EcuNegativeResponse {
                code,
                def: Some(describe_nrc(code)),
            });
        }
        if let Some((expected, received)) = self.echo {
            return Err(DiagError::UnexpectedResponse { expected, received });
        }
        if self.bytes.is_empty() {
            Err(DiagError::EmptyResponse)
        } else {
            Err(DiagError::InvalidResponseLength)
        }
    }
}

/// ISO14229 definition of a negative response code
pub fn describe_nrc(code: u8) -> String {
    format!("{:?}", UdsErrorByte::from(code))
}

struct SessionInner<T> {
    transport: T,
    timers: SessionTimers,
    handler: Box<dyn SessionEventHandler>,
    state: RequestState,
}

/// A UDS diagnostic session over one transport connection.
///
/// Methods take `&self`; serialization of requests is enforced at runtime
/// with a session-scoped lock (see [DiagError::SessionBusy]). The shared
/// catalog and registries live outside the session and are never locked
/// while waiting on the transport.
pub struct UdsSession<T: DiagTransport> {
    inner: Mutex<SessionInner<T>>,
    config: UdsClientConfig,
}

impl<T: DiagTransport> fmt::Debug for UdsSession<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UdsSession")
            .field("config", &self.config)
            .finish()
    }
}

impl<T: DiagTransport> UdsSession<T> {
    /// Opens the transport and creates a session over it
    pub fn new(transport: T, config: UdsClientConfig) -> DiagServerResult<Self> {
        Self::with_handler(transport, config, Box::new(VoidHandler))
    }

    /// Like [UdsSession::new], with a custom event handler
    pub fn with_handler(
        mut transport: T,
        config: UdsClientConfig,
        handler: Box<dyn SessionEventHandler>,
    ) -> DiagServerResult<Self> {
        transport.open()?;
        let timers = SessionTimers {
            p2: config.p2,
            p2_star: config.p2_star,
            request_timeout: config.request_timeout,
        };
        Ok(Self {
            inner: Mutex::new(SessionInner {
                transport,
                timers,
                handler,
                state: RequestState::Idle,
            }),
            config,
        })
    }

    /// The configuration this session was created with
    pub fn config(&self) -> &UdsClientConfig {
        &self.config
    }

    /// The timing windows currently in force (server timing may have
    /// replaced the configured P2/P2*)
    pub fn current_timers(&self) -> SessionTimers {
        self.inner.lock().unwrap().timers
    }

    /// Replaces the session event handler
    pub fn set_event_handler(&self, handler: Box<dyn SessionEventHandler>) {
        self.inner.lock().unwrap().handler = handler;
    }

    /// Adopts server-provided P2/P2*, capped so no window can exceed the
    /// overall request timeout
    pub(crate) fn adopt_server_timing(&self, p2: Duration, p2_star: Duration) {
        let mut inner = self.inner.lock().unwrap();
        let cap = inner.timers.request_timeout;
        inner.timers.p2 = p2.min(cap);
        inner.timers.p2_star = p2_star.min(cap);
        log::debug!(
            "Adopted server timing: P2 {:?}, P2* {:?}",
            inner.timers.p2,
            inner.timers.p2_star
        );
    }

    /// Sends a raw request and awaits its final response per the session's
    /// timing windows. SID echo is checked; sub-function echo is not (use a
    /// typed service wrapper for that)
    pub fn send_request(&self, request: &[u8]) -> DiagServerResult<UdsResponse> {
        self.execute(request, None)
    }

    /// Sends a request built from a service ID and its arguments
    pub fn send_command_with_response(
        &self,
        sid: UdsCommand,
        args: &[u8],
    ) -> DiagServerResult<UdsResponse> {
        let mut request = Vec::with_capacity(args.len() + 1);
        request.push(sid.into());
        request.extend_from_slice(args);
        self.execute(&request, None)
    }

    /// Like [UdsSession::send_command_with_response], additionally checking
    /// that the reply echoes the first argument byte (the sub-function)
    pub(crate) fn send_command_checked(
        &self,
        sid: UdsCommand,
        args: &[u8],
    ) -> DiagServerResult<UdsResponse> {
        let mut request = Vec::with_capacity(args.len() + 1);
        request.push(sid.into());
        request.extend_from_slice(args);
        self.execute(&request, args.first().copied())
    }

    /// Transmits a request without awaiting any reply
    pub fn send_request_no_response(&self, request: &[u8]) -> DiagServerResult<()> {
        let mut inner = self
            .inner
            .try_lock()
            .map_err(|_| DiagError::SessionBusy)?;
        inner.handler.on_event(SessionEvent::Request(request));
        log::debug!("Sending request (no response expected): {request:02X?}");
        inner.transport.send(request)?;
        Ok(())
    }

    fn execute(
        &self,
        request: &[u8],
        subfunction_echo: Option<u8>,
    ) -> DiagServerResult<UdsResponse> {
        let mut inner = self
            .inner
            .try_lock()
            .map_err(|_| DiagError::SessionBusy)?;
        transact(&mut inner, &self.config, request, subfunction_echo)
    }
}

impl<T: DiagTransport> Drop for UdsSession<T> {
    fn drop(&mut self) {
        if let Ok(inner) = self.inner.get_mut()
            && let Err(e) = inner.transport.close()
        {
            log::warn!("Error closing transport on session drop: {e}");
        }
    }
}

fn set_state<T>(inner: &mut SessionInner<T>, to: RequestState) {
    let from = inner.state;
    if from != to {
        inner.state = to;
        log::debug!("Session request state: {from:?} -> {to:?}");
        inner
            .handler
            .on_event(SessionEvent::StateTransition { from, to });
    }
}

fn fail<T>(inner: &mut SessionInner<T>, err: DiagError) -> DiagError {
    set_state(inner, RequestState::Failed);
    err
}

/// Runs one request to completion against the locked session state.
///
/// This is the only suspension point of the crate: every wait happens on
/// `transport.receive` with an explicit timeout, and no shared registry lock
/// is held here.
fn transact<T: DiagTransport>(
    inner: &mut SessionInner<T>,
    config: &UdsClientConfig,
    request: &[u8],
    subfunction_echo: Option<u8>,
) -> DiagServerResult<UdsResponse> {
    let Some(&sid) = request.first() else {
        return Err(fail(inner, DiagError::InvalidResponseLength));
    };
    inner.state = RequestState::Idle;
    inner.handler.on_event(SessionEvent::Request(request));
    log::debug!("Sending request to ECU: {request:02X?}");
    if let Err(e) = inner.transport.send(request) {
        log::error!("Transport send error: {e}");
        return Err(fail(inner, e.into()));
    }
    set_state(inner, RequestState::AwaitingFirstResponse);

    let started = Instant::now();
    let deadline = started + inner.timers.request_timeout;
    let mut window = inner.timers.p2;

    loop {
        let remaining = match deadline.checked_duration_since(Instant::now()) {
            Some(r) if !r.is_zero() => r,
            _ => {
                let elapsed = started.elapsed();
                inner.handler.on_event(SessionEvent::Timeout { elapsed });
                log::error!("Request timeout after {elapsed:?}");
                return Err(fail(inner, DiagError::Timeout));
            }
        };
        // The active window never extends past the overall deadline, no
        // matter what the server pends
        let wait = window.min(remaining);

        let bytes = match inner.transport.receive(wait) {
            Ok(bytes) => bytes,
            Err(TransportError::ReadTimeout) => {
                // Window elapsed. Transport-level retries may still deliver
                // a reply while the overall budget lasts; only the deadline
                // fails the request.
                log::debug!("Response window elapsed, request budget remaining: {remaining:?}");
                window = remaining;
                continue;
            }
            Err(e) => {
                log::error!("Transport receive error: {e}");
                return Err(fail(inner, e.into()));
            }
        };

        inner.handler.on_event(SessionEvent::Response(&bytes));
        log::debug!("ECU response: {bytes:02X?}");

        if bytes.is_empty() {
            inner.handler.on_event(SessionEvent::InvalidResponse);
            set_state(inner, RequestState::Completed);
            return if config.exception_on_invalid_response {
                Err(DiagError::EmptyResponse)
            } else {
                Ok(UdsResponse::invalid(bytes))
            };
        }

        if bytes[0] == NEGATIVE_RESPONSE_SID {
            let Some(&code) = bytes.get(2) else {
                inner.handler.on_event(SessionEvent::InvalidResponse);
                set_state(inner, RequestState::Completed);
                return if config.exception_on_invalid_response {
                    Err(DiagError::InvalidResponseLength)
                } else {
                    Ok(UdsResponse::invalid(bytes))
                };
            };
            if matches!(
                UdsErrorByte::from(code),
                Standard(UdsError::RequestCorrectlyReceivedResponsePending)
            ) {
                log::debug!("ECU is busy, awaiting its real response (P2* window)");
                inner.handler.on_event(SessionEvent::EcuBusy);
                set_state(inner, RequestState::PendingWait);
                window = inner.timers.p2_star;
                continue;
            }
            log::warn!("ECU negative response 0x{code:02X} ({})", describe_nrc(code));
            inner.handler.on_event(SessionEvent::NegativeResponse { code });
            set_state(inner, RequestState::Completed);
            return if config.exception_on_negative_response {
                Err(DiagError::EcuNegativeResponse {
                    code,
                    def: Some(describe_nrc(code)),
                })
            } else {
                Ok(UdsResponse::negative(bytes, code))
            };
        }

        let expected_sid = sid.wrapping_add(POSITIVE_RESPONSE_OFFSET);
        if bytes[0] != expected_sid {
            log::error!(
                "SID mismatch. Expected 0x{expected_sid:02X}, response carried 0x{:02X}",
                bytes[0]
            );
            inner.handler.on_event(SessionEvent::UnexpectedResponse {
                expected: expected_sid,
                received: bytes[0],
            });
            set_state(inner, RequestState::Completed);
            return if config.exception_on_unexpected_response {
                Err(DiagError::UnexpectedResponse {
                    expected: expected_sid,
                    received: bytes[0],
                })
            } else {
                Ok(UdsResponse::unexpected(bytes.clone(), expected_sid, bytes[0]))
            };
        }

        if let Some(echo) = subfunction_echo {
            // Mask the suppressPosRspMsgIndication bit on both sides
            let want = echo & 0x7F;
            match bytes.get(1) {
                Some(&got) if got & 0x7F == want => {}
                Some(&got) => {
                    log::error!(
                        "Sub-function mismatch. Expected 0x{want:02X}, response carried 0x{got:02X}"
                    );
                    inner.handler.on_event(SessionEvent::UnexpectedResponse {
                        expected: want,
                        received: got,
                    });
                    set_state(inner, RequestState::Completed);
                    return if config.exception_on_unexpected_response {
                        Err(DiagError::UnexpectedResponse {
                            expected: want,
                            received: got,
                        })
                    } else {
                        Ok(UdsResponse::unexpected(bytes.clone(), want, got))
                    };
                }
                None => {
                    inner.handler.on_event(SessionEvent::InvalidResponse);
                    set_state(inner, RequestState::Completed);
                    return if config.exception_on_invalid_response {
                        Err(DiagError::InvalidResponseLength)
                    } else {
                        Ok(UdsResponse::invalid(bytes))
                    };
                }
            }
        }

        log::debug!("ECU response OK");
        set_state(inner, RequestState::Completed);
        return Ok(UdsResponse::positive(bytes));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::SimulationTransport;

    fn session(sim: &SimulationTransport, config: UdsClientConfig) -> UdsSession<SimulationTransport> {
        UdsSession::new(sim.clone(), config).unwrap()
    }

    fn fast_config() -> UdsClientConfig {
        UdsClientConfig {
            request_timeout: Duration::from_millis(200),
            p2: Duration::from_millis(50),
            p2_star: Duration::from_millis(100),
            ..Default::default()
        }
    }

    #[test]
    fn positive_response_round_trip() {
        let sim = SimulationTransport::new();
        sim.add_response(&[0x3E, 0x00], &[0x7E, 0x00]);
        let session = session(&sim, fast_config());
        let resp = session.send_request(&[0x3E, 0x00]).unwrap();
        assert!(resp.positive);
        assert_eq!(resp.bytes, vec![0x7E, 0x00]);
    }

    #[test]
    fn negative_response_raises_by_default() {
        let sim = SimulationTransport::new();
        sim.add_response(&[0x10, 0x03], &[0x7F, 0x10, 0x22]);
        let session = session(&sim, fast_config());
        let err = session.send_request(&[0x10, 0x03]).unwrap_err();
        assert!(matches!(
            err,
            DiagError::EcuNegativeResponse { code: 0x22, .. }
        ));
    }

    #[test]
    fn negative_response_flagged_when_configured() {
        let sim = SimulationTransport::new();
        sim.add_response(&[0x10, 0x03], &[0x7F, 0x10, 0x22]);
        let session = session(
            &sim,
            UdsClientConfig {
                exception_on_negative_response: false,
                ..fast_config()
            },
        );
        let resp = session.send_request(&[0x10, 0x03]).unwrap();
        assert!(!resp.positive);
        assert_eq!(resp.nrc, Some(0x22));
        assert!(resp.nrc_description().unwrap().contains("ConditionsNotCorrect"));
    }

    #[test]
    fn pending_then_positive() {
        let sim = SimulationTransport::new();
        sim.add_response_sequence(
            &[0x31, 0x01, 0x02, 0x03],
            &[
                (Duration::ZERO, vec![0x7F, 0x31, 0x78]),
                (Duration::from_millis(30), vec![0x71, 0x01, 0x02, 0x03]),
            ],
        );
        let session = session(&sim, fast_config());
        let resp = session.send_request(&[0x31, 0x01, 0x02, 0x03]).unwrap();
        assert!(resp.positive);
        assert_eq!(resp.bytes[0], 0x71);
    }

    #[test]
    fn wrong_sid_is_unexpected() {
        let sim = SimulationTransport::new();
        sim.add_response(&[0x22, 0xF1, 0x90], &[0x6E, 0xF1, 0x90]);
        let session = session(&sim, fast_config());
        let err = session.send_request(&[0x22, 0xF1, 0x90]).unwrap_err();
        assert!(matches!(
            err,
            DiagError::UnexpectedResponse {
                expected: 0x62,
                received: 0x6E
            }
        ));
    }

    #[test]
    fn flagged_unexpected_when_configured() {
        let sim = SimulationTransport::new();
        sim.add_response(&[0x22, 0xF1, 0x90], &[0x6E, 0xF1, 0x90]);
        let session = session(
            &sim,
            UdsClientConfig {
                exception_on_unexpected_response: false,
                ..fast_config()
            },
        );
        let resp = session.send_request(&[0x22, 0xF1, 0x90]).unwrap();
        assert!(!resp.positive);
        assert!(resp.unexpected);
        assert!(resp.into_positive().is_err());
    }

    #[test]
    fn timeout_when_no_reply() {
        let sim = SimulationTransport::new();
        let session = session(&sim, fast_config());
        let started = Instant::now();
        let err = session.send_request(&[0x11, 0x01]).unwrap_err();
        assert!(matches!(err, DiagError::Timeout));
        assert!(started.elapsed() >= Duration::from_millis(200));
    }

    #[test]
    fn server_timing_capped_by_request_timeout() {
        let sim = SimulationTransport::new();
        let session = session(&sim, fast_config());
        session.adopt_server_timing(Duration::from_secs(60), Duration::from_secs(120));
        let timers = session.current_timers();
        assert_eq!(timers.p2, Duration::from_millis(200));
        assert_eq!(timers.p2_star, Duration::from_millis(200));
    }
}
