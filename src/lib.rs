#![warn(
    missing_docs,
    missing_debug_implementations,
    trivial_numeric_casts,
    unused_import_braces,
    unused_qualifications,
    clippy::uninlined_format_args
)]

//! A crate implementing a UDS (ISO14229) diagnostic client core driven by an
//! ODX-style diagnostic description, for use with DoIP (ISO13400) or any other
//! request/response byte transport.
//!
//! ## What this crate does
//!
//! * Resolves symbolic diagnostic service names against an in-memory
//!   diagnostic catalog and encodes/decodes the exact wire layout of their
//!   requests and responses, including nested composite parameters and
//!   bit-packed fields (see [odx]).
//! * Runs the UDS request/response sequence against a transport, enforcing
//!   the ISO14229-2 timing windows (P2, P2*, and an overall request timeout)
//!   and the response-pending (NRC 0x78) wait loop (see [client]).
//! * Builds data-identifier codec registries from the catalog so that
//!   DID-framed services (ReadDataByIdentifier, WriteDataByIdentifier, ...)
//!   can translate payloads symbolically (see [did]).
//!
//! ## What this crate does NOT do
//!
//! The DoIP socket layer (UDP discovery, TCP routing activation, payload
//! framing) and the diagnostic description file parser are external
//! collaborators. The transport is abstracted behind
//! [transport::DiagTransport]; the catalog is handed to this crate already
//! loaded as a [odx::DiagnosticCatalog].

use transport::TransportError;

pub mod client;
pub mod did;
pub mod dtc;
pub mod odx;
pub mod sessions;
pub mod transport;
pub mod uds;

pub use automotive_diag::ByteWrapper::*;

/// Diagnostic client result
pub type DiagServerResult<T> = Result<T, DiagError>;

#[derive(Clone, Debug, thiserror::Error)]
/// Diagnostic client error
pub enum DiagError {
    /// The diagnostic catalog has no ECU variant with the requested name
    #[error("Diagnostic catalog has no variant named '{0}'")]
    UnknownVariant(String),
    /// The ECU variant has no service with the requested short name
    #[error("Diagnostic description has no service named '{0}'")]
    UnknownService(String),
    /// A required VALUE parameter was absent from the caller's value mapping
    #[error("Service '{service}' request is missing parameter '{param}'")]
    MissingParameter {
        /// Short name of the service being encoded
        service: String,
        /// Short name of the missing parameter
        param: String,
    },
    /// A supplied value could not be converted to the parameter's declared
    /// physical data type
    #[error("Cannot convert value for parameter '{param}': {reason}")]
    DataTypeConversion {
        /// Short name of the offending parameter
        param: String,
        /// What went wrong during conversion
        reason: String,
    },
    /// Response bytes are inconsistent with the service's response schema
    #[error("Response does not match schema of service '{service}': {reason}")]
    ResponseSchemaMismatch {
        /// Short name of the service whose schema was applied
        service: String,
        /// Why the bytes could not be matched
        reason: String,
    },
    /// Two services within one service group declare the same data identifier
    #[error(
        "Data identifier 0x{did:04X} is declared by both '{first}' and '{second}'"
    )]
    DuplicateDataIdentifier {
        /// The colliding identifier
        did: u16,
        /// Service that registered the identifier first
        first: String,
        /// Service that attempted to register it again
        second: String,
    },
    /// A DID-framed service referenced an identifier no codec is known for
    #[error("No codec registered for data identifier 0x{0:04X}")]
    NoCodecForIdentifier(u16),
    /// Negative response code from the ECU itself
    #[error("ECU negative response. Error 0x{:02X?}, definition: {:?}", code, def)]
    EcuNegativeResponse {
        /// Raw negative response code from the ECU
        code: u8,
        /// Negative response code definition according to ISO14229
        def: Option<String>,
    },
    /// ECU did not reply at all
    #[error("ECU did not respond to the request")]
    EmptyResponse,
    /// ECU replied, but the echoed service ID or sub-function does not belong
    /// to the request that was sent
    #[error(
        "ECU response is for a different request. Expected echo 0x{expected:02X}, received 0x{received:02X}"
    )]
    UnexpectedResponse {
        /// Byte the response was expected to echo
        expected: u8,
        /// Byte the response actually carried
        received: u8,
    },
    /// ECU replied with a message, but the length was incorrect
    #[error("ECU response size was not the correct length")]
    InvalidResponseLength,
    /// Mismatched data identifier echo in the response
    #[error(
        "Requested ident 0x{:04X?}, but received ident 0x{:04X?}",
        want,
        received
    )]
    MismatchedIdentResponse {
        /// Requested DID
        want: u16,
        /// Received DID from the ECU
        received: u16,
    },
    /// The overall request deadline elapsed before a final response arrived
    #[error("Timeout waiting for ECU response")]
    Timeout,
    /// A second request was issued on a session whose previous request has
    /// not yet completed
    #[error("Session already has a request in flight")]
    SessionBusy,
    /// A session with this name already exists
    #[error("A diagnostic session named '{0}' already exists")]
    DuplicateSession(String),
    /// No session with this name has been created
    #[error("No diagnostic session named '{0}' has been created")]
    UnknownDevice(String),
    /// Security access was requested but no key algorithm is configured
    #[error("No security algorithm is configured for this session")]
    NoSecurityAlgorithm,
    /// Error with the underlying transport
    #[error("Diagnostic transport error")]
    Transport(
        #[from]
        #[source]
        TransportError,
    ),
}
