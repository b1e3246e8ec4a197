//! Typed UDS (ISO14229) service wrappers
//!
//! Each file adds one service's methods to [crate::client::UdsSession]. The
//! wrappers build the request bytes, run them through the session state
//! machine, check the service-specific echo and hand decodable payloads to
//! the ODX layer where a data identifier is involved.

mod clear_diagnostic_information;
mod diagnostic_session_control;
mod ecu_reset;
mod read_data_by_identifier;
mod read_dtc_information;
mod routine_control;
mod security_access;
mod tester_present;
mod write_data_by_identifier;

pub use clear_diagnostic_information::*;
pub use read_dtc_information::*;
pub use routine_control::*;
