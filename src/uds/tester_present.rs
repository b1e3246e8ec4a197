//! Tester present keep-alive
//!
//! Keeping a non-default session alive is a deliberate, periodic action the
//! caller schedules itself. It is never used by this crate as an automatic
//! retry of a failed request.

use automotive_diag::uds::UdsCommand;

use crate::{DiagServerResult, client::UdsSession, transport::DiagTransport};

/// TesterPresent zeroSubFunction
const ZERO_SUB_FUNCTION: u8 = 0x00;
/// suppressPosRspMsgIndication bit
const SUPPRESS_REPLY: u8 = 0x80;

impl<T: DiagTransport> UdsSession<T> {
    /// Sends a TesterPresent request and awaits the ECU's acknowledgement
    pub fn tester_present(&self) -> DiagServerResult<()> {
        self.send_command_checked(UdsCommand::TesterPresent, &[ZERO_SUB_FUNCTION])?
            .into_positive()
            .map(|_| ())
    }

    /// Sends a TesterPresent request with the suppress-reply bit set; the
    /// ECU will not answer
    pub fn tester_present_no_reply(&self) -> DiagServerResult<()> {
        self.send_request_no_response(&[
            UdsCommand::TesterPresent.into(),
            ZERO_SUB_FUNCTION | SUPPRESS_REPLY,
        ])
    }
}
