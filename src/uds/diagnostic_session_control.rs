//! Provides methods to manipulate the ECU's diagnostic session mode

use std::time::Duration;

use automotive_diag::uds::{UdsCommand, UdsSessionTypeByte};

use crate::{DiagServerResult, client::UdsSession, transport::DiagTransport};

impl<T: DiagTransport> UdsSession<T> {
    /// Requests the ECU to go into a specific diagnostic session mode.
    ///
    /// When the session is configured with `use_server_timing`, the P2/P2*
    /// values the ECU reports in its response replace the configured windows
    /// for the rest of this session (never exceeding the request timeout).
    pub fn set_session_mode(&self, session_mode: UdsSessionTypeByte) -> DiagServerResult<()> {
        let resp = self
            .send_command_checked(UdsCommand::DiagnosticSessionControl, &[session_mode.into()])?
            .into_positive()?;
        // sessionParameterRecord: P2 in 1ms units, P2* in 10ms units
        if self.config().use_server_timing
            && let [_, _, p2_hi, p2_lo, p2s_hi, p2s_lo, ..] = resp.bytes[..]
        {
            let p2 = Duration::from_millis(u16::from_be_bytes([p2_hi, p2_lo]) as u64);
            let p2_star =
                Duration::from_millis(u16::from_be_bytes([p2s_hi, p2s_lo]) as u64 * 10);
            self.adopt_server_timing(p2, p2_star);
        }
        Ok(())
    }
}
