//! Clears diagnostic trouble codes stored on the ECU

use automotive_diag::uds::UdsCommand;

use crate::{DiagServerResult, client::UdsSession, transport::DiagTransport};

/// DTC group covering every stored code
pub const ALL_DTC_GROUPS: u32 = 0xFFFFFF;

impl<T: DiagTransport> UdsSession<T> {
    /// Requests the ECU to clear the DTCs of `group` (a 24-bit group
    /// identifier; [ALL_DTC_GROUPS] clears everything).
    ///
    /// `memory_selection` is the user-defined MemorySelection byte added in
    /// the 2020 edition of ISO14229-1; it is only put on the wire when given.
    pub fn clear_diagnostic_information(
        &self,
        group: u32,
        memory_selection: Option<u8>,
    ) -> DiagServerResult<()> {
        let mut args = vec![
            ((group >> 16) & 0xFF) as u8,
            ((group >> 8) & 0xFF) as u8,
            (group & 0xFF) as u8,
        ];
        if let Some(memory) = memory_selection {
            args.push(memory);
        }
        self.send_command_with_response(UdsCommand::ClearDiagnosticInformation, &args)?
            .into_positive()
            .map(|_| ())
    }
}
