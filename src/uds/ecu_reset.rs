//! Provides methods to reset the ECU in order to simulate power cycling and
//! resetting memory regions

use automotive_diag::uds::{ResetType, UdsCommand};

use crate::{DiagError, DiagServerResult, client::UdsSession, transport::DiagTransport};

impl<T: DiagTransport> UdsSession<T> {
    /// Asks the ECU to perform a reset of the given type
    pub fn ecu_reset(&self, reset_type: ResetType) -> DiagServerResult<()> {
        self.send_command_checked(UdsCommand::ECUReset, &[reset_type.into()])?
            .into_positive()
            .map(|_| ())
    }

    /// Asks the ECU to perform a hard reset. See [ResetType::HardReset]
    pub fn ecu_hard_reset(&self) -> DiagServerResult<()> {
        self.ecu_reset(ResetType::HardReset)
    }

    /// Asks the ECU to perform a key off/on reset. See [ResetType::KeyOffReset]
    pub fn ecu_key_off_on_reset(&self) -> DiagServerResult<()> {
        self.ecu_reset(ResetType::KeyOffReset)
    }

    /// Asks the ECU to perform a soft reset. See [ResetType::SoftReset]
    pub fn ecu_soft_reset(&self) -> DiagServerResult<()> {
        self.ecu_reset(ResetType::SoftReset)
    }

    /// Asks the ECU to enable rapid power shutdown mode.
    ///
    /// ## Returns
    /// If successful, the minimum time in seconds that the ECU will remain
    /// in the power-down sequence
    pub fn enable_rapid_power_shutdown(&self) -> DiagServerResult<u8> {
        let resp = self
            .send_command_checked(
                UdsCommand::ECUReset,
                &[ResetType::EnableRapidPowerShutDown.into()],
            )?
            .into_positive()?;
        match resp.bytes.get(2) {
            // 0xFF means the power-down time is not available
            Some(0xFF) => Err(DiagError::EcuNegativeResponse {
                code: 0x10,
                def: Some(crate::client::describe_nrc(0x10)),
            }),
            Some(&time) => Ok(time),
            None => Err(DiagError::InvalidResponseLength),
        }
    }

    /// Asks the ECU to disable rapid power shutdown mode
    pub fn disable_rapid_power_shutdown(&self) -> DiagServerResult<()> {
        self.ecu_reset(ResetType::DisableRapidPowerShutDown)
    }
}
