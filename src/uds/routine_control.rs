//! Starts, stops and queries ECU routines
//!
//! Routines can also be driven by catalog service name; the control type and
//! routine identifier are then read from the service's request constants.

use automotive_diag::uds::UdsCommand;

use crate::{
    DiagError, DiagServerResult,
    client::UdsSession,
    odx::{EcuVariant, resolver},
    transport::DiagTransport,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
/// RoutineControl sub-function
pub enum RoutineControlType {
    /// Starts the routine
    StartRoutine,
    /// Stops a running routine
    StopRoutine,
    /// Requests the results of a completed routine
    RequestRoutineResults,
}

impl From<RoutineControlType> for u8 {
    fn from(from: RoutineControlType) -> Self {
        match from {
            RoutineControlType::StartRoutine => 0x01,
            RoutineControlType::StopRoutine => 0x02,
            RoutineControlType::RequestRoutineResults => 0x03,
        }
    }
}

impl RoutineControlType {
    /// Interprets a catalog constant as a control type. Anything that is
    /// neither start (1) nor stop (2) requests the routine's results
    pub fn from_catalog_constant(value: u64) -> Self {
        match value {
            1 => RoutineControlType::StartRoutine,
            2 => RoutineControlType::StopRoutine,
            _ => RoutineControlType::RequestRoutineResults,
        }
    }
}

impl<T: DiagTransport> UdsSession<T> {
    /// Sends a RoutineControl request.
    ///
    /// ## Returns
    /// The routine status record (everything after the echoed routine ID)
    pub fn routine_control(
        &self,
        control: RoutineControlType,
        routine_id: u16,
        data: &[u8],
    ) -> DiagServerResult<Vec<u8>> {
        let mut args = Vec::with_capacity(data.len() + 3);
        args.push(control.into());
        args.extend_from_slice(&routine_id.to_be_bytes());
        args.extend_from_slice(data);
        let resp = self
            .send_command_checked(UdsCommand::RoutineControl, &args)?
            .into_positive()?;

        match resp.bytes.get(2..4) {
            Some([hi, lo]) => {
                let echoed = u16::from_be_bytes([*hi, *lo]);
                if echoed != routine_id {
                    return Err(DiagError::MismatchedIdentResponse {
                        want: routine_id,
                        received: echoed,
                    });
                }
            }
            _ => return Err(DiagError::InvalidResponseLength),
        }
        Ok(resp.bytes[4..].to_vec())
    }

    /// Starts the routine with the given 16-bit identifier
    pub fn start_routine(&self, routine_id: u16, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        self.routine_control(RoutineControlType::StartRoutine, routine_id, data)
    }

    /// Stops the routine with the given 16-bit identifier
    pub fn stop_routine(&self, routine_id: u16, data: &[u8]) -> DiagServerResult<Vec<u8>> {
        self.routine_control(RoutineControlType::StopRoutine, routine_id, data)
    }

    /// Requests the results of the routine with the given 16-bit identifier
    pub fn request_routine_results(&self, routine_id: u16) -> DiagServerResult<Vec<u8>> {
        self.routine_control(RoutineControlType::RequestRoutineResults, routine_id, &[])
    }

    /// Runs a routine by its catalog service name.
    ///
    /// The control type is the service's second request constant
    /// (interpreted per [RoutineControlType::from_catalog_constant]) and the
    /// routine identifier its third.
    pub fn routine_control_by_name(
        &self,
        variant: &EcuVariant,
        name: &str,
        data: &[u8],
    ) -> DiagServerResult<Vec<u8>> {
        let service = resolver::resolve_by_name(variant, name)?;
        let control = service
            .request_constant(1)
            .map(RoutineControlType::from_catalog_constant)
            .ok_or_else(|| DiagError::MissingParameter {
                service: name.to_string(),
                param: "control type constant".to_string(),
            })?;
        let routine_id = service
            .request_constant(2)
            .ok_or_else(|| DiagError::MissingParameter {
                service: name.to_string(),
                param: "routine identifier constant".to_string(),
            })? as u16;
        self.routine_control(control, routine_id, data)
    }
}
