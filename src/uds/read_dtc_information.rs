//! Provides methods to read and query DTCs stored on the ECU

use automotive_diag::uds::UdsCommand;

use crate::{
    DiagError, DiagServerResult,
    client::UdsSession,
    dtc::{Dtc, DtcStatusMask},
    transport::DiagTransport,
};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
/// ReadDTCInformation sub-function definitions (reporting subset)
pub enum DtcSubFunction {
    /// Takes a 1 byte DTCStatusMask, reports a count
    ReportNumberOfDtcByStatusMask = 0x01,
    /// Takes a 1 byte DTCStatusMask, reports matching DTC records
    ReportDtcByStatusMask = 0x02,
    /// Takes no arguments, reports every DTC the ECU supports
    ReportSupportedDtc = 0x0A,
    /// Takes no arguments, reports the first DTC that failed a test
    ReportFirstTestFailedDtc = 0x0B,
    /// Takes no arguments, reports the first confirmed DTC
    ReportFirstConfirmedDtc = 0x0C,
}

#[derive(Debug, Clone, PartialEq, Eq)]
/// DTC records reported by the ECU, with the status bits it supports
pub struct DtcReport {
    /// Status bits the ECU actually implements
    pub availability_mask: DtcStatusMask,
    /// The reported trouble codes
    pub dtcs: Vec<Dtc>,
}

impl<T: DiagTransport> UdsSession<T> {
    /// Reads every DTC whose status matches any bit of `mask`
    pub fn read_dtc_by_status_mask(&self, mask: DtcStatusMask) -> DiagServerResult<DtcReport> {
        let resp = self
            .send_command_checked(
                UdsCommand::ReadDTCInformation,
                &[DtcSubFunction::ReportDtcByStatusMask as u8, mask.bits()],
            )?
            .into_positive()?;
        self.parse_dtc_report(&resp.bytes)
    }

    /// Reads every DTC the ECU supports, regardless of status
    pub fn read_supported_dtcs(&self) -> DiagServerResult<DtcReport> {
        let resp = self
            .send_command_checked(
                UdsCommand::ReadDTCInformation,
                &[DtcSubFunction::ReportSupportedDtc as u8],
            )?
            .into_positive()?;
        self.parse_dtc_report(&resp.bytes)
    }

    /// Counts the DTCs whose status matches any bit of `mask`.
    ///
    /// ## Returns
    /// The supported status bits and the matching DTC count
    pub fn count_dtc_by_status_mask(
        &self,
        mask: DtcStatusMask,
    ) -> DiagServerResult<(DtcStatusMask, u16)> {
        let resp = self
            .send_command_checked(
                UdsCommand::ReadDTCInformation,
                &[DtcSubFunction::ReportNumberOfDtcByStatusMask as u8, mask.bits()],
            )?
            .into_positive()?;
        // 0x59 0x01 <availabilityMask> <formatIdentifier> <count u16>
        match resp.bytes[..] {
            [_, _, avail, _format, hi, lo, ..] => Ok((
                DtcStatusMask::from_bits_truncate(avail),
                u16::from_be_bytes([hi, lo]),
            )),
            _ => Err(DiagError::InvalidResponseLength),
        }
    }

    /// Parses `0x59 <sub> <availabilityMask> (<3-byte DTC> <status>)*`
    fn parse_dtc_report(&self, bytes: &[u8]) -> DiagServerResult<DtcReport> {
        let Some(&availability) = bytes.get(2) else {
            return Err(DiagError::InvalidResponseLength);
        };
        let mut records = &bytes[3..];
        let mut dtcs = Vec::with_capacity(records.len() / 4);
        while !records.is_empty() {
            if records.len() < 4 {
                if self.config().tolerate_zero_padding && records.iter().all(|b| *b == 0) {
                    break;
                }
                return Err(DiagError::InvalidResponseLength);
            }
            let raw = u32::from_be_bytes([0, records[0], records[1], records[2]]);
            let status = DtcStatusMask::from_bits_truncate(records[3]);
            records = &records[4..];
            if raw == 0 && status.is_empty() && self.config().tolerate_zero_padding {
                // All-zero record: transport padding, not a code
                continue;
            }
            dtcs.push(Dtc { raw, status });
        }
        Ok(DtcReport {
            availability_mask: DtcStatusMask::from_bits_truncate(availability),
            dtcs,
        })
    }
}
