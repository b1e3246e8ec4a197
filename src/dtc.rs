//! Module for common diagnostic trouble code data

use bitflags::bitflags;

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
    /// ISO14229-1 DTC status byte
    pub struct DtcStatusMask: u8 {
        /// Most recent test of this DTC failed
        const TEST_FAILED = 0x01;
        /// Test failed at some point during the current operation cycle
        const TEST_FAILED_THIS_OPERATION_CYCLE = 0x02;
        /// Failure condition met, storage criteria not yet met
        const PENDING_DTC = 0x04;
        /// DTC is confirmed and stored in non volatile memory
        const CONFIRMED_DTC = 0x08;
        /// Test has not completed since the last code clear
        const TEST_NOT_COMPLETED_SINCE_LAST_CLEAR = 0x10;
        /// Test failed at least once since the last code clear
        const TEST_FAILED_SINCE_LAST_CLEAR = 0x20;
        /// Test has not completed during the current operation cycle
        const TEST_NOT_COMPLETED_THIS_OPERATION_CYCLE = 0x40;
        /// The DTC requests the warning indicator (MIL) to be lit
        const WARNING_INDICATOR_REQUESTED = 0x80;
    }
}

/// Diagnostic trouble code record as reported by ReadDTCInformation
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct Dtc {
    /// The raw 3-byte value of the DTC according to the ECU
    pub raw: u32,
    /// Status byte of the DTC
    pub status: DtcStatusMask,
}

impl Dtc {
    /// Indication if the DTC turns on the warning indicator lamp. This
    /// usually means that the check engine light is illuminated on the
    /// vehicle's instrument cluster
    pub fn mil_on(&self) -> bool {
        self.status.contains(DtcStatusMask::WARNING_INDICATOR_REQUESTED)
    }

    /// Indication if the DTC is confirmed and stored
    pub fn confirmed(&self) -> bool {
        self.status.contains(DtcStatusMask::CONFIRMED_DTC)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_byte_decomposition() {
        let status = DtcStatusMask::from_bits_truncate(0x89);
        assert!(status.contains(DtcStatusMask::TEST_FAILED));
        assert!(status.contains(DtcStatusMask::CONFIRMED_DTC));
        assert!(status.contains(DtcStatusMask::WARNING_INDICATOR_REQUESTED));
        let dtc = Dtc { raw: 0x0123_45, status };
        assert!(dtc.mil_on());
        assert!(dtc.confirmed());
    }
}
