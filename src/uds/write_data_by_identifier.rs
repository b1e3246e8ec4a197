//! Writes a data record to the ECU by data identifier

use automotive_diag::uds::UdsCommand;

use crate::{
    DiagError, DiagServerResult,
    client::UdsSession,
    did::DidRegistry,
    odx::ValueMap,
    transport::DiagTransport,
};

impl<T: DiagTransport> UdsSession<T> {
    /// Writes the value mapping behind `did`, encoded through the codec
    /// registered for that identifier. The ECU's DID echo is verified.
    pub fn write_data_by_identifier(
        &self,
        registry: &DidRegistry,
        did: u16,
        values: &ValueMap,
    ) -> DiagServerResult<()> {
        let record = match registry.get(did) {
            Some(codec) => codec.encode(values)?,
            None => self
                .config()
                .data_identifier_codecs
                .get(&did)
                .ok_or(DiagError::NoCodecForIdentifier(did))?
                .encode(values)?,
        };
        let mut args = did.to_be_bytes().to_vec();
        args.extend_from_slice(&record);
        let resp = self
            .send_command_with_response(UdsCommand::WriteDataByIdentifier, &args)?
            .into_positive()?;

        match resp.bytes.get(1..3) {
            Some([hi, lo]) => {
                let echoed = u16::from_be_bytes([*hi, *lo]);
                if echoed != did {
                    return Err(DiagError::MismatchedIdentResponse {
                        want: did,
                        received: echoed,
                    });
                }
                Ok(())
            }
            _ => Err(DiagError::InvalidResponseLength),
        }
    }

    /// Writes raw record bytes behind `did` without consulting any codec
    pub fn write_data_by_identifier_raw(&self, did: u16, record: &[u8]) -> DiagServerResult<()> {
        let mut args = did.to_be_bytes().to_vec();
        args.extend_from_slice(record);
        self.send_command_with_response(UdsCommand::WriteDataByIdentifier, &args)?
            .into_positive()
            .map(|_| ())
    }
}
