//! Reads data records from the ECU by data identifier
//!
//! The payload of ReadDataByIdentifier is framed around 16-bit DIDs; each
//! record is sliced off the response using the codec registered for its
//! identifier and decoded into a value mapping.

use std::collections::HashMap;

use automotive_diag::uds::UdsCommand;

use crate::{
    DiagError, DiagServerResult,
    client::UdsSession,
    did::{DidCodec, DidRegistry},
    odx::{EcuVariant, ExpectedLength, ValueMap, resolver},
    transport::DiagTransport,
};

impl<T: DiagTransport> UdsSession<T> {
    fn codec_for<'a>(
        &'a self,
        registry: &'a DidRegistry,
        did: u16,
    ) -> DiagServerResult<&'a dyn DidCodec> {
        if let Some(codec) = registry.get(did) {
            return Ok(codec.as_ref());
        }
        // Statically configured codecs back the catalog-built registry
        self.config()
            .data_identifier_codecs
            .get(&did)
            .map(|c| c.as_ref())
            .ok_or(DiagError::NoCodecForIdentifier(did))
    }

    /// Reads one or more data identifiers in a single request.
    ///
    /// Returns the decoded value mapping per identifier. Every requested DID
    /// must have a codec in `registry` (or among the session's statically
    /// configured codecs). A codec reporting
    /// [ExpectedLength::ReadAllRemaining] can only be satisfied for the last
    /// record of the response.
    pub fn read_data_by_identifier(
        &self,
        registry: &DidRegistry,
        dids: &[u16],
    ) -> DiagServerResult<HashMap<u16, ValueMap>> {
        if dids.is_empty() {
            return Err(DiagError::MissingParameter {
                service: "ReadDataByIdentifier".to_string(),
                param: "dataIdentifier".to_string(),
            });
        }
        let mut args = Vec::with_capacity(dids.len() * 2);
        for did in dids {
            args.extend_from_slice(&did.to_be_bytes());
        }
        let resp = self
            .send_command_with_response(UdsCommand::ReadDataByIdentifier, &args)?
            .into_positive()?;

        let data = resp.data();
        let mut decoded: HashMap<u16, ValueMap> = HashMap::with_capacity(dids.len());
        let mut offset = 0usize;
        while offset < data.len() && decoded.len() < dids.len() {
            if offset + 2 > data.len() {
                return Err(DiagError::InvalidResponseLength);
            }
            let did = u16::from_be_bytes([data[offset], data[offset + 1]]);
            offset += 2;
            if !dids.contains(&did) {
                return Err(DiagError::MismatchedIdentResponse {
                    want: *dids.get(decoded.len()).unwrap_or(&dids[0]),
                    received: did,
                });
            }
            let codec = self.codec_for(registry, did)?;
            let record_len = match codec.expected_byte_length() {
                ExpectedLength::Fixed(n) => {
                    if offset + n > data.len() {
                        return Err(DiagError::InvalidResponseLength);
                    }
                    n
                }
                ExpectedLength::ReadAllRemaining => data.len() - offset,
            };
            let values = codec.decode(&data[offset..offset + record_len])?;
            offset += record_len;
            decoded.insert(did, values);
        }

        let leftover = &data[offset..];
        if !leftover.is_empty()
            && !(self.config().tolerate_zero_padding && leftover.iter().all(|b| *b == 0))
        {
            return Err(DiagError::InvalidResponseLength);
        }
        if decoded.len() != dids.len() {
            log::error!(
                "ECU answered {} of {} requested identifiers",
                decoded.len(),
                dids.len()
            );
            return Err(DiagError::InvalidResponseLength);
        }
        Ok(decoded)
    }

    /// Reads data records by service name: each name is resolved against the
    /// variant and its data identifier extracted from the request schema's
    /// identifier constant.
    ///
    /// Name misses are collected-and-continued (logged, skipped), matching
    /// batch resolution semantics; the read itself covers the names that
    /// resolved.
    pub fn read_data_by_name(
        &self,
        variant: &EcuVariant,
        registry: &DidRegistry,
        names: &[&str],
    ) -> DiagServerResult<HashMap<u16, ValueMap>> {
        let mut dids = Vec::with_capacity(names.len());
        for service in resolver::resolve_names(variant, names) {
            match service.request_constant(1) {
                Some(did) => dids.push(did as u16),
                None => log::error!(
                    "Service '{}' carries no identifier constant, skipping",
                    service.short_name
                ),
            }
        }
        self.read_data_by_identifier(registry, &dids)
    }
}
