//! Service resolver: symbolic names to wire bytes and back
//!
//! Resolution failures are per-name: resolving a batch collects the hits and
//! logs each miss rather than aborting. Encoding or decoding one message is
//! atomic: any parameter failure aborts that single operation.

use std::sync::Arc;

use crate::{
    DiagError, DiagServerResult,
    odx::{
        catalog::{EcuVariant, ParamKind, ServiceDescriptor},
        codec::{self, BitReader, BitWriter},
        value::ValueMap,
    },
};

/// Looks up a service by its exact short name
pub fn resolve_by_name<'a>(
    variant: &'a EcuVariant,
    name: &str,
) -> DiagServerResult<&'a Arc<ServiceDescriptor>> {
    variant
        .lookup_service_by_name(name)
        .ok_or_else(|| DiagError::UnknownService(name.to_string()))
}

/// Resolves a batch of service names, collecting the services that exist.
///
/// A miss does not abort the batch; each one is logged and skipped.
pub fn resolve_names<'a>(
    variant: &'a EcuVariant,
    names: &[&str],
) -> Vec<&'a Arc<ServiceDescriptor>> {
    let mut resolved = Vec::with_capacity(names.len());
    for name in names {
        match variant.lookup_service_by_name(name) {
            Some(service) => resolved.push(service),
            None => {
                log::error!(
                    "Variant '{}' does not contain a service named '{name}'",
                    variant.name()
                );
            }
        }
    }
    resolved
}

/// Encodes a full request for `service` from the caller's value mapping.
///
/// The result includes every leading constant (service ID, sub-function,
/// DID). Callers feeding a transport primitive that re-adds those bytes must
/// strip [request_prefix_len] bytes themselves; nothing is guessed here. An
/// empty mapping produces the schema's fixed encoding.
pub fn encode_request(
    service: &ServiceDescriptor,
    values: &ValueMap,
) -> DiagServerResult<Vec<u8>> {
    let mut w = BitWriter::new();
    for param in &service.request {
        let input = match param.kind {
            ParamKind::Value => values.get(&param.short_name),
            _ => None,
        };
        codec::encode_parameter(&service.short_name, param, input, &mut w)?;
    }
    let bytes = w.finish();
    log::debug!(
        "Encoded request for '{}': {:02X?}",
        service.short_name,
        bytes
    );
    Ok(bytes)
}

/// Decodes a full positive response against `service`'s response schema.
///
/// Constant fields are verified and skipped; every VALUE parameter lands in
/// the returned mapping. Surplus trailing bytes fail the decode unless they
/// are all zero and `tolerate_zero_padding` is set.
pub fn decode_response(
    service: &ServiceDescriptor,
    raw: &[u8],
    tolerate_zero_padding: bool,
) -> DiagServerResult<ValueMap> {
    let mut r = BitReader::new(raw);
    let mut values = ValueMap::new();
    for param in &service.positive_response {
        if let Some((name, value)) = codec::decode_parameter(&service.short_name, param, &mut r)? {
            values.insert(name, value);
        }
    }
    let leftover = r.remaining_bits() / 8;
    if leftover > 0 {
        let tail = &raw[raw.len() - leftover..];
        if !(tolerate_zero_padding && tail.iter().all(|b| *b == 0)) {
            return Err(DiagError::ResponseSchemaMismatch {
                service: service.short_name.clone(),
                reason: format!("{leftover} unexpected trailing bytes: {tail:02X?}"),
            });
        }
    }
    Ok(values)
}

/// Rebuilds a full positive response from service-specific data only.
///
/// Some transport layers strip the service ID and echoed identifier before
/// handing data up. This re-prepends the schema's constant prefix so the
/// result is decodable by [decode_response]. The prefix length is derived
/// from the schema's leading constants, never hardcoded.
pub fn reconstruct_full_response(
    service: &ServiceDescriptor,
    service_specific: &[u8],
) -> DiagServerResult<Vec<u8>> {
    let mut w = BitWriter::new();
    for param in &service.positive_response {
        match param.kind {
            ParamKind::CodedConst { .. } => {
                codec::encode_parameter(&service.short_name, param, None, &mut w)?;
            }
            _ => break,
        }
    }
    let mut full = w.finish();
    full.extend_from_slice(service_specific);
    Ok(full)
}

/// Byte length of the leading run of CODED-CONST parameters in the request
/// (service ID and sub-function/DID), the prefix a DID-keyed transport
/// primitive re-adds itself
pub fn request_prefix_len(service: &ServiceDescriptor) -> usize {
    let mut bits = 0u32;
    for param in &service.request {
        match param.kind {
            ParamKind::CodedConst { .. } => bits += param.bit_length.unwrap_or(8),
            _ => break,
        }
    }
    bits.div_ceil(8) as usize
}

/// Encodes a request and returns only the bytes after the constant prefix
/// (the "service-specific data" tail)
pub fn encode_request_data(
    service: &ServiceDescriptor,
    values: &ValueMap,
) -> DiagServerResult<Vec<u8>> {
    let full = encode_request(service, values)?;
    Ok(full[request_prefix_len(service).min(full.len())..].to_vec())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odx::{
        catalog::{ParameterDescriptor as P, PhysicalDataType},
        value::ParamValue,
    };

    fn vin_service() -> ServiceDescriptor {
        ServiceDescriptor {
            short_name: "Read_VIN".to_string(),
            request: vec![
                P::coded_const("SID_RQ", 0x22, 8),
                P::coded_const("Record_ID", 0xF190, 16),
            ],
            positive_response: vec![
                P::coded_const("SID_PR", 0x62, 8),
                P::coded_const("Record_ID", 0xF190, 16),
                P::value("vin", 24, PhysicalDataType::UnsignedInt),
            ],
            negative_response: None,
        }
    }

    fn write_service() -> ServiceDescriptor {
        ServiceDescriptor {
            short_name: "Write_Limit".to_string(),
            request: vec![
                P::coded_const("SID_RQ", 0x2E, 8),
                P::coded_const("Record_ID", 0x0102, 16),
                P::value("limit", 16, PhysicalDataType::UnsignedInt),
            ],
            positive_response: vec![
                P::coded_const("SID_PR", 0x6E, 8),
                P::coded_const("Record_ID", 0x0102, 16),
            ],
            negative_response: None,
        }
    }

    #[test]
    fn parameterless_request_is_fixed_encoding() {
        let bytes = encode_request(&vin_service(), &ValueMap::new()).unwrap();
        assert_eq!(bytes, vec![0x22, 0xF1, 0x90]);
    }

    #[test]
    fn request_with_value() {
        let mut values = ValueMap::new();
        values.insert("limit".into(), ParamValue::UnsignedInt(0x1234));
        let bytes = encode_request(&write_service(), &values).unwrap();
        assert_eq!(bytes, vec![0x2E, 0x01, 0x02, 0x12, 0x34]);
    }

    #[test]
    fn missing_value_aborts_encode() {
        let err = encode_request(&write_service(), &ValueMap::new()).unwrap_err();
        assert!(matches!(err, DiagError::MissingParameter { .. }));
    }

    #[test]
    fn response_decode_and_reconstruct() {
        let svc = vin_service();
        // Transport delivered only the service-specific tail
        let tail = [0x01, 0x02, 0x03];
        let full = reconstruct_full_response(&svc, &tail).unwrap();
        assert_eq!(full, vec![0x62, 0xF1, 0x90, 0x01, 0x02, 0x03]);

        let values = decode_response(&svc, &full, false).unwrap();
        assert_eq!(values.get("vin"), Some(&ParamValue::UnsignedInt(0x010203)));
        // Constants never surface under their own names
        assert!(!values.contains_key("SID_PR"));
        assert!(!values.contains_key("Record_ID"));
    }

    #[test]
    fn wrong_constant_is_schema_mismatch() {
        let svc = vin_service();
        let err = decode_response(&svc, &[0x62, 0xF1, 0x91, 0x01, 0x02, 0x03], false).unwrap_err();
        assert!(matches!(err, DiagError::ResponseSchemaMismatch { .. }));
    }

    #[test]
    fn zero_padding_tolerated_only_when_configured() {
        let svc = vin_service();
        let padded = [0x62, 0xF1, 0x90, 0x01, 0x02, 0x03, 0x00, 0x00];
        assert!(decode_response(&svc, &padded, false).is_err());
        let values = decode_response(&svc, &padded, true).unwrap();
        assert_eq!(values.get("vin"), Some(&ParamValue::UnsignedInt(0x010203)));

        let junk_padded = [0x62, 0xF1, 0x90, 0x01, 0x02, 0x03, 0xAA];
        assert!(decode_response(&svc, &junk_padded, true).is_err());
    }

    #[test]
    fn prefix_lengths_are_schema_derived() {
        assert_eq!(request_prefix_len(&vin_service()), 3);
        assert_eq!(vin_service().response_prefix_len(), 3);
        let mut values = ValueMap::new();
        values.insert("limit".into(), ParamValue::UnsignedInt(0xBEEF));
        assert_eq!(
            encode_request_data(&write_service(), &values).unwrap(),
            vec![0xBE, 0xEF]
        );
    }

    #[test]
    fn batch_resolution_collects_hits() {
        let variant = EcuVariant::new("ECU_A", vec![vin_service(), write_service()]);
        let resolved = resolve_names(&variant, &["Read_VIN", "No_Such", "Write_Limit"]);
        assert_eq!(resolved.len(), 2);
        assert!(matches!(
            resolve_by_name(&variant, "No_Such").unwrap_err(),
            DiagError::UnknownService(_)
        ));
    }
}
