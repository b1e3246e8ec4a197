//! Data-identifier codec registry
//!
//! Identifier-framed services (ReadDataByIdentifier, WriteDataByIdentifier,
//! IO control, ...) frame their payload around a 16-bit DID. A [DidCodec]
//! translates the data record behind one DID; the [DidRegistry] maps DIDs to
//! codecs for one diagnostic session. Registries are built once at session
//! setup from a catalog service group and optionally merged with
//! caller-registered static codecs; they are not mutated on the hot path.

use std::{collections::HashMap, fmt, sync::Arc};

use crate::{
    DiagError, DiagServerResult,
    odx::{
        ExpectedLength,
        catalog::{EcuVariant, ServiceDescriptor},
        resolver,
        value::ValueMap,
    },
};

/// Codec for the data record carried behind one data identifier.
///
/// `decode` must be the left inverse of `encode` over every value mapping
/// the schema can represent.
pub trait DidCodec: Send + Sync {
    /// Decodes a data record (the bytes after the DID echo) into values
    fn decode(&self, data: &[u8]) -> DiagServerResult<ValueMap>;

    /// Encodes values into a data record (the bytes after the DID)
    fn encode(&self, values: &ValueMap) -> DiagServerResult<Vec<u8>>;

    /// How many bytes this codec's record occupies in a response
    fn expected_byte_length(&self) -> ExpectedLength;
}

impl fmt::Debug for dyn DidCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "DidCodec(len: {:?})", self.expected_byte_length())
    }
}

/// [DidCodec] backed by a catalog service schema.
///
/// Decoding re-prepends the schema's constant response prefix (service ID +
/// echoed DID) before applying the positive-response schema, so transports
/// that strip those bytes and transports that don't both work. The record
/// length is the schema's static response length minus that same prefix,
/// derived, never a hardcoded byte count.
pub struct CatalogDidCodec {
    service: Arc<ServiceDescriptor>,
    tolerate_zero_padding: bool,
}

impl CatalogDidCodec {
    /// Wraps a catalog service as a DID codec
    pub fn new(service: Arc<ServiceDescriptor>, tolerate_zero_padding: bool) -> Self {
        Self {
            service,
            tolerate_zero_padding,
        }
    }

    /// The service this codec was built from
    pub fn service(&self) -> &Arc<ServiceDescriptor> {
        &self.service
    }
}

impl fmt::Debug for CatalogDidCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CatalogDidCodec")
            .field("service", &self.service.short_name)
            .finish()
    }
}

impl DidCodec for CatalogDidCodec {
    fn decode(&self, data: &[u8]) -> DiagServerResult<ValueMap> {
        let full = resolver::reconstruct_full_response(&self.service, data)?;
        resolver::decode_response(&self.service, &full, self.tolerate_zero_padding)
    }

    fn encode(&self, values: &ValueMap) -> DiagServerResult<Vec<u8>> {
        resolver::encode_request_data(&self.service, values)
    }

    fn expected_byte_length(&self) -> ExpectedLength {
        match self.service.static_response_byte_length() {
            Some(total) => ExpectedLength::Fixed(
                total.saturating_sub(self.service.response_prefix_len()),
            ),
            None => ExpectedLength::ReadAllRemaining,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
/// What to do when two services in one group declare the same DID
pub enum CollisionPolicy {
    /// Report [DiagError::DuplicateDataIdentifier] naming both services
    #[default]
    Error,
    /// Keep the later service's codec. Explicit opt-in only
    LastWriteWins,
}

#[derive(Debug, Default)]
/// Mapping of data identifier to codec for one diagnostic session
pub struct DidRegistry {
    codecs: HashMap<u16, Arc<dyn DidCodec>>,
}

impl DidRegistry {
    /// Creates an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds a registry from every service of `variant` whose request
    /// service ID equals `group_sid`.
    ///
    /// Each service contributes the DID held in its second request constant.
    /// Services without such a constant are skipped with a log entry (they
    /// are not identifier-framed). Collisions follow `policy`.
    pub fn build_from_service_group(
        variant: &EcuVariant,
        group_sid: u8,
        tolerate_zero_padding: bool,
        policy: CollisionPolicy,
    ) -> DiagServerResult<Self> {
        let mut registry = Self::new();
        let mut owners: HashMap<u16, String> = HashMap::new();
        for service in variant.service_group(group_sid) {
            let Some(did) = service.request_constant(1) else {
                log::warn!(
                    "Service '{}' in group 0x{group_sid:02X} has no identifier constant, skipping",
                    service.short_name
                );
                continue;
            };
            let did = did as u16;
            if let Some(first) = owners.get(&did) {
                match policy {
                    CollisionPolicy::Error => {
                        return Err(DiagError::DuplicateDataIdentifier {
                            did,
                            first: first.clone(),
                            second: service.short_name.clone(),
                        });
                    }
                    CollisionPolicy::LastWriteWins => {
                        log::warn!(
                            "DID 0x{did:04X}: replacing codec of '{first}' with '{}'",
                            service.short_name
                        );
                    }
                }
            }
            owners.insert(did, service.short_name.clone());
            registry.codecs.insert(
                did,
                Arc::new(CatalogDidCodec::new(
                    Arc::clone(service),
                    tolerate_zero_padding,
                )),
            );
        }
        log::debug!(
            "Built {} identifier codecs from service group 0x{group_sid:02X}",
            registry.codecs.len()
        );
        Ok(registry)
    }

    /// Registers a codec for one DID, replacing any existing entry
    pub fn insert(&mut self, did: u16, codec: Arc<dyn DidCodec>) {
        self.codecs.insert(did, codec);
    }

    /// Left-biased merge: codecs from `other` are added only for DIDs this
    /// registry does not know yet
    pub fn merge(&mut self, other: DidRegistry) {
        for (did, codec) in other.codecs {
            self.codecs.entry(did).or_insert(codec);
        }
    }

    /// Looks up the codec for a DID
    pub fn get(&self, did: u16) -> Option<&Arc<dyn DidCodec>> {
        self.codecs.get(&did)
    }

    /// Number of registered identifiers
    pub fn len(&self) -> usize {
        self.codecs.len()
    }

    /// True when no identifier is registered
    pub fn is_empty(&self) -> bool {
        self.codecs.is_empty()
    }
}

impl FromIterator<(u16, Arc<dyn DidCodec>)> for DidRegistry {
    fn from_iter<I: IntoIterator<Item = (u16, Arc<dyn DidCodec>)>>(iter: I) -> Self {
        Self {
            codecs: iter.into_iter().collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::odx::{
        ParamValue,
        catalog::{ParameterDescriptor as P, PhysicalDataType},
    };

    fn read_service(name: &str, did: u16, value_bits: u32) -> ServiceDescriptor {
        ServiceDescriptor {
            short_name: name.to_string(),
            request: vec![
                P::coded_const("SID_RQ", 0x22, 8),
                P::coded_const("Record_ID", did as u64, 16),
            ],
            positive_response: vec![
                P::coded_const("SID_PR", 0x62, 8),
                P::coded_const("Record_ID", did as u64, 16),
                P::value("value", value_bits, PhysicalDataType::UnsignedInt),
            ],
            negative_response: None,
        }
    }

    #[test]
    fn group_build_and_lookup() {
        let variant = EcuVariant::new(
            "ECU_A",
            vec![
                read_service("Read_A", 0xF190, 24),
                read_service("Read_B", 0x0102, 16),
            ],
        );
        let registry =
            DidRegistry::build_from_service_group(&variant, 0x22, true, CollisionPolicy::Error)
                .unwrap();
        assert_eq!(registry.len(), 2);

        let codec = registry.get(0xF190).unwrap();
        assert_eq!(codec.expected_byte_length(), ExpectedLength::Fixed(3));
        let values = codec.decode(&[0x01, 0x02, 0x03]).unwrap();
        assert_eq!(values.get("value"), Some(&ParamValue::UnsignedInt(0x010203)));
        // Round trip back to the record bytes
        assert_eq!(codec.encode(&values).unwrap(), vec![0x01, 0x02, 0x03]);
    }

    #[test]
    fn collision_is_an_error_by_default() {
        let variant = EcuVariant::new(
            "ECU_A",
            vec![
                read_service("Read_A", 0xF190, 24),
                read_service("Read_A_Again", 0xF190, 16),
            ],
        );
        let err =
            DidRegistry::build_from_service_group(&variant, 0x22, true, CollisionPolicy::Error)
                .unwrap_err();
        assert!(matches!(
            err,
            DiagError::DuplicateDataIdentifier { did: 0xF190, .. }
        ));

        // Explicit last-write-wins keeps the later schema
        let registry = DidRegistry::build_from_service_group(
            &variant,
            0x22,
            true,
            CollisionPolicy::LastWriteWins,
        )
        .unwrap();
        assert_eq!(
            registry.get(0xF190).unwrap().expected_byte_length(),
            ExpectedLength::Fixed(2)
        );
    }

    #[test]
    fn merge_is_left_biased() {
        let variant = EcuVariant::new("ECU_A", vec![read_service("Read_A", 0xF190, 24)]);
        let mut registry =
            DidRegistry::build_from_service_group(&variant, 0x22, true, CollisionPolicy::Error)
                .unwrap();
        let other_variant = EcuVariant::new(
            "ECU_A",
            vec![
                read_service("Other_A", 0xF190, 16),
                read_service("Other_B", 0x0102, 16),
            ],
        );
        let other =
            DidRegistry::build_from_service_group(&other_variant, 0x22, true, CollisionPolicy::Error)
                .unwrap();
        registry.merge(other);
        assert_eq!(registry.len(), 2);
        // 0xF190 kept the original 3-byte codec
        assert_eq!(
            registry.get(0xF190).unwrap().expected_byte_length(),
            ExpectedLength::Fixed(3)
        );
    }
}
