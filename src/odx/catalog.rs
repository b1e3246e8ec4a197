//! In-memory diagnostic catalog
//!
//! The description file loader (PDX/ODX parser) is an external collaborator.
//! It hands this crate a [DiagnosticCatalog]: a set of ECU variants, each
//! owning immutable [ServiceDescriptor]s. Lookups are explicit map lookups
//! with typed errors, never dynamic attribute access.

use std::{collections::HashMap, str::FromStr, sync::Arc};

use strum_macros::{Display, EnumString};

use crate::{DiagError, DiagServerResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, EnumString, Display)]
/// Physical data type of a parameter, as declared by the description file.
///
/// [FromStr] accepts both the ODX spellings ("A_UINT32", ...) and the
/// kebab-case names, so catalog loaders can feed type names straight through.
pub enum PhysicalDataType {
    /// Unsigned integer, up to 64 bits
    #[strum(serialize = "A_UINT32", serialize = "unsigned-int")]
    UnsignedInt,
    /// Signed integer, two's complement
    #[strum(serialize = "A_INT32", serialize = "signed-int")]
    SignedInt,
    /// ASCII text, one byte per character
    #[strum(serialize = "A_ASCIISTRING", serialize = "ascii-string")]
    AsciiString,
    /// Raw byte sequence
    #[strum(serialize = "A_BYTEFIELD", serialize = "byte-array")]
    ByteArray,
    /// Sub-byte bit field, exposed as an unsigned integer
    #[strum(serialize = "A_BITFIELD", serialize = "bit-field")]
    BitField,
}

#[derive(Debug, Clone, PartialEq)]
/// How a parameter's bytes are produced
pub enum ParamKind {
    /// Caller-supplied value, converted through the physical data type
    Value,
    /// Fixed value baked into the schema (service ID byte, sub-function,
    /// DID). Never requested from the caller, never surfaced in decoded
    /// output under its own name
    CodedConst {
        /// The constant's coded value, right-aligned in its bit length
        value: u64,
    },
    /// Reserved bits, zero on the wire
    Reserved,
}

#[derive(Debug, Clone)]
/// Describes one field within a request or response schema
pub struct ParameterDescriptor {
    /// Short name, unique within the parent schema
    pub short_name: String,
    /// How the field's bytes are produced
    pub kind: ParamKind,
    /// Width in bits. `None` means the parameter consumes all remaining
    /// bytes of the message (legal only for trailing byte/string fields)
    pub bit_length: Option<u32>,
    /// Physical data type used for value conversion
    pub data_type: PhysicalDataType,
    /// Nested schema for composite parameters, in declared order
    pub sub_params: Vec<ParameterDescriptor>,
}

impl ParameterDescriptor {
    /// A caller-supplied value field of fixed width
    pub fn value(short_name: &str, bit_length: u32, data_type: PhysicalDataType) -> Self {
        Self {
            short_name: short_name.to_string(),
            kind: ParamKind::Value,
            bit_length: Some(bit_length),
            data_type,
            sub_params: Vec::new(),
        }
    }

    /// A trailing value field without a declared width, consuming all
    /// remaining bytes
    pub fn trailing(short_name: &str, data_type: PhysicalDataType) -> Self {
        Self {
            short_name: short_name.to_string(),
            kind: ParamKind::Value,
            bit_length: None,
            data_type,
            sub_params: Vec::new(),
        }
    }

    /// A schema constant of fixed width
    pub fn coded_const(short_name: &str, value: u64, bit_length: u32) -> Self {
        Self {
            short_name: short_name.to_string(),
            kind: ParamKind::CodedConst { value },
            bit_length: Some(bit_length),
            data_type: PhysicalDataType::UnsignedInt,
            sub_params: Vec::new(),
        }
    }

    /// Reserved bits
    pub fn reserved(bit_length: u32) -> Self {
        Self {
            short_name: String::new(),
            kind: ParamKind::Reserved,
            bit_length: Some(bit_length),
            data_type: PhysicalDataType::BitField,
            sub_params: Vec::new(),
        }
    }

    /// A composite parameter holding an ordered nested schema
    pub fn composite(short_name: &str, sub_params: Vec<ParameterDescriptor>) -> Self {
        Self {
            short_name: short_name.to_string(),
            kind: ParamKind::Value,
            bit_length: None,
            data_type: PhysicalDataType::ByteArray,
            sub_params,
        }
    }

    /// True when this parameter carries a nested schema
    pub fn is_composite(&self) -> bool {
        !self.sub_params.is_empty()
    }

    /// Total bit width of this parameter, or `None` when any part lacks a
    /// declared width (variable-length trailing field)
    pub fn static_bit_length(&self) -> Option<u32> {
        if self.is_composite() {
            let mut total = 0u32;
            for sub in &self.sub_params {
                total = total.checked_add(sub.static_bit_length()?)?;
            }
            Some(total)
        } else {
            self.bit_length
        }
    }
}

#[derive(Debug, Clone)]
/// One diagnostic service: a request schema and its response schemas.
///
/// Immutable once loaded; shared by reference ([Arc]) between the variant,
/// the resolver and any DID codecs built over it.
pub struct ServiceDescriptor {
    /// Service short name, unique within its ECU variant
    pub short_name: String,
    /// Ordered request schema. The first parameter is the service ID constant
    pub request: Vec<ParameterDescriptor>,
    /// Ordered positive response schema
    pub positive_response: Vec<ParameterDescriptor>,
    /// Negative response schema, when the description file provides one.
    /// Classification of negative responses uses the 0x7F wire rule and does
    /// not depend on this schema being present
    pub negative_response: Option<Vec<ParameterDescriptor>>,
}

impl ServiceDescriptor {
    /// The request's service ID byte (first CODED-CONST of the request)
    pub fn request_sid(&self) -> Option<u8> {
        match self.request.first()?.kind {
            ParamKind::CodedConst { value } => Some(value as u8),
            _ => None,
        }
    }

    /// Coded value of the request parameter at `index`, when that parameter
    /// is a CODED-CONST. DID-framed services carry their data identifier at
    /// index 1; routine services carry the control type at index 1 and the
    /// routine identifier at index 2
    pub fn request_constant(&self, index: usize) -> Option<u64> {
        match self.request.get(index)?.kind {
            ParamKind::CodedConst { value } => Some(value),
            _ => None,
        }
    }

    /// Byte length of the leading run of CODED-CONST parameters in the
    /// positive response (service ID and any echoed sub-function/DID).
    ///
    /// This is the prefix a transport layer may strip from a response before
    /// handing over only service-specific data; it is always derived from
    /// the schema, never a hardcoded count.
    pub fn response_prefix_len(&self) -> usize {
        let mut bits = 0u32;
        for param in &self.positive_response {
            match param.kind {
                ParamKind::CodedConst { .. } => {
                    bits += param.bit_length.unwrap_or(8);
                }
                _ => break,
            }
        }
        bits.div_ceil(8) as usize
    }

    /// Static byte length of the positive response, or `None` when the
    /// schema ends in a variable-length field
    pub fn static_response_byte_length(&self) -> Option<usize> {
        let mut bits = 0u32;
        for param in &self.positive_response {
            bits = bits.checked_add(param.static_bit_length()?)?;
        }
        Some(bits.div_ceil(8) as usize)
    }
}

#[derive(Debug)]
/// One ECU variant of the catalog: its services, indexed by short name
pub struct EcuVariant {
    name: String,
    services: Vec<Arc<ServiceDescriptor>>,
    by_name: HashMap<String, usize>,
}

impl EcuVariant {
    /// Builds a variant from its loaded services. The name index is built
    /// once, here; later lookups are plain map hits
    pub fn new(name: &str, services: Vec<ServiceDescriptor>) -> Self {
        let services: Vec<Arc<ServiceDescriptor>> =
            services.into_iter().map(Arc::new).collect();
        let mut by_name = HashMap::with_capacity(services.len());
        for (idx, service) in services.iter().enumerate() {
            if by_name.insert(service.short_name.clone(), idx).is_some() {
                log::warn!(
                    "Variant '{}' declares service '{}' more than once, keeping the last",
                    name,
                    service.short_name
                );
            }
        }
        Self {
            name: name.to_string(),
            services,
            by_name,
        }
    }

    /// Name of this variant
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Looks a service up by its short name
    pub fn lookup_service_by_name(&self, name: &str) -> Option<&Arc<ServiceDescriptor>> {
        self.by_name.get(name).map(|idx| &self.services[*idx])
    }

    /// All services whose request service ID equals `group_sid`, in catalog
    /// order. This is the service group an identifier registry is built from
    pub fn service_group(&self, group_sid: u8) -> Vec<&Arc<ServiceDescriptor>> {
        self.services
            .iter()
            .filter(|s| s.request_sid() == Some(group_sid))
            .collect()
    }

    /// All services of this variant, in catalog order
    pub fn services(&self) -> &[Arc<ServiceDescriptor>] {
        &self.services
    }
}

#[derive(Debug, Default)]
/// A loaded diagnostic description: ECU variants by name.
///
/// Read-mostly and immutable after load; share it between sessions behind an
/// [Arc]
pub struct DiagnosticCatalog {
    variants: HashMap<String, Arc<EcuVariant>>,
}

impl DiagnosticCatalog {
    /// Creates an empty catalog
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a loaded variant to the catalog
    pub fn add_variant(&mut self, variant: EcuVariant) {
        self.variants
            .insert(variant.name().to_string(), Arc::new(variant));
    }

    /// Resolves an ECU variant by name
    pub fn resolve_variant(&self, name: &str) -> DiagServerResult<Arc<EcuVariant>> {
        self.variants
            .get(name)
            .cloned()
            .ok_or_else(|| DiagError::UnknownVariant(name.to_string()))
    }
}

/// Parses an ODX physical type spelling, e.g. from a loader
pub fn physical_data_type_from_odx(name: &str) -> Option<PhysicalDataType> {
    PhysicalDataType::from_str(name).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vin_read_service() -> ServiceDescriptor {
        ServiceDescriptor {
            short_name: "Read_VIN".to_string(),
            request: vec![
                ParameterDescriptor::coded_const("SID_RQ", 0x22, 8),
                ParameterDescriptor::coded_const("Record_ID", 0xF190, 16),
            ],
            positive_response: vec![
                ParameterDescriptor::coded_const("SID_PR", 0x62, 8),
                ParameterDescriptor::coded_const("Record_ID", 0xF190, 16),
                ParameterDescriptor::value("VIN", 17 * 8, PhysicalDataType::AsciiString),
            ],
            negative_response: None,
        }
    }

    #[test]
    fn constants_and_prefix() {
        let svc = vin_read_service();
        assert_eq!(svc.request_sid(), Some(0x22));
        assert_eq!(svc.request_constant(1), Some(0xF190));
        assert_eq!(svc.response_prefix_len(), 3);
        assert_eq!(svc.static_response_byte_length(), Some(20));
    }

    #[test]
    fn variant_lookup_and_groups() {
        let variant = EcuVariant::new("ECU_A", vec![vin_read_service()]);
        assert!(variant.lookup_service_by_name("Read_VIN").is_some());
        assert!(variant.lookup_service_by_name("No_Such").is_none());
        assert_eq!(variant.service_group(0x22).len(), 1);
        assert!(variant.service_group(0x2E).is_empty());
    }

    #[test]
    fn odx_type_spellings() {
        assert_eq!(
            physical_data_type_from_odx("A_UINT32"),
            Some(PhysicalDataType::UnsignedInt)
        );
        assert_eq!(
            physical_data_type_from_odx("byte-array"),
            Some(PhysicalDataType::ByteArray)
        );
        assert_eq!(physical_data_type_from_odx("A_FLOAT64"), None);
    }
}
