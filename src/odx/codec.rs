//! Bit-level parameter codec
//!
//! Packs and unpacks single parameters between their logical value and the
//! wire representation, recursively for composites. Fields are laid out in
//! declared order, MSB-first, each value right-aligned within its declared
//! bit width. This is the data extraction model of ISO 22901-1 reduced to
//! standard-length fields plus the variable-length trailing case.

use crate::{
    DiagError, DiagServerResult,
    odx::{
        catalog::{ParamKind, ParameterDescriptor, PhysicalDataType},
        value::{self, ParamValue, ValueMap},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
/// Byte length a codec expects its input to have.
///
/// "Consume every remaining byte" is a first-class case, not an error: a
/// trailing parameter without a declared bit length reports
/// [ExpectedLength::ReadAllRemaining] instead of guessing a fixed count.
pub enum ExpectedLength {
    /// Exactly this many bytes
    Fixed(usize),
    /// All bytes remaining in the message
    ReadAllRemaining,
}

/// MSB-first bit accumulator for request encoding
pub(crate) struct BitWriter {
    bytes: Vec<u8>,
    bit_pos: usize,
}

impl BitWriter {
    pub(crate) fn new() -> Self {
        Self {
            bytes: Vec::new(),
            bit_pos: 0,
        }
    }

    /// Appends the low `bits` bits of `value`, MSB first. Bits above 63 are
    /// zero
    pub(crate) fn write_bits(&mut self, value: u64, bits: u32) {
        for i in (0..bits).rev() {
            let bit = if i < 64 { (value >> i) & 1 } else { 0 };
            if self.bit_pos == 0 {
                self.bytes.push(0);
            }
            let last = self.bytes.len() - 1;
            self.bytes[last] |= (bit as u8) << (7 - self.bit_pos);
            self.bit_pos = (self.bit_pos + 1) % 8;
        }
    }

    /// Appends whole bytes. Only legal on a byte boundary
    pub(crate) fn write_bytes(&mut self, data: &[u8]) -> Result<(), ()> {
        if self.bit_pos != 0 {
            return Err(());
        }
        self.bytes.extend_from_slice(data);
        Ok(())
    }

    pub(crate) fn finish(self) -> Vec<u8> {
        self.bytes
    }
}

/// MSB-first bit cursor for response decoding
pub(crate) struct BitReader<'a> {
    data: &'a [u8],
    bit_offset: usize,
}

impl<'a> BitReader<'a> {
    pub(crate) fn new(data: &'a [u8]) -> Self {
        Self {
            data,
            bit_offset: 0,
        }
    }

    pub(crate) fn remaining_bits(&self) -> usize {
        self.data.len() * 8 - self.bit_offset
    }

    /// Reads `bits` bits MSB-first, or `None` past the end of the buffer
    pub(crate) fn read_bits(&mut self, bits: u32) -> Option<u64> {
        if bits as usize > self.remaining_bits() || bits > 64 {
            return None;
        }
        let mut out = 0u64;
        for _ in 0..bits {
            let byte = self.data[self.bit_offset / 8];
            let bit = (byte >> (7 - (self.bit_offset % 8))) & 1;
            out = (out << 1) | bit as u64;
            self.bit_offset += 1;
        }
        Some(out)
    }

    /// Reads `count` whole bytes. Only legal on a byte boundary
    pub(crate) fn read_bytes(&mut self, count: usize) -> Option<&'a [u8]> {
        if self.bit_offset % 8 != 0 {
            return None;
        }
        let start = self.bit_offset / 8;
        let end = start.checked_add(count)?;
        if end > self.data.len() {
            return None;
        }
        self.bit_offset = end * 8;
        Some(&self.data[start..end])
    }

    /// Consumes every remaining byte. Only legal on a byte boundary
    pub(crate) fn read_remaining_bytes(&mut self) -> Option<&'a [u8]> {
        let remaining = self.remaining_bits() / 8;
        self.read_bytes(remaining)
    }

    pub(crate) fn consumed_bytes(&self) -> usize {
        self.bit_offset.div_ceil(8)
    }
}

fn conversion_err(param: &str, reason: impl Into<String>) -> DiagError {
    DiagError::DataTypeConversion {
        param: param.to_string(),
        reason: reason.into(),
    }
}

fn schema_err(service: &str, reason: impl Into<String>) -> DiagError {
    DiagError::ResponseSchemaMismatch {
        service: service.to_string(),
        reason: reason.into(),
    }
}

fn fits_unsigned(v: u64, bits: u32) -> bool {
    bits >= 64 || v < (1u64 << bits)
}

fn to_u64(param: &str, value: &ParamValue) -> DiagServerResult<u64> {
    match value {
        ParamValue::UnsignedInt(v) => Ok(*v),
        ParamValue::SignedInt(v) if *v >= 0 => Ok(*v as u64),
        ParamValue::SignedInt(v) => Err(conversion_err(
            param,
            format!("negative value {v} for an unsigned field"),
        )),
        ParamValue::Text(s) => value::parse_uint_text(s)
            .ok_or_else(|| conversion_err(param, format!("'{s}' is not an unsigned integer"))),
        other => Err(conversion_err(
            param,
            format!("expected an unsigned integer, got {other:?}"),
        )),
    }
}

fn to_i64(param: &str, value: &ParamValue) -> DiagServerResult<i64> {
    match value {
        ParamValue::SignedInt(v) => Ok(*v),
        ParamValue::UnsignedInt(v) => i64::try_from(*v)
            .map_err(|_| conversion_err(param, format!("{v} overflows a signed field"))),
        ParamValue::Text(s) => value::parse_int_text(s)
            .ok_or_else(|| conversion_err(param, format!("'{s}' is not a signed integer"))),
        other => Err(conversion_err(
            param,
            format!("expected a signed integer, got {other:?}"),
        )),
    }
}

fn to_byte_vec(param: &str, value: &ParamValue) -> DiagServerResult<Vec<u8>> {
    match value {
        ParamValue::Bytes(b) => Ok(b.clone()),
        // Textual hex/byte-literal convenience for test-framework callers
        ParamValue::Text(s) => value::normalize_byte_literal(s)
            .ok_or_else(|| conversion_err(param, format!("'{s}' is not a byte literal"))),
        other => Err(conversion_err(
            param,
            format!("expected a byte sequence, got {other:?}"),
        )),
    }
}

fn to_ascii_bytes(param: &str, value: &ParamValue) -> DiagServerResult<Vec<u8>> {
    match value {
        ParamValue::Text(s) if s.is_ascii() => Ok(s.as_bytes().to_vec()),
        ParamValue::Text(s) => Err(conversion_err(
            param,
            format!("'{s}' contains non-ASCII characters"),
        )),
        ParamValue::Bytes(b) => Ok(b.clone()),
        other => Err(conversion_err(
            param,
            format!("expected an ASCII string, got {other:?}"),
        )),
    }
}

/// Encodes one parameter into the writer.
///
/// `input` is the caller-supplied value for VALUE parameters; CODED-CONST
/// and reserved parameters never take input and contribute their schema
/// bytes unconditionally.
pub(crate) fn encode_parameter(
    service: &str,
    desc: &ParameterDescriptor,
    input: Option<&ParamValue>,
    w: &mut BitWriter,
) -> DiagServerResult<()> {
    match &desc.kind {
        ParamKind::CodedConst { value } => {
            let bits = desc.bit_length.unwrap_or(8);
            w.write_bits(*value, bits);
            Ok(())
        }
        ParamKind::Reserved => {
            w.write_bits(0, desc.bit_length.unwrap_or(8));
            Ok(())
        }
        ParamKind::Value if desc.is_composite() => {
            let map = match input {
                Some(ParamValue::Struct(map)) => map,
                Some(other) => {
                    return Err(conversion_err(
                        &desc.short_name,
                        format!("composite parameter needs a nested mapping, got {other:?}"),
                    ));
                }
                None => {
                    return Err(DiagError::MissingParameter {
                        service: service.to_string(),
                        param: desc.short_name.clone(),
                    });
                }
            };
            for sub in &desc.sub_params {
                let sub_input = match sub.kind {
                    ParamKind::Value => map.get(&sub.short_name),
                    _ => None,
                };
                encode_parameter(service, sub, sub_input, w)?;
            }
            Ok(())
        }
        ParamKind::Value => {
            let value = input.ok_or_else(|| DiagError::MissingParameter {
                service: service.to_string(),
                param: desc.short_name.clone(),
            })?;
            encode_leaf(service, desc, value, w)
        }
    }
}

fn encode_leaf(
    _service: &str,
    desc: &ParameterDescriptor,
    value: &ParamValue,
    w: &mut BitWriter,
) -> DiagServerResult<()> {
    let name = &desc.short_name;
    match desc.data_type {
        PhysicalDataType::UnsignedInt | PhysicalDataType::BitField => {
            let bits = desc.bit_length.ok_or_else(|| {
                conversion_err(name, "integer parameter requires a declared bit length")
            })?;
            if bits > 64 {
                return Err(conversion_err(
                    name,
                    format!("integer fields are at most 64 bits, got {bits}"),
                ));
            }
            let v = to_u64(name, value)?;
            if !fits_unsigned(v, bits) {
                return Err(conversion_err(
                    name,
                    format!("value {v} does not fit in {bits} bits"),
                ));
            }
            w.write_bits(v, bits);
            Ok(())
        }
        PhysicalDataType::SignedInt => {
            let bits = desc.bit_length.ok_or_else(|| {
                conversion_err(name, "integer parameter requires a declared bit length")
            })?;
            if bits == 0 || bits > 64 {
                return Err(conversion_err(
                    name,
                    format!("integer fields are 1 to 64 bits, got {bits}"),
                ));
            }
            let v = to_i64(name, value)?;
            if bits < 64 {
                let min = -(1i64 << (bits - 1));
                let max = (1i64 << (bits - 1)) - 1;
                if v < min || v > max {
                    return Err(conversion_err(
                        name,
                        format!("value {v} does not fit in {bits} signed bits"),
                    ));
                }
            }
            let mask = if bits >= 64 { u64::MAX } else { (1u64 << bits) - 1 };
            w.write_bits((v as u64) & mask, bits);
            Ok(())
        }
        PhysicalDataType::AsciiString | PhysicalDataType::ByteArray => {
            let raw = if desc.data_type == PhysicalDataType::AsciiString {
                to_ascii_bytes(name, value)?
            } else {
                to_byte_vec(name, value)?
            };
            if let Some(bits) = desc.bit_length {
                if bits % 8 != 0 {
                    return Err(conversion_err(
                        name,
                        format!("byte-aligned type declared with {bits} bits"),
                    ));
                }
                let expected = (bits / 8) as usize;
                if raw.len() != expected {
                    return Err(conversion_err(
                        name,
                        format!("expected {expected} bytes, got {}", raw.len()),
                    ));
                }
            }
            w.write_bytes(&raw)
                .map_err(|()| conversion_err(name, "byte field is not byte-aligned"))
        }
    }
}

/// Decodes one parameter from the reader.
///
/// Returns `Some((short_name, value))` for VALUE parameters; CODED-CONST
/// bytes are verified against the schema and skipped, reserved bits are
/// skipped, both yielding `None`.
pub(crate) fn decode_parameter(
    service: &str,
    desc: &ParameterDescriptor,
    r: &mut BitReader<'_>,
) -> DiagServerResult<Option<(String, ParamValue)>> {
    match &desc.kind {
        ParamKind::CodedConst { value } => {
            let bits = desc.bit_length.unwrap_or(8);
            let read = r
                .read_bits(bits)
                .ok_or_else(|| schema_err(service, "message ends inside a constant field"))?;
            if read != *value {
                return Err(schema_err(
                    service,
                    format!(
                        "constant '{}' is 0x{read:X} on the wire, schema says 0x{value:X}",
                        desc.short_name
                    ),
                ));
            }
            Ok(None)
        }
        ParamKind::Reserved => {
            let bits = desc.bit_length.unwrap_or(8);
            r.read_bits(bits)
                .ok_or_else(|| schema_err(service, "message ends inside reserved bits"))?;
            Ok(None)
        }
        ParamKind::Value if desc.is_composite() => {
            let mut map = ValueMap::new();
            for sub in &desc.sub_params {
                if let Some((name, value)) = decode_parameter(service, sub, r)? {
                    map.insert(name, value);
                }
            }
            Ok(Some((desc.short_name.clone(), ParamValue::Struct(map))))
        }
        ParamKind::Value => {
            let value = decode_leaf(service, desc, r)?;
            Ok(Some((desc.short_name.clone(), value)))
        }
    }
}

fn decode_leaf(
    service: &str,
    desc: &ParameterDescriptor,
    r: &mut BitReader<'_>,
) -> DiagServerResult<ParamValue> {
    let name = &desc.short_name;
    match desc.data_type {
        PhysicalDataType::UnsignedInt | PhysicalDataType::BitField => {
            let bits = desc
                .bit_length
                .ok_or_else(|| schema_err(service, "integer field without a bit length"))?;
            let v = r
                .read_bits(bits)
                .ok_or_else(|| schema_err(service, format!("message ends inside '{name}'")))?;
            Ok(ParamValue::UnsignedInt(v))
        }
        PhysicalDataType::SignedInt => {
            let bits = desc
                .bit_length
                .filter(|b| (1..=64).contains(b))
                .ok_or_else(|| schema_err(service, "integer field without a valid bit length"))?;
            let raw = r
                .read_bits(bits)
                .ok_or_else(|| schema_err(service, format!("message ends inside '{name}'")))?;
            // Sign-extend the field width to 64 bits
            let v = ((raw << (64 - bits)) as i64) >> (64 - bits);
            Ok(ParamValue::SignedInt(v))
        }
        PhysicalDataType::AsciiString | PhysicalDataType::ByteArray => {
            let raw = match desc.bit_length {
                Some(bits) if bits % 8 == 0 => r
                    .read_bytes((bits / 8) as usize)
                    .ok_or_else(|| schema_err(service, format!("message ends inside '{name}'")))?,
                Some(bits) => {
                    return Err(schema_err(
                        service,
                        format!("byte-aligned field '{name}' declared with {bits} bits"),
                    ));
                }
                // Variable-length trailing field: consume everything left
                None => r.read_remaining_bytes().ok_or_else(|| {
                    schema_err(service, format!("'{name}' does not start on a byte boundary"))
                })?,
            };
            if desc.data_type == PhysicalDataType::AsciiString {
                let text = std::str::from_utf8(raw).map_err(|_| {
                    schema_err(service, format!("'{name}' holds non-ASCII bytes"))
                })?;
                Ok(ParamValue::Text(text.to_string()))
            } else {
                Ok(ParamValue::Bytes(raw.to_vec()))
            }
        }
    }
}

/// Encodes a single parameter standalone, returning its packed bytes.
pub fn encode_value(desc: &ParameterDescriptor, value: &ParamValue) -> DiagServerResult<Vec<u8>> {
    let mut w = BitWriter::new();
    let input = match desc.kind {
        ParamKind::Value => Some(value),
        _ => None,
    };
    encode_parameter(&desc.short_name, desc, input, &mut w)?;
    Ok(w.finish())
}

/// Decodes a single parameter standalone from `data[offset..]`.
///
/// Returns the value and how much was consumed: a fixed byte count, or
/// [ExpectedLength::ReadAllRemaining] for a variable-length trailing field.
pub fn decode_value(
    desc: &ParameterDescriptor,
    data: &[u8],
    offset: usize,
) -> DiagServerResult<(ParamValue, ExpectedLength)> {
    if offset > data.len() {
        return Err(schema_err(
            &desc.short_name,
            format!("offset {offset} past the end of a {} byte message", data.len()),
        ));
    }
    let mut r = BitReader::new(&data[offset..]);
    let decoded = match decode_parameter(&desc.short_name, desc, &mut r)? {
        Some((_, v)) => v,
        // Skip-field (constant or reserved): surface the schema-fixed value
        None => match desc.kind {
            ParamKind::CodedConst { value } => ParamValue::UnsignedInt(value),
            _ => ParamValue::UnsignedInt(0),
        },
    };
    let consumed = match desc.static_bit_length() {
        Some(_) => ExpectedLength::Fixed(r.consumed_bytes()),
        None => ExpectedLength::ReadAllRemaining,
    };
    Ok((decoded, consumed))
}
