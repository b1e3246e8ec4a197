//! Module for the diagnostic description (ODX) driven codec layer
//!
//! This layer is the boundary between symbolic service/parameter names and
//! wire bytes. The description file parser itself is an external
//! collaborator; it hands this crate a ready-built [DiagnosticCatalog].
//! From there:
//!
//! * [catalog] holds the immutable service and parameter schemas
//! * [value] holds the typed value mapping callers exchange with the codec
//! * [codec] packs and unpacks single parameters at the bit level
//! * [resolver] turns a whole service request/response into bytes and back

pub mod catalog;
pub mod codec;
pub mod resolver;
pub mod value;

pub use catalog::{
    DiagnosticCatalog, EcuVariant, ParamKind, ParameterDescriptor, PhysicalDataType,
    ServiceDescriptor,
};
pub use codec::ExpectedLength;
pub use value::{ParamValue, ValueMap};
