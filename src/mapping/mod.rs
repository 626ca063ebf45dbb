//! Data mapping and validation
//!
//! Each unified entity has a field-level contract: which inbound field feeds
//! which stored field, whether it is required, how it is transformed and
//! what it must satisfy. Records are checked against that contract before
//! they reach storage.
//!
//! # Overview
//!
//! - `FieldMapping` - one inbound field to one stored field
//! - `EntityMapping` - all mappings of an entity, with coverage checks
//! - `DataMappingValidator` - validates records, collecting every field error

mod transforms;
mod types;
mod validator;

pub use types::{
    Custom, EntityMapping, FieldError, FieldErrorKind, FieldMapping, Pattern, Transform,
    TransformFn, Validation, ValidationResult, ValidatorFn,
};
pub use validator::DataMappingValidator;
