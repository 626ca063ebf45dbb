//! Schema discovery and inference
//!
//! Describes the shape of each source stream.
//!
//! # Features
//!
//! - **Declared schemas**: JSON Schema catalogs read into field descriptors
//! - **Type inference**: primitive types, nullability and formats from samples
//! - **Candidate keys**: declared key, `id`, or any unique sampled field
//! - **Per-stream isolation**: one broken stream never aborts a source

mod discovery;
mod inference;
mod types;

pub use discovery::{
    DiscoveryResult, SchemaDiscoveryService, StreamFailure, DEFAULT_DISCOVERY_SAMPLE,
};
pub(crate) use inference::EMAIL_RE;
pub use inference::{candidate_keys, SchemaInferrer};
pub use types::{
    fields_from_json_schema, Catalog, CatalogStream, FieldDescriptor, FieldOrigin, JsonType,
    JsonTypeOrArray, StreamDescriptor,
};

#[cfg(test)]
mod tests;
