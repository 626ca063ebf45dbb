// Allow common clippy pedantic lints that aren't critical for this codebase
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_lossless)]
#![allow(clippy::too_many_lines)]
#![allow(clippy::ref_option)]
#![allow(clippy::unused_self)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::items_after_statements)]
#![allow(clippy::unnecessary_wraps)]
#![allow(clippy::match_same_arms)]
#![allow(clippy::match_wildcard_for_single_variants)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::unused_async)]

//! # source-unify
//!
//! Resilient integration layer for rate-limited provider APIs and databases,
//! with cross-source schema reconciliation into one tenant-scoped schema.
//!
//! ## Features
//!
//! - **Admission control**: per-source sliding-window rate limiting
//! - **Retries**: bounded exponential backoff driven by a typed error taxonomy
//! - **Auth**: API key, basic, bearer, OAuth2, JWT and custom headers
//! - **Discovery**: declared catalogs, or schemas inferred from samples
//! - **Reconciliation**: pluggable entity matching, relationships, cycle checks
//! - **Validation**: field mappings with transforms before anything is stored
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use source_unify::{load_tenant, ClientRegistry, EnvCredentialResolver, TenantPipeline};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> source_unify::Result<()> {
//!     let config = load_tenant("tenants/acme.yaml")?;
//!     let registry = Arc::new(ClientRegistry::new(Arc::new(EnvCredentialResolver)));
//!
//!     let pipeline = TenantPipeline::from_config(&config, registry)?;
//!     let report = pipeline.run().await;
//!     for entity in &report.entities {
//!         println!("{} <- {:?}", entity.name, entity.sources);
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                        TenantPipeline                           │
//! │  discover (concurrent, per source) → barrier → reconcile        │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//! ┌──────────┬───────────┬───────┴───────┬───────────┬─────────────┐
//! │   Auth   │   HTTP    │   Discovery   │ Reconcile │   Mapping   │
//! ├──────────┼───────────┼───────────────┼───────────┼─────────────┤
//! │ API Key  │ Rate Limit│ Catalog       │ Matchers  │ Transforms  │
//! │ OAuth2   │ Retry     │ Sampling      │ Relations │ Validation  │
//! │ JWT      │ Taxonomy  │ Inference     │ Cycles    │ Persistence │
//! └──────────┴───────────┴───────────────┴───────────┴─────────────┘
//! ```

#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::doc_markdown)]

// ============================================================================
// Module declarations
// ============================================================================

/// Error types and the failure taxonomy
pub mod error;

/// Common types and type aliases
pub mod types;

/// Authentication implementations
pub mod auth;

/// HTTP client with retry and rate limiting
pub mod http;

/// Sources, credentials and the client registry
pub mod source;

/// Source connector boundary
pub mod connector;

/// Schema discovery and inference
pub mod schema;

/// Bounded record sampling
pub mod sampling;

/// Cross-source schema reconciliation
pub mod reconcile;

/// Field mappings and record validation
pub mod mapping;

/// Record stores
pub mod persistence;

/// Tenant configuration
pub mod config;

/// Concurrent discovery and reconciliation per tenant
pub mod pipeline;

/// Command-line interface
pub mod cli;

// ============================================================================
// Re-exports
// ============================================================================

pub use error::{Error, ErrorKind, Result};
pub use types::*;

// Re-export commonly used types
pub use config::{load_tenant, load_tenant_from_str, TenantConfig};
pub use http::{IntegrationClient, RateLimiter, RetryManager};
pub use mapping::{DataMappingValidator, ValidationResult};
pub use pipeline::TenantPipeline;
pub use reconcile::{ReconciliationReport, SchemaReconciler};
pub use sampling::DataSamplingService;
pub use schema::SchemaDiscoveryService;
pub use source::{ClientRegistry, EnvCredentialResolver};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Crate name
pub const NAME: &str = env!("CARGO_PKG_NAME");
