//! Sources
//!
//! Per-provider configuration, credential references, runtime health state and
//! the registry that builds one integration client per (tenant, provider).

mod credentials;
mod registry;
mod types;

pub use credentials::{CredentialResolver, EnvCredentialResolver, StaticCredentialResolver};
pub use registry::ClientRegistry;
pub use types::{
    AuthSpec, DatabaseEngine, DatabaseSettings, DeclaredField, RateLimitSettings, RetrySettings,
    Source, SourceConfig, SourceKey, SourceKind, StreamConfig,
};
