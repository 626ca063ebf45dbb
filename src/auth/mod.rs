//! Authentication module
//!
//! Supports: API Key, Basic, Bearer, OAuth2 (client credentials and refresh
//! token), JWT service accounts, Custom Headers
//!
//! The `Authenticator` handles all built-in schemes and manages token caching
//! for schemes that require a token exchange. Providers with bespoke request
//! signing plug in through the `AuthProvider` trait.

mod authenticator;
mod types;

pub use authenticator::{AuthProvider, Authenticator};
pub use types::{AuthConfig, CachedToken, Location};
