//! Explicit store selection

use super::RecordStore;
use serde::Serialize;
use std::sync::Arc;
use tracing::{info, warn};

/// Which store a selection settled on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreChoice {
    Primary,
    Fallback,
}

/// Picks the primary store when it answers a health probe, the fallback otherwise
#[derive(Clone)]
pub struct StoreSelector {
    primary: Arc<dyn RecordStore>,
    fallback: Arc<dyn RecordStore>,
}

impl std::fmt::Debug for StoreSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreSelector")
            .field("primary", &self.primary.name())
            .field("fallback", &self.fallback.name())
            .finish()
    }
}

impl StoreSelector {
    pub fn new(primary: Arc<dyn RecordStore>, fallback: Arc<dyn RecordStore>) -> Self {
        Self { primary, fallback }
    }

    /// Probe the primary store and return the chosen one
    pub async fn select(&self) -> (StoreChoice, Arc<dyn RecordStore>) {
        match self.primary.health_check().await {
            Ok(()) => {
                info!(store = self.primary.name(), "Using primary store");
                (StoreChoice::Primary, Arc::clone(&self.primary))
            }
            Err(e) => {
                warn!(
                    primary = self.primary.name(),
                    fallback = self.fallback.name(),
                    error = %e,
                    "Primary store unavailable, using fallback"
                );
                (StoreChoice::Fallback, Arc::clone(&self.fallback))
            }
        }
    }
}
