//! Data sampling
//!
//! Fetches a bounded number of raw records per stream. The bound is a hard
//! ceiling: callers may ask for less, never for more.

use crate::connector::{SourceConnector, SourceHandle};
use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::time::Instant;
use tracing::debug;

/// Default ceiling on records fetched per stream
pub const DEFAULT_MAX_SAMPLE: usize = 100;

/// A raw record tagged with where and when it was fetched
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleRecord {
    /// Provider of the source
    pub source: String,
    pub stream: String,
    pub fetched_at: DateTime<Utc>,
    pub data: Value,
}

/// Fetches bounded samples through a connector
#[derive(Debug, Clone, Copy)]
pub struct DataSamplingService {
    max_limit: usize,
}

impl Default for DataSamplingService {
    fn default() -> Self {
        Self {
            max_limit: DEFAULT_MAX_SAMPLE,
        }
    }
}

impl DataSamplingService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Use a different ceiling; zero is rejected
    pub fn with_max_limit(max_limit: usize) -> Result<Self> {
        if max_limit == 0 {
            return Err(Error::invalid_value(
                "sampling.max_limit",
                "must be greater than zero",
            ));
        }
        Ok(Self { max_limit })
    }

    pub fn max_limit(&self) -> usize {
        self.max_limit
    }

    /// Requested limit after applying the ceiling
    pub fn clamp(&self, limit: usize) -> usize {
        limit.min(self.max_limit)
    }

    /// Fetch up to `limit` records from one stream
    ///
    /// A zero limit or an empty stream yields an empty list. When a deadline
    /// is given and passes first, the fetch is abandoned with
    /// `Error::DeadlineExceeded`.
    pub async fn sample(
        &self,
        connector: &dyn SourceConnector,
        handle: &SourceHandle,
        stream: &str,
        limit: usize,
        deadline: Option<Instant>,
    ) -> Result<Vec<SampleRecord>> {
        let limit = self.clamp(limit);
        if limit == 0 {
            return Ok(Vec::new());
        }

        let started = Instant::now();
        let fetch = connector.fetch_sample(handle, stream, limit);
        let mut records = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, fetch)
                .await
                .map_err(|_| Error::deadline(format!("sampling {stream}"), started.elapsed()))??,
            None => fetch.await?,
        };

        // Connectors are trusted to honour the limit, but not blindly
        records.truncate(limit);
        let fetched_at = Utc::now();
        debug!(
            provider = %handle.provider(),
            stream,
            count = records.len(),
            "Sampled stream"
        );

        Ok(records
            .into_iter()
            .map(|data| SampleRecord {
                source: handle.provider().to_string(),
                stream: stream.to_string(),
                fetched_at,
                data,
            })
            .collect())
    }
}
