//! Schema discovery
//!
//! Turns a connector's catalog into stream descriptors. Declared schemas are
//! taken as published; streams without one are inferred from samples when
//! sampling is on. A failing stream is recorded and skipped; a declared
//! stream whose sampling fails is kept and its failure recorded.

use super::inference::{candidate_keys, SchemaInferrer};
use super::types::{fields_from_json_schema, CatalogStream, FieldOrigin, StreamDescriptor};
use crate::connector::{SourceConnector, SourceHandle};
use crate::error::{Error, ErrorKind, Result};
use crate::sampling::{DataSamplingService, SampleRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Default number of records sampled per stream during discovery
pub const DEFAULT_DISCOVERY_SAMPLE: usize = 25;

/// A stream that could not be discovered
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreamFailure {
    pub stream: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl StreamFailure {
    fn new(stream: &str, error: &Error) -> Self {
        Self {
            stream: stream.to_string(),
            kind: error.kind(),
            message: error.to_string(),
        }
    }
}

/// Outcome of discovering one source
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DiscoveryResult {
    pub provider: String,
    pub streams: Vec<StreamDescriptor>,
    pub failures: Vec<StreamFailure>,
    /// Samples taken along the way, keyed by stream
    #[serde(default)]
    pub samples: BTreeMap<String, Vec<SampleRecord>>,
    /// The deadline passed before every stream was visited
    #[serde(default)]
    pub timed_out: bool,
}

impl DiscoveryResult {
    pub fn stream(&self, name: &str) -> Option<&StreamDescriptor> {
        self.streams.iter().find(|s| s.name == name)
    }

    /// Sampled payloads of one stream
    pub fn sample_data(&self, stream: &str) -> Vec<Value> {
        self.samples
            .get(stream)
            .map(|records| records.iter().map(|r| r.data.clone()).collect())
            .unwrap_or_default()
    }
}

/// One stream's descriptor, its samples, and why sampling failed if it did
struct DiscoveredStream {
    descriptor: StreamDescriptor,
    samples: Vec<SampleRecord>,
    sampling_error: Option<Error>,
}

/// Discovers stream schemas through a connector
#[derive(Debug, Clone)]
pub struct SchemaDiscoveryService {
    sampler: DataSamplingService,
    inferrer: SchemaInferrer,
    sample_limit: usize,
    sampling: bool,
}

impl Default for SchemaDiscoveryService {
    fn default() -> Self {
        Self::new()
    }
}

impl SchemaDiscoveryService {
    /// Discovery with sampling on
    pub fn new() -> Self {
        Self {
            sampler: DataSamplingService::new(),
            inferrer: SchemaInferrer::new(),
            sample_limit: DEFAULT_DISCOVERY_SAMPLE,
            sampling: true,
        }
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: DataSamplingService) -> Self {
        self.sampler = sampler;
        self
    }

    #[must_use]
    pub fn with_sample_limit(mut self, limit: usize) -> Self {
        self.sample_limit = limit;
        self
    }

    /// Turn sampling on or off; without it undeclared streams have no fields
    #[must_use]
    pub fn with_sampling(mut self, enabled: bool) -> Self {
        self.sampling = enabled;
        self
    }

    #[must_use]
    pub fn with_inferrer(mut self, inferrer: SchemaInferrer) -> Self {
        self.inferrer = inferrer;
        self
    }

    /// Discover every stream of one source
    ///
    /// Fails as a whole only when the catalog cannot be listed.
    pub async fn discover(
        &self,
        connector: &dyn SourceConnector,
        handle: &SourceHandle,
        deadline: Option<Instant>,
    ) -> Result<DiscoveryResult> {
        let started = Instant::now();
        let provider = handle.provider().to_string();

        let listing = connector.list_streams(handle);
        let catalog = match deadline {
            Some(deadline) => tokio::time::timeout_at(deadline, listing)
                .await
                .map_err(|_| {
                    Error::deadline(format!("listing streams of {provider}"), started.elapsed())
                })??,
            None => listing.await?,
        };

        let mut result = DiscoveryResult {
            provider: provider.clone(),
            ..DiscoveryResult::default()
        };

        for entry in &catalog.streams {
            match self.discover_stream(connector, handle, entry, deadline).await {
                Ok(discovered) => {
                    debug!(
                        provider = %provider,
                        stream = %entry.name,
                        fields = discovered.descriptor.fields.len(),
                        origin = ?discovered.descriptor.field_origin,
                        "Discovered stream"
                    );
                    if !discovered.samples.is_empty() {
                        result.samples.insert(entry.name.clone(), discovered.samples);
                    }
                    result.streams.push(discovered.descriptor);

                    // Declared schema kept, samples lost
                    if let Some(e) = discovered.sampling_error {
                        warn!(
                            provider = %provider,
                            stream = %entry.name,
                            error = %e,
                            "Sampling failed, keeping declared schema"
                        );
                        result.failures.push(StreamFailure::new(&entry.name, &e));
                        if matches!(e, Error::DeadlineExceeded { .. }) {
                            result.timed_out = true;
                            break;
                        }
                    }
                }
                Err(e) => {
                    warn!(provider = %provider, stream = %entry.name, error = %e, "Stream discovery failed");
                    result.failures.push(StreamFailure::new(&entry.name, &e));
                    if matches!(e, Error::DeadlineExceeded { .. }) {
                        result.timed_out = true;
                        break;
                    }
                }
            }
        }

        info!(
            provider = %provider,
            streams = result.streams.len(),
            failures = result.failures.len(),
            "Discovery finished"
        );
        Ok(result)
    }

    async fn discover_stream(
        &self,
        connector: &dyn SourceConnector,
        handle: &SourceHandle,
        entry: &CatalogStream,
        deadline: Option<Instant>,
    ) -> Result<DiscoveredStream> {
        if let Some(reason) = &entry.error {
            return Err(Error::discovery(&entry.name, reason.clone()));
        }

        let mut descriptor = StreamDescriptor::new(&entry.name);
        descriptor.namespace = entry.namespace.clone();
        descriptor.cursor_field = entry.cursor_field.clone();
        if !entry.sync_modes.is_empty() {
            descriptor.sync_modes = entry.sync_modes.clone();
        }
        if !entry.primary_key.is_empty() {
            descriptor.primary_key = Some(entry.primary_key.clone());
        }

        if let Some(schema) = &entry.json_schema {
            descriptor.fields = fields_from_json_schema(schema)
                .map_err(|e| Error::discovery(&entry.name, e.to_string()))?;
        }

        let mut sampling_error = None;
        let samples = if self.sampling {
            match self
                .sampler
                .sample(connector, handle, &entry.name, self.sample_limit, deadline)
                .await
            {
                Ok(samples) => samples,
                // Without a declared schema there is nothing left to describe
                Err(e) if entry.json_schema.is_none() => return Err(e),
                Err(e) => {
                    sampling_error = Some(e);
                    Vec::new()
                }
            }
        } else {
            Vec::new()
        };
        let data: Vec<Value> = samples.iter().map(|s| s.data.clone()).collect();

        if entry.json_schema.is_none() && !data.is_empty() {
            descriptor.fields = self.inferrer.infer_fields(&data);
            descriptor.field_origin = FieldOrigin::Inferred;
        }

        descriptor.candidate_keys = candidate_keys(&descriptor.fields, &data, &entry.primary_key);
        Ok(DiscoveredStream {
            descriptor,
            samples,
            sampling_error,
        })
    }
}
