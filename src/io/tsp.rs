//! Time Series Platform output - measurement binding, merging and dispatch
//!
//! Records map to named measurements through two binding tables: a
//! field-name allow-list (fields without a binding are silently dropped)
//! and an optional device-to-location table keyed by peripheral id or
//! advertised name. Measurements sharing a destination merge their data
//! points before dispatch, and every measurement in an outgoing batch is
//! stamped with the same version timestamp at send time.

use crate::domain::types::{epoch_ms, DecodedRecord};
use crate::infra::config::{IdentifierKind, TspSinkConfig};
use crate::io::sink::Sink;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use tracing::{debug, error, info};

/// One sampled value with its own measurement timestamp (epoch ms)
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TspDataPoint {
    pub value: f64,
    pub timestamp: u64,
}

/// A named measurement series for the TSP measurement API
#[derive(Debug, Clone, Serialize)]
pub struct TspMeasurement {
    pub tag: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    pub data: Vec<TspDataPoint>,
    /// Send time of the dispatching batch, distinct from sample timestamps
    #[serde(rename = "versionTimestamp", skip_serializing_if = "Option::is_none")]
    pub version_timestamp: Option<u64>,
}

impl TspMeasurement {
    /// Merge key: exact `tag` or `tag@location`
    fn merge_key(&self) -> String {
        match &self.location {
            Some(location) => format!("{}@{}", self.tag, location),
            None => self.tag.clone(),
        }
    }
}

/// Maps decoded records to TSP measurements via the binding tables
pub struct TspEncoder {
    /// Field name -> output tag allow-list
    tags: HashMap<String, String>,
    /// `id@<value>` / `name@<value>` -> location
    locations: HashMap<String, String>,
}

impl TspEncoder {
    pub fn new(config: &TspSinkConfig) -> Self {
        let tags = config.tags.iter().map(|b| (b.input.clone(), b.out.clone())).collect();
        let locations = config
            .locations
            .iter()
            .map(|b| (location_key(b.kind, &b.value), b.out.clone()))
            .collect();
        Self { tags, locations }
    }

    /// One single-point measurement per forwarded field; unmapped fields
    /// yield nothing
    pub fn encode(&self, record: &DecodedRecord) -> Vec<TspMeasurement> {
        let location = self.location(record);
        let mut measurements = Vec::new();

        for (name, value) in &record.fields {
            if let Some(tag) = self.tags.get(*name) {
                measurements.push(TspMeasurement {
                    tag: tag.clone(),
                    location: location.clone(),
                    data: vec![TspDataPoint { value: *value, timestamp: record.decoded_at }],
                    version_timestamp: None,
                });
            }
        }

        if !measurements.is_empty() {
            debug!(device = %record.peripheral, count = %measurements.len(), "tsp_encoded");
        }
        measurements
    }

    /// Location lookup tries the peripheral id first, then the advertised
    /// name; no match means no location, not an error
    fn location(&self, record: &DecodedRecord) -> Option<String> {
        if self.locations.is_empty() {
            return None;
        }

        let mut keys = vec![location_key(IdentifierKind::Id, &record.peripheral.id)];
        if let Some(name) = &record.peripheral.local_name {
            keys.push(location_key(IdentifierKind::Name, name));
        }

        keys.iter().find_map(|k| self.locations.get(k).cloned())
    }
}

fn location_key(kind: IdentifierKind, value: &str) -> String {
    match kind {
        IdentifierKind::Id => format!("id@{value}"),
        IdentifierKind::Name => format!("name@{value}"),
    }
}

/// Merge measurements sharing (tag, location), appending data points in
/// encounter order
pub fn merge_by_tag_and_location(measurements: Vec<TspMeasurement>) -> Vec<TspMeasurement> {
    let mut merged: Vec<TspMeasurement> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for measurement in measurements {
        match index.get(&measurement.merge_key()) {
            Some(&i) => merged[i].data.extend(measurement.data),
            None => {
                index.insert(measurement.merge_key(), merged.len());
                merged.push(measurement);
            }
        }
    }

    merged
}

/// Posts merged measurement batches to the TSP measurement API
pub struct TspWriter {
    client: reqwest::Client,
    measurement_url: String,
    api_key_header: String,
    api_key: String,
}

impl TspWriter {
    pub fn new(config: &TspSinkConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            measurement_url: format!("{}/measurement", config.url.trim_end_matches('/')),
            api_key_header: config.api_key_header.clone(),
            api_key: config.api_key.clone(),
        }
    }
}

#[async_trait]
impl Sink<TspMeasurement> for TspWriter {
    fn name(&self) -> &'static str {
        "tsp"
    }

    async fn write(&self, batch: Vec<TspMeasurement>) {
        let now = epoch_ms();
        let mut merged = merge_by_tag_and_location(batch);
        for measurement in &mut merged {
            measurement.version_timestamp = Some(now);
        }

        let result = self
            .client
            .post(&self.measurement_url)
            .header(&self.api_key_header, &self.api_key)
            .json(&merged)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                info!(measurements = %merged.len(), "tsp_write_ok");
            }
            Ok(response) => {
                error!(status = %response.status(), measurements = %merged.len(), "tsp_write_failed");
            }
            Err(e) => {
                error!(error = %e, measurements = %merged.len(), "tsp_write_failed");
            }
        }
    }
}
