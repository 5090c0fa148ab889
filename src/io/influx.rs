//! InfluxDB output - point encoding and v2 line-protocol writes
//!
//! A decoded record maps to one tagged, typed point. Field kinds come from
//! the static table in `domain::ruuvi`; a field without a declared kind is
//! warned about and dropped, never guessed.
//!
//! Line Protocol reference:
//! <https://docs.influxdata.com/influxdb/v2/reference/syntax/line-protocol/>

use crate::domain::ruuvi::field_kind;
use crate::domain::types::{DecodedRecord, FieldKind};
use crate::infra::config::InfluxSinkConfig;
use crate::io::sink::Sink;
use async_trait::async_trait;
use tracing::{debug, error, warn};

/// Tag carrying the adapter-assigned peripheral id
pub const TAG_PERIPHERAL_ID: &str = "btPeripheralId";
/// Tag carrying the advertised local name
pub const TAG_PERIPHERAL_NAME: &str = "btPeripheralName";

/// Value of an InfluxDB field
#[derive(Debug, Clone, PartialEq)]
pub enum FieldValue {
    Integer(i64),
    Float(f64),
}

impl FieldValue {
    /// Line-protocol rendering: integers carry an `i` suffix
    fn to_line_protocol(&self) -> String {
        match self {
            FieldValue::Integer(v) => format!("{v}i"),
            FieldValue::Float(v) => format!("{v}"),
        }
    }
}

/// One time-series point: measurement, tags, typed fields, ms timestamp
#[derive(Debug, Clone)]
pub struct Point {
    measurement: String,
    tags: Vec<(String, String)>,
    fields: Vec<(String, FieldValue)>,
    timestamp_ms: u64,
}

impl Point {
    pub fn new(measurement: &str, timestamp_ms: u64) -> Self {
        Self { measurement: measurement.to_string(), tags: Vec::new(), fields: Vec::new(), timestamp_ms }
    }

    pub fn tag(&mut self, key: &str, value: &str) {
        self.tags.push((key.to_string(), value.to_string()));
    }

    pub fn field(&mut self, key: &str, value: FieldValue) {
        self.fields.push((key.to_string(), value));
    }

    /// A point without fields cannot be written
    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    pub fn tag_value(&self, key: &str) -> Option<&str> {
        self.tags.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }

    pub fn field_value(&self, key: &str) -> Option<&FieldValue> {
        self.fields.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    /// Render in line protocol, tags sorted by key for canonical form
    pub fn line_protocol(&self) -> String {
        let mut line = escape_measurement(&self.measurement);

        let mut sorted_tags: Vec<_> = self.tags.iter().collect();
        sorted_tags.sort_by_key(|(k, _)| k);
        for (key, value) in sorted_tags {
            line.push(',');
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&escape_tag(value));
        }

        line.push(' ');
        for (i, (key, value)) in self.fields.iter().enumerate() {
            if i > 0 {
                line.push(',');
            }
            line.push_str(&escape_tag(key));
            line.push('=');
            line.push_str(&value.to_line_protocol());
        }

        line.push(' ');
        line.push_str(&self.timestamp_ms.to_string());
        line
    }
}

fn escape_measurement(s: &str) -> String {
    s.replace(',', "\\,").replace(' ', "\\ ")
}

fn escape_tag(s: &str) -> String {
    s.replace(',', "\\,").replace('=', "\\=").replace(' ', "\\ ")
}

/// Maps decoded records to time-series points
pub struct InfluxEncoder {
    measurement: String,
    default_tags: Vec<(String, String)>,
}

impl InfluxEncoder {
    pub fn new(config: &InfluxSinkConfig) -> Self {
        let mut default_tags: Vec<_> =
            config.default_tags.iter().map(|(k, v)| (k.clone(), v.clone())).collect();
        default_tags.sort();
        Self { measurement: config.measurement.clone(), default_tags }
    }

    /// Build the point for one record
    ///
    /// Identity-carrying values (peripheral name, beacon id, mac, format tag)
    /// become tags only when present; absent values are omitted entirely.
    pub fn encode(&self, record: &DecodedRecord) -> Point {
        let mut point = Point::new(&self.measurement, record.decoded_at);

        for (key, value) in &self.default_tags {
            point.tag(key, value);
        }
        point.tag(TAG_PERIPHERAL_ID, &record.peripheral.id);
        if let Some(name) = &record.peripheral.local_name {
            point.tag(TAG_PERIPHERAL_NAME, name);
        }
        if let Some(id) = record.id {
            point.tag("id", &id.to_string());
        }
        if let Some(mac) = &record.mac {
            point.tag("mac", mac);
        }
        point.tag("dataFormat", &record.data_format.to_string());

        for (name, value) in &record.fields {
            match field_kind(name) {
                Some(FieldKind::Int) => point.field(name, FieldValue::Integer(*value as i64)),
                Some(FieldKind::Float) => point.field(name, FieldValue::Float(*value)),
                None => {
                    warn!(field = %name, device = %record.peripheral, "unknown_field_kind");
                }
            }
        }

        point
    }
}

/// Writes point batches to the InfluxDB v2 write endpoint
pub struct InfluxWriter {
    client: reqwest::Client,
    write_url: String,
    org: String,
    bucket: String,
    token: String,
}

impl InfluxWriter {
    pub fn new(config: &InfluxSinkConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            write_url: format!("{}/api/v2/write", config.url.trim_end_matches('/')),
            org: config.org.clone(),
            bucket: config.bucket.clone(),
            token: config.token.clone(),
        }
    }
}

#[async_trait]
impl Sink<Point> for InfluxWriter {
    fn name(&self) -> &'static str {
        "influx"
    }

    async fn write(&self, batch: Vec<Point>) {
        let body =
            batch.iter().map(Point::line_protocol).collect::<Vec<_>>().join("\n");
        debug!(points = %batch.len(), "influx_write");

        let result = self
            .client
            .post(&self.write_url)
            .query(&[
                ("org", self.org.as_str()),
                ("bucket", self.bucket.as_str()),
                ("precision", "ms"),
            ])
            .header("Authorization", format!("Token {}", self.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() => {
                debug!(points = %batch.len(), "influx_write_ok");
            }
            Ok(response) => {
                error!(status = %response.status(), points = %batch.len(), "influx_write_failed");
            }
            Err(e) => {
                error!(error = %e, points = %batch.len(), "influx_write_failed");
            }
        }
    }
}
