//! Shared types for the telemetry hub

use bytes::Bytes;
use std::time::{SystemTime, UNIX_EPOCH};

/// Current time as milliseconds since the Unix epoch
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Identity of a beacon as seen at the advertisement boundary
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PeripheralInfo {
    /// Stable peripheral identifier assigned by the adapter
    pub id: String,
    /// Advertised local name, if the beacon broadcasts one
    pub local_name: Option<String>,
}

impl PeripheralInfo {
    pub fn new(id: impl Into<String>, local_name: Option<String>) -> Self {
        Self { id: id.into(), local_name }
    }
}

impl std::fmt::Display for PeripheralInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.local_name.as_deref().unwrap_or("unknown"), self.id)
    }
}

/// Raw broadcast payload pushed by an advertisement source
///
/// `payload` starts at the format tag; the manufacturer identifier has
/// already been stripped at the source boundary.
#[derive(Debug, Clone)]
pub struct RawAdvertisement {
    pub peripheral: PeripheralInfo,
    pub payload: Bytes,
    /// Capture time (epoch ms)
    pub captured_at: u64,
}

/// Numeric kind of a decoded field
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    Int,
    Float,
}

/// Structured measurement extracted from one advertisement
///
/// Field names are the wire names of the RuuviTag formats (`temperatureC`,
/// `pressurePa`, ...). Values not available in the payload are omitted from
/// `fields` rather than carried as sentinels.
#[derive(Debug, Clone)]
pub struct DecodedRecord {
    pub peripheral: PeripheralInfo,
    /// Format tag the payload was decoded as
    pub data_format: u8,
    /// Beacon-configured id, present in some formats
    pub id: Option<u32>,
    /// MAC address carried in the payload (not the adapter address)
    pub mac: Option<String>,
    /// Measurement sequence counter, used for re-delivery detection
    pub sequence: Option<u16>,
    /// Named numeric samples in decode order
    pub fields: Vec<(&'static str, f64)>,
    /// Decode time (epoch ms)
    pub decoded_at: u64,
}

impl DecodedRecord {
    /// Value of a named field, if the payload carried it
    pub fn field(&self, name: &str) -> Option<f64> {
        self.fields.iter().find(|(n, _)| *n == name).map(|(_, v)| *v)
    }
}
