//! Domain models - core telemetry types and broadcast formats
//!
//! This module contains the canonical data types used throughout the system:
//! - `RawAdvertisement` - a broadcast payload captured at the source boundary
//! - `DecodedRecord` - structured measurement extracted from a payload
//! - `PeripheralInfo` - beacon identity (id + advertised name)
//! - `ruuvi` - RuuviTag data formats, decoders and the field kind table

pub mod ruuvi;
pub mod types;

// Re-export commonly used types at module level
pub use types::{epoch_ms, DecodedRecord, FieldKind, PeripheralInfo, RawAdvertisement};
