//! RuuviTag broadcast formats and decoders
//!
//! Format references:
//! - DF3 (RAWv1): https://docs.ruuvi.com/communication/bluetooth-advertisements/data-format-3-rawv1
//! - DF5 (RAWv2): https://docs.ruuvi.com/communication/bluetooth-advertisements/data-format-5-rawv2
//!
//! Payloads start at the format tag. Values the payload marks "not available"
//! are omitted from the decoded record instead of being forwarded as sentinels.

use crate::domain::types::{DecodedRecord, FieldKind, RawAdvertisement};
use thiserror::Error;

/// Manufacturer identifier of Ruuvi Innovations Ltd (0x0499, little-endian on the wire)
pub const MANUFACTURER_ID_RUUVI: [u8; 2] = [0x99, 0x04];

pub const FIELD_TEMPERATURE: &str = "temperatureC";
pub const FIELD_HUMIDITY: &str = "humidityRh";
pub const FIELD_PRESSURE: &str = "pressurePa";
pub const FIELD_ACCELERATION_X: &str = "accelerationXG";
pub const FIELD_ACCELERATION_Y: &str = "accelerationYG";
pub const FIELD_ACCELERATION_Z: &str = "accelerationZG";
pub const FIELD_BATTERY_VOLTAGE: &str = "batteryVoltageV";
pub const FIELD_TX_POWER: &str = "txPowerDBm";
pub const FIELD_MOVEMENT_COUNTER: &str = "movementCounter";
pub const FIELD_MEASUREMENT_SEQUENCE: &str = "measurementSequence";

/// Numeric kind of every field a decoder can emit
///
/// Kept as data so backend encoders can map fields without guessing; an
/// exhaustiveness test checks this table against the decoder output.
pub const FIELD_KINDS: &[(&str, FieldKind)] = &[
    (FIELD_TEMPERATURE, FieldKind::Float),
    (FIELD_HUMIDITY, FieldKind::Float),
    (FIELD_PRESSURE, FieldKind::Int),
    (FIELD_ACCELERATION_X, FieldKind::Float),
    (FIELD_ACCELERATION_Y, FieldKind::Float),
    (FIELD_ACCELERATION_Z, FieldKind::Float),
    (FIELD_BATTERY_VOLTAGE, FieldKind::Float),
    (FIELD_TX_POWER, FieldKind::Int),
    (FIELD_MOVEMENT_COUNTER, FieldKind::Int),
    (FIELD_MEASUREMENT_SEQUENCE, FieldKind::Int),
];

/// Declared kind of a decoded field name
pub fn field_kind(name: &str) -> Option<FieldKind> {
    FIELD_KINDS.iter().find(|(n, _)| *n == name).map(|(_, k)| *k)
}

/// Decode failure taxonomy; all variants are drop-and-log, never fatal
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("unknown data format: 0x{0:02x}")]
    UnknownFormat(u8),
    #[error("unsupported data format: {0}")]
    UnsupportedFormat(DataFormat),
    #[error("truncated payload: expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Closed set of known RuuviTag broadcast formats
///
/// Adding a format means adding a variant here plus its entry in `from_tag`
/// and `decoder`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataFormat {
    /// 0x03 - RAWv1 environmental broadcast
    Df3,
    /// 0x05 - RAWv2 environmental broadcast
    Df5,
    /// 0xAC - acceleration log broadcast (recognized, no decoder)
    Acceleration,
    /// 0xBA - battery log broadcast (recognized, no decoder)
    Battery,
    /// 0xFE - reserved endpoint broadcast (recognized, no decoder)
    Dffe,
}

type Decoder = fn(&RawAdvertisement) -> Result<DecodedRecord, DecodeError>;

impl DataFormat {
    /// Map a format tag to a known format
    pub fn from_tag(tag: u8) -> Option<DataFormat> {
        match tag {
            0x03 => Some(DataFormat::Df3),
            0x05 => Some(DataFormat::Df5),
            0xac => Some(DataFormat::Acceleration),
            0xba => Some(DataFormat::Battery),
            0xfe => Some(DataFormat::Dffe),
            _ => None,
        }
    }

    pub fn tag(self) -> u8 {
        match self {
            DataFormat::Df3 => 0x03,
            DataFormat::Df5 => 0x05,
            DataFormat::Acceleration => 0xac,
            DataFormat::Battery => 0xba,
            DataFormat::Dffe => 0xfe,
        }
    }

    /// Decoder table; recognized formats without an entry are unsupported
    fn decoder(self) -> Option<Decoder> {
        match self {
            DataFormat::Df3 => Some(decode_df3),
            DataFormat::Df5 => Some(decode_df5),
            DataFormat::Acceleration | DataFormat::Battery | DataFormat::Dffe => None,
        }
    }
}

impl std::fmt::Display for DataFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:02x}", self.tag())
    }
}

/// Extract the Ruuvi payload from raw manufacturer data
///
/// Returns the bytes after the manufacturer identifier when the manufacturer
/// is Ruuvi Innovations Ltd, `None` otherwise.
pub fn extract_ruuvi_data(manufacturer_data: &[u8]) -> Option<&[u8]> {
    if manufacturer_data.len() >= 2 && manufacturer_data[0..2] == MANUFACTURER_ID_RUUVI {
        Some(&manufacturer_data[2..])
    } else {
        None
    }
}

/// Dispatch an advertisement to the decoder selected by its format tag
pub fn decode(adv: &RawAdvertisement) -> Result<DecodedRecord, DecodeError> {
    let tag = *adv.payload.first().ok_or(DecodeError::Truncated { expected: 1, actual: 0 })?;
    let format = DataFormat::from_tag(tag).ok_or(DecodeError::UnknownFormat(tag))?;
    let decoder = format.decoder().ok_or(DecodeError::UnsupportedFormat(format))?;
    decoder(adv)
}

/// DF3 payload length: format tag + 13 data bytes
const DF3_LEN: usize = 14;

fn decode_df3(adv: &RawAdvertisement) -> Result<DecodedRecord, DecodeError> {
    let p = &adv.payload;
    if p.len() < DF3_LEN {
        return Err(DecodeError::Truncated { expected: DF3_LEN, actual: p.len() });
    }

    let humidity = f64::from(p[1]) * 0.5;

    // Sign bit + 7-bit integer part, separate centi-degree fraction byte
    let temp_magnitude = f64::from(p[2] & 0x7f) + f64::from(p[3]) / 100.0;
    let temperature = if p[2] & 0x80 != 0 { -temp_magnitude } else { temp_magnitude };

    let pressure = f64::from(u16::from_be_bytes([p[4], p[5]])) + 50_000.0;
    let battery = f64::from(u16::from_be_bytes([p[12], p[13]])) / 1000.0;

    let fields = vec![
        (FIELD_TEMPERATURE, temperature),
        (FIELD_HUMIDITY, humidity),
        (FIELD_PRESSURE, pressure),
        (FIELD_ACCELERATION_X, milli_g(i16::from_be_bytes([p[6], p[7]]))),
        (FIELD_ACCELERATION_Y, milli_g(i16::from_be_bytes([p[8], p[9]]))),
        (FIELD_ACCELERATION_Z, milli_g(i16::from_be_bytes([p[10], p[11]]))),
        (FIELD_BATTERY_VOLTAGE, battery),
    ];

    Ok(DecodedRecord {
        peripheral: adv.peripheral.clone(),
        data_format: DataFormat::Df3.tag(),
        id: None,
        mac: None,
        sequence: None,
        fields,
        decoded_at: adv.captured_at,
    })
}

/// DF5 payload length: format tag + 23 data bytes
const DF5_LEN: usize = 24;

// DF5 "not available" encodings
const DF5_INVALID_TEMPERATURE: i16 = i16::MIN;
const DF5_INVALID_HUMIDITY: u16 = u16::MAX;
const DF5_INVALID_PRESSURE: u16 = u16::MAX;
const DF5_INVALID_ACCELERATION: i16 = i16::MIN;
const DF5_INVALID_BATTERY: u16 = 2047;
const DF5_INVALID_TX_POWER: u16 = 31;
const DF5_INVALID_MOVEMENT: u8 = u8::MAX;
const DF5_INVALID_SEQUENCE: u16 = u16::MAX;

fn decode_df5(adv: &RawAdvertisement) -> Result<DecodedRecord, DecodeError> {
    let p = &adv.payload;
    if p.len() < DF5_LEN {
        return Err(DecodeError::Truncated { expected: DF5_LEN, actual: p.len() });
    }

    let mut fields = Vec::new();

    let raw_temp = i16::from_be_bytes([p[1], p[2]]);
    if raw_temp != DF5_INVALID_TEMPERATURE {
        fields.push((FIELD_TEMPERATURE, f64::from(raw_temp) * 0.005));
    }

    let raw_humidity = u16::from_be_bytes([p[3], p[4]]);
    if raw_humidity != DF5_INVALID_HUMIDITY {
        fields.push((FIELD_HUMIDITY, f64::from(raw_humidity) * 0.0025));
    }

    let raw_pressure = u16::from_be_bytes([p[5], p[6]]);
    if raw_pressure != DF5_INVALID_PRESSURE {
        fields.push((FIELD_PRESSURE, f64::from(raw_pressure) + 50_000.0));
    }

    for (name, offset) in [
        (FIELD_ACCELERATION_X, 7usize),
        (FIELD_ACCELERATION_Y, 9),
        (FIELD_ACCELERATION_Z, 11),
    ] {
        let raw = i16::from_be_bytes([p[offset], p[offset + 1]]);
        if raw != DF5_INVALID_ACCELERATION {
            fields.push((name, milli_g(raw)));
        }
    }

    // Power info: 11-bit battery voltage | 5-bit tx power
    let power = u16::from_be_bytes([p[13], p[14]]);
    let raw_battery = power >> 5;
    if raw_battery != DF5_INVALID_BATTERY {
        fields.push((FIELD_BATTERY_VOLTAGE, f64::from(1600 + raw_battery) / 1000.0));
    }
    let raw_tx_power = power & 0x1f;
    if raw_tx_power != DF5_INVALID_TX_POWER {
        fields.push((FIELD_TX_POWER, f64::from(raw_tx_power) * 2.0 - 40.0));
    }

    if p[15] != DF5_INVALID_MOVEMENT {
        fields.push((FIELD_MOVEMENT_COUNTER, f64::from(p[15])));
    }

    let raw_sequence = u16::from_be_bytes([p[16], p[17]]);
    let sequence = (raw_sequence != DF5_INVALID_SEQUENCE).then_some(raw_sequence);
    if let Some(seq) = sequence {
        fields.push((FIELD_MEASUREMENT_SEQUENCE, f64::from(seq)));
    }

    let mac_bytes = &p[18..24];
    let mac = (!mac_bytes.iter().all(|b| *b == 0xff)).then(|| format_mac(mac_bytes));

    Ok(DecodedRecord {
        peripheral: adv.peripheral.clone(),
        data_format: DataFormat::Df5.tag(),
        id: None,
        mac,
        sequence,
        fields,
        decoded_at: adv.captured_at,
    })
}

fn milli_g(raw: i16) -> f64 {
    f64::from(raw) / 1000.0
}

fn format_mac(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02X}")).collect::<Vec<_>>().join(":")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PeripheralInfo;
    use bytes::Bytes;

    // Known-good DF5 broadcast; pressure bytes carry the "not available" encoding
    const DF5_SAMPLE: [u8; 24] = [
        0x05, 0x13, 0x14, 0x2c, 0xf8, 0xff, 0xff, 0xff, 0xf0, 0xff, 0xf4, 0x03, 0xec, 0xc4, 0x16,
        0x52, 0x0e, 0x1b, 0xc6, 0x91, 0x3c, 0x66, 0x24, 0x7d,
    ];

    fn advertisement(payload: &[u8]) -> RawAdvertisement {
        RawAdvertisement {
            peripheral: PeripheralInfo::new("aa11", Some("Sauna".to_string())),
            payload: Bytes::copy_from_slice(payload),
            captured_at: 1_700_000_000_000,
        }
    }

    fn assert_close(actual: f64, expected: f64) {
        assert!((actual - expected).abs() < 1e-9, "expected {expected}, got {actual}");
    }

    #[test]
    fn test_extract_ruuvi_data() {
        let data = [0x99, 0x04, 0x05, 0x13];
        assert_eq!(extract_ruuvi_data(&data), Some(&data[2..]));

        // Some other manufacturer
        assert_eq!(extract_ruuvi_data(&[0x4c, 0x00, 0x05]), None);
        assert_eq!(extract_ruuvi_data(&[0x99]), None);
    }

    #[test]
    fn test_decode_df5() {
        let record = decode(&advertisement(&DF5_SAMPLE)).unwrap();

        assert_eq!(record.data_format, 0x05);
        assert_close(record.field(FIELD_TEMPERATURE).unwrap(), 24.42);
        assert_close(record.field(FIELD_HUMIDITY).unwrap(), 28.78);
        assert_close(record.field(FIELD_ACCELERATION_X).unwrap(), -0.016);
        assert_close(record.field(FIELD_ACCELERATION_Y).unwrap(), -0.012);
        assert_close(record.field(FIELD_ACCELERATION_Z).unwrap(), 1.004);
        assert_close(record.field(FIELD_BATTERY_VOLTAGE).unwrap(), 3.168);
        assert_close(record.field(FIELD_TX_POWER).unwrap(), 4.0);
        assert_close(record.field(FIELD_MOVEMENT_COUNTER).unwrap(), 82.0);
        assert_eq!(record.sequence, Some(3611));
        assert_close(record.field(FIELD_MEASUREMENT_SEQUENCE).unwrap(), 3611.0);
        assert_eq!(record.mac.as_deref(), Some("C6:91:3C:66:24:7D"));
        assert_eq!(record.decoded_at, 1_700_000_000_000);
    }

    #[test]
    fn test_decode_df5_omits_unavailable_values() {
        // Pressure bytes in the sample are 0xFFFF
        let record = decode(&advertisement(&DF5_SAMPLE)).unwrap();
        assert_eq!(record.field(FIELD_PRESSURE), None);
    }

    #[test]
    fn test_decode_df5_all_unavailable() {
        let mut payload = [0u8; 24];
        payload[0] = 0x05;
        payload[1] = 0x80; // temperature 0x8000
        payload[3] = 0xff;
        payload[4] = 0xff; // humidity
        payload[5] = 0xff;
        payload[6] = 0xff; // pressure
        payload[7] = 0x80; // acceleration X 0x8000
        payload[9] = 0x80;
        payload[11] = 0x80;
        payload[13] = 0xff;
        payload[14] = 0xff; // battery 2047, tx power 31
        payload[15] = 0xff; // movement
        payload[16] = 0xff;
        payload[17] = 0xff; // sequence
        for b in &mut payload[18..24] {
            *b = 0xff; // mac
        }

        let record = decode(&advertisement(&payload)).unwrap();
        assert!(record.fields.is_empty());
        assert_eq!(record.sequence, None);
        assert_eq!(record.mac, None);
    }

    #[test]
    fn test_decode_df3() {
        // humidity 40 * 0.5, temperature -1.50, pressure 0xC87D + 50000, battery 2899 mV
        let payload = [
            0x03, 0x28, 0x81, 0x32, 0xc8, 0x7d, 0x00, 0x10, 0xff, 0xf0, 0x03, 0xe8, 0x0b, 0x53,
        ];
        let record = decode(&advertisement(&payload)).unwrap();

        assert_eq!(record.data_format, 0x03);
        assert_close(record.field(FIELD_HUMIDITY).unwrap(), 20.0);
        assert_close(record.field(FIELD_TEMPERATURE).unwrap(), -1.50);
        assert_close(record.field(FIELD_PRESSURE).unwrap(), 101_325.0);
        assert_close(record.field(FIELD_ACCELERATION_X).unwrap(), 0.016);
        assert_close(record.field(FIELD_ACCELERATION_Y).unwrap(), -0.016);
        assert_close(record.field(FIELD_ACCELERATION_Z).unwrap(), 1.0);
        assert_close(record.field(FIELD_BATTERY_VOLTAGE).unwrap(), 2.899);
        assert_eq!(record.sequence, None);
        assert_eq!(record.mac, None);
        assert_eq!(record.id, None);
    }

    #[test]
    fn test_unknown_format() {
        let err = decode(&advertisement(&[0x7f, 0x00, 0x00])).unwrap_err();
        assert!(matches!(err, DecodeError::UnknownFormat(0x7f)));
    }

    #[test]
    fn test_unsupported_formats() {
        for tag in [0xacu8, 0xba, 0xfe] {
            let err = decode(&advertisement(&[tag])).unwrap_err();
            assert!(matches!(err, DecodeError::UnsupportedFormat(_)), "tag 0x{tag:02x}");
        }
    }

    #[test]
    fn test_truncated_payloads() {
        assert!(matches!(
            decode(&advertisement(&[])).unwrap_err(),
            DecodeError::Truncated { expected: 1, actual: 0 }
        ));
        assert!(matches!(
            decode(&advertisement(&[0x05, 0x13, 0x14])).unwrap_err(),
            DecodeError::Truncated { expected: DF5_LEN, actual: 3 }
        ));
        assert!(matches!(
            decode(&advertisement(&[0x03, 0x28])).unwrap_err(),
            DecodeError::Truncated { expected: DF3_LEN, actual: 2 }
        ));
    }

    #[test]
    fn test_field_kinds_cover_all_decoded_fields() {
        let df3 = [
            0x03, 0x28, 0x01, 0x32, 0xc8, 0x7d, 0x00, 0x10, 0xff, 0xf0, 0x03, 0xe8, 0x0b, 0x53,
        ];
        for payload in [&DF5_SAMPLE[..], &df3[..]] {
            let record = decode(&advertisement(payload)).unwrap();
            for (name, _) in &record.fields {
                assert!(field_kind(name).is_some(), "no kind declared for field {name}");
            }
        }
    }
}
