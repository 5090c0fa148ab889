//! Per-device measurement sequence deduplication
//!
//! RuuviTag beacons re-broadcast the same measurement several times per
//! interval; the sequence counter identifies re-deliveries. State is one
//! last-seen counter per device, owned by this instance so independent
//! pipelines never share it.

use crate::domain::types::DecodedRecord;
use rustc_hash::FxHashMap;
use tracing::{debug, warn};

/// Drops exact repeat deliveries per device using the measurement sequence
pub struct SequenceDeduplicator {
    /// Last accepted sequence per peripheral id
    sequences: FxHashMap<String, u16>,
}

impl SequenceDeduplicator {
    pub fn new() -> Self {
        Self { sequences: FxHashMap::default() }
    }

    /// Decide whether a record is a new measurement
    ///
    /// Records without a sequence counter are always admitted and leave the
    /// state untouched. A record is rejected only when its counter equals the
    /// last accepted one for the same device; any differing value is admitted,
    /// which tolerates counter wraparound.
    pub fn admit(&mut self, record: &DecodedRecord) -> bool {
        let Some(sequence) = record.sequence else {
            return true;
        };

        match self.sequences.get(&record.peripheral.id).copied() {
            Some(last) if last == sequence => {
                debug!(device = %record.peripheral, sequence = %sequence, "duplicate_sequence");
                false
            }
            Some(last) => {
                self.sequences.insert(record.peripheral.id.clone(), sequence);
                if let Some(missed) = missed_measurements(last, sequence) {
                    warn!(device = %record.peripheral, missed = %missed, "missed_measurements");
                }
                true
            }
            None => {
                self.sequences.insert(record.peripheral.id.clone(), sequence);
                true
            }
        }
    }

    /// Number of devices with tracked sequence state
    #[cfg(test)]
    pub fn tracked_devices(&self) -> usize {
        self.sequences.len()
    }
}

impl Default for SequenceDeduplicator {
    fn default() -> Self {
        Self::new()
    }
}

/// Missed-measurement count between two accepted sequence values
///
/// The gap is signed; a counter wraparound produces a negative gap and no
/// diagnostic. That limitation is deliberate and uncorrected.
fn missed_measurements(last: u16, next: u16) -> Option<i32> {
    let gap = i32::from(next) - i32::from(last);
    (gap > 1).then_some(gap - 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::PeripheralInfo;

    fn record(device: &str, sequence: Option<u16>) -> DecodedRecord {
        DecodedRecord {
            peripheral: PeripheralInfo::new(device, None),
            data_format: 5,
            id: None,
            mac: None,
            sequence,
            fields: vec![("temperatureC", 21.5)],
            decoded_at: 0,
        }
    }

    #[test]
    fn test_alternating_sequences_all_accepted() {
        let mut dedup = SequenceDeduplicator::new();

        for seq in [1u16, 2, 1, 2, 3] {
            assert!(dedup.admit(&record("aa11", Some(seq))), "sequence {seq}");
        }
    }

    #[test]
    fn test_equal_sequence_rejected_once_accepted() {
        let mut dedup = SequenceDeduplicator::new();

        assert!(dedup.admit(&record("aa11", Some(7))));
        assert!(!dedup.admit(&record("aa11", Some(7))));
        assert!(!dedup.admit(&record("aa11", Some(7))));
        assert!(dedup.admit(&record("aa11", Some(8))));
    }

    #[test]
    fn test_missing_sequence_always_accepted_without_state() {
        let mut dedup = SequenceDeduplicator::new();

        assert!(dedup.admit(&record("aa11", None)));
        assert!(dedup.admit(&record("aa11", None)));
        assert_eq!(dedup.tracked_devices(), 0);
    }

    #[test]
    fn test_devices_are_isolated() {
        let mut dedup = SequenceDeduplicator::new();

        assert!(dedup.admit(&record("aa11", Some(7))));
        assert!(dedup.admit(&record("bb22", Some(7))));
        assert!(!dedup.admit(&record("aa11", Some(7))));
        assert!(!dedup.admit(&record("bb22", Some(7))));
        assert_eq!(dedup.tracked_devices(), 2);
    }

    #[test]
    fn test_wraparound_is_accepted() {
        let mut dedup = SequenceDeduplicator::new();

        assert!(dedup.admit(&record("aa11", Some(65_534))));
        assert!(dedup.admit(&record("aa11", Some(0))));
    }

    #[test]
    fn test_missed_measurement_count() {
        assert_eq!(missed_measurements(5, 6), None);
        assert_eq!(missed_measurements(5, 7), Some(1));
        assert_eq!(missed_measurements(5, 10), Some(4));
        // Wraparound: negative gap, no diagnostic
        assert_eq!(missed_measurements(65_534, 0), None);
        assert_eq!(missed_measurements(5, 5), None);
    }
}
