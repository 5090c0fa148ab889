//! Advertisement intake - manufacturer filtering, device filters and
//! discovery bookkeeping
//!
//! Sits between the advertisement source and the pipeline channel. Only
//! Ruuvi manufacturer data passes; devices are admitted through the
//! configured id/name filters, with filtered-out devices cached so they are
//! skipped (and logged) only once. In scan mode discovery logging still
//! runs but nothing is published downstream.

use crate::domain::ruuvi::extract_ruuvi_data;
use crate::domain::types::{PeripheralInfo, RawAdvertisement};
use crate::infra::config::{Config, FilterConfig, IdentifierKind};
use bytes::Bytes;
use rustc_hash::FxHashMap;
use std::collections::HashSet;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{info, warn};

/// Admits advertisements into the pipeline channel
pub struct RuuviListener {
    id_filter: Option<HashSet<String>>,
    name_filter: Option<HashSet<String>>,
    scan_mode: bool,
    /// Known peripherals and the name they were last seen with
    known: FxHashMap<String, Option<String>>,
    ignored: HashSet<String>,
    tx: mpsc::Sender<RawAdvertisement>,
    /// Rate limit for channel-full warnings
    last_drop_warn: Instant,
    dropped: u64,
}

impl RuuviListener {
    pub fn new(config: &Config, tx: mpsc::Sender<RawAdvertisement>) -> Self {
        Self::with_filters(config.filters(), config.scan_mode(), tx)
    }

    pub fn with_filters(
        filters: &[FilterConfig],
        scan_mode: bool,
        tx: mpsc::Sender<RawAdvertisement>,
    ) -> Self {
        let mut id_filter: Option<HashSet<String>> = None;
        let mut name_filter: Option<HashSet<String>> = None;
        for filter in filters {
            let set = match filter.kind {
                IdentifierKind::Id => id_filter.get_or_insert_with(HashSet::new),
                IdentifierKind::Name => name_filter.get_or_insert_with(HashSet::new),
            };
            set.insert(filter.value.clone());
        }

        if scan_mode {
            info!("scan_mode_enabled");
        }

        Self {
            id_filter,
            name_filter,
            scan_mode,
            known: FxHashMap::default(),
            ignored: HashSet::new(),
            tx,
            last_drop_warn: Instant::now() - Duration::from_secs(2),
            dropped: 0,
        }
    }

    /// Handle one advertisement report from the source
    ///
    /// `manufacturer_data` is the full vendor blob including the
    /// manufacturer identifier; non-Ruuvi data is skipped silently.
    pub fn observe(&mut self, peripheral: PeripheralInfo, manufacturer_data: &[u8], captured_at: u64) {
        let Some(ruuvi_data) = extract_ruuvi_data(manufacturer_data) else {
            return;
        };

        if self.ignored.contains(&peripheral.id) {
            return;
        }

        match self.known.get(&peripheral.id) {
            None => {
                if !self.is_included(&peripheral) {
                    self.ignored.insert(peripheral.id.clone());
                    info!(device = %peripheral, "ruuvitag_ignored");
                    return;
                }
                info!(device = %peripheral, "ruuvitag_discovered");
                self.known.insert(peripheral.id.clone(), peripheral.local_name.clone());
            }
            Some(known_name) => {
                // A beacon may advertise without its name at first
                if known_name.is_none() && peripheral.local_name.is_some() {
                    info!(device = %peripheral, "ruuvitag_rediscovered");
                    self.known.insert(peripheral.id.clone(), peripheral.local_name.clone());
                }
            }
        }

        if self.scan_mode {
            return;
        }

        let advertisement = RawAdvertisement {
            peripheral,
            payload: Bytes::copy_from_slice(ruuvi_data),
            captured_at,
        };

        if self.tx.try_send(advertisement).is_err() {
            self.dropped += 1;
            if self.last_drop_warn.elapsed() >= Duration::from_secs(1) {
                warn!(dropped = %self.dropped, "advertisement_channel_full");
                self.last_drop_warn = Instant::now();
            }
        }
    }

    fn is_included(&self, peripheral: &PeripheralInfo) -> bool {
        if let Some(ids) = &self.id_filter {
            return ids.contains(&peripheral.id);
        }

        if let Some(names) = &self.name_filter {
            return match &peripheral.local_name {
                Some(name) => names.contains(name),
                None => false,
            };
        }

        true // No filters
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RUUVI_DF5_REPORT: [u8; 6] = [0x99, 0x04, 0x05, 0x13, 0x14, 0x2c];

    fn listener(
        filters: Vec<FilterConfig>,
        scan_mode: bool,
    ) -> (RuuviListener, mpsc::Receiver<RawAdvertisement>) {
        let (tx, rx) = mpsc::channel(16);
        (RuuviListener::with_filters(&filters, scan_mode, tx), rx)
    }

    fn id_filter(value: &str) -> FilterConfig {
        FilterConfig { kind: IdentifierKind::Id, value: value.to_string() }
    }

    fn name_filter(value: &str) -> FilterConfig {
        FilterConfig { kind: IdentifierKind::Name, value: value.to_string() }
    }

    fn peripheral(id: &str, name: Option<&str>) -> PeripheralInfo {
        PeripheralInfo::new(id, name.map(String::from))
    }

    #[test]
    fn test_publishes_ruuvi_data_without_manufacturer_prefix() {
        let (mut listener, mut rx) = listener(Vec::new(), false);

        listener.observe(peripheral("aa11", None), &RUUVI_DF5_REPORT, 1000);

        let advertisement = rx.try_recv().unwrap();
        assert_eq!(&advertisement.payload[..], &RUUVI_DF5_REPORT[2..]);
        assert_eq!(advertisement.captured_at, 1000);
    }

    #[test]
    fn test_skips_other_manufacturers() {
        let (mut listener, mut rx) = listener(Vec::new(), false);

        listener.observe(peripheral("aa11", None), &[0x4c, 0x00, 0x05, 0x13], 1000);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_id_filter_admits_only_listed_devices() {
        let (mut listener, mut rx) = listener(vec![id_filter("aa11")], false);

        listener.observe(peripheral("aa11", None), &RUUVI_DF5_REPORT, 1000);
        listener.observe(peripheral("bb22", None), &RUUVI_DF5_REPORT, 1000);

        assert_eq!(rx.try_recv().unwrap().peripheral.id, "aa11");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_name_filter_admits_only_listed_names() {
        let (mut listener, mut rx) = listener(vec![name_filter("Sauna")], false);

        listener.observe(peripheral("aa11", Some("Sauna")), &RUUVI_DF5_REPORT, 1000);
        listener.observe(peripheral("bb22", Some("Porch")), &RUUVI_DF5_REPORT, 1000);
        listener.observe(peripheral("cc33", None), &RUUVI_DF5_REPORT, 1000);

        assert_eq!(rx.try_recv().unwrap().peripheral.id, "aa11");
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_ignored_devices_are_cached() {
        let (mut listener, mut rx) = listener(vec![id_filter("aa11")], false);

        listener.observe(peripheral("bb22", None), &RUUVI_DF5_REPORT, 1000);
        listener.observe(peripheral("bb22", None), &RUUVI_DF5_REPORT, 1000);

        assert!(listener.ignored.contains("bb22"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_scan_mode_publishes_nothing() {
        let (mut listener, mut rx) = listener(Vec::new(), true);

        listener.observe(peripheral("aa11", None), &RUUVI_DF5_REPORT, 1000);

        assert!(listener.known.contains_key("aa11"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_rediscovery_updates_known_name() {
        let (mut listener, _rx) = listener(Vec::new(), false);

        listener.observe(peripheral("aa11", None), &RUUVI_DF5_REPORT, 1000);
        assert_eq!(listener.known.get("aa11"), Some(&None));

        listener.observe(peripheral("aa11", Some("Sauna")), &RUUVI_DF5_REPORT, 1000);
        assert_eq!(listener.known.get("aa11"), Some(&Some("Sauna".to_string())));
    }
}
