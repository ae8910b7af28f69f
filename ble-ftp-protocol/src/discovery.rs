//! Known-device registry fed by scan sightings
//!
//! Records are keyed by address: a re-sighting replaces the previous record
//! and refreshes its timestamp. Staleness only affects what [`DeviceRegistry::fresh`]
//! reports; stale entries stay in the registry until [`DeviceRegistry::clear`].

use crate::gatt::ScanRecord;
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use tracing::debug;

/// How recently a device must have been seen to count as present
pub const FRESHNESS_WINDOW_MS: i64 = 5_000;

/// Devices sighted during scans, keyed by address
#[derive(Debug, Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, ScanRecord>,
}

impl DeviceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a sighting, replacing any previous record for the address
    ///
    /// The record is stamped with the current time regardless of what the
    /// scanner put in `last_seen`.
    pub fn insert(&mut self, mut record: ScanRecord) {
        record.last_seen = Utc::now();
        debug!(
            "device {} seen (rssi {} dBm)",
            record.address, record.rssi
        );
        self.devices.insert(record.address.clone(), record);
    }

    /// Look up a device by address
    pub fn get(&self, address: &str) -> Option<&ScanRecord> {
        self.devices.get(address)
    }

    /// All known devices, fresh or stale
    pub fn all(&self) -> Vec<ScanRecord> {
        self.devices.values().cloned().collect()
    }

    /// Devices seen within the freshness window
    pub fn fresh(&self) -> Vec<ScanRecord> {
        self.fresh_at(Utc::now())
    }

    /// Devices seen within the freshness window relative to `now`
    pub fn fresh_at(&self, now: DateTime<Utc>) -> Vec<ScanRecord> {
        let window = Duration::milliseconds(FRESHNESS_WINDOW_MS);
        self.devices
            .values()
            .filter(|record| now.signed_duration_since(record.last_seen) <= window)
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.devices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Forget every device
    pub fn clear(&mut self) {
        debug!("clearing {} known devices", self.devices.len());
        self.devices.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(address: &str, rssi: i16) -> ScanRecord {
        ScanRecord::new(address, Some(format!("dev-{}", address)), rssi)
    }

    #[test]
    fn test_insert_replaces_by_address() {
        let mut registry = DeviceRegistry::new();
        registry.insert(record("AA:BB:CC:DD:EE:FF", -70));
        registry.insert(record("AA:BB:CC:DD:EE:FF", -42));

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.get("AA:BB:CC:DD:EE:FF").unwrap().rssi, -42);
    }

    #[test]
    fn test_insert_stamps_current_time() {
        let mut registry = DeviceRegistry::new();
        let mut stale = record("11:22:33:44:55:66", -60);
        stale.last_seen = Utc::now() - Duration::hours(1);
        registry.insert(stale);

        let stored = registry.get("11:22:33:44:55:66").unwrap();
        let age = Utc::now().signed_duration_since(stored.last_seen);
        assert!(age < Duration::seconds(1));
    }

    #[test]
    fn test_freshness_window() {
        let mut registry = DeviceRegistry::new();
        registry.insert(record("AA:AA:AA:AA:AA:AA", -50));

        let now = Utc::now();
        assert_eq!(registry.fresh_at(now).len(), 1);

        // Past the window the device stops being reported but is not dropped.
        let later = now + Duration::milliseconds(FRESHNESS_WINDOW_MS + 1_000);
        assert!(registry.fresh_at(later).is_empty());
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_clear() {
        let mut registry = DeviceRegistry::new();
        registry.insert(record("AA:AA:AA:AA:AA:AA", -50));
        registry.insert(record("BB:BB:BB:BB:BB:BB", -55));
        assert_eq!(registry.len(), 2);

        registry.clear();
        assert!(registry.is_empty());
        assert!(registry.fresh().is_empty());
    }
}
