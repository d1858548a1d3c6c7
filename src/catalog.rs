//! In-memory catalog cache.
//!
//! A keyed TTL map used as the handoff between the (external) catalog loader
//! and the device supervisor. Single writer, many readers, whole-partition
//! replacement semantics.

use crate::types::{CatalogPartition, Device};
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

struct Entry {
    devices: Vec<Device>,
    expires_at: Instant,
}

/// TTL-keyed mapping from catalog partition to its device list.
pub struct CatalogCache {
    entries: RwLock<HashMap<CatalogPartition, Entry>>,
}

impl CatalogCache {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Replaces the entire partition with `devices`, valid for `ttl`.
    pub async fn set(&self, partition: CatalogPartition, devices: Vec<Device>, ttl: Duration) {
        let mut entries = self.entries.write().await;
        entries.insert(
            partition,
            Entry {
                devices,
                expires_at: Instant::now() + ttl,
            },
        );
    }

    /// Returns the partition's device list, or `None` if absent or expired.
    /// Expired entries are purged lazily, on read.
    pub async fn get(&self, partition: CatalogPartition) -> Option<Vec<Device>> {
        let now = Instant::now();
        {
            let entries = self.entries.read().await;
            if let Some(entry) = entries.get(&partition) {
                if entry.expires_at > now {
                    return Some(entry.devices.clone());
                }
            } else {
                return None;
            }
        }
        let mut entries = self.entries.write().await;
        entries.remove(&partition);
        None
    }

    /// Seeds every partition implied by `devices`, all with the same TTL.
    /// Used at process bootstrap to load the static/bootstrap device list.
    pub async fn seed(&self, devices: Vec<Device>, ttl: Duration) {
        let mut by_partition: HashMap<CatalogPartition, Vec<Device>> = HashMap::new();
        for device in devices {
            by_partition
                .entry(CatalogPartition::for_device(&device))
                .or_default()
                .push(device);
        }
        for (partition, devices) in by_partition {
            self.set(partition, devices, ttl).await;
        }
    }
}

impl Default for CatalogCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{AddressStyle, Endianness, Protocol};
    use uuid::Uuid;

    fn modbus_device() -> Device {
        Device {
            device_id: Uuid::new_v4(),
            name: "plc".into(),
            protocol: Protocol::Modbus,
            poll_interval_ms: 1000,
            host: Some("10.0.0.1".into()),
            port: Some(502),
            endianness: Endianness::Big,
            address_style: AddressStyle::Auto,
            slaves: vec![],
            endpoint_url: None,
            mode: None,
            nodes: vec![],
        }
    }

    #[tokio::test]
    async fn set_then_get_round_trips() {
        let cache = CatalogCache::new();
        cache
            .set(
                CatalogPartition::ModbusDevices,
                vec![modbus_device()],
                Duration::from_secs(60),
            )
            .await;
        let devices = cache.get(CatalogPartition::ModbusDevices).await.unwrap();
        assert_eq!(devices.len(), 1);
    }

    #[tokio::test]
    async fn expired_entry_is_purged_on_read() {
        let cache = CatalogCache::new();
        cache
            .set(
                CatalogPartition::ModbusDevices,
                vec![modbus_device()],
                Duration::from_millis(1),
            )
            .await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(cache.get(CatalogPartition::ModbusDevices).await.is_none());
    }

    #[tokio::test]
    async fn seed_partitions_by_role() {
        let cache = CatalogCache::new();
        cache.seed(vec![modbus_device()], Duration::from_secs(60)).await;
        assert!(cache.get(CatalogPartition::ModbusDevices).await.is_some());
        assert!(cache
            .get(CatalogPartition::OpcUaPollingDevices)
            .await
            .is_none());
    }
}
