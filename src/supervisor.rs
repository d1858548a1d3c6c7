//! Device supervisor.
//!
//! Owns a worker index keyed by `(role, device_id)` and runs a periodic
//! reconciliation that spawns a worker for every device new to its
//! partition and reaps workers whose task has completed, across the three
//! catalog partitions (Modbus, OPC-UA polling, OPC-UA subscription).

use crate::catalog::CatalogCache;
use crate::config::GatewayConfig;
#[cfg(feature = "modbus-tcp")]
use crate::modbus::run_modbus_worker;
#[cfg(feature = "opcua")]
use crate::opcua::{run_opcua_poll_worker, run_opcua_subscribe_worker, OpcUaContext};
use crate::sink::TelemetrySink;
use crate::types::{CatalogPartition, WorkerRole};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

const RECONCILE_INTERVAL: Duration = Duration::from_secs(5);

#[cfg(feature = "opcua")]
type OpcUaHandle = Arc<OpcUaContext>;
#[cfg(not(feature = "opcua"))]
type OpcUaHandle = ();

/// Supervises one long-lived worker per `(device_id, role)`.
pub struct DeviceSupervisor {
    catalog: Arc<CatalogCache>,
    sink: Arc<dyn TelemetrySink>,
    opcua: Option<OpcUaHandle>,
    connect_semaphore: Arc<Semaphore>,
    workers: Mutex<HashMap<(WorkerRole, Uuid), JoinHandle<()>>>,
}

impl DeviceSupervisor {
    pub fn new(
        config: &GatewayConfig,
        catalog: Arc<CatalogCache>,
        sink: Arc<dyn TelemetrySink>,
        opcua: Option<OpcUaHandle>,
    ) -> Self {
        Self {
            catalog,
            sink,
            opcua,
            connect_semaphore: Arc::new(Semaphore::new(config.modbus.max_concurrent_polls)),
            workers: Mutex::new(HashMap::new()),
        }
    }

    /// Runs the reconciliation loop until `cancel` fires.
    pub async fn run(&self, cancel: CancellationToken) {
        loop {
            self.reconcile(&cancel).await;
            tokio::select! {
                _ = cancel.cancelled() => {
                    self.drain(&cancel).await;
                    return;
                }
                _ = tokio::time::sleep(RECONCILE_INTERVAL) => {}
            }
        }
    }

    async fn reconcile(&self, cancel: &CancellationToken) {
        self.reap_completed().await;

        for partition in [
            CatalogPartition::ModbusDevices,
            CatalogPartition::OpcUaPollingDevices,
            CatalogPartition::OpcUaSubDevices,
        ] {
            let Some(devices) = self.catalog.get(partition).await else {
                continue;
            };
            for device in devices {
                let role = device.role();
                let key = (role, device.device_id);
                let mut workers = self.workers.lock().await;
                if workers.contains_key(&key) {
                    continue;
                }

                let handle = match role {
                    #[cfg(feature = "modbus-tcp")]
                    WorkerRole::Modbus => {
                        let sink = self.sink.clone();
                        let sem = self.connect_semaphore.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(run_modbus_worker(device, sink, sem, cancel))
                    }
                    #[cfg(not(feature = "modbus-tcp"))]
                    WorkerRole::Modbus => {
                        warn!(device_id = %device.device_id, "modbus device present but this build has modbus-tcp disabled");
                        continue;
                    }
                    #[cfg(feature = "opcua")]
                    WorkerRole::OpcUaPoll => {
                        let Some(context) = self.opcua.clone() else {
                            warn!(device_id = %device.device_id, "opc-ua device present but opc-ua support is disabled");
                            continue;
                        };
                        let sink = self.sink.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(run_opcua_poll_worker(device, context, sink, cancel))
                    }
                    #[cfg(feature = "opcua")]
                    WorkerRole::OpcUaSub => {
                        let Some(context) = self.opcua.clone() else {
                            warn!(device_id = %device.device_id, "opc-ua device present but opc-ua support is disabled");
                            continue;
                        };
                        let sink = self.sink.clone();
                        let cancel = cancel.clone();
                        tokio::spawn(run_opcua_subscribe_worker(device, context, sink, cancel))
                    }
                    #[cfg(not(feature = "opcua"))]
                    WorkerRole::OpcUaPoll | WorkerRole::OpcUaSub => {
                        warn!(device_id = %device.device_id, "opc-ua device present but this build has opc-ua disabled");
                        continue;
                    }
                };

                info!(device_id = %key.1, role = ?role, "spawned worker");
                if workers.insert(key, handle).is_some() {
                    // Two reconciliation passes racing to spawn the same
                    // (role, device) key would violate the supervisor's
                    // core invariant; this must never happen since the
                    // lock is held across the contains_key/insert pair.
                    panic!("invariant violated: duplicate worker for role/device {key:?}");
                }
            }
        }
    }

    async fn reap_completed(&self) {
        let mut workers = self.workers.lock().await;
        let mut done = Vec::new();
        for (key, handle) in workers.iter() {
            if handle.is_finished() {
                done.push(*key);
            }
        }
        for key in done {
            if let Some(handle) = workers.remove(&key) {
                if let Err(e) = handle.await {
                    if e.is_panic() {
                        error!(device_id = %key.1, role = ?key.0, "worker panicked");
                    }
                }
            }
        }
    }

    /// Waits for every outstanding worker to exit, bounded by the
    /// process's overall shutdown window (enforced by the caller's own
    /// timeout around `run`).
    async fn drain(&self, _cancel: &CancellationToken) {
        let handles: Vec<_> = self.workers.lock().await.drain().map(|(_, h)| h).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::sink::InfluxSink;
    use crate::types::{AddressStyle, Device, Endianness, Protocol};

    fn modbus_device() -> Device {
        Device {
            device_id: Uuid::new_v4(),
            name: "plc".into(),
            protocol: Protocol::Modbus,
            poll_interval_ms: 5,
            host: Some("127.0.0.1".into()),
            port: Some(1),
            endianness: Endianness::Big,
            address_style: AddressStyle::Auto,
            slaves: vec![],
            endpoint_url: None,
            mode: None,
            nodes: vec![],
        }
    }

    #[tokio::test]
    async fn reconcile_spawns_one_worker_per_device() {
        let config = GatewayConfig::builder().gateway_id("gw-1").build().unwrap();
        let catalog = Arc::new(CatalogCache::new());
        let sink: Arc<dyn TelemetrySink> = Arc::new(InfluxSink::new(Default::default()));
        let supervisor = DeviceSupervisor::new(&config, catalog.clone(), sink, None);

        let device = modbus_device();
        catalog
            .set(
                CatalogPartition::ModbusDevices,
                vec![device.clone()],
                Duration::from_secs(60),
            )
            .await;

        let cancel = CancellationToken::new();
        supervisor.reconcile(&cancel).await;
        assert_eq!(supervisor.workers.lock().await.len(), 1);

        // A second reconcile pass must not spawn a duplicate worker.
        supervisor.reconcile(&cancel).await;
        assert_eq!(supervisor.workers.lock().await.len(), 1);

        cancel.cancel();
        supervisor.drain(&cancel).await;
    }
}
