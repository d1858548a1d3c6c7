//! Top-level gateway composite: wires the catalog cache, device supervisor,
//! telemetry sink and forwarder into one runnable unit with a shared
//! shutdown path.

use crate::catalog::CatalogCache;
use crate::config::GatewayConfig;
#[cfg(feature = "opcua")]
use crate::opcua::OpcUaContext;
use crate::error::Result;
use crate::forwarder::Forwarder;
use crate::sink::InfluxSink;
use crate::supervisor::DeviceSupervisor;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Bound on how long shutdown waits for in-flight workers to drain before
/// returning control to the caller, independent of any worker's own
/// operation timeout (OPC-UA sessions allow up to 15 s, Modbus connects up to 3 s).
const SHUTDOWN_GRACE: Duration = Duration::from_secs(15);

pub struct Gateway {
    config: GatewayConfig,
    catalog: Arc<CatalogCache>,
    sink: Arc<InfluxSink>,
    supervisor: Arc<DeviceSupervisor>,
    forwarder: Arc<Forwarder>,
}

impl Gateway {
    pub fn new(config: GatewayConfig) -> Result<Self> {
        let catalog = Arc::new(CatalogCache::new());
        let sink = Arc::new(InfluxSink::new(config.influxdb.clone()));

        #[cfg(feature = "opcua")]
        let opcua_context = {
            let context = OpcUaContext::new(&config.opcua)?;
            Some(Arc::new(context))
        };
        #[cfg(not(feature = "opcua"))]
        let opcua_context = None;

        let sink_trait: Arc<dyn crate::sink::TelemetrySink> = sink.clone();
        let supervisor = Arc::new(DeviceSupervisor::new(
            &config,
            catalog.clone(),
            sink_trait,
            opcua_context,
        ));
        let forwarder = Arc::new(Forwarder::new(
            sink.clone(),
            config.rabbitmq.clone(),
            Duration::from_secs(config.forwarder.period_secs),
            config.forwarder.delete_after_publish,
        ));

        Ok(Self {
            config,
            catalog,
            sink,
            supervisor,
            forwarder,
        })
    }

    /// Seeds the catalog with the process's bootstrap device list and runs
    /// the supervisor and forwarder concurrently until `cancel` fires, then
    /// waits (bounded by `SHUTDOWN_GRACE`) for both to finish draining.
    pub async fn run(&self, cancel: CancellationToken) {
        let ttl = Duration::from_secs(self.config.cache.configurations_minutes * 60);
        self.catalog.seed(self.config.devices.clone(), ttl).await;
        info!(devices = self.config.devices.len(), "seeded bootstrap catalog");

        let supervisor = self.supervisor.clone();
        let supervisor_cancel = cancel.clone();
        let supervisor_task = tokio::spawn(async move { supervisor.run(supervisor_cancel).await });

        let forwarder = self.forwarder.clone();
        let forwarder_cancel = cancel.clone();
        let forwarder_task = tokio::spawn(async move { forwarder.run(forwarder_cancel).await });

        cancel.cancelled().await;
        info!("shutdown requested, draining workers");

        let drain = async {
            let _ = supervisor_task.await;
            let _ = forwarder_task.await;
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, drain).await.is_err() {
            tracing::warn!("shutdown grace period elapsed before all workers drained");
        }
    }

    pub fn sink(&self) -> &Arc<InfluxSink> {
        &self.sink
    }
}
