//! OPC UA subscription worker.
//!
//! Bounded retry harness around one subscription with monitored items.
//! Notifications land on an unbounded channel from the `OnSubscriptionNotification`
//! callback (which must never block the OPC-UA stack) and are
//! drained by a sibling task that writes them to the sink.
//!
//! Grounded on `async-opcua-client`'s `OnSubscriptionNotification` /
//! `SubscriptionCallbacks` (session/services/subscriptions) and
//! `Session::create_subscription` / `create_monitored_items`.

use crate::error::Result;
use crate::opcua::session::OpcUaContext;
use crate::sink::TelemetrySink;
use crate::types::{now_ms, Device, TelemetryPoint};
use opcua::client::{MonitoredItem, OnSubscriptionNotification};
use opcua::types::{
    AttributeId, DataValue, MonitoredItemCreateRequest, MonitoringMode, MonitoringParameters,
    NodeId, ReadValueId, StatusChangeNotification, TimestampsToReturn, Variant,
};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use uuid::Uuid;

const MAX_ATTEMPTS: u32 = 5;
const RETRY_BACKOFF: Duration = Duration::from_secs(10);

struct NotificationForwarder {
    signal_ids: Vec<Option<Uuid>>,
    tx: mpsc::UnboundedSender<TelemetryPoint>,
}

impl OnSubscriptionNotification for NotificationForwarder {
    fn on_subscription_status_change(&mut self, notification: StatusChangeNotification) {
        warn!(status = %notification.status, "opc-ua subscription status change");
    }

    fn on_data_value(&mut self, notification: DataValue, item: &MonitoredItem) {
        let Some(signal_id) = self
            .signal_ids
            .get(item.client_handle() as usize)
            .copied()
            .flatten()
        else {
            return;
        };
        let Some(Variant::Double(value)) = notification.value else {
            return;
        };
        // Fire-and-forget: an unbounded channel send never blocks the
        // subscription event loop.
        let _ = self.tx.send(TelemetryPoint {
            signal_id,
            value,
            timestamp_ms: now_ms(),
        });
    }
}

/// Runs the OPC UA subscription worker under a bounded retry harness (up to
/// `MAX_ATTEMPTS`, fixed `RETRY_BACKOFF` between attempts; a successful
/// subscription resets the counter).
pub async fn run_opcua_subscribe_worker(
    device: Device,
    context: Arc<OpcUaContext>,
    sink: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
) {
    let Some(endpoint_url) = device.endpoint_url.clone() else {
        warn!(device_id = %device.device_id, "opc-ua subscription device missing endpoint_url");
        return;
    };

    let mut attempt = 0u32;
    while attempt < MAX_ATTEMPTS {
        if cancel.is_cancelled() {
            return;
        }
        attempt += 1;

        match run_one_subscription(&device, &endpoint_url, &context, sink.clone(), &cancel).await {
            Ok(()) => {
                info!(device_id = %device.device_id, "opc-ua subscription ended cleanly, resetting attempt counter");
                attempt = 0;
                if cancel.is_cancelled() {
                    return;
                }
            }
            Err(e) => {
                warn!(device_id = %device.device_id, attempt, error = %e, "opc-ua subscription attempt failed");
                tokio::select! {
                    _ = cancel.cancelled() => return,
                    _ = tokio::time::sleep(RETRY_BACKOFF) => {}
                }
            }
        }
    }
    warn!(device_id = %device.device_id, "opc-ua subscription retry budget exhausted");
}

async fn run_one_subscription(
    device: &Device,
    endpoint_url: &str,
    context: &OpcUaContext,
    sink: Arc<dyn TelemetrySink>,
    cancel: &CancellationToken,
) -> Result<()> {
    let (session, mut event_loop) = context.open_session(endpoint_url).await?;

    let publishing_interval = Duration::from_millis(if device.poll_interval_ms > 0 {
        device.poll_interval_ms as u64
    } else {
        1000
    });

    let (tx, mut rx) = mpsc::unbounded_channel::<TelemetryPoint>();
    let healthy_nodes: Vec<_> = device.nodes.iter().filter(|n| n.healthy).collect();

    // Single pass: a node only gets a `client_handle` (its index into
    // `items_to_create`) and a `signal_ids` slot at the same moment, so the
    // two stay aligned even when some node ids fail to parse.
    let mut items_to_create = Vec::with_capacity(healthy_nodes.len());
    let mut signal_ids = Vec::with_capacity(healthy_nodes.len());
    for node in &healthy_nodes {
        let Ok(node_id) = NodeId::from_str(&node.node_id) else {
            warn!(device_id = %device.device_id, node_id = %node.node_id, "unparseable opc-ua node id, skipping");
            continue;
        };
        let client_handle = items_to_create.len() as u32;
        items_to_create.push(MonitoredItemCreateRequest {
            item_to_monitor: ReadValueId {
                node_id,
                attribute_id: AttributeId::Value as u32,
                ..Default::default()
            },
            monitoring_mode: MonitoringMode::Reporting,
            requested_parameters: MonitoringParameters {
                client_handle,
                sampling_interval: publishing_interval.as_millis() as f64,
                queue_size: 10,
                discard_oldest: true,
                ..Default::default()
            },
        });
        signal_ids.push(node.signal_id);
    }

    let forwarder = NotificationForwarder { signal_ids, tx };

    let subscription_id = session
        .create_subscription(publishing_interval, 60, 20, 0, 0, true, forwarder)
        .await
        .map_err(|code| crate::error::GatewayError::OpcUaSubscription {
            reason: code.to_string(),
        })?;

    session
        .create_monitored_items(subscription_id, TimestampsToReturn::Neither, items_to_create)
        .await
        .map_err(|code| crate::error::GatewayError::OpcUaSubscription {
            reason: code.to_string(),
        })?;

    let drain_sink = sink.clone();
    let drain = tokio::spawn(async move {
        while let Some(point) = rx.recv().await {
            if let Err(e) = drain_sink.write(&[point]).await {
                warn!(error = %e, "telemetry sink write failed for subscription notification");
            }
        }
    });

    tokio::select! {
        _ = cancel.cancelled() => {}
        status = &mut event_loop => {
            drain.abort();
            return Err(crate::error::GatewayError::OpcUaSession {
                reason: format!("session disconnected: {status:?}"),
            });
        }
    }
    drain.abort();
    Ok(())
}
