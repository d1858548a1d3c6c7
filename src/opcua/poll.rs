//! OPC UA polling worker.
//!
//! One session per device, then a read-all-configured-nodes loop. Grounded
//! on `Session::read` (`async-opcua-client`'s attribute service) and on the
//! MODBUS worker's own "accumulate points, flush once per cycle" shape
//! (`modbus::worker::run_modbus_worker`).

use crate::opcua::session::OpcUaContext;
use crate::sink::TelemetrySink;
use crate::types::{now_ms, Device, OpcUaNode, TelemetryPoint};
use opcua::types::{AttributeId, DataValue, NodeId, ReadValueId, TimestampsToReturn, Variant};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Runs the OPC UA polling worker until the session disconnects or `cancel`
/// fires. Returns normally in both cases; the supervisor reaps and, for a
/// disconnect, restarts it on the next reconciliation pass.
pub async fn run_opcua_poll_worker(
    device: Device,
    context: Arc<OpcUaContext>,
    sink: Arc<dyn TelemetrySink>,
    cancel: CancellationToken,
) {
    let Some(endpoint_url) = device.endpoint_url.clone() else {
        warn!(device_id = %device.device_id, "opc-ua polling device missing endpoint_url");
        return;
    };

    let (session, mut event_loop) = match context.open_session(&endpoint_url).await {
        Ok(pair) => pair,
        Err(e) => {
            warn!(device_id = %device.device_id, error = %e, "opc-ua session open failed");
            return;
        }
    };

    let interval = Duration::from_millis(device.poll_interval_ms.max(1) as u64);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        let points = poll_once(&device, session.as_ref()).await;
        if !points.is_empty() {
            if let Err(e) = sink.write(&points).await {
                warn!(device_id = %device.device_id, error = %e, "telemetry sink write failed, dropping batch");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            status = &mut event_loop => {
                warn!(device_id = %device.device_id, ?status, "opc-ua session disconnected, worker terminating");
                return;
            }
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn poll_once(device: &Device, session: &opcua::client::Session) -> Vec<TelemetryPoint> {
    let healthy_nodes: Vec<&OpcUaNode> = device.nodes.iter().filter(|n| n.healthy).collect();
    if healthy_nodes.is_empty() {
        return Vec::new();
    }

    let mut matched_nodes = Vec::with_capacity(healthy_nodes.len());
    let mut reads = Vec::with_capacity(healthy_nodes.len());
    for node in healthy_nodes {
        match NodeId::from_str(&node.node_id) {
            Ok(node_id) => {
                matched_nodes.push(node);
                reads.push(ReadValueId {
                    node_id,
                    attribute_id: AttributeId::Value as u32,
                    ..Default::default()
                });
            }
            Err(_) => warn!(device_id = %device.device_id, node_id = %node.node_id, "unparseable opc-ua node id, skipping"),
        }
    }
    if reads.is_empty() {
        return Vec::new();
    }

    let now = now_ms();
    let results = match session.read(&reads, TimestampsToReturn::Neither, 0.0).await {
        Ok(results) => results,
        Err(e) => {
            debug!(device_id = %device.device_id, error = %e, "opc-ua read failed");
            return Vec::new();
        }
    };

    let mut points = Vec::with_capacity(results.len());
    for (node, value) in matched_nodes.into_iter().zip(results.into_iter()) {
        let Some(signal_id) = node.signal_id else {
            continue;
        };
        match to_double(&value) {
            Some(v) => points.push(TelemetryPoint {
                signal_id,
                value: v,
                timestamp_ms: now,
            }),
            None => warn!(device_id = %device.device_id, node_id = %node.node_id, "opc-ua value not convertible to double, skipping"),
        }
    }
    points
}

fn to_double(value: &DataValue) -> Option<f64> {
    match value.value.as_ref()? {
        Variant::Double(d) => Some(*d),
        Variant::Float(f) => Some(*f as f64),
        Variant::Int16(i) => Some(*i as f64),
        Variant::Int32(i) => Some(*i as f64),
        Variant::Int64(i) => Some(*i as f64),
        Variant::UInt16(i) => Some(*i as f64),
        Variant::UInt32(i) => Some(*i as f64),
        Variant::UInt64(i) => Some(*i as f64),
        Variant::Byte(i) => Some(*i as f64),
        Variant::SByte(i) => Some(*i as f64),
        Variant::Boolean(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn to_double_converts_numeric_variants() {
        let value = DataValue {
            value: Some(Variant::Double(42.5)),
            ..Default::default()
        };
        assert_eq!(to_double(&value), Some(42.5));
    }

    #[test]
    fn to_double_rejects_non_numeric_variants() {
        let value = DataValue {
            value: Some(Variant::String("x".into())),
            ..Default::default()
        };
        assert_eq!(to_double(&value), None);
    }
}
