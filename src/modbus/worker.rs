//! MODBUS device worker.
//!
//! One worker per device: connect, build a plan, read each range, decode,
//! emit, sleep, repeat. A fresh TCP connection is opened every poll cycle
//! rather than held open and auto-reconnected.

use crate::error::Result;
use crate::modbus::{build_plan, decode, ModbusClient};
use crate::sink::TelemetrySink;
use crate::types::{now_ms, Device, TelemetryPoint};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

/// Runs the MODBUS device worker loop until `cancel` fires. Returns when
/// cancelled; never returns an `Err` (every failure is logged and retried
/// on the next cycle).
pub async fn run_modbus_worker(
    device: Device,
    sink: Arc<dyn TelemetrySink>,
    connect_semaphore: Arc<Semaphore>,
    cancel: CancellationToken,
) {
    let interval = Duration::from_millis(device.poll_interval_ms.max(1) as u64);

    loop {
        if cancel.is_cancelled() {
            return;
        }

        match run_one_cycle(&device, sink.as_ref(), &connect_semaphore, &cancel).await {
            Ok(points) if !points.is_empty() => {
                if let Err(e) = sink.write(&points).await {
                    warn!(device_id = %device.device_id, error = %e, "telemetry sink write failed, dropping batch");
                }
            }
            Ok(_) => {}
            Err(e) => {
                warn!(device_id = %device.device_id, error = %e, "modbus poll cycle failed");
            }
        }

        tokio::select! {
            _ = cancel.cancelled() => return,
            _ = tokio::time::sleep(interval) => {}
        }
    }
}

async fn run_one_cycle(
    device: &Device,
    sink: &dyn TelemetrySink,
    connect_semaphore: &Semaphore,
    cancel: &CancellationToken,
) -> Result<Vec<TelemetryPoint>> {
    let _ = sink; // sink is used by the caller after points are assembled

    let (host, port) = match (&device.host, device.port) {
        (Some(host), Some(port)) => (host.clone(), port),
        _ => {
            warn!(device_id = %device.device_id, "modbus device missing host/port, skipping cycle");
            return Ok(Vec::new());
        }
    };
    let addr: SocketAddr = match format!("{host}:{port}").parse() {
        Ok(a) => a,
        Err(e) => {
            warn!(device_id = %device.device_id, error = %e, "unresolvable modbus address");
            return Ok(Vec::new());
        }
    };

    // Bound simultaneous connect phases; the permit is dropped (and so
    // released) at the end of this function's scope regardless of outcome.
    let _permit = tokio::select! {
        _ = cancel.cancelled() => return Ok(Vec::new()),
        permit = connect_semaphore.acquire() => permit.map_err(|_| crate::error::GatewayError::ChannelClosed)?,
    };

    let now = now_ms();
    let mut points = Vec::new();

    for slave in &device.slaves {
        let client = ModbusClient::connect_timeout(addr, slave.unit_id, CONNECT_TIMEOUT);
        if let Err(e) = client.connect().await {
            warn!(device_id = %device.device_id, unit_id = slave.unit_id, error = %e, "modbus connect failed");
            continue;
        }

        let plan = build_plan(&slave.registers, device.address_style);
        for range in &plan {
            if cancel.is_cancelled() {
                let _ = client.disconnect().await;
                return Ok(points);
            }
            match client.read_holding_registers(range.start, range.count).await {
                Ok(words) => {
                    for item in &range.items {
                        let register = &slave.registers[item.register_index];
                        let offset = (item.protocol_address - range.start) as usize;
                        let Some(value) = decode(&words, offset, register, device.endianness) else {
                            continue;
                        };
                        if let Some(signal_id) = register.signal_id {
                            points.push(TelemetryPoint {
                                signal_id,
                                value,
                                timestamp_ms: now,
                            });
                        }
                    }
                }
                Err(e) => {
                    // One range's failure does not abort the poll; the
                    // remaining ranges on this connection still run.
                    debug!(device_id = %device.device_id, unit_id = slave.unit_id, start = range.start, error = %e, "modbus range read failed");
                }
            }
        }

        let _ = client.disconnect().await;
    }

    info!(device_id = %device.device_id, points = points.len(), "modbus poll cycle complete");
    Ok(points)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sink::InfluxSink;
    use crate::types::{AddressStyle, Endianness, Protocol};
    use uuid::Uuid;

    fn device_with_no_host() -> Device {
        Device {
            device_id: Uuid::new_v4(),
            name: "plc".into(),
            protocol: Protocol::Modbus,
            poll_interval_ms: 5,
            host: None,
            port: None,
            endianness: Endianness::Big,
            address_style: AddressStyle::Auto,
            slaves: vec![],
            endpoint_url: None,
            mode: None,
            nodes: vec![],
        }
    }

    #[tokio::test]
    async fn missing_host_produces_empty_cycle_without_panicking() {
        let device = device_with_no_host();
        let sink: Arc<dyn TelemetrySink> = Arc::new(InfluxSink::new(Default::default()));
        let sem = Arc::new(Semaphore::new(10));
        let cancel = CancellationToken::new();
        let points = run_one_cycle(&device, sink.as_ref(), &sem, &cancel).await.unwrap();
        assert!(points.is_empty());
    }

    #[tokio::test]
    async fn worker_exits_promptly_on_cancellation() {
        let device = device_with_no_host();
        let sink: Arc<dyn TelemetrySink> = Arc::new(InfluxSink::new(Default::default()));
        let sem = Arc::new(Semaphore::new(10));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let handle = tokio::spawn(run_modbus_worker(device, sink, sem, cancel));
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("worker should exit promptly on cancellation")
            .unwrap();
    }
}
