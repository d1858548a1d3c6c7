//! Process-level configuration.
//!
//! A plain `serde`-derived struct loadable from YAML or JSON, plus a fluent
//! builder for in-process construction (tests, embedding).

use crate::error::{GatewayError, Result};
use crate::types::Device;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Complete gateway configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    pub gateway_id: String,
    #[serde(default = "default_name")]
    pub name: String,

    /// Bootstrap device list, seeded into the catalog cache at startup.
    /// A real deployment refreshes this from the catalog HTTP service;
    /// that loader is external to this core.
    #[serde(default)]
    pub devices: Vec<Device>,

    #[serde(default)]
    pub influxdb: InfluxDbConfig,
    #[serde(default)]
    pub rabbitmq: RabbitMqConfig,
    #[serde(default)]
    pub modbus: ModbusSettings,
    #[serde(default)]
    pub opcua: OpcUaSettings,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub forwarder: ForwarderSettings,
}

impl GatewayConfig {
    pub fn builder() -> GatewayConfigBuilder {
        GatewayConfigBuilder::default()
    }

    /// Loads configuration from a YAML or JSON file, chosen by extension.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)?;
        let config = match path.extension().and_then(|e| e.to_str()) {
            Some("yaml") | Some("yml") => {
                serde_yaml::from_str(&raw).map_err(|e| GatewayError::InvalidConfig {
                    reason: format!("{}: {e}", path.display()),
                })?
            }
            _ => serde_json::from_str(&raw).map_err(|e| GatewayError::InvalidConfig {
                reason: format!("{}: {e}", path.display()),
            })?,
        };
        let config: GatewayConfig = config;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.gateway_id.trim().is_empty() {
            return Err(GatewayError::InvalidConfig {
                reason: "gateway_id is required".into(),
            });
        }
        for device in &self.devices {
            match device.protocol {
                crate::types::Protocol::Modbus => {
                    if device.host.is_none() || device.port.is_none() {
                        return Err(GatewayError::InvalidConfig {
                            reason: format!(
                                "device {} is modbus but missing host/port",
                                device.device_id
                            ),
                        });
                    }
                }
                crate::types::Protocol::OpcUa => {
                    if device.endpoint_url.is_none() {
                        return Err(GatewayError::InvalidConfig {
                            reason: format!(
                                "device {} is opc-ua but missing endpoint_url",
                                device.device_id
                            ),
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fluent builder for `GatewayConfig`; mirrors `GatewayConfig::load` for
/// callers that assemble configuration in-process instead of from a file.
#[derive(Debug, Default)]
pub struct GatewayConfigBuilder {
    gateway_id: Option<String>,
    name: Option<String>,
    devices: Vec<Device>,
    influxdb: Option<InfluxDbConfig>,
    rabbitmq: Option<RabbitMqConfig>,
    modbus: Option<ModbusSettings>,
    opcua: Option<OpcUaSettings>,
    cache: Option<CacheSettings>,
    forwarder: Option<ForwarderSettings>,
}

impl GatewayConfigBuilder {
    pub fn gateway_id(mut self, id: impl Into<String>) -> Self {
        self.gateway_id = Some(id.into());
        self
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn add_device(mut self, device: Device) -> Self {
        self.devices.push(device);
        self
    }

    pub fn influxdb(mut self, cfg: InfluxDbConfig) -> Self {
        self.influxdb = Some(cfg);
        self
    }

    pub fn rabbitmq(mut self, cfg: RabbitMqConfig) -> Self {
        self.rabbitmq = Some(cfg);
        self
    }

    pub fn modbus(mut self, cfg: ModbusSettings) -> Self {
        self.modbus = Some(cfg);
        self
    }

    pub fn opcua(mut self, cfg: OpcUaSettings) -> Self {
        self.opcua = Some(cfg);
        self
    }

    pub fn cache(mut self, cfg: CacheSettings) -> Self {
        self.cache = Some(cfg);
        self
    }

    pub fn forwarder(mut self, cfg: ForwarderSettings) -> Self {
        self.forwarder = Some(cfg);
        self
    }

    pub fn build(self) -> Result<GatewayConfig> {
        let config = GatewayConfig {
            gateway_id: self.gateway_id.ok_or_else(|| GatewayError::InvalidConfig {
                reason: "gateway_id is required".into(),
            })?,
            name: self.name.unwrap_or_else(default_name),
            devices: self.devices,
            influxdb: self.influxdb.unwrap_or_default(),
            rabbitmq: self.rabbitmq.unwrap_or_default(),
            modbus: self.modbus.unwrap_or_default(),
            opcua: self.opcua.unwrap_or_default(),
            cache: self.cache.unwrap_or_default(),
            forwarder: self.forwarder.unwrap_or_default(),
        };
        config.validate()?;
        Ok(config)
    }
}

/// Telemetry sink (time-series store) configuration, wire: InfluxDB v2 line protocol.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InfluxDbConfig {
    #[serde(default = "default_influx_url")]
    pub url: String,
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_influx_org")]
    pub org: String,
    #[serde(default = "default_influx_bucket")]
    pub bucket: String,
}

impl Default for InfluxDbConfig {
    fn default() -> Self {
        Self {
            url: default_influx_url(),
            token: String::new(),
            org: default_influx_org(),
            bucket: default_influx_bucket(),
        }
    }
}

/// Message broker configuration, wire: AMQP 0-9-1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RabbitMqConfig {
    #[serde(default = "default_rabbitmq_host")]
    pub host: String,
    #[serde(default = "default_rabbitmq_port")]
    pub port: u16,
    #[serde(default = "default_rabbitmq_user")]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_vhost")]
    pub virtual_host: String,
    #[serde(default = "default_queue_name")]
    pub queue_name: String,
}

impl Default for RabbitMqConfig {
    fn default() -> Self {
        Self {
            host: default_rabbitmq_host(),
            port: default_rabbitmq_port(),
            username: default_rabbitmq_user(),
            password: String::new(),
            virtual_host: default_vhost(),
            queue_name: default_queue_name(),
        }
    }
}

impl RabbitMqConfig {
    /// AMQP connection URI built from the discrete fields above.
    pub fn amqp_uri(&self) -> String {
        format!(
            "amqp://{}:{}@{}:{}/{}",
            self.username,
            self.password,
            self.host,
            self.port,
            self.virtual_host.trim_start_matches('/')
        )
    }
}

/// MODBUS acquisition settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModbusSettings {
    /// Semaphore width bounding simultaneous connect phases.
    #[serde(default = "default_max_concurrent_polls")]
    pub max_concurrent_polls: usize,
    /// Reserved; not used to drive any decision.
    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

impl Default for ModbusSettings {
    fn default() -> Self {
        Self {
            max_concurrent_polls: default_max_concurrent_polls(),
            failure_threshold: default_failure_threshold(),
        }
    }
}

/// OPC-UA session manager settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaSettings {
    #[serde(default = "default_opcua_application_uri")]
    pub application_uri: String,
    #[serde(default = "default_opcua_pki_dir")]
    pub pki_dir: String,
    /// Auto-accept untrusted server certificates. Unconditional in the
    /// source; made configurable here.
    #[serde(default = "default_true_bool")]
    pub auto_accept_server_certs: bool,
    #[serde(default = "default_opcua_session_timeout_ms")]
    pub session_timeout_ms: u32,
    #[serde(default = "default_opcua_operation_timeout_ms")]
    pub operation_timeout_ms: u32,
    #[serde(default = "default_opcua_subscription_retry_limit")]
    pub subscription_retry_limit: u32,
    #[serde(default = "default_opcua_subscription_retry_backoff_secs")]
    pub subscription_retry_backoff_secs: u64,
}

impl Default for OpcUaSettings {
    fn default() -> Self {
        Self {
            application_uri: default_opcua_application_uri(),
            pki_dir: default_opcua_pki_dir(),
            auto_accept_server_certs: true,
            session_timeout_ms: default_opcua_session_timeout_ms(),
            operation_timeout_ms: default_opcua_operation_timeout_ms(),
            subscription_retry_limit: default_opcua_subscription_retry_limit(),
            subscription_retry_backoff_secs: default_opcua_subscription_retry_backoff_secs(),
        }
    }
}

/// Catalog cache TTL settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_cache_ttl_minutes")]
    pub configurations_minutes: u64,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            configurations_minutes: default_cache_ttl_minutes(),
        }
    }
}

/// Forwarder (drain) cadence and behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForwarderSettings {
    #[serde(default = "default_forwarder_period_secs")]
    pub period_secs: u64,
    #[serde(default)]
    pub delete_after_publish: bool,
}

impl Default for ForwarderSettings {
    fn default() -> Self {
        Self {
            period_secs: default_forwarder_period_secs(),
            delete_after_publish: false,
        }
    }
}

fn default_name() -> String {
    "Industrial Gateway".into()
}
fn default_influx_url() -> String {
    "http://localhost:8087".into()
}
fn default_influx_org() -> String {
    "WMIND".into()
}
fn default_influx_bucket() -> String {
    "SignalTelemetryData".into()
}
fn default_rabbitmq_host() -> String {
    "localhost".into()
}
fn default_rabbitmq_port() -> u16 {
    5672
}
fn default_rabbitmq_user() -> String {
    "guest".into()
}
fn default_vhost() -> String {
    "/".into()
}
fn default_queue_name() -> String {
    "telemetry_queue".into()
}
fn default_max_concurrent_polls() -> usize {
    10
}
fn default_failure_threshold() -> u32 {
    3
}
fn default_cache_ttl_minutes() -> u64 {
    30
}
fn default_forwarder_period_secs() -> u64 {
    5
}
fn default_opcua_application_uri() -> String {
    "urn:estream:industrial-gateway:client".into()
}
fn default_opcua_pki_dir() -> String {
    "./pki".into()
}
fn default_true_bool() -> bool {
    true
}
fn default_opcua_session_timeout_ms() -> u32 {
    60_000
}
fn default_opcua_operation_timeout_ms() -> u32 {
    15_000
}
fn default_opcua_subscription_retry_limit() -> u32 {
    5
}
fn default_opcua_subscription_retry_backoff_secs() -> u64 {
    10
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_requires_gateway_id() {
        let err = GatewayConfig::builder().name("x").build().unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig { .. }));
    }

    #[test]
    fn builder_rejects_modbus_device_without_host() {
        let device = Device {
            device_id: uuid::Uuid::new_v4(),
            name: "plc".into(),
            protocol: crate::types::Protocol::Modbus,
            poll_interval_ms: 1000,
            host: None,
            port: None,
            endianness: Default::default(),
            address_style: Default::default(),
            slaves: vec![],
            endpoint_url: None,
            mode: None,
            nodes: vec![],
        };
        let err = GatewayConfig::builder()
            .gateway_id("gw-1")
            .add_device(device)
            .build()
            .unwrap_err();
        assert!(matches!(err, GatewayError::InvalidConfig { .. }));
    }

    #[test]
    fn amqp_uri_formats_discrete_fields() {
        let cfg = RabbitMqConfig::default();
        assert_eq!(cfg.amqp_uri(), "amqp://guest:@localhost:5672/");
    }
}
