//! Common data types shared across the acquisition and forwarding core.

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};
use uuid::Uuid;

/// Protocol a device is reached over.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Protocol {
    Modbus,
    OpcUa,
}

/// OPC-UA acquisition mode. Meaningless for `Protocol::Modbus`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpcUaMode {
    Polling,
    PubSub,
}

/// Byte order for multi-word MODBUS values. Modbus-only; OPC-UA variants carry their own type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Endianness {
    #[default]
    Big,
    Little,
}

/// Explicit MODBUS catalog-address convention. `Auto` falls back to the detection heuristic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AddressStyle {
    #[default]
    Auto,
    /// Catalog addresses are already protocol (0-based) addresses.
    Zero,
    /// Catalog addresses use the 4xxxx convention; subtract 40001 to reach the wire address.
    FortyThousandOne,
}

/// A role a worker can be spawned for. Used as half of the supervisor's `(role, device_id)` key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerRole {
    Modbus,
    OpcUaPoll,
    OpcUaSub,
}

/// MODBUS data types this core understands. Extensible; unknown types fail catalog validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataType {
    U16,
    Float32,
}

impl DataType {
    /// Number of 16-bit words this data type occupies.
    pub fn word_len(&self) -> u16 {
        match self {
            Self::U16 => 1,
            Self::Float32 => 2,
        }
    }
}

/// A MODBUS holding register mapped to an (optional) upstream signal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Register {
    /// Catalog address as configured upstream; may be 0-based or 40001-based.
    pub catalog_address: i32,
    /// Length in 16-bit words.
    pub length: u16,
    pub data_type: DataType,
    pub scale: f64,
    #[serde(default)]
    pub unit: String,
    #[serde(default)]
    pub word_swap: bool,
    #[serde(default = "default_true")]
    pub healthy: bool,
    /// No signal id ⇒ register is read (to keep coalesced ranges contiguous) but never emitted.
    pub signal_id: Option<Uuid>,
}

/// A MODBUS slave (unit) owned by a device.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Slave {
    pub unit_id: u8,
    pub registers: Vec<Register>,
}

/// An OPC-UA monitored node.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpcUaNode {
    /// OPC-UA NodeId string, e.g. `ns=2;s=Temperature`.
    pub node_id: String,
    pub display_name: String,
    #[serde(default = "default_true")]
    pub healthy: bool,
    pub signal_id: Option<Uuid>,
}

/// A device the gateway is expected to poll.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
    pub device_id: Uuid,
    pub name: String,
    pub protocol: Protocol,
    /// Positive; 0 is only legal for `Protocol::OpcUa` with `mode = PubSub`.
    pub poll_interval_ms: u32,

    /// `host:port` for Modbus.
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub port: Option<u16>,
    #[serde(default)]
    pub endianness: Endianness,
    #[serde(default)]
    pub address_style: AddressStyle,
    #[serde(default)]
    pub slaves: Vec<Slave>,

    /// `opc.tcp://…` for OPC-UA.
    #[serde(default)]
    pub endpoint_url: Option<String>,
    #[serde(default)]
    pub mode: Option<OpcUaMode>,
    #[serde(default)]
    pub nodes: Vec<OpcUaNode>,
}

impl Device {
    pub fn role(&self) -> WorkerRole {
        match (self.protocol, self.mode) {
            (Protocol::Modbus, _) => WorkerRole::Modbus,
            (Protocol::OpcUa, Some(OpcUaMode::PubSub)) => WorkerRole::OpcUaSub,
            (Protocol::OpcUa, _) => WorkerRole::OpcUaPoll,
        }
    }

    /// Locator used for logging and error messages.
    pub fn locator(&self) -> String {
        match self.protocol {
            Protocol::Modbus => format!(
                "{}:{}",
                self.host.as_deref().unwrap_or("?"),
                self.port.unwrap_or(502)
            ),
            Protocol::OpcUa => self.endpoint_url.clone().unwrap_or_else(|| "?".into()),
        }
    }
}

/// A single normalised telemetry reading. Immutable once produced.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct TelemetryPoint {
    pub signal_id: Uuid,
    pub value: f64,
    /// Milliseconds since Unix epoch, UTC.
    pub timestamp_ms: i64,
}

/// Named catalog partitions, used as catalog-cache keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CatalogPartition {
    ModbusDevices,
    OpcUaPollingDevices,
    OpcUaSubDevices,
}

impl CatalogPartition {
    pub fn for_device(device: &Device) -> Self {
        match device.role() {
            WorkerRole::Modbus => Self::ModbusDevices,
            WorkerRole::OpcUaPoll => Self::OpcUaPollingDevices,
            WorkerRole::OpcUaSub => Self::OpcUaSubDevices,
        }
    }
}

fn default_true() -> bool {
    true
}

/// Current time in milliseconds since the Unix epoch.
pub fn now_ms() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn device_role_matches_protocol_and_mode() {
        let mut d = Device {
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
        };
        assert_eq!(d.role(), WorkerRole::Modbus);

        d.protocol = Protocol::OpcUa;
        d.mode = Some(OpcUaMode::Polling);
        assert_eq!(d.role(), WorkerRole::OpcUaPoll);

        d.mode = Some(OpcUaMode::PubSub);
        assert_eq!(d.role(), WorkerRole::OpcUaSub);
    }

    #[test]
    fn data_type_word_len() {
        assert_eq!(DataType::U16.word_len(), 1);
        assert_eq!(DataType::Float32.word_len(), 2);
    }
}
