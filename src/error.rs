//! Error types for the gateway core.
//!
//! One flat `thiserror`-derived enum, variants grouped by concern
//! (connection, protocol, config, …), plus `error_code`/`is_recoverable`
//! helpers consumed by the logging layer.

use thiserror::Error;

/// Result type alias used throughout the core.
pub type Result<T> = std::result::Result<T, GatewayError>;

/// Gateway error types.
#[derive(Error, Debug)]
pub enum GatewayError {
    // -- Connection --------------------------------------------------------
    #[error("connection failed to {address}: {reason}")]
    ConnectionFailed { address: String, reason: String },

    #[error("connection timeout to {address} after {timeout_ms}ms")]
    ConnectionTimeout { address: String, timeout_ms: u64 },

    #[error("not connected to device {device_id}")]
    NotConnected { device_id: String },

    // -- MODBUS protocol -----------------------------------------------------
    #[error("modbus exception on function {function_code:#04x}: code {exception_code}")]
    ModbusException {
        function_code: u8,
        exception_code: u8,
    },

    #[error("modbus protocol violation: {reason}")]
    ProtocolViolation { reason: String },

    #[error("modbus transaction id mismatch: expected {expected}, got {actual}")]
    TransactionMismatch { expected: u16, actual: u16 },

    // -- OPC-UA ---------------------------------------------------------------
    #[error("opc-ua session error: {reason}")]
    OpcUaSession { reason: String },

    #[error("opc-ua subscription error: {reason}")]
    OpcUaSubscription { reason: String },

    #[error("opc-ua node id is not convertible to a numeric value: {node_id}")]
    OpcUaValueNotConvertible { node_id: String },

    // -- Configuration ----------------------------------------------------
    #[error("invalid configuration: {reason}")]
    InvalidConfig { reason: String },

    #[error("device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    // -- Sink / forwarder -------------------------------------------------
    #[error("telemetry sink write failed: {reason}")]
    SinkWrite { reason: String },

    #[error("broker publish failed: {reason}")]
    BrokerPublish { reason: String },

    #[error("broker unreachable: {reason}")]
    BrokerUnreachable { reason: String },

    // -- Supervisor / fatal --------------------------------------------------
    #[error("invariant violated: {reason}")]
    InvariantViolated { reason: String },

    // -- Internal -----------------------------------------------------------
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("channel closed")]
    ChannelClosed,
}

impl GatewayError {
    /// A stable numeric code, useful for metrics/log correlation.
    pub fn error_code(&self) -> u16 {
        match self {
            Self::ConnectionFailed { .. } => 100,
            Self::ConnectionTimeout { .. } => 101,
            Self::NotConnected { .. } => 102,

            Self::ModbusException { exception_code, .. } => 200 + *exception_code as u16,
            Self::ProtocolViolation { .. } => 210,
            Self::TransactionMismatch { .. } => 211,

            Self::OpcUaSession { .. } => 300,
            Self::OpcUaSubscription { .. } => 301,
            Self::OpcUaValueNotConvertible { .. } => 302,

            Self::InvalidConfig { .. } => 400,
            Self::DeviceNotFound { .. } => 401,

            Self::SinkWrite { .. } => 500,
            Self::BrokerPublish { .. } => 501,
            Self::BrokerUnreachable { .. } => 502,

            Self::InvariantViolated { .. } => 900,
            Self::Io(_) => 901,
            Self::ChannelClosed => 902,
        }
    }

    /// Whether the owning loop should treat this as transient and keep retrying
    /// on its next interval.
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ConnectionFailed { .. }
                | Self::ConnectionTimeout { .. }
                | Self::NotConnected { .. }
                | Self::OpcUaSession { .. }
                | Self::BrokerUnreachable { .. }
        )
    }

    pub fn modbus_exception(function_code: u8, exception_code: u8) -> Self {
        Self::ModbusException {
            function_code,
            exception_code,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_are_stable() {
        let err = GatewayError::ConnectionTimeout {
            address: "10.0.0.1:502".into(),
            timeout_ms: 3000,
        };
        assert_eq!(err.error_code(), 101);

        let err = GatewayError::modbus_exception(0x03, 0x02);
        assert_eq!(err.error_code(), 202);
    }

    #[test]
    fn recoverability_matches_policy() {
        assert!(GatewayError::BrokerUnreachable { reason: "x".into() }.is_recoverable());
        assert!(!GatewayError::InvalidConfig { reason: "x".into() }.is_recoverable());
    }
}
