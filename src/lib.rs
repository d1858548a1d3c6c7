//! # estream-industrial-gateway
//!
//! An industrial edge gateway: a long-running process that sits next to a
//! set of factory-floor devices, acquires numeric telemetry from them over
//! MODBUS/TCP and OPC-UA, buffers it in a local time-series store, and
//! forwards it in durable batches onto a message bus.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INDUSTRIAL EDGE GATEWAY                     │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ gateway        — composite: wires everything below into one run  │
//! ├─────────────────────────────────────────────────────────────────┤
//! │ supervisor     — one worker per (device, role), reconciled every  │
//! │                   5s against the catalog cache                   │
//! ├──────────────────────────┬──────────────────────────────────────┤
//! │ modbus                   │ opcua                                │
//! │  • client (framing)      │  • session                           │
//! │  • plan (register plan)  │  • poll                              │
//! │  • decode (numeric)      │  • subscribe                         │
//! │  • worker                │                                      │
//! ├──────────────────────────┴──────────────────────────────────────┤
//! │ sink           — batches points into the time-series store       │
//! │ forwarder      — drains the sink, publishes to the broker        │
//! │ catalog        — TTL-keyed device partitions                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use estream_industrial_gateway::config::GatewayConfig;
//! use estream_industrial_gateway::gateway::Gateway;
//! use tokio_util::sync::CancellationToken;
//!
//! # #[tokio::main]
//! # async fn main() -> anyhow::Result<()> {
//! let config = GatewayConfig::builder().gateway_id("gw-01").build()?;
//! let gateway = Gateway::new(config)?;
//! let cancel = CancellationToken::new();
//! gateway.run(cancel).await;
//! # Ok(())
//! # }
//! ```
//!
//! ## Feature flags
//!
//! - `modbus-tcp`: MODBUS/TCP acquisition (default)
//! - `opcua`: OPC-UA polling and subscription acquisition (default)

pub mod catalog;
pub mod config;
pub mod error;
pub mod forwarder;
pub mod gateway;
#[cfg(feature = "modbus-tcp")]
pub mod modbus;
#[cfg(feature = "opcua")]
pub mod opcua;
pub mod sink;
pub mod supervisor;
pub mod transport;
pub mod types;

pub use config::GatewayConfig;
pub use error::{GatewayError, Result};
pub use gateway::Gateway;

/// Crate version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
