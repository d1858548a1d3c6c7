//! Transport-level abstractions.
//!
//! Currently a single implementation, [`TcpClient`], used by the MODBUS
//! framing client. The `Transport` trait is kept generic so a future
//! serial transport (MODBUS RTU) can slot in without touching callers.

mod tcp;

pub use tcp::{TcpClient, TcpConfig};

use crate::error::Result;
use async_trait::async_trait;

/// Connection lifecycle state, observable without blocking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, data: &[u8]) -> Result<()>;
    async fn recv_exact(&self, len: usize) -> Result<Vec<u8>>;
    fn state(&self) -> ConnectionState;
    fn is_connected(&self) -> bool {
        self.state() == ConnectionState::Connected
    }
    async fn connect(&self) -> Result<()>;
    async fn disconnect(&self) -> Result<()>;
}
