//! TCP transport with a connect timeout and a strict read-exactly primitive.
//!
//! `RwLock`-guarded connection state, a `Mutex`-guarded stream, and a
//! bounded connect timeout. There is no built-in reconnect loop — the
//! MODBUS device worker owns reconnection by opening a fresh connection
//! every poll cycle, so the transport itself stays a thin, one-shot-
//! per-cycle wrapper.

use super::{ConnectionState, Transport};
use crate::error::{GatewayError, Result};
use async_trait::async_trait;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::time::timeout;

/// TCP client configuration.
#[derive(Debug, Clone)]
pub struct TcpConfig {
    pub remote_addr: SocketAddr,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
    pub write_timeout: Duration,
    pub tcp_nodelay: bool,
}

impl TcpConfig {
    pub fn new(remote_addr: SocketAddr, connect_timeout: Duration) -> Self {
        Self {
            remote_addr,
            connect_timeout,
            read_timeout: Duration::from_secs(3),
            write_timeout: Duration::from_secs(3),
            tcp_nodelay: true,
        }
    }
}

fn state_from_u8(v: u8) -> ConnectionState {
    match v {
        1 => ConnectionState::Connecting,
        2 => ConnectionState::Connected,
        _ => ConnectionState::Disconnected,
    }
}

/// A single TCP connection, reconnected by the owning worker rather than
/// internally: one worker cycle = at most one `connect` + any number of
/// `send`/`recv_exact` pairs + one `disconnect`.
pub struct TcpClient {
    config: TcpConfig,
    stream: Mutex<Option<TcpStream>>,
    state: AtomicU8,
}

impl TcpClient {
    pub fn new(config: TcpConfig) -> Self {
        Self {
            config,
            stream: Mutex::new(None),
            state: AtomicU8::new(0),
        }
    }
}

#[async_trait]
impl Transport for TcpClient {
    async fn connect(&self) -> Result<()> {
        self.state.store(1, Ordering::SeqCst);
        let connect_fut = TcpStream::connect(self.config.remote_addr);
        let stream = timeout(self.config.connect_timeout, connect_fut)
            .await
            .map_err(|_| GatewayError::ConnectionTimeout {
                address: self.config.remote_addr.to_string(),
                timeout_ms: self.config.connect_timeout.as_millis() as u64,
            })?
            .map_err(|e| GatewayError::ConnectionFailed {
                address: self.config.remote_addr.to_string(),
                reason: e.to_string(),
            })?;
        stream.set_nodelay(self.config.tcp_nodelay)?;
        *self.stream.lock().await = Some(stream);
        self.state.store(2, Ordering::SeqCst);
        Ok(())
    }

    async fn disconnect(&self) -> Result<()> {
        self.stream.lock().await.take();
        self.state.store(0, Ordering::SeqCst);
        Ok(())
    }

    async fn send(&self, data: &[u8]) -> Result<()> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(|| GatewayError::NotConnected {
            device_id: self.config.remote_addr.to_string(),
        })?;
        timeout(self.config.write_timeout, stream.write_all(data))
            .await
            .map_err(|_| GatewayError::ConnectionTimeout {
                address: self.config.remote_addr.to_string(),
                timeout_ms: self.config.write_timeout.as_millis() as u64,
            })??;
        Ok(())
    }

    /// Reads exactly `len` bytes. EOF before `len` bytes are read surfaces as
    /// an I/O failure (a strict read-exactly primitive).
    async fn recv_exact(&self, len: usize) -> Result<Vec<u8>> {
        let mut guard = self.stream.lock().await;
        let stream = guard.as_mut().ok_or_else(|| GatewayError::NotConnected {
            device_id: self.config.remote_addr.to_string(),
        })?;
        let mut buf = vec![0u8; len];
        timeout(self.config.read_timeout, stream.read_exact(&mut buf))
            .await
            .map_err(|_| GatewayError::ConnectionTimeout {
                address: self.config.remote_addr.to_string(),
                timeout_ms: self.config.read_timeout.as_millis() as u64,
            })??;
        Ok(buf)
    }

    fn state(&self) -> ConnectionState {
        state_from_u8(self.state.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn starts_disconnected() {
        let client = TcpClient::new(TcpConfig::new(
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(50),
        ));
        assert_eq!(client.state(), ConnectionState::Disconnected);
    }

    #[tokio::test]
    async fn send_without_connect_fails() {
        let client = TcpClient::new(TcpConfig::new(
            "127.0.0.1:1".parse().unwrap(),
            Duration::from_millis(50),
        ));
        let err = client.send(&[1, 2, 3]).await.unwrap_err();
        assert!(matches!(err, GatewayError::NotConnected { .. }));
    }
}
