//! MODBUS framing client.
//!
//! Implements MODBUS-TCP function 3 (Read Holding Registers): build the
//! MBAP+PDU frame, send it over a connected [`TcpClient`], and parse the
//! reply with transaction-id matching, protocol-id/byte-count validation,
//! a process-global transaction counter, and strict read-exactly framing.

use crate::error::{GatewayError, Result};
use crate::transport::{Transport, TcpClient, TcpConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU16, Ordering};
use std::time::Duration;

/// Process-global, monotonically increasing transaction id. Used only to
/// detect mis-framing, never for multiplexing (one outstanding request per
/// stream).
static TRANSACTION_ID: AtomicU16 = AtomicU16::new(1);

fn next_transaction_id() -> u16 {
    // 0 is reserved so a default-initialised field is never mistaken for a
    // real in-flight transaction.
    loop {
        let id = TRANSACTION_ID.fetch_add(1, Ordering::SeqCst);
        if id != 0 {
            return id;
        }
    }
}

/// A single MODBUS-TCP read over one connected transport.
pub struct ModbusClient {
    transport: TcpClient,
    unit_id: u8,
}

impl ModbusClient {
    pub fn connect_timeout(addr: SocketAddr, unit_id: u8, connect_timeout: Duration) -> Self {
        Self {
            transport: TcpClient::new(TcpConfig::new(addr, connect_timeout)),
            unit_id,
        }
    }

    pub async fn connect(&self) -> Result<()> {
        self.transport.connect().await
    }

    pub async fn disconnect(&self) -> Result<()> {
        self.transport.disconnect().await
    }

    fn build_frame(&self, transaction_id: u16, address: u16, quantity: u16) -> Vec<u8> {
        let pdu = [
            0x03, // Read Holding Registers
            (address >> 8) as u8,
            (address & 0xFF) as u8,
            (quantity >> 8) as u8,
            (quantity & 0xFF) as u8,
        ];
        let length = (pdu.len() + 1) as u16; // + unit_id
        let mut frame = Vec::with_capacity(7 + pdu.len());
        frame.push((transaction_id >> 8) as u8);
        frame.push((transaction_id & 0xFF) as u8);
        frame.push(0x00); // protocol id high
        frame.push(0x00); // protocol id low
        frame.push((length >> 8) as u8);
        frame.push((length & 0xFF) as u8);
        frame.push(self.unit_id);
        frame.extend_from_slice(&pdu);
        frame
    }

    /// Reads `quantity` (1..=125) holding registers starting at `address`
    /// (0-based, protocol form). Returns the registers as big-endian u16s.
    pub async fn read_holding_registers(&self, address: u16, quantity: u16) -> Result<Vec<u16>> {
        let transaction_id = next_transaction_id();
        let frame = self.build_frame(transaction_id, address, quantity);
        self.transport.send(&frame).await?;

        let header = self.transport.recv_exact(7).await?;
        let resp_transaction_id = u16::from_be_bytes([header[0], header[1]]);
        let protocol_id = u16::from_be_bytes([header[2], header[3]]);
        let length = u16::from_be_bytes([header[4], header[5]]);

        if protocol_id != 0 {
            return Err(GatewayError::ProtocolViolation {
                reason: format!("non-zero protocol id {protocol_id}"),
            });
        }
        if length < 2 {
            return Err(GatewayError::ProtocolViolation {
                reason: format!("pdu length {length} < 2"),
            });
        }
        if resp_transaction_id != transaction_id {
            return Err(GatewayError::TransactionMismatch {
                expected: transaction_id,
                actual: resp_transaction_id,
            });
        }

        // `length` counts unit_id + pdu; we already consumed unit_id as part
        // of the 7-byte header, so the remaining read is `length - 1` bytes.
        let pdu = self.transport.recv_exact((length - 1) as usize).await?;

        if pdu[0] & 0x80 != 0 {
            let exception_code = *pdu.get(1).unwrap_or(&0);
            return Err(GatewayError::modbus_exception(pdu[0] & 0x7F, exception_code));
        }

        let byte_count = pdu[1] as usize;
        if byte_count != 2 * quantity as usize || pdu.len() < 2 + byte_count {
            return Err(GatewayError::ProtocolViolation {
                reason: format!(
                    "byte count {byte_count} does not match requested quantity {quantity}"
                ),
            });
        }

        let mut values = Vec::with_capacity(quantity as usize);
        for i in 0..quantity as usize {
            let idx = 2 + i * 2;
            values.push(u16::from_be_bytes([pdu[idx], pdu[idx + 1]]));
        }
        Ok(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> ModbusClient {
        ModbusClient::connect_timeout(
            "127.0.0.1:1".parse().unwrap(),
            1,
            Duration::from_millis(50),
        )
    }

    #[test]
    fn build_frame_matches_mbap_layout() {
        let c = client();
        let frame = c.build_frame(1, 0, 5);
        assert_eq!(frame[0], 0x00); // transaction id high
        assert_eq!(frame[1], 0x01); // transaction id low
        assert_eq!(frame[2], 0x00); // protocol id high
        assert_eq!(frame[3], 0x00); // protocol id low
        assert_eq!(frame[4], 0x00); // length high
        assert_eq!(frame[5], 0x06); // length low: pdu(5) + unit_id(1)
        assert_eq!(frame[6], 0x01); // unit id
        assert_eq!(frame[7], 0x03); // function code
    }

    #[test]
    fn transaction_id_never_wraps_to_zero() {
        for _ in 0..(u16::MAX as u32 + 10) {
            assert_ne!(next_transaction_id(), 0);
        }
    }
}
