//! Device transport seam
//!
//! `DeviceSession` is one open conversation with a Modbus device and
//! `SessionConnector` opens them. Production uses `voltage_modbus` over TCP;
//! tests plug in the mocks from `test_utils`.

use async_trait::async_trait;
use std::net::SocketAddr;
use tracing::debug;
use voltage_modbus::{ModbusClient, ModbusTcpClient};

use crate::config::ConnectionConfig;
use crate::error::{MonSrvError, Result};

/// An open session with a single Modbus device
///
/// Requests are issued one at a time (`&mut self`); callers serialize access.
#[async_trait]
pub trait DeviceSession: Send {
    async fn read_holding(&mut self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_input(&mut self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>>;

    async fn read_coils(&mut self, unit_id: u8, address: u16, count: u16) -> Result<Vec<bool>>;

    async fn read_discrete_inputs(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>>;

    /// FC06
    async fn write_single_register(&mut self, unit_id: u8, address: u16, value: u16)
        -> Result<()>;

    /// FC16
    async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> Result<()>;

    /// Release the underlying socket; errors are not interesting to callers
    async fn close(&mut self);
}

/// Factory for device sessions
#[async_trait]
pub trait SessionConnector: Send + Sync + 'static {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn DeviceSession>>;
}

/// Map a transport error message onto the service taxonomy
///
/// The Modbus client reports socket failures, timeouts and device exceptions
/// through one error type, so the decision is made on the rendered message.
pub fn classify_transport_error(operation: &str, message: &str) -> MonSrvError {
    let lower = message.to_ascii_lowercase();
    let text = format!("{}: {}", operation, message);

    if lower.contains("timeout") || lower.contains("timed out") {
        MonSrvError::TimeoutError(text)
    } else if lower.contains("exception") {
        MonSrvError::ProtocolError(text)
    } else if lower.contains("broken pipe")
        || lower.contains("connection reset")
        || lower.contains("connection refused")
        || lower.contains("connection aborted")
        || lower.contains("not connected")
        || lower.contains("tcp send error")
        || lower.contains("tcp receive error")
        || lower.contains("unexpected eof")
        || lower.contains("connection")
    {
        MonSrvError::ConnectionError(text)
    } else {
        MonSrvError::ProtocolError(text)
    }
}

fn map_modbus_error(operation: &str, err: voltage_modbus::ModbusError) -> MonSrvError {
    classify_transport_error(operation, &err.to_string())
}

// ============================================================================
// TCP implementation
// ============================================================================

/// `DeviceSession` backed by `voltage_modbus::ModbusTcpClient`
pub struct TcpSession {
    client: ModbusTcpClient,
    peer: SocketAddr,
}

#[async_trait]
impl DeviceSession for TcpSession {
    async fn read_holding(&mut self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        self.client
            .read_03(unit_id, address, count)
            .await
            .map_err(|e| map_modbus_error("read holding registers", e))
    }

    async fn read_input(&mut self, unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        self.client
            .read_04(unit_id, address, count)
            .await
            .map_err(|e| map_modbus_error("read input registers", e))
    }

    async fn read_coils(&mut self, unit_id: u8, address: u16, count: u16) -> Result<Vec<bool>> {
        self.client
            .read_01(unit_id, address, count)
            .await
            .map_err(|e| map_modbus_error("read coils", e))
    }

    async fn read_discrete_inputs(
        &mut self,
        unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        self.client
            .read_02(unit_id, address, count)
            .await
            .map_err(|e| map_modbus_error("read discrete inputs", e))
    }

    async fn write_single_register(
        &mut self,
        unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<()> {
        self.client
            .write_06(unit_id, address, value)
            .await
            .map_err(|e| map_modbus_error("write single register", e))
    }

    async fn write_multiple_registers(
        &mut self,
        unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> Result<()> {
        self.client
            .write_10(unit_id, address, values)
            .await
            .map_err(|e| map_modbus_error("write multiple registers", e))
    }

    async fn close(&mut self) {
        if let Err(e) = self.client.close().await {
            debug!("Close of {} reported: {}", self.peer, e);
        }
    }
}

/// Opens `TcpSession`s, resolving host names first
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl TcpConnector {
    async fn resolve(endpoint: &str) -> Result<SocketAddr> {
        let mut addrs = tokio::net::lookup_host(endpoint).await.map_err(|e| {
            MonSrvError::ConnectionError(format!("Failed to resolve {}: {}", endpoint, e))
        })?;
        addrs.next().ok_or_else(|| {
            MonSrvError::ConnectionError(format!("No address found for {}", endpoint))
        })
    }
}

#[async_trait]
impl SessionConnector for TcpConnector {
    async fn connect(&self, config: &ConnectionConfig) -> Result<Box<dyn DeviceSession>> {
        let endpoint = config.endpoint();
        let peer = Self::resolve(&endpoint).await?;
        let client = ModbusTcpClient::new(peer, config.timeout)
            .await
            .map_err(|e| {
                MonSrvError::ConnectionError(format!("Failed to connect to {}: {}", endpoint, e))
            })?;
        debug!("TCP session opened to {} ({})", endpoint, peer);
        Ok(Box::new(TcpSession { client, peer }))
    }
}
