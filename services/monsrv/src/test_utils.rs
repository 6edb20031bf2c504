//! Test utilities for monsrv
//!
//! A scripted in-process Modbus device: `MockConnector` opens `MockSession`s
//! over shared register tables, counts every call and lets tests inject
//! per-address faults. Used by unit tests and the `tests/` suites.

use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::{ConnectionConfig, RegisterType};
use crate::error::{MonSrvError, Result};
use crate::protocols::modbus::connection::ConnectionManager;
use crate::protocols::modbus::transport::{DeviceSession, SessionConnector};
use crate::runtime::reconnect::BackoffPolicy;
use crate::storage::RtdbSink;

/// Failure injected for one (table, start address)
#[derive(Debug, Clone, PartialEq)]
pub enum Fault {
    /// Device answers with a Modbus exception code
    Exception(u8),
    /// Socket dies mid-request
    ConnectionLost,
    /// Device answers after the delay
    Delay(Duration),
}

/// Call counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MockStats {
    pub connects: u64,
    pub closes: u64,
    pub reads: u64,
    pub writes: u64,
}

/// Completed device request, in completion order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MockEvent {
    Read(RegisterType, u16),
    Write(u16),
}

#[derive(Default)]
struct DeviceState {
    words: HashMap<(RegisterType, u16), u16>,
    bits: HashMap<(RegisterType, u16), bool>,
    faults: HashMap<(RegisterType, u16), Fault>,
    events: Vec<MockEvent>,
    stats: MockStats,
    fail_connects: bool,
    connect_delay: Option<Duration>,
}

/// In-process device and session factory
#[derive(Clone, Default)]
pub struct MockConnector {
    state: Arc<Mutex<DeviceState>>,
}

impl MockConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MockStats {
        self.state.lock().stats
    }

    pub fn events(&self) -> Vec<MockEvent> {
        self.state.lock().events.clone()
    }

    /// Make every connect attempt fail with "Connection refused"
    pub fn fail_connects(&self, fail: bool) {
        self.state.lock().fail_connects = fail;
    }

    pub fn set_connect_delay(&self, delay: Duration) {
        self.state.lock().connect_delay = Some(delay);
    }

    pub fn inject(&self, register_type: RegisterType, address: u16, fault: Fault) {
        self.state
            .lock()
            .faults
            .insert((register_type, address), fault);
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults.clear();
    }

    pub fn set_words(&self, register_type: RegisterType, address: u16, values: &[u16]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            let addr = address.wrapping_add(offset as u16);
            state.words.insert((register_type, addr), *value);
        }
    }

    pub fn set_bits(&self, register_type: RegisterType, address: u16, values: &[bool]) {
        let mut state = self.state.lock();
        for (offset, value) in values.iter().enumerate() {
            let addr = address.wrapping_add(offset as u16);
            state.bits.insert((register_type, addr), *value);
        }
    }

    pub fn word(&self, register_type: RegisterType, address: u16) -> u16 {
        self.state
            .lock()
            .words
            .get(&(register_type, address))
            .copied()
            .unwrap_or_default()
    }
}

#[async_trait]
impl SessionConnector for MockConnector {
    async fn connect(&self, _config: &ConnectionConfig) -> Result<Box<dyn DeviceSession>> {
        let (fail, delay) = {
            let mut state = self.state.lock();
            state.stats.connects += 1;
            (state.fail_connects, state.connect_delay)
        };
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        if fail {
            return Err(MonSrvError::ConnectionError(
                "Connection refused".to_string(),
            ));
        }
        Ok(Box::new(MockSession {
            state: Arc::clone(&self.state),
        }))
    }
}

/// Session over the connector's shared tables
pub struct MockSession {
    state: Arc<Mutex<DeviceState>>,
}

impl MockSession {
    async fn check_fault(&self, register_type: RegisterType, address: u16) -> Result<()> {
        let fault = self
            .state
            .lock()
            .faults
            .get(&(register_type, address))
            .cloned();
        match fault {
            None => Ok(()),
            Some(Fault::Delay(delay)) => {
                tokio::time::sleep(delay).await;
                Ok(())
            },
            Some(Fault::Exception(code)) => Err(MonSrvError::ProtocolError(format!(
                "Modbus exception 0x{:02X} at {} {}",
                code, register_type, address
            ))),
            Some(Fault::ConnectionLost) => Err(MonSrvError::ConnectionError(
                "Connection reset by peer".to_string(),
            )),
        }
    }

    async fn read_words(
        &mut self,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<u16>> {
        self.state.lock().stats.reads += 1;
        let outcome = self.check_fault(register_type, address).await;
        let mut state = self.state.lock();
        state.events.push(MockEvent::Read(register_type, address));
        outcome?;
        Ok((0..count)
            .map(|i| {
                let addr = address.wrapping_add(i);
                state
                    .words
                    .get(&(register_type, addr))
                    .copied()
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn read_bits(
        &mut self,
        register_type: RegisterType,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        self.state.lock().stats.reads += 1;
        let outcome = self.check_fault(register_type, address).await;
        let mut state = self.state.lock();
        state.events.push(MockEvent::Read(register_type, address));
        outcome?;
        Ok((0..count)
            .map(|i| {
                let addr = address.wrapping_add(i);
                state
                    .bits
                    .get(&(register_type, addr))
                    .copied()
                    .unwrap_or_default()
            })
            .collect())
    }

    async fn write_words(&mut self, address: u16, values: &[u16]) -> Result<()> {
        self.state.lock().stats.writes += 1;
        let outcome = self.check_fault(RegisterType::Holding, address).await;
        let mut state = self.state.lock();
        state.events.push(MockEvent::Write(address));
        outcome?;
        for (offset, value) in values.iter().enumerate() {
            let addr = address.wrapping_add(offset as u16);
            state.words.insert((RegisterType::Holding, addr), *value);
        }
        Ok(())
    }
}

#[async_trait]
impl DeviceSession for MockSession {
    async fn read_holding(&mut self, _unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(RegisterType::Holding, address, count).await
    }

    async fn read_input(&mut self, _unit_id: u8, address: u16, count: u16) -> Result<Vec<u16>> {
        self.read_words(RegisterType::Input, address, count).await
    }

    async fn read_coils(&mut self, _unit_id: u8, address: u16, count: u16) -> Result<Vec<bool>> {
        self.read_bits(RegisterType::Coil, address, count).await
    }

    async fn read_discrete_inputs(
        &mut self,
        _unit_id: u8,
        address: u16,
        count: u16,
    ) -> Result<Vec<bool>> {
        self.read_bits(RegisterType::DiscreteInput, address, count)
            .await
    }

    async fn write_single_register(
        &mut self,
        _unit_id: u8,
        address: u16,
        value: u16,
    ) -> Result<()> {
        self.write_words(address, &[value]).await
    }

    async fn write_multiple_registers(
        &mut self,
        _unit_id: u8,
        address: u16,
        values: &[u16],
    ) -> Result<()> {
        self.write_words(address, values).await
    }

    async fn close(&mut self) {
        self.state.lock().stats.closes += 1;
    }
}

// ==================== Fixtures ====================

/// Fast, deterministic connection settings (1 s poll, 3 s timeout, 5 errors)
pub fn test_connection_config() -> ConnectionConfig {
    ConnectionConfig {
        host: "127.0.0.1".to_string(),
        port: 1502,
        unit_id: 1,
        poll_interval: Duration::from_secs(1),
        timeout: Duration::from_secs(3),
        lock_timeout: Duration::from_secs(5),
        max_consecutive_errors: 5,
        backoff: BackoffPolicy::default(),
    }
}

/// Connection manager over `connector`, already connected
pub async fn connected_manager(connector: &Arc<MockConnector>) -> Arc<ConnectionManager> {
    let manager = Arc::new(
        ConnectionManager::new(test_connection_config(), connector.clone())
            .unwrap_or_else(|e| panic!("test config rejected: {}", e)),
    );
    assert!(manager.connect().await, "mock connect failed");
    manager
}

/// Memory-backed sink with the given retention
pub fn memory_sink(retention: usize) -> Arc<RtdbSink<voltage_rtdb::MemoryRtdb>> {
    Arc::new(RtdbSink::new(
        Arc::new(voltage_rtdb::MemoryRtdb::new()),
        "test:latest",
        "test:history",
        retention,
    ))
}
