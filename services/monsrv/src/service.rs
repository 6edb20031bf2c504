//! Service facade
//!
//! `MonitorService` is what a calling layer (HTTP, CLI) talks to. It owns the
//! connection, catalog and sink, and at most one monitor run at a time.

use parking_lot::Mutex as SyncMutex;
use std::sync::Arc;
use tokio::sync::{watch, Mutex};
use tracing::{info, warn};
use voltage_rtdb::{SystemTimeProvider, TimeProvider};

use crate::catalog::RegisterCatalog;
use crate::config::{ConnectionConfig, MonsrvConfig, RegisterDefinition, RegisterType};
use crate::error::{MonSrvError, Result};
use crate::protocols::modbus::{
    ConnectionManager, PollExecutor, ReadResult, RegisterWriter, SessionConnector, TcpConnector,
};
use crate::runtime::monitor::{
    MonitorContext, MonitorExit, MonitorHandle, MonitorLoop, MonitorState, MonitorStats,
};
use crate::storage::{open_sink, StoredSnapshot, TimeSeriesSink};

pub struct MonitorService {
    connection: Arc<ConnectionManager>,
    catalog: Arc<RegisterCatalog>,
    poller: PollExecutor,
    writer: RegisterWriter,
    sink: Arc<dyn TimeSeriesSink>,
    clock: Arc<dyn TimeProvider>,
    state: Arc<watch::Sender<MonitorState>>,
    stats: Arc<SyncMutex<MonitorStats>>,
    run: Mutex<Option<MonitorHandle>>,
}

impl MonitorService {
    /// Validate everything up front; no network activity happens here
    pub fn new(
        config: ConnectionConfig,
        registers: Vec<RegisterDefinition>,
        connector: Arc<dyn SessionConnector>,
        sink: Arc<dyn TimeSeriesSink>,
    ) -> Result<Self> {
        let connection = Arc::new(ConnectionManager::new(config, connector)?);
        let catalog = Arc::new(RegisterCatalog::with_definitions(registers)?);
        let (state, _) = watch::channel(MonitorState::Idle);

        Ok(Self {
            poller: PollExecutor::new(Arc::clone(&connection)),
            writer: RegisterWriter::new(Arc::clone(&connection)),
            connection,
            catalog,
            sink,
            clock: Arc::new(SystemTimeProvider),
            state: Arc::new(state),
            stats: Arc::new(SyncMutex::new(MonitorStats::default())),
            run: Mutex::new(None),
        })
    }

    /// Service over TCP with the configured storage backend
    pub async fn from_config(config: &MonsrvConfig) -> Result<Self> {
        config.validate()?;
        let sink = open_sink(&config.storage).await?;
        Self::new(
            config.connection.clone(),
            config.registers.clone(),
            Arc::new(TcpConnector),
            sink,
        )
    }

    /// Replace the timestamp source used for stored passes
    pub fn with_clock(mut self, clock: Arc<dyn TimeProvider>) -> Self {
        self.clock = clock;
        self
    }

    pub fn config(&self) -> &ConnectionConfig {
        self.connection.config()
    }

    // ========== Connection ==========

    pub async fn connect(&self) -> Result<bool> {
        let _operation = self
            .connection
            .begin_operation(self.config().lock_timeout)
            .await?;
        Ok(self.connection.connect().await)
    }

    /// Stop any run, then close the session
    pub async fn disconnect(&self) -> Result<()> {
        let stopped = self.stop_monitoring().await;
        self.connection.disconnect().await;
        stopped
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_connected()
    }

    // ========== State ==========

    pub fn status(&self) -> MonitorState {
        self.state.borrow().clone()
    }

    /// Receiver notified on every state change
    pub fn subscribe(&self) -> watch::Receiver<MonitorState> {
        self.state.subscribe()
    }

    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }

    // ========== Ad-hoc I/O ==========

    /// Read `count` registers of `register_type` starting at `address`
    pub async fn read(
        &self,
        address: u32,
        count: u32,
        register_type: RegisterType,
    ) -> Result<ReadResult> {
        let definition = RegisterDefinition::checked(address, count, register_type)?;
        if !self.connection.is_connected() {
            return Err(MonSrvError::ConnectionError("Not connected".to_string()));
        }

        let _operation = self
            .connection
            .begin_operation(self.config().lock_timeout)
            .await?;
        self.poller.read_one(&definition).await
    }

    pub async fn write(&self, address: u32, value: i64) -> Result<bool> {
        self.writer.write_single(address, value).await
    }

    pub async fn write_multiple(&self, address: u32, values: &[i64]) -> Result<bool> {
        self.writer.write_multiple(address, values).await
    }

    // ========== Monitoring ==========

    /// Start a run; after a fatal error this is the explicit restart
    pub async fn start_monitoring(&self) -> Result<()> {
        let mut run = self.run.lock().await;
        if let Some(handle) = run.take() {
            if !handle.is_finished() {
                *run = Some(handle);
                return Err(MonSrvError::StateError(
                    "Monitoring already running".to_string(),
                ));
            }
            if let Ok(MonitorExit::Fatal(reason)) = handle.join().await {
                info!("Restarting monitoring after fatal error: {}", reason);
            }
        }

        *run = Some(MonitorLoop::spawn(MonitorContext {
            connection: Arc::clone(&self.connection),
            catalog: Arc::clone(&self.catalog),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            state: Arc::clone(&self.state),
            stats: Arc::clone(&self.stats),
        }));
        Ok(())
    }

    /// Stop the current run, if any; waits for the in-flight pass
    ///
    /// A run that had already halted on its failure threshold is reported
    /// once as `FatalError`; later calls return `Ok`.
    pub async fn stop_monitoring(&self) -> Result<()> {
        let handle = self.run.lock().await.take();
        match handle {
            Some(handle) => match handle.stop().await? {
                MonitorExit::Stopped => Ok(()),
                MonitorExit::Fatal(reason) => Err(MonSrvError::FatalError(reason)),
            },
            None => Ok(()),
        }
    }

    // ========== Catalog ==========

    /// Atomically swap the polled register set
    pub fn reconfigure(&self, registers: Vec<RegisterDefinition>) -> Result<()> {
        self.catalog.replace(registers)
    }

    pub fn add_register(&self, definition: RegisterDefinition) -> Result<()> {
        self.catalog.add(definition)
    }

    pub fn registers(&self) -> Vec<RegisterDefinition> {
        self.catalog.snapshot().to_vec()
    }

    // ========== Stored data ==========

    pub async fn latest(&self) -> Result<Option<StoredSnapshot>> {
        self.sink.get_latest().await
    }

    pub async fn history(&self, limit: usize) -> Result<Vec<StoredSnapshot>> {
        self.sink.get_history(limit).await
    }

    /// Stop monitoring and release the device
    pub async fn shutdown(&self) {
        if let Err(e) = self.disconnect().await {
            warn!("Error during shutdown: {}", e);
        }
    }
}
