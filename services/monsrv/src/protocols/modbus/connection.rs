//! Device session lifecycle
//!
//! Two locks guard the single device connection:
//!
//! - the *operation lock* makes a poll pass, a write and an ad-hoc read
//!   mutually exclusive; writers wait a bounded time for it
//! - the *session lock* owns the transport and queues individual requests in
//!   FIFO order, since the transport handles one request at a time
//!
//! Lock order is always operation → session. `connect`, `disconnect` and
//! `ensure_connected` only take the session lock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use super::transport::{DeviceSession, SessionConnector};
use crate::config::{ConnectionConfig, RegisterType};
use crate::error::{MonSrvError, Result};

/// Held for the duration of one exclusive operation (pass, write, ad-hoc read)
pub type OperationGuard<'a> = MutexGuard<'a, ()>;

/// One request against the device
#[derive(Debug, Clone, PartialEq)]
pub enum SessionRequest {
    Read {
        register_type: RegisterType,
        address: u16,
        count: u16,
    },
    WriteSingle {
        address: u16,
        value: u16,
    },
    WriteMultiple {
        address: u16,
        values: Vec<u16>,
    },
}

/// Device reply to a [`SessionRequest`]
#[derive(Debug, Clone, PartialEq)]
pub enum SessionResponse {
    Words(Vec<u16>),
    Bits(Vec<bool>),
    Written,
}

/// Owns the device session and serializes access to it
pub struct ConnectionManager {
    config: ConnectionConfig,
    connector: Arc<dyn SessionConnector>,
    session: Mutex<Option<Box<dyn DeviceSession>>>,
    operation: Mutex<()>,
    connected: AtomicBool,
    connect_attempts: AtomicU64,
}

impl std::fmt::Debug for ConnectionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionManager")
            .field("endpoint", &self.config.endpoint())
            .field("connected", &self.is_connected())
            .finish()
    }
}

impl ConnectionManager {
    /// Validates `config`; nothing touches the network until `connect`
    pub fn new(config: ConnectionConfig, connector: Arc<dyn SessionConnector>) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            connector,
            session: Mutex::new(None),
            operation: Mutex::new(()),
            connected: AtomicBool::new(false),
            connect_attempts: AtomicU64::new(0),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Number of session opens attempted so far
    pub fn connect_attempts(&self) -> u64 {
        self.connect_attempts.load(Ordering::Relaxed)
    }

    /// Open a fresh session, closing any previous one first
    ///
    /// Network failures are logged and reported as `false`.
    pub async fn connect(&self) -> bool {
        let mut session = self.session.lock().await;
        self.open_locked(&mut session).await
    }

    /// `true` without I/O when connected; otherwise exactly one `connect`
    pub async fn ensure_connected(&self) -> bool {
        if self.is_connected() {
            return true;
        }

        let mut session = self.session.lock().await;
        // Another caller may have reconnected while we waited
        if session.is_some() && self.is_connected() {
            return true;
        }
        self.open_locked(&mut session).await
    }

    /// Close the session; safe to call repeatedly or before any connect
    pub async fn disconnect(&self) {
        let mut session = self.session.lock().await;
        self.connected.store(false, Ordering::Release);
        if let Some(mut current) = session.take() {
            current.close().await;
            info!("Disconnected from {}", self.config.endpoint());
        }
    }

    async fn open_locked(&self, session: &mut Option<Box<dyn DeviceSession>>) -> bool {
        self.connected.store(false, Ordering::Release);
        if let Some(mut stale) = session.take() {
            stale.close().await;
        }

        let endpoint = self.config.endpoint();
        let attempt = self.connect_attempts.fetch_add(1, Ordering::Relaxed) + 1;
        debug!("Connecting to {} (attempt {})", endpoint, attempt);

        match tokio::time::timeout(self.config.timeout, self.connector.connect(&self.config)).await
        {
            Ok(Ok(opened)) => {
                *session = Some(opened);
                self.connected.store(true, Ordering::Release);
                info!(
                    "Connected to Modbus device at {} (unit {})",
                    endpoint, self.config.unit_id
                );
                true
            },
            Ok(Err(e)) => {
                warn!("Failed to connect to {}: {}", endpoint, e);
                false
            },
            Err(_) => {
                warn!(
                    "Connection to {} timed out after {:?}",
                    endpoint, self.config.timeout
                );
                false
            },
        }
    }

    /// Wait for the operation lock without bound (poll passes)
    pub async fn lock_operation(&self) -> OperationGuard<'_> {
        self.operation.lock().await
    }

    /// Wait up to `wait` for the operation lock
    pub async fn begin_operation(&self, wait: Duration) -> Result<OperationGuard<'_>> {
        tokio::time::timeout(wait, self.operation.lock())
            .await
            .map_err(|_| {
                MonSrvError::ResourceBusy(format!(
                    "Device {} busy for more than {:?}",
                    self.config.endpoint(),
                    wait
                ))
            })
    }

    /// Run one request, bounded by the configured timeout
    ///
    /// Requests queue on the session lock; the timeout starts once the
    /// request owns the session. Connection-class failures drop the session
    /// so the next `ensure_connected` reconnects.
    pub async fn execute(&self, request: SessionRequest) -> Result<SessionResponse> {
        let mut guard = self.session.lock().await;
        let Some(session) = guard.as_mut() else {
            return Err(MonSrvError::ConnectionError("Not connected".to_string()));
        };

        let timeout = self.config.timeout;
        let result = match tokio::time::timeout(
            timeout,
            dispatch(&mut **session, self.config.unit_id, request),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(MonSrvError::TimeoutError(format!(
                "No response within {:?}",
                timeout
            ))),
        };

        if let Err(e) = &result {
            if e.is_connection_loss() {
                warn!("Connection to {} lost: {}", self.config.endpoint(), e);
                self.connected.store(false, Ordering::Release);
                if let Some(mut lost) = guard.take() {
                    lost.close().await;
                }
            }
        }
        result
    }
}

async fn dispatch(
    session: &mut dyn DeviceSession,
    unit_id: u8,
    request: SessionRequest,
) -> Result<SessionResponse> {
    match request {
        SessionRequest::Read {
            register_type,
            address,
            count,
        } => match register_type {
            RegisterType::Holding => session
                .read_holding(unit_id, address, count)
                .await
                .map(SessionResponse::Words),
            RegisterType::Input => session
                .read_input(unit_id, address, count)
                .await
                .map(SessionResponse::Words),
            RegisterType::Coil => session
                .read_coils(unit_id, address, count)
                .await
                .map(SessionResponse::Bits),
            RegisterType::DiscreteInput => session
                .read_discrete_inputs(unit_id, address, count)
                .await
                .map(SessionResponse::Bits),
        },
        SessionRequest::WriteSingle { address, value } => session
            .write_single_register(unit_id, address, value)
            .await
            .map(|()| SessionResponse::Written),
        SessionRequest::WriteMultiple { address, values } => session
            .write_multiple_registers(unit_id, address, &values)
            .await
            .map(|()| SessionResponse::Written),
    }
}
