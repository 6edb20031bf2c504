//! Monitor loop: the poll/reconnect state machine
//!
//! ```text
//! Idle → Connecting → Connected → Monitoring ─┬─(stop)──────→ Stopping → Idle
//!                                              └─(threshold)─→ Error(reason)
//! ```
//!
//! One spawned task per run. Each iteration ensures the connection, reads a
//! catalog snapshot under the operation lock, hands the results to the sink
//! and sleeps. Passes never overlap. Connecting and sleeping both race the
//! cancellation token; a read pass already started runs to completion.
//! Every exit path closes the device session.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use voltage_rtdb::TimeProvider;

use crate::catalog::RegisterCatalog;
use crate::error::Result;
use crate::protocols::modbus::connection::ConnectionManager;
use crate::protocols::modbus::poller::PollExecutor;
use crate::storage::TimeSeriesSink;

/// Lifecycle state, observable through a watch channel
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", content = "reason", rename_all = "snake_case")]
pub enum MonitorState {
    #[default]
    Idle,
    Connecting,
    Connected,
    Monitoring,
    Error(String),
    Stopping,
}

impl MonitorState {
    /// A run is in progress
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            Self::Connecting | Self::Connected | Self::Monitoring | Self::Stopping
        )
    }
}

impl fmt::Display for MonitorState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Connecting => f.write_str("connecting"),
            Self::Connected => f.write_str("connected"),
            Self::Monitoring => f.write_str("monitoring"),
            Self::Error(reason) => write!(f, "error: {}", reason),
            Self::Stopping => f.write_str("stopping"),
        }
    }
}

/// Counters for observers
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Passes that polled the device (skipped passes excluded)
    pub passes: u64,
    pub successful_passes: u64,
    pub failed_passes: u64,
    /// Iterations that found the catalog empty
    pub skipped_passes: u64,
    pub consecutive_failures: u32,
    pub last_pass: Option<DateTime<Utc>>,
    pub last_result_count: usize,
}

/// How a run ended
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MonitorExit {
    Stopped,
    Fatal(String),
}

/// Outcome of one iteration
enum Pass {
    Stored(usize),
    Skipped,
}

/// Collaborators shared by every run of the loop
#[derive(Clone)]
pub struct MonitorContext {
    pub connection: Arc<ConnectionManager>,
    pub catalog: Arc<RegisterCatalog>,
    pub sink: Arc<dyn TimeSeriesSink>,
    pub clock: Arc<dyn TimeProvider>,
    pub state: Arc<watch::Sender<MonitorState>>,
    pub stats: Arc<Mutex<MonitorStats>>,
}

pub struct MonitorLoop {
    ctx: MonitorContext,
    poller: PollExecutor,
    cancel: CancellationToken,
}

impl MonitorLoop {
    pub fn new(ctx: MonitorContext, cancel: CancellationToken) -> Self {
        let poller = PollExecutor::new(Arc::clone(&ctx.connection));
        Self {
            ctx,
            poller,
            cancel,
        }
    }

    /// Spawn the loop on the current runtime
    pub fn spawn(ctx: MonitorContext) -> MonitorHandle {
        let cancel = CancellationToken::new();
        let connection = Arc::clone(&ctx.connection);
        let state = Arc::clone(&ctx.state);

        state.send_replace(MonitorState::Connecting);
        let task = tokio::spawn(Self::new(ctx, cancel.clone()).run());

        MonitorHandle {
            cancel,
            task,
            connection,
            state,
        }
    }

    fn set_state(&self, state: MonitorState) {
        debug!("Monitor state -> {}", state);
        self.ctx.state.send_replace(state);
    }

    /// Drive iterations until stopped or the failure threshold is reached
    pub async fn run(self) -> MonitorExit {
        let config = self.ctx.connection.config().clone();
        let max_errors = config.max_consecutive_errors;
        let mut consecutive_failures: u32 = 0;
        let mut monitoring = false;

        self.set_state(MonitorState::Connecting);
        *self.ctx.stats.lock() = MonitorStats::default();
        info!(
            "Starting monitor for {} (poll every {:?}, {} registers)",
            config.endpoint(),
            config.poll_interval,
            self.ctx.catalog.len()
        );

        let exit = loop {
            if self.cancel.is_cancelled() {
                break MonitorExit::Stopped;
            }

            let connected = tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break MonitorExit::Stopped,
                connected = self.ctx.connection.ensure_connected() => connected,
            };

            let outcome = if connected {
                self.iteration(&mut monitoring).await
            } else {
                Err(format!("Cannot connect to {}", config.endpoint()))
            };
            match &outcome {
                Ok(Pass::Stored(_)) => consecutive_failures = 0,
                Ok(Pass::Skipped) => {},
                Err(reason) => {
                    consecutive_failures += 1;
                    warn!(
                        "{} (consecutive failures: {}/{})",
                        reason, consecutive_failures, max_errors
                    );
                },
            }

            {
                let mut stats = self.ctx.stats.lock();
                match &outcome {
                    Ok(Pass::Stored(count)) => {
                        stats.passes += 1;
                        stats.successful_passes += 1;
                        stats.last_result_count = *count;
                        stats.last_pass = Some(Utc::now());
                    },
                    Ok(Pass::Skipped) => stats.skipped_passes += 1,
                    Err(_) => {
                        stats.passes += 1;
                        stats.failed_passes += 1;
                        stats.last_pass = Some(Utc::now());
                    },
                }
                stats.consecutive_failures = consecutive_failures;
            }

            if let Err(reason) = outcome {
                if consecutive_failures >= max_errors {
                    let reason = format!(
                        "{} consecutive failures, last: {}",
                        consecutive_failures, reason
                    );
                    error!("Max consecutive errors reached, stopping monitor: {}", reason);
                    break MonitorExit::Fatal(reason);
                }
            }

            let delay = config
                .backoff
                .delay_after(config.poll_interval, consecutive_failures);
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break MonitorExit::Stopped,
                _ = tokio::time::sleep(delay) => {},
            }
        };

        self.ctx.connection.disconnect().await;
        match &exit {
            MonitorExit::Stopped => {
                self.set_state(MonitorState::Idle);
                info!("Monitoring stopped");
            },
            MonitorExit::Fatal(reason) => {
                self.set_state(MonitorState::Error(reason.clone()));
            },
        }
        exit
    }

    async fn iteration(&self, monitoring: &mut bool) -> std::result::Result<Pass, String> {
        let connection = &self.ctx.connection;
        if !*monitoring {
            self.set_state(MonitorState::Connected);
            self.set_state(MonitorState::Monitoring);
            *monitoring = true;
        }

        let snapshot = self.ctx.catalog.snapshot();
        if snapshot.is_empty() {
            debug!("Register catalog is empty, nothing to poll");
            return Ok(Pass::Skipped);
        }

        let results = {
            let _pass = connection.lock_operation().await;
            self.poller.read_all(&snapshot).await
        };
        if results.is_empty() {
            return Err(format!(
                "No data received (all {} registers failed)",
                snapshot.len()
            ));
        }

        let timestamp =
            DateTime::from_timestamp_millis(self.ctx.clock.now_millis()).unwrap_or_else(Utc::now);
        if let Err(e) = self.ctx.sink.store(&results, timestamp).await {
            warn!("Failed to store {} results: {}", results.len(), e);
        }
        Ok(Pass::Stored(results.len()))
    }
}

/// Control handle for a spawned run
pub struct MonitorHandle {
    cancel: CancellationToken,
    task: JoinHandle<MonitorExit>,
    connection: Arc<ConnectionManager>,
    state: Arc<watch::Sender<MonitorState>>,
}

impl MonitorHandle {
    /// The task has ended (stopped, fatal or panicked)
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }

    /// Request a stop and wait for the in-flight pass to finish
    pub async fn stop(self) -> Result<MonitorExit> {
        self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = MonitorState::Stopping;
                true
            } else {
                false
            }
        });
        self.cancel.cancel();
        self.join().await
    }

    /// Wait for the task to end on its own
    pub async fn join(self) -> Result<MonitorExit> {
        match self.task.await {
            Ok(exit) => Ok(exit),
            Err(e) => {
                error!("Monitor task failed: {}", e);
                self.connection.disconnect().await;
                self.state
                    .send_replace(MonitorState::Error(format!("monitor task failed: {}", e)));
                Err(e.into())
            },
        }
    }
}
