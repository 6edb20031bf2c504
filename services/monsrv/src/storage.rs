//! Time-series persistence of poll results
//!
//! The reference layout, shared by both backends:
//!
//! - `latest_key`: JSON of the most recent [`StoredSnapshot`]
//! - `history_key`: sorted set of snapshots scored by timestamp (ms),
//!   trimmed to `retention` entries in the same batch as every insert

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info};
use voltage_rtdb::{MemoryRtdb, RedisRtdb, Rtdb, WriteOp};

use crate::config::{StorageBackend, StorageConfig};
use crate::error::{MonSrvError, Result};
use crate::protocols::modbus::poller::ReadResult;

/// One stored pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub timestamp: DateTime<Utc>,
    pub data: Vec<ReadResult>,
}

/// Receiver of every successful pass
#[async_trait]
pub trait TimeSeriesSink: Send + Sync + 'static {
    /// Update latest, append to history and trim, as one unit
    async fn store(&self, results: &[ReadResult], timestamp: DateTime<Utc>) -> Result<()>;

    async fn get_latest(&self) -> Result<Option<StoredSnapshot>>;

    /// Most recent first, at most `limit` entries
    async fn get_history(&self, limit: usize) -> Result<Vec<StoredSnapshot>>;
}

fn storage_error(context: &str, err: anyhow::Error) -> MonSrvError {
    MonSrvError::StorageError(format!("{}: {:#}", context, err))
}

/// [`TimeSeriesSink`] over any RTDB backend
pub struct RtdbSink<R: Rtdb + ?Sized> {
    rtdb: Arc<R>,
    latest_key: String,
    history_key: String,
    retention: usize,
}

impl<R: Rtdb + ?Sized> RtdbSink<R> {
    pub fn new(
        rtdb: Arc<R>,
        latest_key: impl Into<String>,
        history_key: impl Into<String>,
        retention: usize,
    ) -> Self {
        Self {
            rtdb,
            latest_key: latest_key.into(),
            history_key: history_key.into(),
            retention: retention.max(1),
        }
    }

    pub fn rtdb(&self) -> &Arc<R> {
        &self.rtdb
    }
}

#[async_trait]
impl<R: Rtdb + ?Sized> TimeSeriesSink for RtdbSink<R> {
    async fn store(&self, results: &[ReadResult], timestamp: DateTime<Utc>) -> Result<()> {
        let snapshot = StoredSnapshot {
            timestamp,
            data: results.to_vec(),
        };
        let payload = Bytes::from(serde_json::to_vec(&snapshot)?);

        self.rtdb
            .apply(vec![
                WriteOp::Set {
                    key: self.latest_key.clone(),
                    value: payload.clone(),
                },
                WriteOp::ZAdd {
                    key: self.history_key.clone(),
                    score: timestamp.timestamp_millis() as f64,
                    member: payload,
                },
                WriteOp::ZKeepNewest {
                    key: self.history_key.clone(),
                    keep: self.retention,
                },
            ])
            .await
            .map_err(|e| storage_error("Failed to store snapshot", e))?;

        debug!("Stored {} results at {}", results.len(), timestamp);
        Ok(())
    }

    async fn get_latest(&self) -> Result<Option<StoredSnapshot>> {
        let raw = self
            .rtdb
            .get(&self.latest_key)
            .await
            .map_err(|e| storage_error("Failed to load latest", e))?;
        match raw {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn get_history(&self, limit: usize) -> Result<Vec<StoredSnapshot>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let stop = isize::try_from(limit - 1).unwrap_or(isize::MAX);
        let members = self
            .rtdb
            .zrevrange_withscores(&self.history_key, 0, stop)
            .await
            .map_err(|e| storage_error("Failed to load history", e))?;

        members
            .into_iter()
            .map(|(member, _score)| serde_json::from_slice(&member).map_err(MonSrvError::from))
            .collect()
    }
}

/// Open the configured backend
pub async fn open_sink(config: &StorageConfig) -> Result<Arc<dyn TimeSeriesSink>> {
    let rtdb: Arc<dyn Rtdb> = match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory storage");
            Arc::new(MemoryRtdb::new())
        },
        StorageBackend::Redis => Arc::new(
            RedisRtdb::new(&config.redis_url)
                .await
                .map_err(|e| storage_error("Failed to open Redis storage", e))?,
        ),
    };

    Ok(Arc::new(RtdbSink::new(
        rtdb,
        config.latest_key.clone(),
        config.history_key.clone(),
        config.history_limit,
    )))
}
