//! Redis implementation of RTDB traits

use crate::traits::*;
use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

/// Redis-backed RTDB implementation
///
/// Uses a multiplexed `ConnectionManager`, which reconnects on its own after
/// transient failures; cloning it is cheap.
pub struct RedisRtdb {
    conn: ConnectionManager,
}

impl RedisRtdb {
    /// Create new Redis RTDB from URL
    pub async fn new(url: &str) -> Result<Self> {
        let client = redis::Client::open(url)
            .with_context(|| format!("Invalid Redis URL: {}", url))?;
        let conn = ConnectionManager::new(client)
            .await
            .with_context(|| format!("Failed to connect to Redis at {}", url))?;
        tracing::info!("Connected to Redis at {}", url);
        Ok(Self { conn })
    }
}

#[async_trait]
impl Rtdb for RedisRtdb {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value.map(Bytes::from))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: () = conn.set(key, value.to_vec()).await?;
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let exists: bool = conn.exists(key).await?;
        Ok(exists)
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<()> {
        let mut conn = self.conn.clone();
        let _: i64 = conn.zadd(key, member.to_vec(), score).await?;
        Ok(())
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(Bytes, f64)>> {
        let mut conn = self.conn.clone();
        let members: Vec<(Vec<u8>, f64)> = conn.zrevrange_withscores(key, start, stop).await?;
        Ok(members
            .into_iter()
            .map(|(member, score)| (Bytes::from(member), score))
            .collect())
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let mut conn = self.conn.clone();
        let count: usize = conn.zcard(key).await?;
        Ok(count)
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<usize> {
        let mut conn = self.conn.clone();
        let removed: usize = conn.zremrangebyrank(key, start, stop).await?;
        Ok(removed)
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        if ops.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in &ops {
            match op {
                WriteOp::Set { key, value } => {
                    pipe.set(key, value.to_vec()).ignore();
                },
                WriteOp::ZAdd { key, score, member } => {
                    pipe.zadd(key, member.to_vec(), *score).ignore();
                },
                WriteOp::ZKeepNewest { key, keep } => {
                    pipe.zremrangebyrank(key, 0, -(*keep as isize) - 1).ignore();
                },
            }
        }

        let mut conn = self.conn.clone();
        let _: () = pipe
            .query_async(&mut conn)
            .await
            .context("Atomic batch failed")?;
        Ok(())
    }
}
