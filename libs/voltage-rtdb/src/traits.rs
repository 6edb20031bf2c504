//! Trait definitions for RTDB abstraction

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;

/// A single write inside an atomic batch (see [`Rtdb::apply`])
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Plain key-value SET
    Set { key: String, value: Bytes },
    /// Sorted-set ZADD (member re-added with a new score replaces the old entry)
    ZAdd {
        key: String,
        score: f64,
        member: Bytes,
    },
    /// Keep only the `keep` highest-scored members of a sorted set
    ZKeepNewest { key: String, keep: usize },
}

/// Unified RTDB Storage Trait
///
/// Implementations:
/// - `RedisRtdb`: Production Redis backend
/// - `MemoryRtdb`: In-memory backend for testing and embedded use
#[async_trait]
pub trait Rtdb: Send + Sync + 'static {
    // ========== Basic Key-Value Operations ==========

    /// Get value by key
    async fn get(&self, key: &str) -> Result<Option<Bytes>>;

    /// Set value for key
    async fn set(&self, key: &str, value: Bytes) -> Result<()>;

    /// Delete key (any type)
    async fn del(&self, key: &str) -> Result<bool>;

    /// Check if key exists
    async fn exists(&self, key: &str) -> Result<bool>;

    // ========== Sorted Set Operations ==========

    /// Add a member with score (Redis ZADD)
    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<()>;

    /// Members by descending score with their scores (Redis ZREVRANGE ... WITHSCORES)
    ///
    /// `start`/`stop` are inclusive and accept negative indices like Redis.
    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(Bytes, f64)>>;

    /// Number of members (Redis ZCARD)
    async fn zcard(&self, key: &str) -> Result<usize>;

    /// Remove members by ascending rank (Redis ZREMRANGEBYRANK)
    ///
    /// Returns the number of removed members.
    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<usize>;

    // ========== Batch Operations ==========

    /// Apply several writes so that no reader observes a partial batch
    ///
    /// Redis executes the batch as one MULTI/EXEC pipeline.
    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()>;
}

/// Resolve Redis-style inclusive `start..=stop` (negative = from the end)
/// into a half-open index range over a sequence of `len` items.
pub(crate) fn resolve_range(len: usize, start: isize, stop: isize) -> Option<(usize, usize)> {
    let len = len as isize;

    let start_idx = if start < 0 {
        (len + start).max(0)
    } else {
        start.min(len)
    };

    let stop_idx = if stop < 0 {
        (len + stop + 1).max(0)
    } else {
        (stop + 1).min(len)
    };

    if start_idx < stop_idx {
        Some((start_idx as usize, stop_idx as usize))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_range_positive() {
        assert_eq!(resolve_range(5, 0, 2), Some((0, 3)));
        assert_eq!(resolve_range(5, 3, 100), Some((3, 5)));
        assert_eq!(resolve_range(5, 5, 10), None);
    }

    #[test]
    fn test_resolve_range_negative() {
        assert_eq!(resolve_range(5, 0, -1), Some((0, 5)));
        assert_eq!(resolve_range(5, -2, -1), Some((3, 5)));
        // Keep newest 3 of 5 => remove ranks 0..=-4
        assert_eq!(resolve_range(5, 0, -4), Some((0, 2)));
        assert_eq!(resolve_range(2, 0, -4), None);
    }

    #[test]
    fn test_resolve_range_empty() {
        assert_eq!(resolve_range(0, 0, -1), None);
    }
}
