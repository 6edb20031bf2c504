//! High-performance in-memory RTDB implementation
//!
//! Uses DashMap for concurrent access. Batches from [`Rtdb::apply`] are
//! serialized against readers with a single `RwLock`.

use crate::traits::*;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::cmp::Ordering;
use std::sync::Arc;

/// Sorted set stored in ascending (score, member) order, like Redis
type SortedSet = Vec<(f64, Bytes)>;

/// In-memory RTDB implementation with concurrent access support
pub struct MemoryRtdb {
    kv_store: Arc<DashMap<String, Bytes>>,
    zset_store: Arc<DashMap<String, SortedSet>>,
    batch_lock: RwLock<()>,
}

impl MemoryRtdb {
    /// Create new in-memory RTDB instance
    pub fn new() -> Self {
        Self {
            kv_store: Arc::new(DashMap::new()),
            zset_store: Arc::new(DashMap::new()),
            batch_lock: RwLock::new(()),
        }
    }

    /// Clear all data (useful for testing)
    pub fn clear(&self) {
        let _batch = self.batch_lock.write();
        self.kv_store.clear();
        self.zset_store.clear();
    }

    /// Get statistics about stored data
    pub fn stats(&self) -> MemoryStats {
        MemoryStats {
            kv_count: self.kv_store.len(),
            zset_count: self.zset_store.len(),
        }
    }

    fn zadd_locked(&self, key: &str, score: f64, member: Bytes) {
        let mut set = self.zset_store.entry(key.to_string()).or_default();
        set.retain(|(_, existing)| *existing != member);

        let pos = set.partition_point(|(s, m)| {
            s.total_cmp(&score).then_with(|| m.cmp(&member)) != Ordering::Greater
        });
        set.insert(pos, (score, member));
    }

    fn zremrangebyrank_locked(&self, key: &str, start: isize, stop: isize) -> usize {
        let Some(mut set) = self.zset_store.get_mut(key) else {
            return 0;
        };
        match resolve_range(set.len(), start, stop) {
            Some((from, to)) => {
                set.drain(from..to);
                to - from
            },
            None => 0,
        }
    }
}

impl Default for MemoryRtdb {
    fn default() -> Self {
        Self::new()
    }
}

/// Statistics about memory RTDB usage
#[derive(Debug, Clone)]
pub struct MemoryStats {
    pub kv_count: usize,
    pub zset_count: usize,
}

#[async_trait]
impl Rtdb for MemoryRtdb {
    async fn get(&self, key: &str) -> Result<Option<Bytes>> {
        let _batch = self.batch_lock.read();
        Ok(self.kv_store.get(key).map(|v| v.clone()))
    }

    async fn set(&self, key: &str, value: Bytes) -> Result<()> {
        let _batch = self.batch_lock.read();
        self.kv_store.insert(key.to_string(), value);
        Ok(())
    }

    async fn del(&self, key: &str) -> Result<bool> {
        let _batch = self.batch_lock.read();
        let kv = self.kv_store.remove(key).is_some();
        let zset = self.zset_store.remove(key).is_some();
        Ok(kv || zset)
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let _batch = self.batch_lock.read();
        Ok(self.kv_store.contains_key(key) || self.zset_store.contains_key(key))
    }

    async fn zadd(&self, key: &str, score: f64, member: Bytes) -> Result<()> {
        let _batch = self.batch_lock.read();
        self.zadd_locked(key, score, member);
        Ok(())
    }

    async fn zrevrange_withscores(
        &self,
        key: &str,
        start: isize,
        stop: isize,
    ) -> Result<Vec<(Bytes, f64)>> {
        let _batch = self.batch_lock.read();
        let Some(set) = self.zset_store.get(key) else {
            return Ok(Vec::new());
        };

        let descending: Vec<_> = set.iter().rev().collect();
        Ok(match resolve_range(descending.len(), start, stop) {
            Some((from, to)) => descending[from..to]
                .iter()
                .map(|(score, member)| (member.clone(), *score))
                .collect(),
            None => Vec::new(),
        })
    }

    async fn zcard(&self, key: &str) -> Result<usize> {
        let _batch = self.batch_lock.read();
        Ok(self.zset_store.get(key).map(|set| set.len()).unwrap_or(0))
    }

    async fn zremrangebyrank(&self, key: &str, start: isize, stop: isize) -> Result<usize> {
        let _batch = self.batch_lock.read();
        Ok(self.zremrangebyrank_locked(key, start, stop))
    }

    async fn apply(&self, ops: Vec<WriteOp>) -> Result<()> {
        let _batch = self.batch_lock.write();
        for op in ops {
            match op {
                WriteOp::Set { key, value } => {
                    self.kv_store.insert(key, value);
                },
                WriteOp::ZAdd { key, score, member } => {
                    self.zadd_locked(&key, score, member);
                },
                WriteOp::ZKeepNewest { key, keep } => {
                    let removed =
                        self.zremrangebyrank_locked(&key, 0, -(keep as isize) - 1);
                    if removed > 0 {
                        tracing::trace!("MemoryRtdb: trimmed {} members from '{}'", removed, key);
                    }
                },
            }
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_memory_rtdb_kv_operations() {
        let rtdb = MemoryRtdb::new();

        rtdb.set("test:key", Bytes::from("value")).await.unwrap();
        let value = rtdb.get("test:key").await.unwrap();
        assert_eq!(value, Some(Bytes::from("value")));

        assert!(rtdb.exists("test:key").await.unwrap());
        assert!(!rtdb.exists("nonexistent").await.unwrap());

        assert!(rtdb.del("test:key").await.unwrap());
        assert!(!rtdb.exists("test:key").await.unwrap());
        assert!(!rtdb.del("nonexistent").await.unwrap());
    }

    #[tokio::test]
    async fn test_memory_rtdb_zset_ordering() {
        let rtdb = MemoryRtdb::new();

        rtdb.zadd("test:z", 2.0, Bytes::from("b")).await.unwrap();
        rtdb.zadd("test:z", 1.0, Bytes::from("a")).await.unwrap();
        rtdb.zadd("test:z", 3.0, Bytes::from("c")).await.unwrap();

        let all = rtdb.zrevrange_withscores("test:z", 0, -1).await.unwrap();
        let members: Vec<_> = all.iter().map(|(m, _)| m.clone()).collect();
        assert_eq!(
            members,
            vec![Bytes::from("c"), Bytes::from("b"), Bytes::from("a")]
        );
        assert_eq!(all[0].1, 3.0);
    }

    #[tokio::test]
    async fn test_memory_rtdb_zadd_existing_member_rescored() {
        let rtdb = MemoryRtdb::new();

        rtdb.zadd("test:z", 1.0, Bytes::from("a")).await.unwrap();
        rtdb.zadd("test:z", 5.0, Bytes::from("a")).await.unwrap();

        assert_eq!(rtdb.zcard("test:z").await.unwrap(), 1);
        let all = rtdb.zrevrange_withscores("test:z", 0, -1).await.unwrap();
        assert_eq!(all, vec![(Bytes::from("a"), 5.0)]);
    }

    #[tokio::test]
    async fn test_memory_rtdb_zremrangebyrank() {
        let rtdb = MemoryRtdb::new();
        for i in 0..5 {
            rtdb.zadd("test:z", i as f64, Bytes::from(format!("m{}", i)))
                .await
                .unwrap();
        }

        // Drop the two lowest scores
        let removed = rtdb.zremrangebyrank("test:z", 0, 1).await.unwrap();
        assert_eq!(removed, 2);

        let all = rtdb.zrevrange_withscores("test:z", 0, -1).await.unwrap();
        assert_eq!(all.len(), 3);
        assert_eq!(all.last().unwrap().1, 2.0);
    }

    #[tokio::test]
    async fn test_memory_rtdb_apply_batch() {
        let rtdb = MemoryRtdb::new();

        for i in 0..4 {
            rtdb.apply(vec![
                WriteOp::Set {
                    key: "test:latest".into(),
                    value: Bytes::from(format!("v{}", i)),
                },
                WriteOp::ZAdd {
                    key: "test:history".into(),
                    score: i as f64,
                    member: Bytes::from(format!("v{}", i)),
                },
                WriteOp::ZKeepNewest {
                    key: "test:history".into(),
                    keep: 2,
                },
            ])
            .await
            .unwrap();
        }

        assert_eq!(
            rtdb.get("test:latest").await.unwrap(),
            Some(Bytes::from("v3"))
        );
        let history = rtdb
            .zrevrange_withscores("test:history", 0, -1)
            .await
            .unwrap();
        assert_eq!(
            history,
            vec![(Bytes::from("v3"), 3.0), (Bytes::from("v2"), 2.0)]
        );
    }

    #[tokio::test]
    async fn test_memory_rtdb_clear_and_stats() {
        let rtdb = MemoryRtdb::new();
        rtdb.set("k", Bytes::from("v")).await.unwrap();
        rtdb.zadd("z", 1.0, Bytes::from("m")).await.unwrap();

        let stats = rtdb.stats();
        assert_eq!(stats.kv_count, 1);
        assert_eq!(stats.zset_count, 1);

        rtdb.clear();
        assert_eq!(rtdb.stats().kv_count, 0);
        assert_eq!(rtdb.zcard("z").await.unwrap(), 0);
    }
}
