//! VoltageEMS Realtime Database Abstraction
//!
//! Provides a unified interface for realtime data storage,
//! supporting multiple backends (Redis, in-memory)
//!
//! # Key Components
//!
//! - **Rtdb trait**: Core trait for realtime database operations
//! - **WriteOp**: Batched writes applied atomically by every backend
//! - **TimeProvider**: Timestamp source, swappable for deterministic tests

pub mod traits;

#[cfg(feature = "redis-backend")]
pub mod redis_impl;

pub mod memory_impl;

pub mod time;

// Re-exports
pub use bytes::Bytes;
pub use traits::{Rtdb, WriteOp};

#[cfg(feature = "redis-backend")]
pub use redis_impl::RedisRtdb;

pub use memory_impl::{MemoryRtdb, MemoryStats};

pub use time::{FixedTimeProvider, SteppingTimeProvider, SystemTimeProvider, TimeProvider};
