//! Modbus Monitoring Service (monsrv)
//!
//! Keeps a live connection to one Modbus TCP device, polls a configurable
//! register catalog on a fixed cadence and persists each pass as "latest" plus
//! a bounded history.
//!
//! ```text
//! RegisterCatalog ──snapshot──► MonitorLoop ──results──► TimeSeriesSink
//!                                   │                    (memory / redis)
//!                                   ▼ read_all
//! RegisterWriter ──────────► ConnectionManager ──► voltage_modbus (TCP)
//! ```
//!
//! [`service::MonitorService`] ties the pieces together for a calling layer.

pub mod catalog;
pub mod config;
pub mod error;
pub mod protocols;
pub mod runtime;
pub mod serde_helpers;
pub mod service;
pub mod storage;
pub mod test_utils;

pub use catalog::{RegisterCatalog, Snapshot};
pub use config::{
    ConnectionConfig, LoggingConfig, MonsrvConfig, RegisterDefinition, RegisterType,
    StorageBackend, StorageConfig,
};
pub use error::{MonSrvError, Result};
pub use protocols::modbus::{ReadResult, RegisterValue};
pub use runtime::{BackoffPolicy, MonitorState, MonitorStats};
pub use service::MonitorService;
pub use storage::{RtdbSink, StoredSnapshot, TimeSeriesSink};

/// Service name used in logs
pub const SERVICE_NAME: &str = "monsrv";
/// Crate version
pub const SERVICE_VERSION: &str = env!("CARGO_PKG_VERSION");
