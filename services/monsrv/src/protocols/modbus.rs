//! Modbus TCP orchestration
//!
//! Frame encoding lives in `voltage_modbus`; this module decides when and in
//! which order its read/write primitives run.

pub mod connection;
pub mod poller;
pub mod transport;
pub mod writer;

pub use connection::{ConnectionManager, SessionRequest, SessionResponse};
pub use poller::{PollExecutor, ReadResult, RegisterValue};
pub use transport::{DeviceSession, SessionConnector, TcpConnector};
pub use writer::RegisterWriter;
