//! Monitor runtime: poll loop and reconnection pacing

pub mod monitor;
pub mod reconnect;

pub use monitor::{MonitorContext, MonitorExit, MonitorHandle, MonitorLoop, MonitorState, MonitorStats};
pub use reconnect::BackoffPolicy;
