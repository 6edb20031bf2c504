//! Field device protocols

pub mod modbus;
