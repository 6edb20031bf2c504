//! Holding register writes (FC06 / FC16)
//!
//! Arguments are validated before anything touches the network. Transport
//! failures are logged and reported as `Ok(false)`; only invalid arguments
//! and a busy device surface as errors.

use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::connection::{ConnectionManager, SessionRequest};
use crate::config::{ADDRESS_SPACE, MAX_WRITE_REGISTERS};
use crate::error::{MonSrvError, Result};

fn check_address(address: u32) -> Result<u16> {
    u16::try_from(address).map_err(|_| {
        MonSrvError::ValidationError(format!(
            "Address {} outside 0..={}",
            address,
            ADDRESS_SPACE - 1
        ))
    })
}

fn check_value(value: i64) -> Result<u16> {
    u16::try_from(value).map_err(|_| {
        MonSrvError::ValidationError(format!(
            "Value {} does not fit a 16-bit register (0..=65535)",
            value
        ))
    })
}

#[derive(Debug, Clone)]
pub struct RegisterWriter {
    connection: Arc<ConnectionManager>,
    lock_timeout: Duration,
}

impl RegisterWriter {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        let lock_timeout = connection.config().lock_timeout;
        Self {
            connection,
            lock_timeout,
        }
    }

    /// Write one holding register
    pub async fn write_single(&self, address: u32, value: i64) -> Result<bool> {
        let address = check_address(address)?;
        let value = check_value(value)?;

        if !self.connection.is_connected() {
            warn!("Cannot write register {}: not connected", address);
            return Ok(false);
        }

        let _operation = self.connection.begin_operation(self.lock_timeout).await?;
        match self
            .connection
            .execute(SessionRequest::WriteSingle { address, value })
            .await
        {
            Ok(_) => {
                info!(
                    "Wrote holding register {} = {} (0x{:04X})",
                    address, value, value
                );
                Ok(true)
            },
            Err(e) => {
                warn!("Failed to write holding register {}: {}", address, e);
                Ok(false)
            },
        }
    }

    /// Write a contiguous block of holding registers
    pub async fn write_multiple(&self, address: u32, values: &[i64]) -> Result<bool> {
        let start = check_address(address)?;
        if values.is_empty() {
            return Err(MonSrvError::ValidationError(
                "At least one value is required".to_string(),
            ));
        }
        if values.len() > MAX_WRITE_REGISTERS {
            return Err(MonSrvError::ValidationError(format!(
                "{} values exceed the limit of {} per request",
                values.len(),
                MAX_WRITE_REGISTERS
            )));
        }
        if u32::from(start) + values.len() as u32 > ADDRESS_SPACE {
            return Err(MonSrvError::ValidationError(format!(
                "Span {}+{} exceeds address space",
                start,
                values.len()
            )));
        }
        let words = values
            .iter()
            .map(|v| check_value(*v))
            .collect::<Result<Vec<u16>>>()?;

        if !self.connection.is_connected() {
            warn!("Cannot write registers at {}: not connected", start);
            return Ok(false);
        }

        let _operation = self.connection.begin_operation(self.lock_timeout).await?;
        let count = words.len();
        let rendered = words
            .iter()
            .map(|w| format!("{} (0x{:04X})", w, w))
            .collect::<Vec<_>>()
            .join(", ");

        match self
            .connection
            .execute(SessionRequest::WriteMultiple {
                address: start,
                values: words,
            })
            .await
        {
            Ok(_) => {
                info!(
                    "Wrote {} holding registers from {}: [{}]",
                    count, start, rendered
                );
                Ok(true)
            },
            Err(e) => {
                warn!(
                    "Failed to write {} holding registers from {}: {}",
                    count, start, e
                );
                Ok(false)
            },
        }
    }
}
