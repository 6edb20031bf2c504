//! Concurrent read pass over a catalog snapshot

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

use super::connection::{ConnectionManager, SessionRequest, SessionResponse};
use crate::catalog::Snapshot;
use crate::config::{RegisterDefinition, RegisterType};
use crate::error::{MonSrvError, Result};

/// A single register value: 16-bit word or bit
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RegisterValue {
    Word(u16),
    Bit(bool),
}

impl RegisterValue {
    pub fn as_word(&self) -> Option<u16> {
        match self {
            Self::Word(v) => Some(*v),
            Self::Bit(_) => None,
        }
    }

    pub fn as_bit(&self) -> Option<bool> {
        match self {
            Self::Bit(v) => Some(*v),
            Self::Word(_) => None,
        }
    }
}

/// Outcome of one successful register read
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadResult {
    pub name: String,
    pub address: u16,
    #[serde(rename = "type")]
    pub register_type: RegisterType,
    pub values: Vec<RegisterValue>,
    /// Engineering values, present when the definition has a scale
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scaled: Option<Vec<f64>>,
    pub timestamp: DateTime<Utc>,
}

impl ReadResult {
    fn from_response(
        definition: &RegisterDefinition,
        response: SessionResponse,
        timestamp: DateTime<Utc>,
    ) -> Result<Self> {
        let values: Vec<RegisterValue> = match (definition.register_type.is_bit(), response) {
            (false, SessionResponse::Words(words)) => {
                words.into_iter().map(RegisterValue::Word).collect()
            },
            (true, SessionResponse::Bits(bits)) => {
                bits.into_iter().map(RegisterValue::Bit).collect()
            },
            (_, other) => {
                return Err(MonSrvError::ProtocolError(format!(
                    "Unexpected response for {} read: {:?}",
                    definition.register_type, other
                )))
            },
        };

        // Bit reads come back padded to whole bytes
        let expected = usize::from(definition.count);
        if values.len() < expected {
            return Err(MonSrvError::ProtocolError(format!(
                "Short response for '{}': expected {} values, got {}",
                definition.name,
                expected,
                values.len()
            )));
        }
        let mut values = values;
        values.truncate(expected);

        let scaled = definition.scale.filter(|_| !definition.register_type.is_bit()).map(
            |scale| {
                values
                    .iter()
                    .filter_map(RegisterValue::as_word)
                    .map(|raw| f64::from(raw) * scale)
                    .collect()
            },
        );

        Ok(Self {
            name: definition.name.clone(),
            address: definition.address,
            register_type: definition.register_type,
            values,
            scaled,
            timestamp,
        })
    }
}

/// Executes read passes through the shared connection
#[derive(Debug, Clone)]
pub struct PollExecutor {
    connection: Arc<ConnectionManager>,
}

impl PollExecutor {
    pub fn new(connection: Arc<ConnectionManager>) -> Self {
        Self { connection }
    }

    /// Read one definition
    pub async fn read_one(&self, definition: &RegisterDefinition) -> Result<ReadResult> {
        let response = self
            .connection
            .execute(SessionRequest::Read {
                register_type: definition.register_type,
                address: definition.address,
                count: definition.count,
            })
            .await?;
        ReadResult::from_response(definition, response, Utc::now())
    }

    /// Read every definition concurrently, keeping snapshot order
    ///
    /// Failed reads are logged and left out; the pass itself never fails.
    pub async fn read_all(&self, snapshot: &Snapshot) -> Vec<ReadResult> {
        if snapshot.is_empty() {
            return Vec::new();
        }

        let outcomes = join_all(snapshot.iter().map(|definition| self.read_one(definition))).await;

        let mut results = Vec::with_capacity(outcomes.len());
        for (definition, outcome) in snapshot.iter().zip(outcomes) {
            match outcome {
                Ok(result) => results.push(result),
                Err(e) => warn!(
                    "Failed to read '{}' ({} @ {}, count {}): {}",
                    definition.name, definition.register_type, definition.address, definition.count, e
                ),
            }
        }

        debug!(
            "Read pass complete: {}/{} registers",
            results.len(),
            snapshot.len()
        );
        results
    }
}
