//! Configuration types for the monitoring service
//!
//! Everything here is validated before any network activity: invalid values
//! are rejected with a `ConfigError`/`ValidationError`, never clamped.

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use crate::error::{MonSrvError, Result};
use crate::runtime::reconnect::BackoffPolicy;
use crate::serde_helpers::{bool_false, duration_secs};

/// Default Modbus TCP port
pub const DEFAULT_MODBUS_PORT: u16 = 502;
/// Per-request quantity limits enforced by the transport
pub use voltage_modbus::{MAX_READ_COILS, MAX_READ_REGISTERS, MAX_WRITE_REGISTERS};
/// Size of each Modbus address space (0..=65535)
pub const ADDRESS_SPACE: u32 = 65_536;
/// Environment variable prefix, nested keys separated by `__`
pub const ENV_PREFIX: &str = "MONSRV_";

// ============================================================================
// Register definitions
// ============================================================================

/// Modbus data table a register lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum RegisterType {
    /// Read/write 16-bit words (FC03)
    #[default]
    #[serde(rename = "holding")]
    Holding,
    /// Read-only 16-bit words (FC04)
    #[serde(rename = "input")]
    Input,
    /// Read/write bits (FC01)
    #[serde(rename = "coils", alias = "coil")]
    Coil,
    /// Read-only bits (FC02)
    #[serde(rename = "discrete_inputs", alias = "discrete_input")]
    DiscreteInput,
}

impl RegisterType {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Holding => "holding",
            Self::Input => "input",
            Self::Coil => "coils",
            Self::DiscreteInput => "discrete_inputs",
        }
    }

    /// Bit-addressed tables return booleans, word tables return u16
    pub fn is_bit(&self) -> bool {
        matches!(self, Self::Coil | Self::DiscreteInput)
    }

    /// Per-request quantity limit of the matching read function
    pub fn max_count(&self) -> usize {
        if self.is_bit() {
            MAX_READ_COILS
        } else {
            MAX_READ_REGISTERS
        }
    }
}

impl fmt::Display for RegisterType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RegisterType {
    type Err = MonSrvError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "holding" => Ok(Self::Holding),
            "input" => Ok(Self::Input),
            "coils" | "coil" => Ok(Self::Coil),
            "discrete_inputs" | "discrete_input" => Ok(Self::DiscreteInput),
            other => Err(MonSrvError::ValidationError(format!(
                "Register type must be one of holding, input, coils, discrete_inputs; got '{}'",
                other
            ))),
        }
    }
}

fn default_count() -> u16 {
    1
}

/// One contiguous block of registers polled as a single request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegisterDefinition {
    pub address: u16,
    #[serde(default = "default_count")]
    pub count: u16,
    #[serde(rename = "type", default)]
    pub register_type: RegisterType,
    /// Empty names are replaced by `{type}_{address}`
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<f64>,
}

impl RegisterDefinition {
    /// Definition with the default `{type}_{address}` name
    pub fn new(address: u16, count: u16, register_type: RegisterType) -> Self {
        Self {
            address,
            count,
            register_type,
            name: format!("{}_{}", register_type, address),
            scale: None,
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.scale = Some(scale);
        self
    }

    /// Fill in the default name when none was given
    pub fn resolved(mut self) -> Self {
        if self.name.trim().is_empty() {
            self.name = format!("{}_{}", self.register_type, self.address);
        }
        self
    }

    /// Build a definition from unchecked caller input
    pub fn checked(address: u32, count: u32, register_type: RegisterType) -> Result<Self> {
        let address = u16::try_from(address).map_err(|_| {
            MonSrvError::ValidationError(format!("Address {} outside 0..=65535", address))
        })?;
        let count = u16::try_from(count).map_err(|_| {
            MonSrvError::ValidationError(format!(
                "Count {} exceeds the {} limit of {}",
                count,
                register_type,
                register_type.max_count()
            ))
        })?;
        let definition = Self::new(address, count, register_type);
        definition.validate()?;
        Ok(definition)
    }

    pub fn validate(&self) -> Result<()> {
        if self.name.trim().is_empty() {
            return Err(MonSrvError::ValidationError(format!(
                "Register at {} {} has an empty name",
                self.register_type, self.address
            )));
        }
        if self.count == 0 {
            return Err(MonSrvError::ValidationError(format!(
                "Register '{}': count must be at least 1",
                self.name
            )));
        }
        let max = self.register_type.max_count();
        if usize::from(self.count) > max {
            return Err(MonSrvError::ValidationError(format!(
                "Register '{}': count {} exceeds the {} limit of {}",
                self.name, self.count, self.register_type, max
            )));
        }
        if u32::from(self.address) + u32::from(self.count) > ADDRESS_SPACE {
            return Err(MonSrvError::ValidationError(format!(
                "Register '{}': span {}+{} exceeds address space 0..=65535",
                self.name, self.address, self.count
            )));
        }
        if let Some(scale) = self.scale {
            if !scale.is_finite() || scale == 0.0 {
                return Err(MonSrvError::ValidationError(format!(
                    "Register '{}': scale must be finite and non-zero, got {}",
                    self.name, scale
                )));
            }
        }
        Ok(())
    }
}

/// Validate a full register set: every definition plus unique names
pub fn validate_registers(definitions: &[RegisterDefinition]) -> Result<()> {
    let mut names = HashSet::with_capacity(definitions.len());
    for definition in definitions {
        definition.validate()?;
        if !names.insert(definition.name.as_str()) {
            return Err(MonSrvError::ValidationError(format!(
                "Duplicate register name '{}'",
                definition.name
            )));
        }
    }
    Ok(())
}

// ============================================================================
// Connection configuration
// ============================================================================

fn default_host() -> String {
    "127.0.0.1".to_string()
}

fn default_port() -> u16 {
    DEFAULT_MODBUS_PORT
}

fn default_unit_id() -> u8 {
    1
}

fn default_poll_interval() -> Duration {
    Duration::from_secs(2)
}

fn default_timeout() -> Duration {
    Duration::from_secs(3)
}

fn default_lock_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_max_consecutive_errors() -> u32 {
    5
}

/// Device connection and polling cadence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_unit_id")]
    pub unit_id: u8,
    #[serde(default = "default_poll_interval", with = "duration_secs")]
    pub poll_interval: Duration,
    /// Connect and per-request timeout
    #[serde(default = "default_timeout", with = "duration_secs")]
    pub timeout: Duration,
    /// How long writes and ad-hoc reads wait for an in-flight pass
    #[serde(default = "default_lock_timeout", with = "duration_secs")]
    pub lock_timeout: Duration,
    #[serde(default = "default_max_consecutive_errors")]
    pub max_consecutive_errors: u32,
    #[serde(default)]
    pub backoff: BackoffPolicy,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            unit_id: default_unit_id(),
            poll_interval: default_poll_interval(),
            timeout: default_timeout(),
            lock_timeout: default_lock_timeout(),
            max_consecutive_errors: default_max_consecutive_errors(),
            backoff: BackoffPolicy::default(),
        }
    }
}

impl ConnectionConfig {
    /// Validated configuration for `host:port` with default timings
    pub fn new(host: impl Into<String>, port: u16) -> Result<Self> {
        let config = Self {
            host: host.into(),
            port,
            ..Self::default()
        };
        config.validate()?;
        Ok(config)
    }

    /// `host:port` used for connecting and in log messages
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<()> {
        if self.host.trim().is_empty() {
            return Err(MonSrvError::ConfigError("host must not be empty".to_string()));
        }
        if self.port == 0 {
            return Err(MonSrvError::ConfigError(
                "Port must be between 1 and 65535".to_string(),
            ));
        }
        if !(1..=247).contains(&self.unit_id) {
            return Err(MonSrvError::ConfigError(format!(
                "Unit ID must be between 1 and 247, got {}",
                self.unit_id
            )));
        }
        if self.poll_interval.is_zero() {
            return Err(MonSrvError::ConfigError(
                "Poll interval must be greater than 0".to_string(),
            ));
        }
        if self.timeout.is_zero() {
            return Err(MonSrvError::ConfigError(
                "Timeout must be greater than 0".to_string(),
            ));
        }
        if self.lock_timeout.is_zero() {
            return Err(MonSrvError::ConfigError(
                "Lock timeout must be greater than 0".to_string(),
            ));
        }
        if self.max_consecutive_errors == 0 {
            return Err(MonSrvError::ConfigError(
                "max_consecutive_errors must be at least 1".to_string(),
            ));
        }
        self.backoff.validate()
    }
}

// ============================================================================
// Storage / logging
// ============================================================================

/// Time-series backend selection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    Redis,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_history_limit() -> usize {
    1000
}

fn default_latest_key() -> String {
    "modbus:latest".to_string()
}

fn default_history_key() -> String {
    "modbus:history".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub backend: StorageBackend,
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    /// History retention (entries kept after every store)
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
    #[serde(default = "default_latest_key")]
    pub latest_key: String,
    #[serde(default = "default_history_key")]
    pub history_key: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            backend: StorageBackend::default(),
            redis_url: default_redis_url(),
            history_limit: default_history_limit(),
            latest_key: default_latest_key(),
            history_key: default_history_key(),
        }
    }
}

impl StorageConfig {
    pub fn validate(&self) -> Result<()> {
        if self.history_limit == 0 {
            return Err(MonSrvError::ConfigError(
                "storage.history_limit must be at least 1".to_string(),
            ));
        }
        if self.latest_key.is_empty() || self.history_key.is_empty() {
            return Err(MonSrvError::ConfigError(
                "storage keys must not be empty".to_string(),
            ));
        }
        if self.latest_key == self.history_key {
            return Err(MonSrvError::ConfigError(
                "storage.latest_key and storage.history_key must differ".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Emit JSON lines instead of the human format
    #[serde(default = "bool_false")]
    pub json: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// ============================================================================
// Service configuration
// ============================================================================

fn default_registers() -> Vec<RegisterDefinition> {
    vec![RegisterDefinition::new(1, 26, RegisterType::Holding)]
}

/// Complete service configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MonsrvConfig {
    #[serde(default)]
    pub connection: ConnectionConfig,
    #[serde(default = "default_registers")]
    pub registers: Vec<RegisterDefinition>,
    #[serde(default)]
    pub storage: StorageConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl Default for MonsrvConfig {
    fn default() -> Self {
        Self {
            connection: ConnectionConfig::default(),
            registers: default_registers(),
            storage: StorageConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl MonsrvConfig {
    /// Load defaults → YAML file (if present) → `MONSRV_*` environment
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Serialized::defaults(MonsrvConfig::default()))
                .merge(Yaml::file(path.as_ref()))
                .merge(Env::prefixed(ENV_PREFIX).split("__")),
        )
    }

    /// Extract, resolve default register names and validate
    pub fn from_figment(figment: Figment) -> Result<Self> {
        let mut config: MonsrvConfig = figment.extract()?;
        config.registers = config
            .registers
            .into_iter()
            .map(RegisterDefinition::resolved)
            .collect();
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.connection.validate()?;
        validate_registers(&self.registers)?;
        self.storage.validate()
    }
}
