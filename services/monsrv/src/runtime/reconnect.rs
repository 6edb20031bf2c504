//! Reconnection pacing
//!
//! The monitor loop retries on its own cadence; this policy only decides how
//! long to sleep after a failed iteration. With the default multiplier of 1.0
//! every sleep is exactly `poll_interval`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::{MonSrvError, Result};
use crate::serde_helpers::{bool_false, duration_secs, multiplier_one};

fn default_max_delay() -> Duration {
    Duration::from_secs(60)
}

/// Backoff applied between consecutive failed iterations
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackoffPolicy {
    /// Growth factor per consecutive failure (1.0 = fixed interval)
    #[serde(default = "multiplier_one")]
    pub multiplier: f64,
    /// Upper bound for a single sleep
    #[serde(default = "default_max_delay", with = "duration_secs")]
    pub max_delay: Duration,
    /// Add ±25% jitter to grown delays
    #[serde(default = "bool_false")]
    pub jitter: bool,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            multiplier: 1.0,
            max_delay: default_max_delay(),
            jitter: false,
        }
    }
}

impl BackoffPolicy {
    /// Exponential policy without jitter
    pub fn exponential(multiplier: f64, max_delay: Duration) -> Self {
        Self {
            multiplier,
            max_delay,
            jitter: false,
        }
    }

    /// Whether sleeps can differ from the base interval at all
    pub fn is_fixed(&self) -> bool {
        self.multiplier == 1.0 && !self.jitter
    }

    pub fn validate(&self) -> Result<()> {
        if !self.multiplier.is_finite() || self.multiplier < 1.0 {
            return Err(MonSrvError::ConfigError(format!(
                "backoff.multiplier must be a finite value >= 1.0, got {}",
                self.multiplier
            )));
        }
        if self.max_delay.is_zero() {
            return Err(MonSrvError::ConfigError(
                "backoff.max_delay must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }

    /// Sleep before the next iteration after `consecutive_failures` failures
    ///
    /// delay = base * multiplier^(failures - 1), capped at `max_delay` but
    /// never shorter than `base`.
    pub fn delay_after(&self, base: Duration, consecutive_failures: u32) -> Duration {
        if consecutive_failures == 0 || self.is_fixed() {
            return base;
        }

        let ceiling = self.max_delay.max(base);
        let exponent = consecutive_failures.saturating_sub(1).min(63) as i32;
        let factor = self.multiplier.powi(exponent);
        let mut delay = Duration::try_from_secs_f64(base.as_secs_f64() * factor)
            .unwrap_or(ceiling)
            .min(ceiling);

        // Add jitter (±25% of delay)
        if self.jitter {
            let jitter_range = delay.as_secs_f64() * 0.25;
            if jitter_range > 0.0 {
                let jitter = rand::thread_rng().gen_range(-jitter_range..jitter_range);
                delay = Duration::from_secs_f64((delay.as_secs_f64() + jitter).max(0.0));
            }
        }

        delay
    }
}
