//! Shared Serde helpers
//!
//! Durations in configuration are written as (fractional) seconds, the same
//! way operators already express `poll_interval: 2.0` and `timeout: 3.0`.

// ============================================================================
// Default Value Functions (for serde #[serde(default = "...")] attributes)
// ============================================================================

/// Default value: false
pub fn bool_false() -> bool {
    false
}

/// Default backoff multiplier: 1.0 (fixed interval)
pub fn multiplier_one() -> f64 {
    1.0
}

// ============================================================================
// Duration as seconds
// ============================================================================

/// `#[serde(with = "duration_secs")]` for `std::time::Duration`
pub mod duration_secs {
    use serde::{de::Error, Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let secs = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(secs)
            .map_err(|e| D::Error::custom(format!("invalid duration {}s: {}", secs, e)))
    }
}

#[cfg(test)]
#[allow(clippy::disallowed_methods)] // Test code - unwrap is acceptable
mod tests {
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Holder {
        #[serde(with = "super::duration_secs")]
        interval: Duration,
    }

    #[test]
    fn test_duration_secs_fractional() {
        let holder: Holder = serde_json::from_str(r#"{"interval": 0.25}"#).unwrap();
        assert_eq!(holder.interval, Duration::from_millis(250));

        let json = serde_json::to_string(&holder).unwrap();
        assert_eq!(json, r#"{"interval":0.25}"#);
    }

    #[test]
    fn test_duration_secs_rejects_negative() {
        let result: Result<Holder, _> = serde_json::from_str(r#"{"interval": -1.0}"#);
        assert!(result.is_err());
    }
}
