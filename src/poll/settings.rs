//! Per-operation poll timings
//!
//! Carried on the client configuration so no wait budget lives in a global.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::time::Duration;

/// Delay, spacing and budget of one kind of wait
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PollTiming {
    #[serde(with = "duration_secs")]
    pub delay: Duration,
    #[serde(with = "duration_secs")]
    pub min_interval: Duration,
    #[serde(with = "duration_secs")]
    pub timeout: Duration,
}

impl PollTiming {
    pub const fn from_secs(delay: u64, min_interval: u64, timeout: u64) -> Self {
        Self {
            delay: Duration::from_secs(delay),
            min_interval: Duration::from_secs(min_interval),
            timeout: Duration::from_secs(timeout),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

/// Timings for every asynchronous operation the provider waits on
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollSettings {
    /// VM tasks, IP availability and power state
    pub vm: PollTiming,
    /// Subnet, image, project, role and recovery plan tasks
    pub entity: PollTiming,
    /// Karbon cluster tasks (timeout comes from the resource)
    pub karbon: PollTiming,
    /// Foundation node imaging session
    pub foundation_imaging: PollTiming,
    /// Foundation Central nodes becoming available
    pub fc_node_availability: PollTiming,
    /// Foundation Central cluster imaging
    pub fc_imaging: PollTiming,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            vm: PollTiming::from_secs(3, 3, 60),
            entity: PollTiming::from_secs(10, 3, 10 * 60),
            karbon: PollTiming::from_secs(10, 10, 60 * 60),
            foundation_imaging: PollTiming::from_secs(15 * 60, 5 * 60, 2 * 60 * 60),
            fc_node_availability: PollTiming::from_secs(10, 10, 30 * 60),
            fc_imaging: PollTiming::from_secs(15 * 60, 5 * 60, 4 * 60 * 60),
        }
    }
}

impl PollSettings {
    /// Override the Prism task budgets with the provider-wide wait timeout
    pub fn with_wait_timeout(mut self, minutes: u64) -> Self {
        if minutes > 0 {
            let timeout = Duration::from_secs(minutes * 60);
            self.vm.timeout = timeout;
            self.entity.timeout = timeout;
        }
        self
    }

    /// Every wait collapsed to the same short timing (tests, dry runs)
    pub fn uniform(timing: PollTiming) -> Self {
        Self {
            vm: timing,
            entity: timing,
            karbon: timing,
            foundation_imaging: timing,
            fc_node_availability: timing,
            fc_imaging: timing,
        }
    }
}

mod duration_secs {
    use super::*;

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(value.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(deserializer)?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(serde::de::Error::custom("duration must be a non-negative number of seconds"));
        }
        Ok(Duration::from_secs_f64(secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wait_timeout_overrides_prism_budgets_only() {
        let settings = PollSettings::default().with_wait_timeout(5);
        assert_eq!(settings.vm.timeout, Duration::from_secs(300));
        assert_eq!(settings.entity.timeout, Duration::from_secs(300));
        assert_eq!(settings.karbon.timeout, Duration::from_secs(3600));
    }

    #[test]
    fn test_zero_wait_timeout_keeps_defaults() {
        assert_eq!(PollSettings::default().with_wait_timeout(0), PollSettings::default());
    }

    #[test]
    fn test_timing_deserializes_fractional_seconds() {
        let timing: PollTiming =
            serde_json::from_str(r#"{"delay": 0.05, "min_interval": 0.01, "timeout": 2}"#).unwrap();
        assert_eq!(timing.delay, Duration::from_millis(50));
        assert_eq!(timing.timeout, Duration::from_secs(2));
    }

    #[test]
    fn test_partial_settings_fill_defaults() {
        let settings: PollSettings =
            serde_json::from_str(r#"{"vm": {"delay": 1, "min_interval": 1, "timeout": 30}}"#)
                .unwrap();
        assert_eq!(settings.vm.timeout, Duration::from_secs(30));
        assert_eq!(settings.entity, PollSettings::default().entity);
    }

    #[test]
    fn test_negative_duration_rejected() {
        let result: Result<PollTiming, _> =
            serde_json::from_str(r#"{"delay": -1, "min_interval": 0, "timeout": 1}"#);
        assert!(result.is_err());
    }
}
