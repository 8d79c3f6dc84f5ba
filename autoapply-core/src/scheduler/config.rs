use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::job::{DEFAULT_MAX_RETRIES, DEFAULT_PRIORITY};
use crate::error::{Result, SchedulerError};

/// Knobs that tune the dispatcher, the worker pool and shutdown.
///
/// All fields carry defaults so a deployment only overrides what it needs.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of workers started with the scheduler.
    pub pool_size: usize,
    /// Capacity of the in-memory delivery channel.
    pub channel_capacity: usize,
    /// Sleep between dispatcher polling cycles (ms).
    pub poll_interval_ms: u64,
    /// Claiming stops once `processing` jobs reach `pool_size * inflight_multiple`.
    pub inflight_multiple: f64,
    /// How long a worker blocks on the channel before re-checking shutdown (ms).
    pub receive_timeout_ms: u64,
    /// Extra grace given to the dispatcher on stop, on top of one poll interval (ms).
    pub dispatcher_join_grace_ms: u64,
    /// Bounded wait for each worker on stop before it is aborted (ms).
    pub worker_join_timeout_ms: u64,
    /// Priority for submissions that do not carry one.
    pub default_priority: i32,
    /// Retry ceiling for submissions that do not carry one.
    pub default_max_retries: u32,
    /// Bounded retries for a claim that hits a serialization conflict.
    pub claim_conflict_retries: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            pool_size: 4,
            channel_capacity: 8,
            poll_interval_ms: 5_000,
            inflight_multiple: 1.5,
            receive_timeout_ms: 1_000,
            dispatcher_join_grace_ms: 2_000,
            worker_join_timeout_ms: 10_000,
            default_priority: DEFAULT_PRIORITY,
            default_max_retries: DEFAULT_MAX_RETRIES,
            claim_conflict_retries: 3,
        }
    }
}

impl SchedulerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(SchedulerError::InvalidConfig(
                "pool_size must be at least 1".into(),
            ));
        }
        if self.channel_capacity == 0 {
            return Err(SchedulerError::InvalidConfig(
                "channel_capacity must be at least 1".into(),
            ));
        }
        if !(self.inflight_multiple.is_finite() && self.inflight_multiple > 0.0) {
            return Err(SchedulerError::InvalidConfig(format!(
                "inflight_multiple must be positive, got {}",
                self.inflight_multiple
            )));
        }
        if self.inflight_ceiling() == 0 {
            return Err(SchedulerError::InvalidConfig(format!(
                "pool_size ({}) * inflight_multiple ({}) admits no jobs in flight",
                self.pool_size, self.inflight_multiple
            )));
        }
        if self.receive_timeout_ms == 0 {
            return Err(SchedulerError::InvalidConfig(
                "receive_timeout_ms must be non-zero".into(),
            ));
        }
        Ok(())
    }

    /// Smallest `processing` count at which claiming pauses.
    ///
    /// Claiming stops once `in_flight >= pool_size * inflight_multiple`. For
    /// an integer count that is the product rounded up, so `3 * 1.5` pauses
    /// at 5, not 4.
    pub fn inflight_ceiling(&self) -> u64 {
        let product = self.pool_size as f64 * self.inflight_multiple;
        if !(product.is_finite() && product > 0.0) {
            return 0;
        }
        product.ceil() as u64
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_millis(self.receive_timeout_ms)
    }

    pub fn dispatcher_join_timeout(&self) -> Duration {
        self.poll_interval() + Duration::from_millis(self.dispatcher_join_grace_ms)
    }

    pub fn worker_join_timeout(&self) -> Duration {
        Duration::from_millis(self.worker_join_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = SchedulerConfig::default();
        assert_eq!(config.pool_size, 4);
        assert_eq!(config.channel_capacity, 8);
        assert_eq!(config.inflight_ceiling(), 6);
        assert_eq!(config.dispatcher_join_timeout(), Duration::from_secs(7));
        config.validate().expect("defaults are valid");
    }

    #[test]
    fn validate_rejects_empty_pool() {
        let config = SchedulerConfig {
            pool_size: 0,
            ..SchedulerConfig::default()
        };
        assert!(matches!(
            config.validate(),
            Err(SchedulerError::InvalidConfig(_))
        ));
    }

    #[test]
    fn validate_rejects_non_positive_multiple() {
        let config = SchedulerConfig {
            inflight_multiple: 0.0,
            ..SchedulerConfig::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn fractional_ceiling_rounds_up() {
        let config = SchedulerConfig {
            pool_size: 3,
            inflight_multiple: 1.5,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.inflight_ceiling(), 5);

        let small = SchedulerConfig {
            pool_size: 1,
            inflight_multiple: 0.5,
            ..SchedulerConfig::default()
        };
        assert_eq!(small.inflight_ceiling(), 1);
        small.validate().expect("half a worker still admits one job");
    }

    #[test]
    fn tiny_multiple_still_admits_one_job() {
        let config = SchedulerConfig {
            pool_size: 1,
            inflight_multiple: f64::MIN_POSITIVE,
            ..SchedulerConfig::default()
        };
        assert_eq!(config.inflight_ceiling(), 1);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_payload_fills_defaults() {
        let config: SchedulerConfig =
            serde_json::from_value(serde_json::json!({ "pool_size": 2 })).expect("decode");
        assert_eq!(config.pool_size, 2);
        assert_eq!(config.channel_capacity, 8);
    }
}
