use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

use crate::error::{ThrottleError, ThrottleResult};

/// Runtime configuration of the throttling core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ThrottleConfig {
    /// Bucket capacity and per-minute refill target.
    #[validate(range(min = 1))]
    pub rate_per_minute: u32,

    /// Hard cap on pending work items.
    #[validate(range(min = 1))]
    pub max_queue_size: u32,

    /// Period between refill ticks.
    #[validate(range(min = 1))]
    pub refill_interval_ms: u64,
}

impl Default for ThrottleConfig {
    fn default() -> Self {
        Self {
            rate_per_minute: 100,
            max_queue_size: 1000,
            refill_interval_ms: 1000,
        }
    }
}

impl ThrottleConfig {
    pub fn new(
        rate_per_minute: u32,
        max_queue_size: u32,
        refill_interval_ms: u64,
    ) -> ThrottleResult<Self> {
        let config = Self {
            rate_per_minute,
            max_queue_size,
            refill_interval_ms,
        };
        config.check()?;
        Ok(config)
    }

    pub fn check(&self) -> ThrottleResult<()> {
        self.validate()
            .map_err(|e| ThrottleError::InvalidConfig(e.to_string()))
    }

    pub fn refill_interval(&self) -> Duration {
        Duration::from_millis(self.refill_interval_ms)
    }

    /// Merges a partial update, leaving absent fields untouched.
    pub fn merged(&self, update: &ConfigUpdate) -> Self {
        Self {
            rate_per_minute: update.rate_per_minute.unwrap_or(self.rate_per_minute),
            max_queue_size: update.max_queue_size.unwrap_or(self.max_queue_size),
            refill_interval_ms: update.refill_interval_ms.unwrap_or(self.refill_interval_ms),
        }
    }
}

/// Partial configuration change; every field is independently optional.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct ConfigUpdate {
    #[serde(default)]
    #[validate(range(min = 1))]
    pub rate_per_minute: Option<u32>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub max_queue_size: Option<u32>,

    #[serde(default)]
    #[validate(range(min = 1))]
    pub refill_interval_ms: Option<u64>,
}

impl ConfigUpdate {
    pub fn rate_per_minute(mut self, value: u32) -> Self {
        self.rate_per_minute = Some(value);
        self
    }

    pub fn max_queue_size(mut self, value: u32) -> Self {
        self.max_queue_size = Some(value);
        self
    }

    pub fn refill_interval_ms(mut self, value: u64) -> Self {
        self.refill_interval_ms = Some(value);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.rate_per_minute.is_none()
            && self.max_queue_size.is_none()
            && self.refill_interval_ms.is_none()
    }

    /// Boundary check applied before an update reaches the core.
    pub fn check(&self) -> ThrottleResult<()> {
        if self.is_empty() {
            return Err(ThrottleError::InvalidConfig(
                "No valid configuration parameters provided".to_string(),
            ));
        }
        self.validate()
            .map_err(|e| ThrottleError::Validation(e.to_string()))
    }
}
