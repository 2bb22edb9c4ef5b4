use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::throttler::ThrottleStatus;

/// Status plus derived utilisation figures, in percent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThrottleMetrics {
    #[serde(flatten)]
    pub status: ThrottleStatus,
    pub utilization_rate: f64,
    pub queue_utilization_rate: f64,
    pub success_rate: f64,
    pub timestamp: u64,
}

impl ThrottleMetrics {
    pub fn from_status(status: ThrottleStatus) -> Self {
        let utilization_rate = if status.max_tokens > 0 {
            let used = status.max_tokens.saturating_sub(status.current_tokens);
            f64::from(used) / f64::from(status.max_tokens) * 100.0
        } else {
            0.0
        };

        let queue_utilization_rate = if status.max_queue_size > 0 {
            status.queue_size as f64 / f64::from(status.max_queue_size) * 100.0
        } else {
            0.0
        };

        let attempts = status.processed_count + status.rejected_count;
        let success_rate = if attempts > 0 {
            status.processed_count as f64 / attempts as f64 * 100.0
        } else {
            100.0
        };

        Self {
            status,
            utilization_rate: round2(utilization_rate),
            queue_utilization_rate: round2(queue_utilization_rate),
            success_rate: round2(success_rate),
            timestamp: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_secs(),
        }
    }
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
