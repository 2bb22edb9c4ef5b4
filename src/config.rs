use envconfig::Envconfig;
use std::net::SocketAddr;

use crate::error::ThrottleResult;
use crate::throttle_config::ThrottleConfig;

#[derive(Debug, Envconfig, Clone)]
pub struct Config {
    /// Server bind address
    #[envconfig(from = "BIND_ADDR", default = "127.0.0.1:3000")]
    pub bind_addr: SocketAddr,

    /// Transactions admitted per minute
    #[envconfig(from = "THROTTLING_TPM", default = "100")]
    pub rate_per_minute: u32,

    /// Maximum number of queued transactions
    #[envconfig(from = "THROTTLING_MAX_QUEUE_SIZE", default = "1000")]
    pub max_queue_size: u32,

    /// Refill tick period in milliseconds
    #[envconfig(from = "THROTTLING_REFILL_INTERVAL_MS", default = "1000")]
    pub refill_interval_ms: u64,

    /// Buffer size of the throttling event channel
    #[envconfig(from = "EVENT_CHANNEL_CAPACITY", default = "1024")]
    pub event_channel_capacity: usize,

    /// Default log level when RUST_LOG is unset
    #[envconfig(from = "LOG_LEVEL", default = "info")]
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, envconfig::Error> {
        Config::init_from_env()
    }

    /// Validated throttling settings
    pub fn throttle_config(&self) -> ThrottleResult<ThrottleConfig> {
        ThrottleConfig::new(
            self.rate_per_minute,
            self.max_queue_size,
            self.refill_interval_ms,
        )
    }
}
