use anyhow::Result;
use clap::Parser;
use payroll_throttle::config::Config;
use payroll_throttle::registry::ThrottlerRegistry;
use payroll_throttle::server::Server;
use std::net::SocketAddr;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command line overrides for the environment configuration
#[derive(Debug, Parser)]
#[command(name = "payroll-throttle", version, about)]
struct Cli {
    #[arg(long)]
    bind_addr: Option<SocketAddr>,

    #[arg(long)]
    rate_per_minute: Option<u32>,

    #[arg(long)]
    max_queue_size: Option<u32>,

    #[arg(long)]
    refill_interval_ms: Option<u64>,

    #[arg(long)]
    log_level: Option<String>,
}

impl Cli {
    fn apply(self, mut config: Config) -> Config {
        if let Some(bind_addr) = self.bind_addr {
            config.bind_addr = bind_addr;
        }
        if let Some(rate) = self.rate_per_minute {
            config.rate_per_minute = rate;
        }
        if let Some(max_queue_size) = self.max_queue_size {
            config.max_queue_size = max_queue_size;
        }
        if let Some(interval) = self.refill_interval_ms {
            config.refill_interval_ms = interval;
        }
        if let Some(level) = self.log_level {
            config.log_level = level;
        }
        config
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenv::dotenv().ok();

    let config = Config::from_env()
        .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;
    let config = Cli::parse().apply(config);

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                format!("payroll_throttle={},tower_http=debug", config.log_level).into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting payroll throttle service");
    tracing::info!(
        "Configuration: bind_addr={}, rate_per_minute={}, max_queue_size={}, refill_interval_ms={}",
        config.bind_addr,
        config.rate_per_minute,
        config.max_queue_size,
        config.refill_interval_ms
    );

    let registry = ThrottlerRegistry::with_event_capacity(config.event_channel_capacity);
    let throttler = registry.get_instance(Some(config.throttle_config()?))?;

    let server = Server::new(&config, throttler);
    server
        .run()
        .await
        .map_err(|e| anyhow::anyhow!("Server error: {}", e))?;

    registry.reset_instance();
    Ok(())
}
