use crate::config::Config;
use crate::handlers::{
    clear_queue, get_config, get_metrics, get_status, health_check, update_config, AppState,
};
use crate::throttler::Throttler;
use axum::routing::{delete, get};
use axum::Router;
use std::net::SocketAddr;
use tokio::signal;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

/// Operational routes over a shared throttler.
pub fn create_app(throttler: Throttler) -> Router {
    Router::new()
        .route("/throttling/status", get(get_status))
        .route("/throttling/config", get(get_config).put(update_config))
        .route("/throttling/queue", delete(clear_queue))
        .route("/throttling/metrics", get(get_metrics))
        .route("/health", get(health_check))
        .with_state(AppState::new(throttler))
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(CorsLayer::permissive()),
        )
}

pub struct Server {
    app: Router,
    bind_addr: SocketAddr,
    throttler: Throttler,
}

impl Server {
    pub fn new(config: &Config, throttler: Throttler) -> Self {
        Self {
            app: create_app(throttler.clone()),
            bind_addr: config.bind_addr,
            throttler,
        }
    }

    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let listener = tokio::net::TcpListener::bind(self.bind_addr).await?;

        tracing::info!("Payroll throttle server starting on {}", self.bind_addr);
        tracing::info!("Throttling status available at /throttling/status");

        axum::serve(listener, self.app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        self.throttler.stop();
        tracing::info!("Server stopped, pending transactions rejected");
        Ok(())
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("failed to install Ctrl+C handler: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::error!("failed to install signal handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        },
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        },
    }
}
