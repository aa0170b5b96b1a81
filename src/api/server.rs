//! API Server

use super::{
    handlers::AppState,
    middleware::{create_cors_layer, request_id_middleware},
    routes::create_router,
    websocket::ConnectionBroadcaster,
};
use crate::config::ApiConfig;
use crate::hall::BingoHall;
use crate::metrics::HallMetrics;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::signal;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};
use tracing::{info, warn};

/// Router with the full middleware stack
pub fn build_app(state: Arc<AppState>, config: &ApiConfig) -> axum::Router {
    create_router(state)
        // Request ID middleware (first for tracing)
        .layer(axum::middleware::from_fn(request_id_middleware))
        // CORS layer (before timeout to handle preflight)
        .layer(create_cors_layer(&config.allowed_origins))
        .layer(TimeoutLayer::new(Duration::from_secs(config.request_timeout_secs)))
        .layer(TraceLayer::new_for_http())
}

pub struct ApiServer {
    config: ApiConfig,
    state: Arc<AppState>,
}

impl ApiServer {
    pub fn new(
        config: ApiConfig,
        hall: Arc<BingoHall>,
        broadcaster: Arc<ConnectionBroadcaster>,
        metrics: Option<Arc<HallMetrics>>,
    ) -> Self {
        let state = Arc::new(AppState {
            hall,
            broadcaster,
            metrics,
            version: env!("CARGO_PKG_VERSION").to_string(),
        });
        Self { config, state }
    }

    /// Serve until Ctrl+C or SIGTERM
    pub async fn run(self) -> Result<(), Box<dyn std::error::Error>> {
        let app = build_app(self.state.clone(), &self.config);
        let addr = self.get_socket_addr()?;

        let listener = tokio::net::TcpListener::bind(addr).await?;
        info!("🌐 Bingo hall API listening on http://{}", addr);
        self.log_server_info();

        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;

        info!("🛑 API Server stopped gracefully");
        Ok(())
    }

    fn get_socket_addr(&self) -> Result<SocketAddr, Box<dyn std::error::Error>> {
        Ok(SocketAddr::from((
            self.config.host.parse::<std::net::IpAddr>()?,
            self.config.port,
        )))
    }

    fn log_server_info(&self) {
        info!("   CORS: {:?}", self.config.allowed_origins);
        info!("   Request timeout: {}s", self.config.request_timeout_secs);
        info!("   Metrics enabled: {}", self.state.metrics.is_some());
        if self.state.hall.config().api.session_secret.is_none() {
            warn!("⚠️  No session secret: /ws trusts the user_id it is given");
        }
        info!("📊 Available endpoints:");
        info!("   GET  /health, /jackpot, /treasury, /metrics");
        info!("   GET  /games, /games/:id, /games/:id/fairness, /games/:id/draws/:index/verify");
        info!("   POST /games, /games/:id/start, /games/:id/draw, /games/:id/stop, /games/:id/cards");
        info!("   GET  /ws?user_id=...&token=...  - player socket");
    }
}

/// Wait for shutdown signal
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }
}
