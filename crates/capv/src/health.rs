use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::get;
use axum::Router;
use capv_controller::Readiness;
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Health server configuration
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Address to listen on
    pub listen_addr: SocketAddr,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            listen_addr: SocketAddr::from(([0, 0, 0, 0], 9440)),
        }
    }
}

/// Liveness and readiness probes for the manager
pub struct HealthServer {
    config: HealthConfig,
    readiness: Readiness,
}

impl HealthServer {
    pub fn new(config: HealthConfig, readiness: Readiness) -> Self {
        Self { config, readiness }
    }

    fn build_router(&self) -> Router {
        Router::new()
            .route("/healthz", get(healthz))
            .route("/livez", get(livez))
            .route("/readyz", get(readyz))
            .layer(TraceLayer::new_for_http())
            .with_state(self.readiness.clone())
    }

    /// Serve until `token` is cancelled
    pub async fn run(self, token: CancellationToken) -> Result<(), std::io::Error> {
        let app = self.build_router();

        info!("Starting health server on {}", self.config.listen_addr);

        let listener = TcpListener::bind(self.config.listen_addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { token.cancelled().await })
            .await
    }
}

async fn healthz() -> &'static str {
    "ok"
}

async fn livez() -> &'static str {
    "ok"
}

/// 503 until the manager's workers are running
async fn readyz(State(readiness): State<Readiness>) -> (StatusCode, &'static str) {
    if readiness.is_ready() {
        (StatusCode::OK, "ok")
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready")
    }
}
