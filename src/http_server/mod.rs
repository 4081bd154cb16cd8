//! # HTTP Server
//!
//! Axum router over the auth, user, group and admin routes, with the
//! guard chain from [`guards`] and fixed-window rate limiting.

pub mod admin_routes;
pub mod auth_routes;
pub mod errors;
pub mod group_routes;
pub mod guards;
pub mod rate_limit;
pub mod state;
pub mod user_routes;

#[cfg(test)]
pub(crate) mod test_support;

use std::net::SocketAddr;
use std::time::Duration;

use axum::http::{header, HeaderValue, Method, StatusCode};
use axum::middleware::from_fn_with_state;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use serde::Serialize;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use errors::{ApiError, ApiResult, ErrorResponse, ServerError};
pub use guards::{AuthContext, GroupContext};
pub use state::AppState;

use crate::config::AppConfig;

/// How often expired sessions, OAuth states and rate windows are dropped
const PURGE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

/// GET /health
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

/// Run CPU-bound work such as password hashing off the async workers
pub(crate) async fn run_blocking<T, E, F>(work: F) -> ApiResult<T>
where
    F: FnOnce() -> Result<T, E> + Send + 'static,
    T: Send + 'static,
    E: Into<ApiError> + Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| ApiError::Internal(format!("Blocking task failed: {}", e)))?
        .map_err(Into::into)
}

async fn not_found() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(ErrorResponse {
            error: "Route not found".to_string(),
            code: "NOT_FOUND",
            status: 404,
        }),
    )
}

/// All routes with the global rate limit and request tracing
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .merge(auth_routes::auth_routes(state.clone()))
        .merge(user_routes::user_routes(state.clone()))
        .merge(group_routes::group_routes(state.clone()))
        .merge(admin_routes::admin_routes(state.clone()))
        .fallback(not_found)
        .layer(from_fn_with_state(state, rate_limit::global_rate_limit))
        .layer(TraceLayer::new_for_http())
}

fn cors_layer(origins: &[String]) -> Option<CorsLayer> {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|o| match HeaderValue::from_str(o) {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(origin = %o, "ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    if origins.is_empty() {
        return None;
    }

    Some(
        CorsLayer::new()
            .allow_origin(origins)
            .allow_credentials(true)
            .allow_methods([Method::GET, Method::POST, Method::PUT, Method::PATCH, Method::DELETE])
            .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION]),
    )
}

pub struct HttpServer {
    config: AppConfig,
    state: AppState,
}

impl HttpServer {
    pub fn new(config: AppConfig) -> Result<Self, ServerError> {
        let state = AppState::from_config(&config)?;
        Ok(Self { config, state })
    }

    pub fn state(&self) -> &AppState {
        &self.state
    }

    pub fn router(&self) -> Router {
        let router = build_router(self.state.clone());
        match cors_layer(&self.config.server.cors_origins) {
            Some(cors) => router.layer(cors),
            None => router,
        }
    }

    /// Serve until SIGINT or SIGTERM
    pub async fn start(self) -> Result<(), ServerError> {
        let bind = format!("{}:{}", self.config.server.host, self.config.server.port);
        let addr: SocketAddr = bind.parse().map_err(|_| ServerError::Address(bind.clone()))?;
        let listener = TcpListener::bind(addr).await?;

        let purge_state = self.state.clone();
        let purge = tokio::spawn(async move {
            let mut interval = tokio::time::interval(PURGE_INTERVAL);
            loop {
                interval.tick().await;
                purge_state.purge_expired();
            }
        });

        tracing::info!(
            %addr,
            fail_closed = self.state.security.fail_closed_mode,
            rate_limit = self.state.rate_limits.enabled,
            "groupgate listening"
        );
        let app = self.router();
        let result = axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
            .with_graceful_shutdown(shutdown_signal())
            .await;

        purge.abort();
        tracing::info!("server stopped");
        result.map_err(ServerError::from)
    }
}

async fn shutdown_signal() {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
            (Ok(mut sigterm), Ok(mut sigint)) => {
                tokio::select! {
                    _ = sigterm.recv() => {}
                    _ = sigint.recv() => {}
                }
            }
            _ => {
                tracing::warn!("could not register signal handlers, falling back to ctrl-c");
                let _ = tokio::signal::ctrl_c().await;
            }
        }
    }
    #[cfg(not(unix))]
    {
        let _ = tokio::signal::ctrl_c().await;
    }
    tracing::info!("shutdown signal received");
}
