//! Dashboard: Axum web server exposing rankings, scans, alerts and the digest.
//!
//! Serves a JSON REST API. CORS enabled for local development.

pub mod routes;

use anyhow::{Context, Result};
use axum::{
    http::{header, HeaderValue, Method},
    routing::{delete, get, post},
    Router,
};
use tokio::task::JoinHandle;
use tower_http::cors::CorsLayer;
use tracing::{error, info};

pub use routes::{AppState, DashboardState};

/// Bind the dashboard port and serve on a background task.
pub async fn spawn_dashboard(state: AppState, port: u16) -> Result<JoinHandle<()>> {
    let app = build_router(state);
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind dashboard port {port}"))?;
    info!(port, "Dashboard server starting on http://localhost:{port}");

    Ok(tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!(error = %e, "Dashboard server error");
        }
    }))
}

/// Build the Axum router with all routes and middleware.
pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(HeaderValue::from_static("*"))
        .allow_methods([Method::GET, Method::POST, Method::DELETE])
        .allow_headers([header::CONTENT_TYPE]);

    Router::new()
        .route("/api/status", get(routes::get_status))
        .route("/api/rankings", get(routes::get_rankings))
        .route("/api/rankings/:market/:direction", get(routes::get_ranking))
        .route("/api/global/:direction", get(routes::get_global_top))
        .route("/api/scan/:market/:direction", post(routes::post_scan))
        .route("/api/scans", get(routes::get_scans))
        .route("/api/scans/progress", get(routes::get_scan_progress))
        .route("/api/signal/:venue/:symbol", get(routes::get_signal))
        .route(
            "/api/alerts",
            get(routes::list_alerts).post(routes::create_alert),
        )
        .route("/api/alerts/:id", delete(routes::delete_alert))
        .route("/api/digest/subscribers", get(routes::list_subscribers))
        .route(
            "/api/digest/subscribers/:chat",
            post(routes::subscribe).delete(routes::unsubscribe),
        )
        .route("/api/digest/send", post(routes::send_digest))
        .route("/health", get(routes::health))
        .layer(cors)
        .with_state(state)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
