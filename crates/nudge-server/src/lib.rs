pub mod collaborators;
pub mod error;
pub mod flows;
pub mod routes;
pub mod signature;
pub mod state;

use axum::routing::{get, post};
use axum::Router;
use tower_http::trace::TraceLayer;

pub use state::AppState;

/// Build the axum Router with all API routes and middleware.
/// Used by `serve()` and available for integration testing.
pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/api/health", get(routes::health::health))
        // Inbound events and card callbacks
        .route("/api/events", post(routes::events::receive_event))
        .route("/api/callbacks", post(routes::callbacks::handle_callback))
        // Sweeps
        .route(
            "/api/jobs/{class}/{owner}",
            get(routes::jobs::job_status).post(routes::jobs::start_job),
        )
        .route(
            "/api/jobs/{class}/{owner}/cancel",
            post(routes::jobs::cancel_job),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(app_state)
}

/// Serve the API on `0.0.0.0:{port}`.
pub async fn serve(app_state: AppState, port: u16) -> anyhow::Result<()> {
    let addr = format!("0.0.0.0:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    serve_on(app_state, listener).await
}

/// Serve on a pre-bound listener, so the caller can read the actual port
/// when binding to port 0.
pub async fn serve_on(app_state: AppState, listener: tokio::net::TcpListener) -> anyhow::Result<()> {
    let actual_port = listener.local_addr()?.port();
    let app = build_router(app_state);

    tracing::info!("nudge server listening on http://localhost:{actual_port}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    tracing::info!("shutting down");
}
