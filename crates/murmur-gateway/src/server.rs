//! Axum-based HTTP and WebSocket server.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::handlers;
use crate::state::GatewayState;

/// Every route the gateway serves.
pub fn build_router(state: Arc<GatewayState>) -> Router {
    let audio = ServeDir::new(state.audio_store.root());

    let app = Router::new()
        .route("/ws/{chat_id}", get(handlers::ws_handler))
        .route("/health", get(handlers::health))
        .route("/voices", get(handlers::voices))
        .route("/chats", get(handlers::list_chats))
        .route(
            "/chat/{chat_id}",
            get(handlers::get_chat).delete(handlers::delete_chat),
        );

    #[cfg(feature = "metrics")]
    let app = app.route("/metrics", get(handlers::metrics_handler));

    app.nest_service("/audio", audio)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Start the gateway and serve until Ctrl-C.
pub async fn start_gateway(state: Arc<GatewayState>, port: u16) -> anyhow::Result<()> {
    let bind_addr = state.config.gateway_bind();
    let app = build_router(state.clone());

    let addr = format!("{bind_addr}:{port}");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Gateway listening on {addr}");
    info!(dir = %state.audio_store.root().display(), "Serving synthesized audio under /audio");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    state.close_all_sessions().await;
    info!("Gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(%e, "Failed to install Ctrl-C handler");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
