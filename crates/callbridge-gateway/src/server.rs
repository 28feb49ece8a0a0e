//! Axum-based control plane: the voice webhook, the media-stream WebSocket
//! endpoint, health, and metrics.

use std::sync::Arc;

use axum::{
    Router,
    extract::{State, WebSocketUpgrade},
    http::{StatusCode, header},
    response::IntoResponse,
    routing::{get, post},
};
use serde_json::json;
use tower_http::trace::TraceLayer;
use tracing::info;

use crate::connection::handle_call_connection;
use crate::state::GatewayState;

/// Start the bridge server.
pub async fn start_server(state: Arc<GatewayState>) -> anyhow::Result<()> {
    let addr = format!("{}:{}", state.config.bind_addr(), state.config.server_port());
    let app = build_router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    info!("Bridge listening on {addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

pub fn build_router(state: Arc<GatewayState>) -> Router {
    Router::new()
        .route("/voice/webhook", post(webhook_handler))
        .route("/voice/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Answer the provider's inbound-call webhook with instructions to speak the
/// greeting and fork the call's media to our WebSocket endpoint.
async fn webhook_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let host = state.config.public_host();
    let prompt = state.config.initial_prompt();
    let body = format!(
        r#"<?xml version="1.0" encoding="UTF-8"?>
<Response>
    <Say>{}</Say>
    <Connect>
        <Stream url="wss://{}/voice/ws" />
    </Connect>
    <Pause length="40"/>
</Response>"#,
        xml_escape(&prompt),
        xml_escape(&host),
    );

    ([(header::CONTENT_TYPE, "application/xml")], body)
}

async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<GatewayState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_call_connection(state, socket))
}

async fn health_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    let version = env!("CARGO_PKG_VERSION");
    let active_calls = state.registry.active_count().await;

    axum::Json(json!({
        "status": "ok",
        "version": version,
        "active_calls": active_calls,
    }))
}

async fn metrics_handler(State(state): State<Arc<GatewayState>>) -> impl IntoResponse {
    match &state.metrics_handle {
        Some(handle) => (StatusCode::OK, handle.render()),
        None => (StatusCode::NOT_FOUND, "metrics disabled\n".to_string()),
    }
}

fn xml_escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install CTRL+C handler");
    info!("Shutdown signal received");
}
