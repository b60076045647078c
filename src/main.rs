use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router as AxumRouter,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::info;

use caption_gateway::gateway::{
    handle_caption, handle_health, handle_model_reload, handle_model_status, handle_root,
    handle_tones, AppState,
};
use caption_gateway::settings::Settings;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt::init();

    let settings = Settings::from_env();
    let port = settings.port;
    let max_upload = settings.max_upload_bytes;
    let state = Arc::new(AppState::new(settings));
    info!(
        model_loaded = state.manager.is_loaded(),
        "caption gateway initialized"
    );

    let app = AxumRouter::new()
        .route("/", get(handle_root))
        .route(
            "/api/v1/caption",
            post(handle_caption).layer(DefaultBodyLimit::max(max_upload)),
        )
        .route("/api/v1/tones", get(handle_tones))
        .route("/api/v1/health", get(handle_health))
        .route("/api/v1/model/status", get(handle_model_status))
        .route("/api/v1/model/reload", post(handle_model_reload))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    println!("Caption gateway listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}
