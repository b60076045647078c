use axum::{extract::State, routing::post, Json, Router};
use rand::Rng;
use serde_json::Value;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::sleep;

#[derive(Clone)]
struct ServerConfig {
    latency_ms: u64,
    error_rate: f64,
}

/// Stand-in for the captioning model endpoint: fixed caption, configurable
/// latency and failure rate. Useful for exercising the gateway's fallback
/// paths locally.
#[tokio::main]
async fn main() {
    let args: Vec<String> = std::env::args().collect();
    let port = args.get(1).unwrap_or(&"3001".to_string()).parse::<u16>().unwrap();
    let latency_ms = args.get(2).unwrap_or(&"200".to_string()).parse::<u64>().unwrap();
    let error_rate = args.get(3).unwrap_or(&"0.0".to_string()).parse::<f64>().unwrap();

    let config = ServerConfig {
        latency_ms,
        error_rate,
    };

    let app = Router::new()
        .route("/caption", post(handler))
        .with_state(config);

    let addr = SocketAddr::from(([127, 0, 0, 1], port));
    println!(
        "Mock caption model on localhost:{}. Latency: {}ms, Error Rate: {}",
        port, latency_ms, error_rate
    );

    let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
    axum::serve(listener, app).await.unwrap();
}

async fn handler(
    State(config): State<ServerConfig>,
    Json(req): Json<Value>,
) -> (axum::http::StatusCode, Json<Value>) {
    let jitter = rand::thread_rng().gen_range(0..=20);
    sleep(Duration::from_millis(config.latency_ms + jitter)).await;

    if config.error_rate > 0.0 && rand::thread_rng().gen_bool(config.error_rate) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({"error": "simulated inference failure"})),
        );
    }

    // Conditioned requests carry a prompt; echo it into the caption so the
    // contextual path is observable end to end.
    let caption = match req.get("prompt").and_then(Value::as_str) {
        Some(prompt) => format!("a photo of a dog running in a park, {}", prompt),
        None => "a photo of a dog running in a park".to_string(),
    };

    (
        axum::http::StatusCode::OK,
        Json(serde_json::json!({
            "generated_text": caption,
            "score": 0.85
        })),
    )
}
