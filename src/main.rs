use std::sync::Arc;

use adaptive_gateway::api::build_router;
use adaptive_gateway::config::load_config;
use adaptive_gateway::observability::init_tracing;
use adaptive_gateway::state::AppState;

#[tokio::main]
async fn main() {
    let config = load_config("config.yaml").unwrap_or_else(|err| {
        eprintln!("Failed to load configuration: {err}");
        eprintln!("Please copy 'config.example.yaml' to 'config.yaml' and modify as needed.");
        std::process::exit(1);
    });

    init_tracing(&config.features.log_level);

    let host = config.server.host.clone();
    let port = config.server.port;

    let state = Arc::new(AppState::from_config(config).await);
    let router = build_router(state);

    let listener = match tokio::net::TcpListener::bind(format!("{host}:{port}")).await {
        Ok(listener) => listener,
        Err(err) => {
            eprintln!("Failed to bind to {host}:{port}: {err}");
            std::process::exit(1);
        }
    };

    tracing::info!("adaptive-gateway listening on {host}:{port}");

    if let Err(err) = axum::serve(listener, router).await {
        tracing::error!("server error: {err}");
    }
}
