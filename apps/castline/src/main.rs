mod config;
mod handlers;
mod pairing;
mod relay;
mod session;
mod signaling;
#[cfg(test)]
mod testing;

use std::sync::Arc;

use axum::{
    routing::{get, post},
    Router,
};
use clap::Parser;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{error, info};

use crate::config::Config;
use crate::handlers::{
    check_receiver_state, claim_receiver, connect_receiver, connect_sender, create_sender,
    health_check, release_receiver, verify_sender,
};
use crate::pairing::{PairingRegistry, SharedRegistry};
use media_webrtc::WebRtcEngine;

#[derive(Parser)]
#[command(name = "castline", about = "One-to-one video pairing and relay server")]
struct Cli {
    /// Override the configured port.
    #[arg(long)]
    port: Option<u16>,
    /// Override the configured bind address.
    #[arg(long)]
    bind: Option<String>,
}

#[tokio::main]
async fn main() {
    // Default to INFO level if RUST_LOG is not set.
    if std::env::var("RUST_LOG").is_err() {
        std::env::set_var("RUST_LOG", "info");
    }
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let mut config = Config::from_env();
    if let Some(port) = cli.port {
        config.port = port;
    }
    if let Some(bind) = cli.bind {
        config.bind_address = bind;
    }

    info!("Starting castline pairing server on port {}", config.port);
    info!("ICE servers: {}", config.ice_urls.join(", "));

    let engine = match WebRtcEngine::new() {
        Ok(engine) => Arc::new(engine),
        Err(err) => {
            error!("Failed to build the media engine: {err}");
            std::process::exit(1);
        }
    };

    let registry: SharedRegistry = Arc::new(PairingRegistry::new(engine, &config));

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/receiver/create", post(claim_receiver))
        .route("/receiver/check_state", post(check_receiver_state))
        .route("/receiver/release", post(release_receiver))
        .route("/receiver/connect", post(connect_receiver))
        .route("/sender/create", post(create_sender))
        .route("/sender/attempt", post(verify_sender))
        .route("/sender/connect", post(connect_sender))
        .with_state(registry)
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http());

    let addr = format!("{}:{}", config.bind_address, config.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .expect("Failed to bind to address");

    info!("castline listening on {}", addr);

    axum::serve(listener, app)
        .await
        .expect("Failed to start server");
}
