use log::{error, info, warn};
use std::sync::Arc;

use rusty_chat::config::ServerConfig;
use rusty_chat::core::ChatServer;

#[tokio::main]
async fn main() {
    // Initialize env
    let dotenv_result = dotenvy::dotenv();

    // Initialize logging
    env_logger::init();

    if let Err(e) = dotenv_result {
        warn!("Failed to load .env file: {}", e);
    }

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            error!("Invalid configuration: {}", e);
            std::process::exit(1);
        }
    };

    info!(
        "Configuration: host={}, port={}, encoding={:?}",
        config.host,
        config.port,
        config.wire_encoding()
    );

    let server = Arc::new(ChatServer::with_memory_stores(config));
    let listener = match server.bind().await {
        Ok(listener) => listener,
        Err(e) => {
            error!("{}", e);
            std::process::exit(1);
        }
    };

    info!("Starting Rusty Chat server on {}", server.config().address());

    tokio::select! {
        result = server.run(listener) => {
            if let Err(e) = result {
                error!("Server stopped: {}", e);
            }
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received");
        }
    }
}
