//! `QuickChat` server -- message delivery with live push.
//!
//! An axum server that stores direct messages, answers the HTTP message API,
//! and pushes each new message to its recipient's WebSocket channel.
//!
//! # Usage
//!
//! ```bash
//! # Run on default address 0.0.0.0:5000 with users from
//! # ~/.config/quickchat-server/config.toml
//! cargo run --bin quickchat-server
//!
//! # Run on custom address with an explicit config file
//! cargo run --bin quickchat-server -- --bind 127.0.0.1:8080 --config users.toml
//!
//! # Or via environment variable
//! QUICKCHAT_ADDR=127.0.0.1:8080 cargo run --bin quickchat-server
//! ```

use std::sync::Arc;

use clap::Parser;
use quickchat_server::config::{ServerCliArgs, ServerConfig};
use quickchat_server::delivery::DeliveryCoordinator;
use quickchat_server::directory::UserDirectory;
use quickchat_server::routes;
use quickchat_server::store::InMemoryStore;

#[tokio::main]
async fn main() {
    let cli = ServerCliArgs::parse();

    let config = match ServerConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            std::process::exit(1);
        }
    };

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    if config.users.is_empty() {
        tracing::warn!("no [[users]] configured; every request will be rejected");
    }
    tracing::info!(
        addr = %config.bind_addr,
        users = config.users.len(),
        "starting quickchat server"
    );

    let directory = UserDirectory::from_entries(&config.users);
    let coordinator = DeliveryCoordinator::new(InMemoryStore::new(), directory)
        .with_max_text_len(config.max_text_len);

    match routes::start_server(&config.bind_addr, Arc::new(coordinator)).await {
        Ok((bound_addr, handle)) => {
            tracing::info!(addr = %bound_addr, "server listening");
            if let Err(e) = handle.await {
                tracing::error!(error = %e, "server task failed");
            }
        }
        Err(e) => {
            tracing::error!(error = %e, "failed to start server");
            std::process::exit(1);
        }
    }
}
