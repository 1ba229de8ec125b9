//! Typerace Match Server
//!
//! Serves casual lobbies and ranked matches over WebSocket.

use std::sync::Arc;
use anyhow::Context;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use typerace::{
    config::GameConfig,
    core::clock::MatchClock,
    external::{BuiltinTextProvider, InMemoryProfileStore},
    network::{AuthConfig, GameServer, MatchService, ServerConfig},
    VERSION,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!("Typerace Server v{}", VERSION);

    let game_config = GameConfig::from_env();
    let server_config = ServerConfig::from_env();
    let auth_config = AuthConfig::from_env();
    if !auth_config.is_configured() {
        info!("No token key configured, only guests can connect");
    }

    let profiles = match std::env::var("TYPERACE_PROFILES") {
        Ok(path) => {
            let store = InMemoryProfileStore::load_json(&path)
                .await
                .with_context(|| format!("loading profiles from {path}"))?;
            info!("Loaded {} profiles from {}", store.len().await, path);
            store
        }
        Err(_) => InMemoryProfileStore::new(),
    };

    let clock = MatchClock::system();
    let texts = BuiltinTextProvider::new(clock.now_ms() as u64);
    let service = MatchService::new(game_config, auth_config, Arc::new(profiles), Arc::new(texts), clock);
    service.start().await;

    let server = Arc::new(GameServer::new(server_config, service.clone()));
    let mut runner = {
        let server = server.clone();
        tokio::spawn(async move { server.run().await })
    };

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("listening for shutdown signal")?;
            info!("Shutting down");
        }
        finished = &mut runner => {
            match finished {
                Ok(Ok(())) => info!("Server stopped"),
                Ok(Err(e)) => error!("Server failed: {}", e),
                Err(e) => error!("Server task panicked: {}", e),
            }
            service.drain().await;
            return Ok(());
        }
    }

    server.shutdown();
    service.drain().await;
    Ok(())
}
