//! Shulker Proxy Agent
//!
//! Sidecar process for a game proxy:
//! - Registers ready `MinecraftServer`s as backends and indexes their tags
//! - Drains the proxy when the operator annotates its `Proxy` resource
//! - Fronts player connections, rejecting logins once draining

use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use shulker_proxy_agent::proxy::{Listener, ListenerConfig};
use shulker_proxy_agent::{
    Agent, Config, FileDrainMarker, KubeGateway, ProxyHost, ServerRegistry,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env();

    // Initialize tracing (prefer RUST_LOG, fallback to SHULKER_LOG_LEVEL)
    let log_level = config
        .as_ref()
        .map(|c| c.log_level.clone())
        .unwrap_or_else(|_| "info".to_string());
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| log_level.into()))
        .with(tracing_subscriber::fmt::layer().json())
        .init();

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(error = ?e, "Failed to load configuration");
            return Err(e);
        }
    };

    info!("Starting Shulker proxy agent");
    info!(
        proxy = %config.proxy,
        lifecycle = ?config.lifecycle,
        readiness_policy = config.readiness_policy.as_str(),
        listen_addr = %config.listen_addr,
        "Configuration loaded"
    );

    let registry = Arc::new(ServerRegistry::new());
    let gateway = Arc::new(KubeGateway::connect(config.proxy.clone()).await?);
    let marker = Arc::new(FileDrainMarker::new(&config.drain_lock_dir));

    let mut agent = match Agent::start(&config, gateway, registry.clone(), marker).await {
        Ok(agent) => agent,
        Err(e) => {
            error!(error = %e, "Failed to start agent");
            return Err(e.into());
        }
    };

    let mut listener_config = ListenerConfig::new(config.listen_addr);
    listener_config.max_connections = config.max_connections;
    let listener = Listener::bind(listener_config, registry.clone(), agent.gate(), agent.limbo())
        .await
        .inspect_err(|e| {
            error!(bind_addr = %config.listen_addr, error = %e, "Failed to bind listener")
        })?;
    let listener_handle = tokio::spawn(Arc::new(listener).run(registry.subscribe_shutdown()));

    let mut stopped = registry.subscribe_shutdown();
    let result: Result<()> = tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            info!("Received shutdown signal");
            Ok(())
        }
        _ = stopped.wait_for(|stopped| *stopped) => {
            info!("Proxy lifecycle reached stopped");
            Ok(())
        }
        Some(e) = agent.fatal_error() => {
            error!(error = %e, "Fatal drain error");
            Err(e.into())
        }
    };

    agent.shutdown();
    if !registry.is_shutdown() {
        registry.shutdown();
    }

    if tokio::time::timeout(Duration::from_secs(2), listener_handle)
        .await
        .is_err()
    {
        info!("Listener did not stop in time");
    }

    info!("Proxy agent shutdown complete");
    result
}
