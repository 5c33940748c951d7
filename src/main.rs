//! muxrpc - Multiplexed RPC server
//!
//! Serves the demo `Math` service over the stream and HTTP transports.

use muxrpc_registry::{Registry, RegistryError, Service};
use muxrpc_server::{http, Config, Server, ServerConfig};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Serialize, Deserialize)]
struct MathArgs {
    #[serde(rename = "A")]
    a: i64,
    #[serde(rename = "B")]
    b: i64,
}

fn demo_registry() -> Result<Registry, RegistryError> {
    let mut registry = Registry::new();
    let math = Service::new("Math")
        .method("Add", |args: MathArgs, reply: &mut i64| -> Result<(), String> {
            *reply = args.a + args.b;
            Ok(())
        })
        .method("Div", |args: MathArgs, reply: &mut i64| -> Result<(), String> {
            if args.b == 0 {
                return Err("division by zero".to_string());
            }
            *reply = args.a / args.b;
            Ok(())
        });
    registry.register(math)?;
    Ok(registry)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Load configuration (from file if MUXRPC_CONFIG is set, then env overrides)
    let config = match Config::load() {
        Ok(config) => config,
        Err(e) => {
            // If a config file was explicitly specified, fail on error
            if std::env::var("MUXRPC_CONFIG").is_ok() {
                tracing::error!("Failed to load config: {}", e);
                return Err(e.into());
            }
            tracing::info!("Using default configuration");
            Config::default()
        }
    };

    tracing::info!("Starting muxrpc server");
    tracing::info!("  Bind address: {}", config.network.bind_addr);
    match config.network.http_addr {
        Some(addr) => tracing::info!("  HTTP address: {}", addr),
        None => tracing::info!("  HTTP transport: disabled"),
    }

    let registry = Arc::new(demo_registry()?);

    let server_config = ServerConfig {
        bind_addr: config.network.bind_addr,
        max_connections: config.network.max_connections,
    };
    let server = Arc::new(Server::new(server_config, registry.clone()));

    // Spawn the HTTP transport alongside the stream transport
    if let Some(http_addr) = config.network.http_addr {
        let registry = registry.clone();
        let shutdown = server.shutdown_signal();
        tokio::spawn(async move {
            if let Err(e) = http::run_http_server(http_addr, registry, shutdown).await {
                tracing::error!("HTTP server error: {}", e);
            }
        });
    }

    // Spawn shutdown signal handler
    let shutdown_server = server.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        tracing::info!("Received shutdown signal, stopping server...");
        shutdown_server.shutdown();
    });

    // Run server (blocks until shutdown)
    server.run().await?;

    tracing::info!("Server stopped");
    Ok(())
}
