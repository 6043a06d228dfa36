//! Textboard server binary entry point.

use std::net::Ipv4Addr;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use textboard::{CliArgs, Config, Db, Server};

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    // Parse CLI arguments and resolve the effective configuration
    let args = CliArgs::parse();
    let config = match Config::load(&args) {
        Ok(config) => config,
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(1);
        }
    };

    tracing::info!("starting textboard server with {config:?}");

    // Open the database
    let db = match Db::open(&config.database_directory) {
        Ok(db) => db,
        Err(err) => {
            tracing::error!("{err}");
            std::process::exit(1);
        }
    };

    // Bind and serve
    let server = match Server::bind((Ipv4Addr::UNSPECIFIED, config.port), db).await {
        Ok(server) => server,
        Err(err) => {
            tracing::error!("failed to bind the server socket on port {}: {err}", config.port);
            std::process::exit(1);
        }
    };

    {
        let server = server.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            server.stop();
        });
    }

    server.run().await;
    tracing::info!("server shut down gracefully");
}

/// Listen for SIGTERM (service manager) and SIGINT (Ctrl+C).
async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => tracing::info!("Received SIGINT, starting graceful shutdown"),
        _ = terminate => tracing::info!("Received SIGTERM, starting graceful shutdown"),
    }
}
