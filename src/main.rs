use anyhow::Context;
use project_bridge::auth::{AdminAuth, OpenAccess, StaticToken};
use project_bridge::config::Config;
use project_bridge::db::Database;
use project_bridge::proxy::{BridgeContext, BridgeServer};
use project_bridge::{PKG_NAME, VERSION};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("project_bridge=debug".parse()?),
        )
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("config.toml"));

    let config = Config::load_or_default(&config_path).map_err(|e| {
        error!(path = %config_path.display(), error = %e, "Failed to load configuration");
        e
    })?;

    info!(path = %config_path.display(), exists = config_path.exists(), "Configuration loaded");

    print_startup_banner(&config);

    let db = Database::open(&config.database.path)
        .with_context(|| format!("Failed to open database at {}", config.database.path))?;
    let db = Arc::new(db);

    if config.database.seed_samples {
        let seeded = db.seed_sample_services()?;
        if seeded > 0 {
            info!(count = seeded, "Seeded sample services");
        }
    }

    let auth: Arc<dyn AdminAuth> = match config.server.admin_token.as_deref() {
        Some(token) => {
            info!("Management API mutations require the admin token");
            Arc::new(StaticToken::new(token))
        }
        None => Arc::new(OpenAccess),
    };

    let context = BridgeContext::new(db, config.server.request_timeout())?
        .with_auth(auth)
        .with_cors_origin(config.server.cors_origin().map(String::from));

    // Create shutdown channel
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let server = BridgeServer::new(config.server.bind_addr()?, context, shutdown_rx);
    let server_handle = tokio::spawn(async move {
        if let Err(e) = server.run().await {
            error!(error = %e, "Bridge server error");
        }
    });

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).context("Failed to install SIGTERM handler")?;

        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Received SIGINT (Ctrl+C), shutting down...");
            }
            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down...");
            }
        }
    }

    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c()
            .await
            .context("Failed to listen for Ctrl+C")?;
        info!("Received Ctrl+C, shutting down...");
    }

    // Signal shutdown
    let _ = shutdown_tx.send(true);

    // Wait for the server to stop (with timeout)
    let _ = tokio::time::timeout(Duration::from_secs(5), server_handle).await;

    info!("Shutdown complete");
    Ok(())
}

fn print_startup_banner(config: &Config) {
    info!(name = PKG_NAME, version = VERSION, "Starting project bridge");
    info!(
        bind = %config.server.bind,
        port = config.server.port,
        request_timeout_secs = config.server.request_timeout_secs,
        cors_allow_origin = config.server.cors_origin(),
        admin_token = config.server.admin_token.is_some(),
        "Server configuration"
    );
    info!(
        path = %config.database.path,
        seed_samples = config.database.seed_samples,
        "Database settings"
    );
}
