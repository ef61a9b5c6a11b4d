use frontgate::config::Config;
use frontgate::error::Error;
use frontgate::server::Gateway;
use std::path::PathBuf;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("frontgate=info".parse().expect("valid log directive")),
        )
        .init();

    // Configuration comes from a TOML file when a path is given, otherwise
    // from the environment (the deployment scheme this gateway replaces).
    let config = match std::env::args().nth(1).map(PathBuf::from) {
        Some(path) => Config::load(&path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to load configuration");
            e
        })?,
        None => Config::from_env().map_err(|e| {
            error!(error = %e, "Failed to load configuration from environment");
            anyhow::Error::from(e)
        })?,
    };

    info!(
        address = %config.address,
        cookie_domain = %config.cookie_domain,
        endpoints = config.endpoints.len(),
        skip_token_hosts = config.skip_token_hosts.len(),
        cert_dir = %config.cert_dir,
        "Starting gateway"
    );

    let handle = Gateway::new(config)?.start().await?;

    // Wait for shutdown signal (Ctrl+C or SIGTERM)
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm =
            signal(SignalKind::terminate()).expect("Failed to install SIGTERM handler");

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
            .expect("Failed to listen for Ctrl+C");
        info!("Received Ctrl+C, shutting down...");
    }

    if let Some(fault) = handle.fault() {
        error!(fault = %fault, "Gateway reported a serving fault");
    }

    match handle.stop().await {
        Ok(()) => {
            info!("Shutdown complete");
            Ok(())
        }
        Err(Error::ShutdownTimeout) => {
            // A hung shutdown is worse than an abrupt one for a supervised
            // service: exit non-zero so the supervisor can restart or alert.
            error!("Shutdown deadline exceeded, terminating");
            std::process::exit(1);
        }
        Err(e) => Err(e.into()),
    }
}
