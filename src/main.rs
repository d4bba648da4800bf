use std::path::PathBuf;

use buoy::config::Configuration;
use buoy::{app, initialize_state, telemetry};
use tokio::net::TcpListener;
use tokio::signal;

const CONFIG_PATH_ENV: &str = "CONFIG_PATH";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    telemetry::setup_logging();

    let path = std::env::var(CONFIG_PATH_ENV).map(PathBuf::from).unwrap_or_default();
    let config = Configuration::default().path(path).read()?;

    let metrics = if config.metrics {
        Some(telemetry::setup_metrics_recorder()?)
    } else {
        None
    };

    // Without a provider, no command can ever be delivered.
    let state = match initialize_state(config.clone(), metrics) {
        Ok(state) => state,
        Err(err) => {
            tracing::error!(error = %err, "cannot start buoy command API");
            std::process::exit(1);
        },
    };

    let listener = TcpListener::bind((config.address.as_str(), config.port)).await?;
    tracing::info!(address = %listener.local_addr()?, "server started");

    axum::serve(listener, app(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = signal::ctrl_c().await {
            tracing::error!(error = %err, "cannot listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            },
            Err(err) => {
                tracing::error!(error = %err, "cannot listen for SIGTERM");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("shutting down");
}
