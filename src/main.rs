//! cosignwebhook - admission webhook verifying cosign image signatures.
//!
//! This is the main entry point that:
//! - Initializes structured logging
//! - Creates the Kubernetes client
//! - Starts the TLS decision endpoint and the health/metrics server
//! - Shuts both down gracefully on SIGTERM or SIGINT

use std::sync::Arc;

use axum_server::Handle;
use clap::Parser;
use kube::Client;
use tokio::signal;
use tokio::sync::watch;
use tracing::{error, info, warn};

use cosignwebhook::health::{HealthState, run_health_server};
use cosignwebhook::lifecycle::supervise;
use cosignwebhook::{Config, WebhookState, build_pipeline, run_webhook_server};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("cosignwebhook=info".parse()?)
                .add_directive("kube=info".parse()?),
        )
        .json()
        .init();

    let config = Config::parse();
    info!(
        port = config.port,
        metrics_port = config.metrics_port,
        cert = %config.tls_cert_file.display(),
        "Starting cosignwebhook"
    );

    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        warn!("A rustls crypto provider was already installed");
    }

    // Create Kubernetes client
    let client = Client::try_default().await?;
    info!("Connected to Kubernetes cluster");

    let health_state = Arc::new(HealthState::new());
    let pipeline = build_pipeline(client, &health_state, &config);
    let webhook_state = Arc::new(WebhookState::new(pipeline));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Operational server runs without TLS and independently of the webhook
    let mut health_handle = {
        let health_state = health_state.clone();
        let port = config.metrics_port;
        let mut shutdown_rx = shutdown_rx.clone();
        tokio::spawn(async move {
            let shutdown = async move {
                let _ = shutdown_rx.wait_for(|stop| *stop).await;
            };
            if let Err(e) = run_health_server(health_state, port, shutdown).await {
                error!("Failed to listen and serve monitor server: {}", e);
            }
        })
    };

    let webhook_server_handle = Handle::new();
    let mut webhook_handle = {
        let handle = webhook_server_handle.clone();
        let config = config.clone();
        tokio::spawn(async move {
            if let Err(e) = run_webhook_server(
                webhook_state,
                &config.tls_cert_file,
                &config.tls_key_file,
                config.port,
                handle,
            )
            .await
            {
                error!("Failed to listen and serve webhook server: {}", e);
            }
        })
    };

    // Ready once the TLS listener is bound
    {
        let handle = webhook_server_handle.clone();
        let health_state = health_state.clone();
        tokio::spawn(async move {
            if let Some(addr) = handle.listening().await {
                info!(%addr, "Webhook server ready");
                health_state.set_ready(true).await;
            }
        });
    }

    info!(
        "Server running listening in port: {},{}",
        config.port, config.metrics_port
    );

    let outcome = supervise(
        &health_state,
        &mut webhook_handle,
        &mut health_handle,
        shutdown_signal(),
    )
    .await;

    // Stop receiving new work, then drain in-flight requests
    health_state.set_ready(false).await;
    webhook_server_handle.graceful_shutdown(Some(config.shutdown_grace()));
    let _ = shutdown_tx.send(true);

    let grace = config.shutdown_grace();
    if !outcome.webhook_done && tokio::time::timeout(grace, &mut webhook_handle).await.is_err() {
        warn!("Webhook server did not stop within the grace period");
    }
    if !outcome.health_done && tokio::time::timeout(grace, &mut health_handle).await.is_err() {
        warn!("Health server did not stop within the grace period");
    }

    if outcome.webhook_failed {
        return Err("webhook server stopped unexpectedly".into());
    }

    info!("cosignwebhook stopped");
    Ok(())
}

/// Wait for shutdown signal (SIGTERM or SIGINT)
///
/// Note: Signal handler setup failures are fatal - the webhook cannot shut down
/// gracefully without them. Using expect() here is intentional.
#[allow(clippy::expect_used)]
async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
