//! Admission webhook server.
//!
//! Serves the `/validate` decision endpoint over TLS. Register it with a
//! ValidatingWebhookConfiguration for pod CREATE operations; the TLS
//! certificate and key are mounted into the webhook pod (by default at
//! /etc/certs/).

use std::net::SocketAddr;
use std::path::Path;
use std::sync::Arc;

use axum::{
    Router,
    body::Bytes,
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
    routing::post,
};
use axum_server::Handle;
use axum_server::tls_rustls::RustlsConfig;
use tracing::{error, info};

use crate::admission::{AdmissionPipeline, Reply};

/// Default path to webhook TLS certificate
pub const WEBHOOK_CERT_PATH: &str = "/etc/certs/tls.crt";
/// Default path to webhook TLS private key
pub const WEBHOOK_KEY_PATH: &str = "/etc/certs/tls.key";
/// Default webhook server port
pub const WEBHOOK_PORT: u16 = 8080;
/// Path of the decision endpoint
pub const VALIDATE_PATH: &str = "/validate";

/// Shared state for webhook handlers
pub struct WebhookState {
    pub pipeline: AdmissionPipeline,
}

impl WebhookState {
    pub fn new(pipeline: AdmissionPipeline) -> Self {
        Self { pipeline }
    }
}

/// Create the webhook router
pub fn create_webhook_router(state: Arc<WebhookState>) -> Router {
    Router::new()
        .route(VALIDATE_PATH, post(validate).fallback(method_not_allowed))
        .fallback(no_validate)
        .with_state(state)
}

/// Decision endpoint handler
pub async fn validate(State(state): State<Arc<WebhookState>>, body: Bytes) -> Response {
    if body.is_empty() {
        error!("empty body");
        return (StatusCode::BAD_REQUEST, "empty body").into_response();
    }

    match state.pipeline.process(&body).await {
        Reply::Decided { verdict, body } => {
            info!(
                uid = %verdict.uid(),
                allowed = verdict.allowed(),
                code = verdict.code(),
                message = verdict.message(),
                "Admission verdict sent"
            );
            (
                StatusCode::OK,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
        Reply::Rejected(_) => (StatusCode::BAD_REQUEST, "incorrect body").into_response(),
        Reply::EncodingFailed { verdict, error, body } => {
            error!(uid = %verdict.uid(), error = %error, "Could not encode response");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [(header::CONTENT_TYPE, "application/json")],
                body,
            )
                .into_response()
        }
    }
}

/// Any path other than the decision endpoint
pub async fn no_validate() -> Response {
    error!("no validate");
    (StatusCode::BAD_REQUEST, "no validate").into_response()
}

/// Non-POST requests to the decision endpoint
pub async fn method_not_allowed() -> Response {
    (StatusCode::METHOD_NOT_ALLOWED, "method not allowed").into_response()
}

/// Errors that can occur when running the webhook server
#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// TLS configuration error
    #[error("TLS configuration error: {0}")]
    TlsConfig(String),
    /// Server error
    #[error("Webhook server error: {0}")]
    Server(String),
}

/// Run the webhook server with TLS
///
/// Binds to 0.0.0.0:`port` and serves the decision endpoint until `handle`
/// is told to shut down. TLS certificates are loaded from the paths given.
///
/// # Arguments
/// * `state` - Shared webhook state
/// * `cert_path` - Path to TLS certificate file (PEM format)
/// * `key_path` - Path to TLS private key file (PEM format)
/// * `port` - Listening port
/// * `handle` - Handle used to observe binding and trigger graceful shutdown
pub async fn run_webhook_server(
    state: Arc<WebhookState>,
    cert_path: &Path,
    key_path: &Path,
    port: u16,
    handle: Handle,
) -> Result<(), WebhookError> {
    let app = create_webhook_router(state);

    let config = RustlsConfig::from_pem_file(cert_path, key_path)
        .await
        .map_err(|e| WebhookError::TlsConfig(e.to_string()))?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Webhook server listening with TLS");

    axum_server::bind_rustls(addr, config)
        .handle(handle)
        .serve(app.into_make_service())
        .await
        .map_err(|e| WebhookError::Server(e.to_string()))?;

    info!("Webhook server stopped");
    Ok(())
}
