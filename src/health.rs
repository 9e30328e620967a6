//! Operational server for Kubernetes probes and Prometheus metrics.
//!
//! Provides:
//! - `/healthz` - Liveness probe (returns 503 once the decision endpoint died on its own)
//! - `/readyz` - Readiness probe (returns 200 when the decision endpoint is serving)
//! - `/metrics` - Prometheus metrics endpoint
//!
//! Served over plain HTTP, independently of the TLS decision endpoint.

use std::future::Future;
use std::sync::Arc;

use axum::{
    Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
};
use prometheus_client::encoding::text::encode;
use prometheus_client::encoding::{EncodeLabel, EncodeLabelSet, LabelSetEncoder};
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::registry::Registry;
use tokio::sync::RwLock;
use tracing::info;

use crate::admission::{AdmissionMetrics, Decision};

/// Default operational server port
pub const METRICS_PORT: u16 = 8081;

/// Labels for verdict metrics
#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct VerdictLabels {
    pub verdict: String,
}

impl EncodeLabelSet for VerdictLabels {
    fn encode(&self, mut encoder: LabelSetEncoder<'_>) -> Result<(), std::fmt::Error> {
        ("verdict", self.verdict.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

/// Admission counters
pub struct Metrics {
    /// Total decision requests with a body
    pub processed_total: Counter,
    /// Total verified images
    pub verified_total: Counter,
    /// Verdicts by kind
    pub verdicts_total: Family<VerdictLabels, Counter>,
    /// Prometheus registry
    registry: Registry,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    /// Create a new metrics instance with registered metrics
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let processed_total = Counter::default();
        registry.register(
            "cosign_processed_ops",
            "The total number of processed events",
            processed_total.clone(),
        );

        let verified_total = Counter::default();
        registry.register(
            "cosign_processed_verified",
            "The number of verified events",
            verified_total.clone(),
        );

        let verdicts_total = Family::<VerdictLabels, Counter>::default();
        registry.register(
            "cosign_admission_verdicts",
            "The number of admission verdicts by kind",
            verdicts_total.clone(),
        );

        Self {
            processed_total,
            verified_total,
            verdicts_total,
            registry,
        }
    }

    /// Encode metrics to Prometheus text format
    pub fn encode(&self) -> String {
        let mut buffer = String::new();
        if encode(&mut buffer, &self.registry).is_err() {
            tracing::error!("Failed to encode metrics");
            return "# Error encoding metrics".to_string();
        }
        buffer
    }
}

impl AdmissionMetrics for Metrics {
    fn request_processed(&self) {
        self.processed_total.inc();
    }

    fn verdict_recorded(&self, decision: Decision) {
        if decision == Decision::Allow {
            self.verified_total.inc();
        }
        let labels = VerdictLabels {
            verdict: decision.label().to_string(),
        };
        self.verdicts_total.get_or_create(&labels).inc();
    }
}

/// Shared state for the operational server
pub struct HealthState {
    /// Whether the decision endpoint is serving
    ready: RwLock<bool>,
    /// Cleared when the decision endpoint stops outside a shutdown
    live: RwLock<bool>,
    /// Metrics registry
    pub metrics: Arc<Metrics>,
}

impl Default for HealthState {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthState {
    /// Create a new health state (starts as not ready)
    pub fn new() -> Self {
        Self {
            ready: RwLock::new(false),
            live: RwLock::new(true),
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Mark the webhook as ready or not ready
    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Check if the webhook is ready
    pub async fn is_ready(&self) -> bool {
        *self.ready.read().await
    }

    /// Mark the process as needing a restart
    pub async fn set_live(&self, live: bool) {
        *self.live.write().await = live;
    }

    pub async fn is_live(&self) -> bool {
        *self.live.read().await
    }
}

/// Liveness probe handler
///
/// Returns 200 OK while the decision endpoint has not failed.
async fn healthz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_live().await {
        (StatusCode::OK, "ok").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "webhook server stopped").into_response()
    }
}

/// Readiness probe handler
///
/// Returns 200 OK once the decision endpoint is listening.
/// Returns 503 Service Unavailable during startup and shutdown.
async fn readyz(State(state): State<Arc<HealthState>>) -> Response {
    if state.is_ready().await {
        (StatusCode::OK, "ready").into_response()
    } else {
        (StatusCode::SERVICE_UNAVAILABLE, "not ready").into_response()
    }
}

/// Metrics handler
async fn metrics_handler(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let body = state.metrics.encode();
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}

/// Create the operational server router
pub fn create_router(state: Arc<HealthState>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}

/// Run the operational server until `shutdown` resolves.
///
/// Binds to 0.0.0.0:`port`; in-flight requests are drained on shutdown.
pub async fn run_health_server(
    state: Arc<HealthState>,
    port: u16,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> Result<(), std::io::Error> {
    let app = create_router(state);

    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], port));
    info!(port = port, "Starting health server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Health server stopped");
    Ok(())
}
