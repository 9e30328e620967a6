//! cosignwebhook library crate
//!
//! A validating admission webhook that only lets pods start when the image of
//! their first container carries a cosign signature matching a public key
//! configured for the pod or its namespace.

pub mod admission;
pub mod config;
pub mod health;
pub mod lifecycle;
pub mod webhooks;

pub use config::Config;
pub use health::{HealthState, Metrics, run_health_server};
pub use webhooks::{
    WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError, WebhookState,
    run_webhook_server,
};

use std::sync::Arc;

use kube::Client;

use admission::{
    AdmissionPipeline, Collaborators, CosignVerifier, KeySourceResolver, KubeEventRecorder,
    KubeKeychain, KubeSecretStore,
};

/// Wire the production collaborators into a pipeline.
///
/// Secrets, pull credentials and audit events go through `client`; metrics
/// are recorded into `health_state`.
pub fn build_pipeline(
    client: Client,
    health_state: &HealthState,
    config: &Config,
) -> AdmissionPipeline {
    let timeout = config.collaborator_timeout();
    let collaborators = Collaborators {
        keys: KeySourceResolver::new(Arc::new(KubeSecretStore::new(client.clone())), timeout),
        credentials: Arc::new(KubeKeychain::new(client.clone())),
        verifier: Arc::new(CosignVerifier::new()),
        audit: Arc::new(KubeEventRecorder::new(client)),
        metrics: health_state.metrics.clone(),
    };
    AdmissionPipeline::new(collaborators).with_timeout(timeout)
}
