//! Webhook module serving the admission decision endpoint.
//!
//! The HTTP layer only rejects empty bodies and wrong routes; every decision
//! is made by [`crate::admission::AdmissionPipeline`].

mod server;

pub use server::{
    VALIDATE_PATH, WEBHOOK_CERT_PATH, WEBHOOK_KEY_PATH, WEBHOOK_PORT, WebhookError,
    WebhookState, create_webhook_router, method_not_allowed, no_validate, run_webhook_server,
    validate,
};

// Re-export kube-rs admission types for contract testing
pub use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview, Operation};
