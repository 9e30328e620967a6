//! Admission decision pipeline.
//!
//! Turns an AdmissionReview for a pod into an allow/deny/skip verdict based
//! on the cosign signature of the pod's first container image.

pub mod audit;
pub mod codec;
pub mod credentials;
pub mod error;
pub mod image;
pub mod key_source;
pub mod pipeline;
pub mod verdict;
pub mod verifier;
pub mod workload;

pub use audit::{AuditSink, KubeEventRecorder, NoopAuditSink};
pub use credentials::{
    CredentialContext, KubeKeychain, KubePullSecretLookup, PullSecretLookup, RegistryCredential,
    RegistryCredentialProvider, merge_pull_secret_names,
};
pub use error::{Error, Result};
pub use image::ImageReference;
pub use key_source::{
    KeySource, KeySourceResolver, KubeSecretStore, PUBLIC_KEY_ENV, PUBLIC_KEY_SECRET_NAME,
    SecretStore, SecretStoreError,
};
pub use pipeline::{AdmissionMetrics, AdmissionPipeline, Collaborators, NoopMetrics, Reply};
pub use verdict::{Decision, DenyReason, Verdict};
pub use verifier::{CosignVerifier, PublicKey, SignatureVerifier, VerificationOutcome};
pub use workload::Workload;
