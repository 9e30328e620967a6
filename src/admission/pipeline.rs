//! The admission decision pipeline.
//!
//! Each request walks a single linear path:
//!
//! ```text
//! Received -> Decoded -> WorkloadExtracted -> KeyResolved
//!     KeyResolved(absent)  -> Skip
//!     KeyResolved(present) -> ReferenceResolved -> KeyDecoded
//!                          -> CredentialsResolved -> Verified -> Allow | Deny
//! ```
//!
//! Protocol failures (envelope or workload) end the request before a verdict
//! exists. Every later failure becomes a Deny verdict. There are no retries.

use std::sync::Arc;
use std::time::Duration;

use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;
use tracing::{debug, error, info, warn};

use super::audit::AuditSink;
use super::codec;
use super::credentials::{CredentialContext, RegistryCredentialProvider};
use super::error::{Error, Result};
use super::image::ImageReference;
use super::key_source::KeySourceResolver;
use super::verdict::{Decision, Verdict};
use super::verifier::{PublicKey, SignatureVerifier, VerificationOutcome};
use super::workload::Workload;

/// Default bound on each collaborator call
pub const DEFAULT_COLLABORATOR_TIMEOUT: Duration = Duration::from_secs(30);

/// Pipeline stage, used to annotate logs
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Stage {
    Received,
    Decoded,
    WorkloadExtracted,
    KeyResolved,
    ReferenceResolved,
    KeyDecoded,
    CredentialsResolved,
    Verified,
    Responded,
}

/// Counters observed by the pipeline.
pub trait AdmissionMetrics: Send + Sync {
    /// A decision request with a non-empty body was received
    fn request_processed(&self);
    /// A verdict was produced
    fn verdict_recorded(&self, decision: Decision);
}

/// Metrics sink that records nothing
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopMetrics;

impl AdmissionMetrics for NoopMetrics {
    fn request_processed(&self) {}
    fn verdict_recorded(&self, _decision: Decision) {}
}

/// What the transport layer should send back
#[derive(Debug)]
pub enum Reply {
    /// A verdict and its encoded AdmissionReview
    Decided { verdict: Verdict, body: Vec<u8> },
    /// The request never reached a verdict
    Rejected(Error),
    /// A verdict exists but could not be encoded; `body` is the fallback envelope
    EncodingFailed {
        verdict: Verdict,
        error: Error,
        body: Vec<u8>,
    },
}

/// External collaborators of the pipeline
#[derive(Clone)]
pub struct Collaborators {
    pub keys: KeySourceResolver,
    pub credentials: Arc<dyn RegistryCredentialProvider>,
    pub verifier: Arc<dyn SignatureVerifier>,
    pub audit: Arc<dyn AuditSink>,
    pub metrics: Arc<dyn AdmissionMetrics>,
}

/// Turns admission requests into verdicts.
#[derive(Clone)]
pub struct AdmissionPipeline {
    collaborators: Collaborators,
    timeout: Duration,
}

impl AdmissionPipeline {
    pub fn new(collaborators: Collaborators) -> Self {
        Self {
            collaborators,
            timeout: DEFAULT_COLLABORATOR_TIMEOUT,
        }
    }

    /// Bound credential resolution and verification calls.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Run the full pipeline over a raw request body.
    pub async fn process(&self, body: &[u8]) -> Reply {
        self.collaborators.metrics.request_processed();
        debug!(stage = ?Stage::Received, bytes = body.len(), "Admission request received");

        let request = match codec::decode_request(body) {
            Ok(request) => request,
            Err(e) => {
                error!(step = e.step(), error = %e, "Rejecting admission request");
                return Reply::Rejected(e);
            }
        };
        debug!(stage = ?Stage::Decoded, uid = %request.uid, "Admission request decoded");

        let verdict = match self.decide(&request).await {
            Ok(verdict) => verdict,
            Err(e) => {
                error!(
                    uid = %request.uid,
                    namespace = ?request.namespace,
                    name = %request.name,
                    step = e.step(),
                    error = %e,
                    "Rejecting admission request"
                );
                return Reply::Rejected(e);
            }
        };

        let encoded = codec::encode_verdict(&request, &verdict);
        reply_for(self.collaborators.metrics.as_ref(), verdict, encoded)
    }

    /// Decide a decoded request.
    ///
    /// Returns `Err` only for protocol errors; domain failures are folded
    /// into a Deny verdict.
    pub async fn decide(&self, request: &AdmissionRequest<DynamicObject>) -> Result<Verdict> {
        let uid = request.uid.as_str();
        let workload = Workload::from_request(request)?;
        debug!(stage = ?Stage::WorkloadExtracted, uid = %uid, pod = %workload, "Workload extracted");

        let key_source = self.collaborators.keys.resolve(&workload).await?;
        debug!(stage = ?Stage::KeyResolved, uid = %uid, source = key_source.origin(), "Trust anchor resolved");

        let Some(pem) = key_source.public_key_pem() else {
            warn!(
                uid = %uid,
                namespace = %workload.namespace,
                name = %workload.name,
                "No public key set, skipping verification"
            );
            return Ok(Verdict::skip(uid));
        };

        match self.verify_workload(uid, &workload, pem).await {
            Ok(()) => {
                info!(
                    uid = %uid,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    key_source = key_source.origin(),
                    "Image successfully verified"
                );
                self.collaborators.audit.image_verified(&workload);
                Ok(Verdict::allow(uid))
            }
            Err(e) if e.is_protocol_error() => Err(e),
            Err(e) => {
                let verdict = Verdict::from_error(&e, uid);
                warn!(
                    uid = %uid,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    step = e.step(),
                    error = %e,
                    message = verdict.message(),
                    "Admission request denied"
                );
                Ok(verdict)
            }
        }
    }

    async fn verify_workload(&self, uid: &str, workload: &Workload, pem: &str) -> Result<()> {
        let reference = ImageReference::parse(workload.image()?)?;
        debug!(stage = ?Stage::ReferenceResolved, uid = %uid, image = %reference, "Image reference resolved");

        let key = PublicKey::from_pem(pem)?;
        debug!(stage = ?Stage::KeyDecoded, uid = %uid, "Public key decoded");

        let context = CredentialContext::for_workload(workload);
        let credential = tokio::time::timeout(
            self.timeout,
            self.collaborators.credentials.resolve(&context, &reference),
        )
        .await
        .map_err(|_| {
            Error::CredentialResolution(format!(
                "timed out after {}s",
                self.timeout.as_secs()
            ))
        })??;
        debug!(
            stage = ?Stage::CredentialsResolved,
            uid = %uid,
            registry = %reference.registry(),
            service_account = %context.service_account,
            "Registry credentials resolved"
        );

        let outcome = tokio::time::timeout(
            self.timeout,
            self.collaborators
                .verifier
                .verify(&reference, &key, &credential),
        )
        .await
        .unwrap_or_else(|_| {
            VerificationOutcome::Error(format!("timed out after {}s", self.timeout.as_secs()))
        });
        debug!(stage = ?Stage::Verified, uid = %uid, outcome = ?outcome, "Signature check finished");

        match outcome {
            VerificationOutcome::Verified => Ok(()),
            VerificationOutcome::Unverified(reason) => {
                warn!(
                    uid = %uid,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    image = %reference,
                    reason = %reason,
                    "Image signature did not verify"
                );
                Err(Error::Verification(reason))
            }
            VerificationOutcome::Error(reason) => {
                error!(
                    uid = %uid,
                    namespace = %workload.namespace,
                    name = %workload.name,
                    image = %reference,
                    error = %reason,
                    "Error verifying image signatures"
                );
                Err(Error::Verification(reason))
            }
        }
    }
}

/// Turn an encoded verdict into a reply, recording the outcome actually sent.
fn reply_for(metrics: &dyn AdmissionMetrics, verdict: Verdict, encoded: Result<Vec<u8>>) -> Reply {
    match encoded {
        Ok(body) => {
            metrics.verdict_recorded(verdict.decision());
            debug!(stage = ?Stage::Responded, uid = %verdict.uid(), decision = %verdict.decision(), "Verdict encoded");
            Reply::Decided { verdict, body }
        }
        Err(e) => {
            metrics.verdict_recorded(Decision::InternalError);
            error!(uid = %verdict.uid(), step = e.step(), error = %e, "Can't encode response");
            let body = codec::fallback_envelope(verdict.uid());
            Reply::EncodingFailed {
                verdict,
                error: e,
                body,
            }
        }
    }
}
