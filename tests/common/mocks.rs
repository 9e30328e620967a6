//! In-memory collaborators for driving the pipeline without a cluster.
//!
//! Every mock counts its calls so tests can assert which steps of the
//! pipeline were reached.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use cosignwebhook::admission::{
    AdmissionMetrics, AdmissionPipeline, AuditSink, Collaborators, CredentialContext, Decision,
    Error, ImageReference, KeySourceResolver, PublicKey, RegistryCredential,
    RegistryCredentialProvider, SecretStore, SecretStoreError, SignatureVerifier,
    VerificationOutcome, Workload,
};

/// Secret store holding at most one public key per namespace.
#[derive(Default)]
pub struct MockSecretStore {
    keys: HashMap<String, String>,
    unavailable: bool,
    pub calls: AtomicUsize,
}

impl MockSecretStore {
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn with_key(namespace: &str, key: &str) -> Self {
        let mut store = Self::default();
        store.keys.insert(namespace.to_string(), key.to_string());
        store
    }

    pub fn unavailable() -> Self {
        Self {
            unavailable: true,
            ..Self::default()
        }
    }
}

#[async_trait]
impl SecretStore for MockSecretStore {
    async fn get_value(
        &self,
        namespace: &str,
        _name: &str,
        _key: &str,
    ) -> Result<Option<String>, SecretStoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.unavailable {
            return Err(SecretStoreError::Unavailable("connection refused".to_string()));
        }
        Ok(self.keys.get(namespace).cloned())
    }
}

/// Credential provider returning a fixed result.
pub struct MockCredentials {
    result: Result<RegistryCredential, String>,
    pub calls: AtomicUsize,
    pub last_context: Mutex<Option<CredentialContext>>,
}

impl MockCredentials {
    pub fn anonymous() -> Self {
        Self::returning(Ok(RegistryCredential::Anonymous))
    }

    pub fn failing(reason: &str) -> Self {
        Self::returning(Err(reason.to_string()))
    }

    pub fn returning(result: Result<RegistryCredential, String>) -> Self {
        Self {
            result,
            calls: AtomicUsize::new(0),
            last_context: Mutex::new(None),
        }
    }
}

#[async_trait]
impl RegistryCredentialProvider for MockCredentials {
    async fn resolve(
        &self,
        context: &CredentialContext,
        _reference: &ImageReference,
    ) -> cosignwebhook::admission::Result<RegistryCredential> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_context.lock().unwrap() = Some(context.clone());
        self.result.clone().map_err(Error::CredentialResolution)
    }
}

/// Verifier returning a fixed outcome, optionally after a delay.
pub struct MockVerifier {
    outcome: VerificationOutcome,
    delay: Option<Duration>,
    pub calls: AtomicUsize,
    pub last_key: Mutex<Option<String>>,
    pub last_reference: Mutex<Option<String>>,
}

impl MockVerifier {
    pub fn returning(outcome: VerificationOutcome) -> Self {
        Self {
            outcome,
            delay: None,
            calls: AtomicUsize::new(0),
            last_key: Mutex::new(None),
            last_reference: Mutex::new(None),
        }
    }

    pub fn verified() -> Self {
        Self::returning(VerificationOutcome::Verified)
    }

    pub fn unverified() -> Self {
        Self::returning(VerificationOutcome::Unverified(
            "no matching signatures".to_string(),
        ))
    }

    pub fn erroring() -> Self {
        Self::returning(VerificationOutcome::Error(
            "registry unreachable".to_string(),
        ))
    }

    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::verified()
        }
    }
}

#[async_trait]
impl SignatureVerifier for MockVerifier {
    async fn verify(
        &self,
        reference: &ImageReference,
        key: &PublicKey,
        _credential: &RegistryCredential,
    ) -> VerificationOutcome {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last_key.lock().unwrap() = Some(key.as_pem().to_string());
        *self.last_reference.lock().unwrap() = Some(reference.whole());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.outcome.clone()
    }
}

/// Audit sink remembering which pods were reported.
#[derive(Default)]
pub struct RecordingAudit {
    pub events: Mutex<Vec<String>>,
}

impl AuditSink for RecordingAudit {
    fn image_verified(&self, workload: &Workload) {
        self.events.lock().unwrap().push(workload.to_string());
    }
}

/// Metrics sink keeping every observation.
#[derive(Default)]
pub struct RecordingMetrics {
    pub processed: AtomicUsize,
    pub decisions: Mutex<Vec<Decision>>,
}

impl AdmissionMetrics for RecordingMetrics {
    fn request_processed(&self) {
        self.processed.fetch_add(1, Ordering::SeqCst);
    }

    fn verdict_recorded(&self, decision: Decision) {
        self.decisions.lock().unwrap().push(decision);
    }
}

/// A pipeline plus handles on all of its mock collaborators.
pub struct Harness {
    pub store: Arc<MockSecretStore>,
    pub credentials: Arc<MockCredentials>,
    pub verifier: Arc<MockVerifier>,
    pub audit: Arc<RecordingAudit>,
    pub metrics: Arc<RecordingMetrics>,
    pub pipeline: AdmissionPipeline,
}

impl Harness {
    pub fn new(store: MockSecretStore, credentials: MockCredentials, verifier: MockVerifier) -> Self {
        Self::with_timeout(store, credentials, verifier, Duration::from_secs(5))
    }

    pub fn with_timeout(
        store: MockSecretStore,
        credentials: MockCredentials,
        verifier: MockVerifier,
        timeout: Duration,
    ) -> Self {
        let store = Arc::new(store);
        let credentials = Arc::new(credentials);
        let verifier = Arc::new(verifier);
        let audit = Arc::new(RecordingAudit::default());
        let metrics = Arc::new(RecordingMetrics::default());

        let collaborators = Collaborators {
            keys: KeySourceResolver::new(store.clone(), timeout),
            credentials: credentials.clone(),
            verifier: verifier.clone(),
            audit: audit.clone(),
            metrics: metrics.clone(),
        };
        let pipeline = AdmissionPipeline::new(collaborators).with_timeout(timeout);

        Self {
            store,
            credentials,
            verifier,
            audit,
            metrics,
            pipeline,
        }
    }

    pub fn verifier_calls(&self) -> usize {
        self.verifier.calls.load(Ordering::SeqCst)
    }

    pub fn credential_calls(&self) -> usize {
        self.credentials.calls.load(Ordering::SeqCst)
    }

    pub fn secret_calls(&self) -> usize {
        self.store.calls.load(Ordering::SeqCst)
    }
}
