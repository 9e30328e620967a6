//! Trust anchor lookup.
//!
//! The public key for a workload is looked up in a fixed order:
//! 1. `COSIGNPUBKEY` environment entry on the first container
//! 2. `COSIGNPUBKEY` data key of the `cosignwebhook` secret in the pod namespace
//! 3. absent, which skips verification
//!
//! Lookup failures in step 2 degrade to absent. Operators wanting fail-closed
//! behaviour configure it on the ValidatingWebhookConfiguration instead.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Secret;
use kube::{Api, Client};
use thiserror::Error;
use tracing::{debug, warn};

use super::error::Result;
use super::workload::Workload;

/// Environment variable and secret data key holding the public key
pub const PUBLIC_KEY_ENV: &str = "COSIGNPUBKEY";
/// Name of the namespace-scoped secret holding the public key
pub const PUBLIC_KEY_SECRET_NAME: &str = "cosignwebhook";

/// Where the trust anchor for a workload came from
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Declared on the first container
    Inline(String),
    /// Read from the namespace secret
    StoredSecret(String),
    /// Not configured
    Absent,
}

impl KeySource {
    /// PEM text of the public key, if any
    pub fn public_key_pem(&self) -> Option<&str> {
        match self {
            KeySource::Inline(pem) | KeySource::StoredSecret(pem) => Some(pem),
            KeySource::Absent => None,
        }
    }

    /// Short origin label for logs
    pub fn origin(&self) -> &'static str {
        match self {
            KeySource::Inline(_) => "inline",
            KeySource::StoredSecret(_) => "secret",
            KeySource::Absent => "absent",
        }
    }
}

// Key material stays out of logs.
impl std::fmt::Debug for KeySource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "KeySource::{}", self.origin())
    }
}

/// Errors from the secret store collaborator
#[derive(Error, Debug)]
pub enum SecretStoreError {
    /// Kubernetes API error
    #[error("Kubernetes API error: {0}")]
    Kube(#[from] kube::Error),

    /// Secret value is not UTF-8 text
    #[error("Secret value for key {0} is not valid UTF-8")]
    InvalidUtf8(String),

    /// The store could not be reached at all
    #[error("Secret store unavailable: {0}")]
    Unavailable(String),
}

/// Read access to namespace-scoped secrets.
#[async_trait]
pub trait SecretStore: Send + Sync {
    /// Fetch `key` from secret `name` in `namespace`.
    ///
    /// Returns `Ok(None)` when the secret or the key does not exist.
    async fn get_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> std::result::Result<Option<String>, SecretStoreError>;
}

/// Secret store backed by the Kubernetes API
#[derive(Clone)]
pub struct KubeSecretStore {
    client: Client,
}

impl KubeSecretStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl SecretStore for KubeSecretStore {
    async fn get_value(
        &self,
        namespace: &str,
        name: &str,
        key: &str,
    ) -> std::result::Result<Option<String>, SecretStoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        let Some(secret) = api.get_opt(name).await? else {
            return Ok(None);
        };

        match secret.data.as_ref().and_then(|data| data.get(key)) {
            Some(bytes) => String::from_utf8(bytes.0.clone())
                .map(Some)
                .map_err(|_| SecretStoreError::InvalidUtf8(key.to_string())),
            None => Ok(None),
        }
    }
}

/// Applies the trust anchor lookup order to a workload.
#[derive(Clone)]
pub struct KeySourceResolver {
    store: Arc<dyn SecretStore>,
    timeout: Duration,
}

impl KeySourceResolver {
    pub fn new(store: Arc<dyn SecretStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    /// Resolve the trust anchor for `workload`.
    ///
    /// The only error is a workload without containers; every lookup failure
    /// yields [`KeySource::Absent`].
    pub async fn resolve(&self, workload: &Workload) -> Result<KeySource> {
        if let Some(value) = workload.env_value(PUBLIC_KEY_ENV)?
            && !value.is_empty()
        {
            debug!(namespace = %workload.namespace, name = %workload.name, "Public key found in environment");
            return Ok(KeySource::Inline(value.to_string()));
        }

        debug!(
            namespace = %workload.namespace,
            name = %workload.name,
            "No public key in environment, trying secret"
        );

        let lookup = self
            .store
            .get_value(&workload.namespace, PUBLIC_KEY_SECRET_NAME, PUBLIC_KEY_ENV);

        match tokio::time::timeout(self.timeout, lookup).await {
            Ok(Ok(Some(value))) if !value.is_empty() => Ok(KeySource::StoredSecret(value)),
            Ok(Ok(_)) => {
                debug!(
                    namespace = %workload.namespace,
                    secret = PUBLIC_KEY_SECRET_NAME,
                    "Public key secret missing or empty"
                );
                Ok(KeySource::Absent)
            }
            Ok(Err(e)) => {
                warn!(
                    namespace = %workload.namespace,
                    name = %workload.name,
                    secret = PUBLIC_KEY_SECRET_NAME,
                    error = %e,
                    "Could not get public key from secret"
                );
                Ok(KeySource::Absent)
            }
            Err(_) => {
                warn!(
                    namespace = %workload.namespace,
                    name = %workload.name,
                    secret = PUBLIC_KEY_SECRET_NAME,
                    timeout_secs = self.timeout.as_secs(),
                    "Timed out reading public key secret"
                );
                Ok(KeySource::Absent)
            }
        }
    }
}
