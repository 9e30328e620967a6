//! Registry credentials for signature lookups.
//!
//! Credentials are derived from the workload's cluster identity the same way
//! the kubelet does it: pull secrets declared on the pod plus the ones
//! attached to its service account. The first docker config entry matching
//! the image registry wins; without a match the registry is accessed
//! anonymously.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use base64::{Engine, engine::general_purpose::STANDARD};
use k8s_openapi::api::core::v1::{Secret, ServiceAccount};
use kube::{Api, Client};
use serde::Deserialize;
use tracing::{debug, warn};

use super::error::{Error, Result};
use super::image::ImageReference;
use super::key_source::SecretStoreError;
use super::workload::Workload;

/// Service account used when a pod does not name one
pub const DEFAULT_SERVICE_ACCOUNT: &str = "default";

const DOCKER_CONFIG_JSON_TYPE: &str = "kubernetes.io/dockerconfigjson";
const DOCKER_CONFIG_JSON_KEY: &str = ".dockerconfigjson";
const DOCKER_CFG_TYPE: &str = "kubernetes.io/dockercfg";
const DOCKER_CFG_KEY: &str = ".dockercfg";

/// Canonical host for all Docker Hub aliases
const DOCKER_HUB_HOST: &str = "index.docker.io";
const DOCKER_HUB_ALIASES: &[&str] = &["docker.io", "index.docker.io", "registry-1.docker.io"];

/// Identity inputs for credential federation, owned by one request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CredentialContext {
    pub namespace: String,
    pub service_account: String,
    pub pull_secrets: Vec<String>,
}

impl CredentialContext {
    pub fn for_workload(workload: &Workload) -> Self {
        Self {
            namespace: workload.namespace.clone(),
            service_account: workload
                .service_account()
                .unwrap_or(DEFAULT_SERVICE_ACCOUNT)
                .to_string(),
            pull_secrets: workload.pull_secret_names(),
        }
    }
}

/// Credentials presented to the registry
#[derive(Clone, PartialEq, Eq)]
pub enum RegistryCredential {
    Anonymous,
    Basic { username: String, password: String },
}

impl std::fmt::Debug for RegistryCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryCredential::Anonymous => f.write_str("Anonymous"),
            RegistryCredential::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"<redacted>")
                .finish(),
        }
    }
}

/// Resolves registry credentials for a workload identity.
#[async_trait]
pub trait RegistryCredentialProvider: Send + Sync {
    async fn resolve(
        &self,
        context: &CredentialContext,
        reference: &ImageReference,
    ) -> Result<RegistryCredential>;
}

/// A single docker config entry
#[derive(Clone, Default, Deserialize)]
struct DockerAuthEntry {
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
    #[serde(default)]
    auth: Option<String>,
}

impl DockerAuthEntry {
    fn credential(&self) -> Result<RegistryCredential> {
        if let (Some(username), Some(password)) = (&self.username, &self.password)
            && !username.is_empty()
        {
            return Ok(RegistryCredential::Basic {
                username: username.clone(),
                password: password.clone(),
            });
        }

        match self.auth.as_deref().filter(|a| !a.is_empty()) {
            Some(auth) => {
                let decoded = STANDARD.decode(auth).map_err(|_| {
                    Error::CredentialResolution("auth field is not valid base64".to_string())
                })?;
                let decoded = String::from_utf8(decoded).map_err(|_| {
                    Error::CredentialResolution("auth field is not UTF-8".to_string())
                })?;
                let (username, password) = decoded.split_once(':').ok_or_else(|| {
                    Error::CredentialResolution("auth field is not user:password".to_string())
                })?;
                Ok(RegistryCredential::Basic {
                    username: username.to_string(),
                    password: password.to_string(),
                })
            }
            None => Ok(RegistryCredential::Anonymous),
        }
    }
}

#[derive(Deserialize)]
struct DockerConfigJson {
    #[serde(default)]
    auths: BTreeMap<String, DockerAuthEntry>,
}

/// Registry credentials collected from pull secrets, in lookup order.
#[derive(Clone, Default)]
pub struct Keychain {
    entries: Vec<(String, DockerAuthEntry)>,
}

impl Keychain {
    /// Build a keychain from pull secrets, preserving their order.
    ///
    /// Secrets of other types are ignored; malformed docker configs fail.
    pub fn from_secrets<'a>(secrets: impl IntoIterator<Item = &'a Secret>) -> Result<Self> {
        let mut keychain = Keychain::default();
        for secret in secrets {
            keychain.add_secret(secret)?;
        }
        Ok(keychain)
    }

    fn add_secret(&mut self, secret: &Secret) -> Result<()> {
        let name = secret.metadata.name.as_deref().unwrap_or_default();
        let data = secret.data.as_ref();

        let auths = match secret.type_.as_deref() {
            Some(DOCKER_CONFIG_JSON_TYPE) => {
                let Some(raw) = data.and_then(|d| d.get(DOCKER_CONFIG_JSON_KEY)) else {
                    return Ok(());
                };
                serde_json::from_slice::<DockerConfigJson>(&raw.0)
                    .map_err(|e| malformed_secret(name, &e))?
                    .auths
            }
            Some(DOCKER_CFG_TYPE) => {
                let Some(raw) = data.and_then(|d| d.get(DOCKER_CFG_KEY)) else {
                    return Ok(());
                };
                serde_json::from_slice::<BTreeMap<String, DockerAuthEntry>>(&raw.0)
                    .map_err(|e| malformed_secret(name, &e))?
            }
            other => {
                debug!(secret = %name, secret_type = ?other, "Ignoring non-docker pull secret");
                return Ok(());
            }
        };

        self.entries.extend(auths);
        Ok(())
    }

    /// Credential for a registry host; anonymous when nothing matches.
    pub fn credential_for(&self, registry: &str) -> Result<RegistryCredential> {
        let host = normalize_host(registry);
        for (key, entry) in &self.entries {
            if host_matches(&normalize_host(key), &host) {
                return entry.credential();
            }
        }
        Ok(RegistryCredential::Anonymous)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Parse failure of a docker config, without echoing any of its content.
fn malformed_secret(name: &str, error: &serde_json::Error) -> Error {
    Error::CredentialResolution(format!(
        "pull secret {name} is malformed: {:?} error at line {} column {}",
        error.classify(),
        error.line(),
        error.column()
    ))
}

/// Reduce a docker config key or registry name to a lowercase host[:port].
fn normalize_host(key: &str) -> String {
    let without_scheme = key
        .strip_prefix("https://")
        .or_else(|| key.strip_prefix("http://"))
        .unwrap_or(key);
    let host = without_scheme
        .split('/')
        .next()
        .unwrap_or(without_scheme)
        .to_ascii_lowercase();
    if DOCKER_HUB_ALIASES.contains(&host.as_str()) {
        DOCKER_HUB_HOST.to_string()
    } else {
        host
    }
}

/// Exact match, or a single-label `*.` wildcard.
fn host_matches(pattern: &str, host: &str) -> bool {
    if pattern == host {
        return true;
    }
    match pattern.strip_prefix("*.") {
        Some(suffix) => host
            .split_once('.')
            .is_some_and(|(label, rest)| !label.is_empty() && rest == suffix),
        None => false,
    }
}

/// Pod pull secrets first, then the service account's, without duplicates.
pub fn merge_pull_secret_names(pod: &[String], account: Option<&ServiceAccount>) -> Vec<String> {
    let mut names: Vec<String> = Vec::with_capacity(pod.len());
    let account_names = account
        .and_then(|account| account.image_pull_secrets.as_ref())
        .into_iter()
        .flatten()
        .map(|reference| &reference.name);

    for name in pod.iter().chain(account_names) {
        if !name.is_empty() && !names.contains(name) {
            names.push(name.clone());
        }
    }
    names
}

/// Read access to service accounts and pull secrets.
///
/// `Ok(None)` means the object does not exist; every other failure is an
/// error.
#[async_trait]
pub trait PullSecretLookup: Send + Sync {
    async fn service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<ServiceAccount>, SecretStoreError>;

    async fn pull_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<Secret>, SecretStoreError>;
}

/// Lookups through the Kubernetes API
#[derive(Clone)]
pub struct KubePullSecretLookup {
    client: Client,
}

impl KubePullSecretLookup {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PullSecretLookup for KubePullSecretLookup {
    async fn service_account(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<ServiceAccount>, SecretStoreError> {
        let api: Api<ServiceAccount> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn pull_secret(
        &self,
        namespace: &str,
        name: &str,
    ) -> std::result::Result<Option<Secret>, SecretStoreError> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }
}

/// Credential provider federating the workload identity into a keychain.
#[derive(Clone)]
pub struct KubeKeychain {
    lookup: Arc<dyn PullSecretLookup>,
}

impl KubeKeychain {
    pub fn new(client: Client) -> Self {
        Self::with_lookup(Arc::new(KubePullSecretLookup::new(client)))
    }

    pub fn with_lookup(lookup: Arc<dyn PullSecretLookup>) -> Self {
        Self { lookup }
    }

    /// Pull secret names for the context; a missing service account adds none.
    async fn pull_secret_names(&self, context: &CredentialContext) -> Result<Vec<String>> {
        let account = self
            .lookup
            .service_account(&context.namespace, &context.service_account)
            .await
            .map_err(|e| {
                Error::CredentialResolution(format!(
                    "reading service account {}/{}: {}",
                    context.namespace, context.service_account, e
                ))
            })?;

        if account.is_none() {
            debug!(
                namespace = %context.namespace,
                service_account = %context.service_account,
                "Service account not found, using pod pull secrets only"
            );
        }

        Ok(merge_pull_secret_names(&context.pull_secrets, account.as_ref()))
    }
}

#[async_trait]
impl RegistryCredentialProvider for KubeKeychain {
    async fn resolve(
        &self,
        context: &CredentialContext,
        reference: &ImageReference,
    ) -> Result<RegistryCredential> {
        let names = self.pull_secret_names(context).await?;

        let mut secrets = Vec::with_capacity(names.len());
        for name in &names {
            match self.lookup.pull_secret(&context.namespace, name).await {
                Ok(Some(secret)) => secrets.push(secret),
                Ok(None) => {
                    warn!(
                        namespace = %context.namespace,
                        secret = %name,
                        "Pull secret not found, skipping"
                    );
                }
                Err(e) => {
                    return Err(Error::CredentialResolution(format!(
                        "reading pull secret {}/{}: {}",
                        context.namespace, name, e
                    )));
                }
            }
        }

        let keychain = Keychain::from_secrets(&secrets)?;
        let credential = keychain.credential_for(reference.registry())?;
        debug!(
            namespace = %context.namespace,
            registry = %reference.registry(),
            pull_secrets = secrets.len(),
            anonymous = matches!(credential, RegistryCredential::Anonymous),
            "Resolved registry credentials"
        );
        Ok(credential)
    }
}
