//! Workload extraction from admission requests.
//!
//! Only the first container of a pod is considered, both for the trust
//! anchor lookup and for the image that gets verified. Sidecars and init
//! containers are not checked.

use k8s_openapi::api::core::v1::{Container, Pod};
use kube::core::DynamicObject;
use kube::core::admission::AdmissionRequest;

use super::error::{Error, Result};

/// A pod under admission, with the identity fields the pipeline needs.
#[derive(Clone, Debug)]
pub struct Workload {
    /// Namespace the pod is created in
    pub namespace: String,
    /// Pod name (falls back to `generateName` for generated pods)
    pub name: String,
    pod: Pod,
}

impl Workload {
    /// Deserialize the embedded object of an admission request into a pod.
    pub fn from_request(request: &AdmissionRequest<DynamicObject>) -> Result<Self> {
        let object = request
            .object
            .as_ref()
            .ok_or_else(|| Error::MalformedWorkload("request carries no object".to_string()))?;

        let value =
            serde_json::to_value(object).map_err(|e| Error::MalformedWorkload(e.to_string()))?;
        let pod: Pod =
            serde_json::from_value(value).map_err(|e| Error::MalformedWorkload(e.to_string()))?;

        let namespace = pod
            .metadata
            .namespace
            .clone()
            .filter(|ns| !ns.is_empty())
            .or_else(|| request.namespace.clone())
            .unwrap_or_else(|| "default".to_string());

        let name = pod
            .metadata
            .name
            .clone()
            .filter(|n| !n.is_empty())
            .or_else(|| Some(request.name.clone()).filter(|n| !n.is_empty()))
            .or_else(|| pod.metadata.generate_name.clone())
            .unwrap_or_default();

        Ok(Self {
            namespace,
            name,
            pod,
        })
    }

    /// Build a workload directly from a pod (namespace defaults to `default`).
    pub fn from_pod(pod: Pod) -> Self {
        let namespace = pod
            .metadata
            .namespace
            .clone()
            .unwrap_or_else(|| "default".to_string());
        let name = pod.metadata.name.clone().unwrap_or_default();
        Self {
            namespace,
            name,
            pod,
        }
    }

    /// The underlying pod object
    pub fn pod(&self) -> &Pod {
        &self.pod
    }

    /// The first container, the only one subject to verification.
    pub fn first_container(&self) -> Result<&Container> {
        self.pod
            .spec
            .as_ref()
            .and_then(|spec| spec.containers.first())
            .ok_or_else(|| Error::MalformedWorkload(format!("pod {} has no containers", self)))
    }

    /// Image string of the first container
    pub fn image(&self) -> Result<&str> {
        self.first_container()?
            .image
            .as_deref()
            .ok_or_else(|| Error::MalformedWorkload(format!("pod {} has no image set", self)))
    }

    /// Literal value of an environment entry on the first container.
    ///
    /// Entries populated through `valueFrom` have no literal value and are
    /// reported as `None`.
    pub fn env_value(&self, name: &str) -> Result<Option<&str>> {
        let container = self.first_container()?;
        Ok(container
            .env
            .iter()
            .flatten()
            .find(|var| var.name == name)
            .and_then(|var| var.value.as_deref()))
    }

    /// Service account the pod runs as
    pub fn service_account(&self) -> Option<&str> {
        self.pod
            .spec
            .as_ref()
            .and_then(|spec| spec.service_account_name.as_deref())
            .filter(|sa| !sa.is_empty())
    }

    /// Names of the pull secrets declared on the pod, in declaration order.
    pub fn pull_secret_names(&self) -> Vec<String> {
        self.pod
            .spec
            .as_ref()
            .and_then(|spec| spec.image_pull_secrets.as_ref())
            .map(|secrets| {
                secrets
                    .iter()
                    .map(|s| s.name.clone())
                    .filter(|n| !n.is_empty())
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl std::fmt::Display for Workload {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.namespace, self.name)
    }
}
