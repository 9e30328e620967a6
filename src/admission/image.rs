//! Container image reference parsing.

use std::str::FromStr;

use oci_client::Reference;

use super::error::{Error, Result};

/// A parsed container image reference (registry, repository, tag or digest).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ImageReference {
    inner: Reference,
}

impl ImageReference {
    /// Parse an image string as written in a pod spec.
    pub fn parse(image: &str) -> Result<Self> {
        let inner = Reference::from_str(image).map_err(|e| Error::InvalidImageReference {
            image: image.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { inner })
    }

    /// Registry host as written (`docker.io` for implicit Docker Hub images)
    pub fn registry(&self) -> &str {
        self.inner.registry()
    }

    pub fn repository(&self) -> &str {
        self.inner.repository()
    }

    pub fn tag(&self) -> Option<&str> {
        self.inner.tag()
    }

    pub fn digest(&self) -> Option<&str> {
        self.inner.digest()
    }

    /// Fully qualified form, e.g. `docker.io/library/nginx:latest`
    pub fn whole(&self) -> String {
        self.inner.whole()
    }
}

impl FromStr for ImageReference {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl std::fmt::Display for ImageReference {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.inner.whole())
    }
}
