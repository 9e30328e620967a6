//! Signature verification.
//!
//! [`SignatureVerifier`] is the seam between the decision pipeline and the
//! cryptography. [`CosignVerifier`] is the production implementation: it
//! fetches the cosign signature image for the reference and checks that at
//! least one signature validates against the public key (ECDSA P-256 with
//! SHA-256, or P-384 with SHA-384).

use std::str::FromStr;

use async_trait::async_trait;
use sigstore::cosign::verification_constraint::{PublicKeyVerifier, VerificationConstraintVec};
use sigstore::cosign::{ClientBuilder, CosignCapabilities, verify_constraints};
use sigstore::crypto::{CosignVerificationKey, SigningScheme};
use sigstore::errors::SigstoreVerifyConstraintsError;
use sigstore::registry::{Auth, OciReference};

use super::credentials::RegistryCredential;
use super::error::{Error, Result};
use super::image::ImageReference;

/// ECDSA curves accepted for trust anchors
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EcdsaCurve {
    P256,
    P384,
}

impl EcdsaCurve {
    /// Curves tried, in order, when decoding a key
    pub const ALL: [EcdsaCurve; 2] = [EcdsaCurve::P256, EcdsaCurve::P384];

    /// Cosign signing scheme for signatures made with this curve
    pub fn signing_scheme(&self) -> SigningScheme {
        match self {
            EcdsaCurve::P256 => SigningScheme::ECDSA_P256_SHA256_ASN1,
            EcdsaCurve::P384 => SigningScheme::ECDSA_P384_SHA384_ASN1,
        }
    }
}

/// A decoded trust anchor.
#[derive(Clone, PartialEq, Eq)]
pub struct PublicKey {
    pem: String,
    curve: EcdsaCurve,
}

impl PublicKey {
    /// Decode a PEM encoded ECDSA public key on one of [`EcdsaCurve::ALL`].
    pub fn from_pem(pem: &str) -> Result<Self> {
        let pem = pem.trim();
        let mut last_error = None;
        for curve in EcdsaCurve::ALL {
            match CosignVerificationKey::from_pem(pem.as_bytes(), &curve.signing_scheme()) {
                Ok(_) => {
                    return Ok(Self {
                        pem: pem.to_string(),
                        curve,
                    });
                }
                Err(e) => last_error = Some(e.to_string()),
            }
        }
        Err(Error::PublicKeyDecode(
            last_error.unwrap_or_else(|| "no supported curve".to_string()),
        ))
    }

    pub fn as_pem(&self) -> &str {
        &self.pem
    }

    pub fn curve(&self) -> EcdsaCurve {
        self.curve
    }
}

impl std::fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PublicKey(<redacted>)")
    }
}

/// Result of checking an image's signatures
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// At least one signature validated
    Verified,
    /// Signatures were fetched but none validated (or none exist)
    Unverified(String),
    /// Verification could not be carried out
    Error(String),
}

/// Checks image signatures against a public key.
#[async_trait]
pub trait SignatureVerifier: Send + Sync {
    async fn verify(
        &self,
        reference: &ImageReference,
        key: &PublicKey,
        credential: &RegistryCredential,
    ) -> VerificationOutcome;
}

/// Cosign signature verification against an OCI registry.
#[derive(Clone, Debug, Default)]
pub struct CosignVerifier;

impl CosignVerifier {
    pub fn new() -> Self {
        Self
    }
}

fn registry_auth(credential: &RegistryCredential) -> Auth {
    match credential {
        RegistryCredential::Anonymous => Auth::Anonymous,
        RegistryCredential::Basic { username, password } => {
            Auth::Basic(username.clone(), password.clone())
        }
    }
}

#[async_trait]
impl SignatureVerifier for CosignVerifier {
    async fn verify(
        &self,
        reference: &ImageReference,
        key: &PublicKey,
        credential: &RegistryCredential,
    ) -> VerificationOutcome {
        let image_ref = match OciReference::from_str(&reference.whole()) {
            Ok(image_ref) => image_ref,
            Err(e) => return VerificationOutcome::Error(format!("reference: {e}")),
        };
        let auth = registry_auth(credential);

        let mut client = match ClientBuilder::default().build() {
            Ok(client) => client,
            Err(e) => return VerificationOutcome::Error(format!("cosign client: {e}")),
        };

        let (cosign_image, source_image_digest) = match client.triangulate(&image_ref, &auth).await
        {
            Ok(triangulated) => triangulated,
            Err(e) => return VerificationOutcome::Error(format!("triangulate: {e}")),
        };

        let signature_layers = match client
            .trusted_signature_layers(&auth, &source_image_digest, &cosign_image)
            .await
        {
            Ok(layers) => layers,
            Err(e) => return VerificationOutcome::Error(format!("fetch signatures: {e}")),
        };

        if signature_layers.is_empty() {
            return VerificationOutcome::Unverified("no signatures found".to_string());
        }

        let scheme = key.curve().signing_scheme();
        let pub_key_verifier = match PublicKeyVerifier::new(key.as_pem().as_bytes(), &scheme) {
            Ok(verifier) => verifier,
            Err(e) => return VerificationOutcome::Error(format!("public key: {e}")),
        };
        let constraints: VerificationConstraintVec = vec![Box::new(pub_key_verifier)];

        match verify_constraints(&signature_layers, constraints.iter()) {
            Ok(()) => VerificationOutcome::Verified,
            Err(SigstoreVerifyConstraintsError {
                unsatisfied_constraints,
            }) => VerificationOutcome::Unverified(format!(
                "none of {} signature layer(s) satisfied the public key ({} constraint(s) unsatisfied)",
                signature_layers.len(),
                unsatisfied_constraints.len()
            )),
        }
    }
}
