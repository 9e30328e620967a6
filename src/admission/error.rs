//! Error types for the admission pipeline.
//!
//! Errors are split into two families:
//! - protocol errors, which reject the HTTP request before a verdict exists
//! - domain errors, which always become a well-formed Deny verdict

use thiserror::Error;

/// Error type for admission pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    /// The outer AdmissionReview could not be parsed
    #[error("Malformed admission envelope: {0}")]
    MalformedEnvelope(#[source] serde_json::Error),

    /// The envelope parsed but carries no `request`
    #[error("AdmissionReview request not found")]
    MissingRequestBody,

    /// The embedded object is not a usable Pod
    #[error("Malformed workload: {0}")]
    MalformedWorkload(String),

    /// The first container's image string is not a valid reference
    #[error("Invalid image reference {image:?}: {reason}")]
    InvalidImageReference { image: String, reason: String },

    /// The trust anchor is not a decodable public key
    #[error("Public key decode error: {0}")]
    PublicKeyDecode(String),

    /// Registry credentials could not be established
    #[error("Credential resolution error: {0}")]
    CredentialResolution(String),

    /// The image signature did not verify against the trust anchor
    #[error("Verification failure: {0}")]
    Verification(String),

    /// The verdict could not be serialized
    #[error("Encoding error: {0}")]
    Encoding(#[from] serde_json::Error),
}

impl Error {
    /// Check if this error rejects the request at the transport level
    pub fn is_protocol_error(&self) -> bool {
        matches!(
            self,
            Error::MalformedEnvelope(_) | Error::MissingRequestBody | Error::MalformedWorkload(_)
        )
    }

    /// Pipeline step name used in log fields
    pub fn step(&self) -> &'static str {
        match self {
            Error::MalformedEnvelope(_) | Error::MissingRequestBody => "decode",
            Error::MalformedWorkload(_) => "extract_workload",
            Error::InvalidImageReference { .. } => "resolve_reference",
            Error::PublicKeyDecode(_) => "decode_public_key",
            Error::CredentialResolution(_) => "resolve_credentials",
            Error::Verification(_) => "verify",
            Error::Encoding(_) => "encode",
        }
    }
}

/// Result type alias for admission operations
pub type Result<T> = std::result::Result<T, Error>;
