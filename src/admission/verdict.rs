//! Admission verdicts.
//!
//! A [`Verdict`] is the terminal product of one pipeline run. The mapping
//! from pipeline outcome to `{allowed, code, status, message}` is fixed:
//!
//! | Decision                 | Allowed | Code | Message                          |
//! |--------------------------|---------|------|----------------------------------|
//! | Skip                     | true    | 200  | image verification skipped       |
//! | Allow                    | true    | 200  | image verified                   |
//! | Deny(VerificationFailed) | false   | 403  | image verification failed        |
//! | Deny(InvalidReference)   | false   | 403  | image reference invalid          |
//! | Deny(InvalidPublicKey)   | false   | 403  | public key invalid               |
//! | Deny(RegistryAuthFailed) | false   | 403  | registry authentication failed   |
//! | InternalError            | false   | 500  | internal error                   |

use super::error::Error;

/// Status string for allowing verdicts
pub const STATUS_SUCCESS: &str = "Success";
/// Status string for rejecting verdicts
pub const STATUS_FAILURE: &str = "Failure";

/// Why a workload was denied
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DenyReason {
    VerificationFailed,
    InvalidReference,
    InvalidPublicKey,
    RegistryAuthFailed,
}

impl DenyReason {
    /// Machine-readable reason placed in `status.reason`
    pub fn reason(&self) -> &'static str {
        match self {
            DenyReason::VerificationFailed => "VerificationFailed",
            DenyReason::InvalidReference => "InvalidImageReference",
            DenyReason::InvalidPublicKey => "InvalidPublicKey",
            DenyReason::RegistryAuthFailed => "RegistryAuthenticationFailed",
        }
    }
}

/// Outcome of the decision pipeline
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Decision {
    /// No trust anchor configured for the workload
    Skip,
    /// Signature verified
    Allow,
    /// Verification could not establish trust
    Deny(DenyReason),
    /// The verdict could not be produced normally
    InternalError,
}

impl Decision {
    /// Map a domain error to the decision it produces.
    ///
    /// Protocol errors never reach a verdict; they map to `InternalError`
    /// only so the mapping is total.
    pub fn for_error(error: &Error) -> Self {
        match error {
            Error::InvalidImageReference { .. } => Decision::Deny(DenyReason::InvalidReference),
            Error::PublicKeyDecode(_) => Decision::Deny(DenyReason::InvalidPublicKey),
            Error::CredentialResolution(_) => Decision::Deny(DenyReason::RegistryAuthFailed),
            Error::Verification(_) => Decision::Deny(DenyReason::VerificationFailed),
            Error::MalformedEnvelope(_)
            | Error::MissingRequestBody
            | Error::MalformedWorkload(_)
            | Error::Encoding(_) => Decision::InternalError,
        }
    }

    pub fn allowed(&self) -> bool {
        matches!(self, Decision::Skip | Decision::Allow)
    }

    /// Numeric code placed in `status.code`
    pub fn code(&self) -> u16 {
        match self {
            Decision::Skip | Decision::Allow => 200,
            Decision::Deny(_) => 403,
            Decision::InternalError => 500,
        }
    }

    /// Short status string placed in `status.status`
    pub fn status(&self) -> &'static str {
        if self.allowed() {
            STATUS_SUCCESS
        } else {
            STATUS_FAILURE
        }
    }

    /// Human-readable message placed in `status.message`
    pub fn message(&self) -> &'static str {
        match self {
            Decision::Skip => "image verification skipped",
            Decision::Allow => "image verified",
            Decision::Deny(DenyReason::VerificationFailed) => "image verification failed",
            Decision::Deny(DenyReason::InvalidReference) => "image reference invalid",
            Decision::Deny(DenyReason::InvalidPublicKey) => "public key invalid",
            Decision::Deny(DenyReason::RegistryAuthFailed) => "registry authentication failed",
            Decision::InternalError => "internal error",
        }
    }

    /// Machine-readable reason, empty for allowing decisions
    pub fn reason(&self) -> &'static str {
        match self {
            Decision::Skip | Decision::Allow => "",
            Decision::Deny(reason) => reason.reason(),
            Decision::InternalError => "InternalError",
        }
    }

    /// Label value used by the verdict metrics
    pub fn label(&self) -> &'static str {
        match self {
            Decision::Skip => "skip",
            Decision::Allow => "allow",
            Decision::Deny(_) => "deny",
            Decision::InternalError => "internal_error",
        }
    }
}

impl std::fmt::Display for Decision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// A decision bound to the request it answers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Verdict {
    decision: Decision,
    uid: String,
}

impl Verdict {
    pub fn new(decision: Decision, uid: impl Into<String>) -> Self {
        Self {
            decision,
            uid: uid.into(),
        }
    }

    pub fn skip(uid: impl Into<String>) -> Self {
        Self::new(Decision::Skip, uid)
    }

    pub fn allow(uid: impl Into<String>) -> Self {
        Self::new(Decision::Allow, uid)
    }

    pub fn deny(reason: DenyReason, uid: impl Into<String>) -> Self {
        Self::new(Decision::Deny(reason), uid)
    }

    /// Verdict for a domain error
    pub fn from_error(error: &Error, uid: impl Into<String>) -> Self {
        Self::new(Decision::for_error(error), uid)
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    /// Correlation id of the originating request
    pub fn uid(&self) -> &str {
        &self.uid
    }

    pub fn allowed(&self) -> bool {
        self.decision.allowed()
    }

    pub fn code(&self) -> u16 {
        self.decision.code()
    }

    pub fn status(&self) -> &'static str {
        self.decision.status()
    }

    pub fn message(&self) -> &'static str {
        self.decision.message()
    }
}
