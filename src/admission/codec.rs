//! AdmissionReview wire codec.
//!
//! Decoding turns raw request bytes into a typed admission request; encoding
//! turns a [`Verdict`] back into an `admission.k8s.io/v1` AdmissionReview
//! carrying the original request uid.

use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use kube::core::response::Status;

use super::error::{Error, Result};
use super::verdict::Verdict;

/// Admission API version spoken on the wire
pub const ADMISSION_API_VERSION: &str = "admission.k8s.io/v1";
/// Envelope kind spoken on the wire
pub const ADMISSION_KIND: &str = "AdmissionReview";

/// Decode an AdmissionReview body into its embedded request.
pub fn decode_request(body: &[u8]) -> Result<AdmissionRequest<DynamicObject>> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_slice(body).map_err(Error::MalformedEnvelope)?;
    review.try_into().map_err(|_| Error::MissingRequestBody)
}

/// Build the AdmissionReview answering `request` with `verdict`.
pub fn response_review(
    request: &AdmissionRequest<DynamicObject>,
    verdict: &Verdict,
) -> AdmissionReview<DynamicObject> {
    let mut response = AdmissionResponse::from(request);
    response.uid = verdict.uid().to_string();
    response.allowed = verdict.allowed();

    let decision = verdict.decision();
    let mut status = if decision.allowed() {
        Status::success()
    } else {
        Status::failure(decision.message(), decision.reason())
    };
    status.code = decision.code();
    status.message = decision.message().to_string();
    response.result = status;

    response.into_review()
}

/// Serialize the AdmissionReview answering `request` with `verdict`.
pub fn encode_verdict(
    request: &AdmissionRequest<DynamicObject>,
    verdict: &Verdict,
) -> Result<Vec<u8>> {
    Ok(serde_json::to_vec(&response_review(request, verdict))?)
}

/// Minimal failure envelope used when the regular encoding fails.
///
/// Built without a serializer so it cannot fail itself.
pub fn fallback_envelope(uid: &str) -> Vec<u8> {
    let uid = serde_json::Value::String(uid.to_string());
    format!(
        r#"{{"apiVersion":"{ADMISSION_API_VERSION}","kind":"{ADMISSION_KIND}","response":{{"uid":{uid},"allowed":false,"status":{{"status":"Failure","code":500,"reason":"InternalError","message":"internal error"}}}}}}"#
    )
    .into_bytes()
}
