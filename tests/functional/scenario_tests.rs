//! End-to-end pipeline scenarios.

use std::sync::atomic::Ordering;
use std::time::Duration;

use serde_json::Value;

use cosignwebhook::admission::{Decision, DenyReason, Error, RegistryCredential, Reply, Verdict};

use crate::common::fixtures::{
    DEFAULT_IMAGE, PUBLIC_KEY_A, PUBLIC_KEY_B, PUBLIC_KEY_P384, PodReviewBuilder,
};
use crate::common::mocks::{Harness, MockCredentials, MockSecretStore, MockVerifier};

/// Run the pipeline and return the verdict plus the decoded response body.
async fn decide(harness: &Harness, body: &[u8]) -> (Verdict, Value) {
    match harness.pipeline.process(body).await {
        Reply::Decided { verdict, body } => (verdict, serde_json::from_slice(&body).unwrap()),
        other => panic!("expected a verdict, got {:?}", other),
    }
}

fn assert_response(response: &Value, uid: &str, allowed: bool, code: u16, message: &str) {
    assert_eq!(response["apiVersion"], "admission.k8s.io/v1");
    assert_eq!(response["kind"], "AdmissionReview");
    assert_eq!(response["response"]["uid"], uid);
    assert_eq!(response["response"]["allowed"], allowed);
    assert_eq!(response["response"]["status"]["code"], code);
    assert_eq!(response["response"]["status"]["message"], message);
}

#[tokio::test]
async fn test_no_key_skips_verification() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::unverified(),
    );
    let body = PodReviewBuilder::new("uid-skip").body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Skip);
    assert_response(&response, "uid-skip", true, 200, "image verification skipped");
    assert_eq!(response["response"]["status"]["status"], "Success");
    assert_eq!(harness.secret_calls(), 1);
    assert_eq!(harness.credential_calls(), 0);
    assert_eq!(harness.verifier_calls(), 0);
    assert!(harness.audit.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_inline_key_verified_allows() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-allow")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Allow);
    assert_eq!(verdict.uid(), "uid-allow");
    assert_response(&response, "uid-allow", true, 200, "image verified");
    assert_eq!(harness.verifier_calls(), 1);
    assert_eq!(
        harness.verifier.last_reference.lock().unwrap().as_deref(),
        Some(DEFAULT_IMAGE)
    );
    assert_eq!(
        harness.audit.events.lock().unwrap().as_slice(),
        ["apps/web".to_string()]
    );
    // Inline key means the secret is never read
    assert_eq!(harness.secret_calls(), 0);
}

#[tokio::test]
async fn test_inline_key_unverified_denies() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::unverified(),
    );
    let body = PodReviewBuilder::new("uid-deny")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(
        verdict.decision(),
        Decision::Deny(DenyReason::VerificationFailed)
    );
    assert_response(&response, "uid-deny", false, 403, "image verification failed");
    assert_eq!(response["response"]["status"]["status"], "Failure");
    assert!(harness.audit.events.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_verifier_error_denies() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::erroring(),
    );
    let body = PodReviewBuilder::new("uid-err")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(
        verdict.decision(),
        Decision::Deny(DenyReason::VerificationFailed)
    );
    assert_response(&response, "uid-err", false, 403, "image verification failed");
}

#[tokio::test]
async fn test_invalid_image_reference_denies_without_verifying() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-ref")
        .image("not a valid ref!!")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(
        verdict.decision(),
        Decision::Deny(DenyReason::InvalidReference)
    );
    assert_response(&response, "uid-ref", false, 403, "image reference invalid");
    assert_eq!(harness.credential_calls(), 0);
    assert_eq!(harness.verifier_calls(), 0);
}

#[tokio::test]
async fn test_malformed_public_key_denies_without_verifying() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-key")
        .inline_key("this is not a public key")
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(
        verdict.decision(),
        Decision::Deny(DenyReason::InvalidPublicKey)
    );
    assert_response(&response, "uid-key", false, 403, "public key invalid");
    assert_eq!(harness.credential_calls(), 0);
    assert_eq!(harness.verifier_calls(), 0);
}

#[tokio::test]
async fn test_p384_inline_key_is_accepted() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-p384")
        .inline_key(PUBLIC_KEY_P384)
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Allow);
    assert_response(&response, "uid-p384", true, 200, "image verified");
    assert_eq!(harness.verifier_calls(), 1);
}

#[tokio::test]
async fn test_credential_failure_denies() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::failing("service account lookup forbidden"),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-cred")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, response) = decide(&harness, &body).await;

    assert_eq!(
        verdict.decision(),
        Decision::Deny(DenyReason::RegistryAuthFailed)
    );
    assert_response(&response, "uid-cred", false, 403, "registry authentication failed");
    assert_eq!(harness.verifier_calls(), 0);
}

#[tokio::test]
async fn test_inline_key_wins_over_stored_secret() {
    let harness = Harness::new(
        MockSecretStore::with_key("apps", PUBLIC_KEY_B),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-precedence")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, _) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Allow);
    assert_eq!(
        harness.verifier.last_key.lock().unwrap().as_deref(),
        Some(PUBLIC_KEY_A)
    );
    assert_eq!(harness.secret_calls(), 0);
}

#[tokio::test]
async fn test_stored_secret_used_without_inline_key() {
    let harness = Harness::new(
        MockSecretStore::with_key("apps", PUBLIC_KEY_B),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-secret").body();

    let (verdict, _) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Allow);
    assert_eq!(
        harness.verifier.last_key.lock().unwrap().as_deref(),
        Some(PUBLIC_KEY_B)
    );
}

#[tokio::test]
async fn test_secret_in_other_namespace_is_ignored() {
    let harness = Harness::new(
        MockSecretStore::with_key("other", PUBLIC_KEY_B),
        MockCredentials::anonymous(),
        MockVerifier::unverified(),
    );
    let body = PodReviewBuilder::new("uid-ns").body();

    let (verdict, _) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Skip);
}

#[tokio::test]
async fn test_unavailable_secret_store_skips() {
    let harness = Harness::new(
        MockSecretStore::unavailable(),
        MockCredentials::anonymous(),
        MockVerifier::unverified(),
    );
    let body = PodReviewBuilder::new("uid-down").body();

    let (verdict, _) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Skip);
    assert_eq!(harness.verifier_calls(), 0);
}

#[tokio::test]
async fn test_only_first_container_is_verified() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-sidecar")
        .inline_key(PUBLIC_KEY_A)
        .sidecar("not a valid ref!!")
        .body();

    let (verdict, _) = decide(&harness, &body).await;

    assert_eq!(verdict.decision(), Decision::Allow);
    assert_eq!(harness.verifier_calls(), 1);
}

#[tokio::test]
async fn test_credential_context_from_pod_identity() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::returning(Ok(RegistryCredential::Basic {
            username: "robot".to_string(),
            password: "token".to_string(),
        })),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid-ctx")
        .namespace("payments")
        .service_account("deployer")
        .pull_secret("regcred")
        .pull_secret("mirror")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, _) = decide(&harness, &body).await;
    assert_eq!(verdict.decision(), Decision::Allow);

    let context = harness.credentials.last_context.lock().unwrap().clone().unwrap();
    assert_eq!(context.namespace, "payments");
    assert_eq!(context.service_account, "deployer");
    assert_eq!(context.pull_secrets, vec!["regcred", "mirror"]);
}

#[tokio::test]
async fn test_missing_request_is_rejected_before_verifying() {
    let harness = Harness::new(
        MockSecretStore::with_key("apps", PUBLIC_KEY_A),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid").without_request().body();

    let reply = harness.pipeline.process(&body).await;

    assert!(matches!(reply, Reply::Rejected(Error::MissingRequestBody)));
    assert_eq!(harness.secret_calls(), 0);
    assert_eq!(harness.verifier_calls(), 0);
    assert!(harness.metrics.decisions.lock().unwrap().is_empty());
}

#[tokio::test]
async fn test_malformed_envelope_is_rejected() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );

    let reply = harness.pipeline.process(b"{\"apiVersion\": 42").await;

    assert!(matches!(reply, Reply::Rejected(Error::MalformedEnvelope(_))));
    assert_eq!(harness.metrics.processed.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_pod_without_containers_is_rejected() {
    let harness = Harness::new(
        MockSecretStore::with_key("apps", PUBLIC_KEY_A),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );
    let body = PodReviewBuilder::new("uid").no_containers().body();

    let reply = harness.pipeline.process(&body).await;

    assert!(matches!(reply, Reply::Rejected(Error::MalformedWorkload(_))));
    assert_eq!(harness.verifier_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_slow_verifier_times_out_to_deny() {
    let harness = Harness::with_timeout(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::slow(Duration::from_secs(600)),
        Duration::from_secs(2),
    );
    let body = PodReviewBuilder::new("uid-slow")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let (verdict, _) = decide(&harness, &body).await;

    assert_eq!(
        verdict.decision(),
        Decision::Deny(DenyReason::VerificationFailed)
    );
}

#[tokio::test]
async fn test_metrics_observe_each_outcome() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::verified(),
    );

    decide(&harness, &PodReviewBuilder::new("a").body()).await;
    decide(
        &harness,
        &PodReviewBuilder::new("b").inline_key(PUBLIC_KEY_A).body(),
    )
    .await;
    decide(
        &harness,
        &PodReviewBuilder::new("c")
            .inline_key(PUBLIC_KEY_A)
            .image("not a valid ref!!")
            .body(),
    )
    .await;

    assert_eq!(harness.metrics.processed.load(Ordering::SeqCst), 3);
    assert_eq!(
        harness.metrics.decisions.lock().unwrap().as_slice(),
        [
            Decision::Skip,
            Decision::Allow,
            Decision::Deny(DenyReason::InvalidReference)
        ]
    );
}

#[tokio::test]
async fn test_identical_input_yields_identical_response() {
    let harness = Harness::new(
        MockSecretStore::empty(),
        MockCredentials::anonymous(),
        MockVerifier::unverified(),
    );
    let body = PodReviewBuilder::new("uid-det")
        .inline_key(PUBLIC_KEY_A)
        .body();

    let first = match harness.pipeline.process(&body).await {
        Reply::Decided { body, .. } => body,
        other => panic!("expected a verdict, got {:?}", other),
    };
    let second = match harness.pipeline.process(&body).await {
        Reply::Decided { body, .. } => body,
        other => panic!("expected a verdict, got {:?}", other),
    };

    assert_eq!(first, second);
}
