pub mod common;

use common::MockLookup;
use viaauth::{
    arc::{
        ArcSealOutcome, ArcSealRequest, ArcSealer, ArcSignatureValidationResult, ArcVerifier,
        ChainValidationStatus, NotSealedReason, ARC_SEAL_NAME,
    },
    authres::{AuthenticationResults, AUTHENTICATION_RESULTS_NAME},
    crypto::SigningKey,
    header::HeaderFields,
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{SignRequest, Signer},
    verifier::{TxtLocator, VerificationStatus, Verifier, VerifierError},
};

fn make_locator(signing_key: &SigningKey) -> TxtLocator<MockLookup> {
    let record = common::ed25519_key_record(signing_key);
    common::make_locator([
        ("sel._domainkey.example.com.", record.clone()),
        ("arc._domainkey.example.org.", record.clone()),
        ("arc._domainkey.example.net.", record),
    ])
}

fn make_seal_request<'a>(domain: &str, signing_key: &'a SigningKey) -> ArcSealRequest<&'a SigningKey> {
    ArcSealRequest::new(
        DomainName::new(domain).unwrap(),
        Selector::new("arc").unwrap(),
        SignatureAlgorithm::Ed25519Sha256,
        signing_key,
    )
}

async fn make_rsa_locator() -> TxtLocator<MockLookup> {
    let record = common::rsa_key_record().await;
    common::make_locator([
        ("rsa._domainkey.example.org.", record.clone()),
        ("rsa._domainkey.example.net.", record),
    ])
}

fn make_rsa_seal_request<'a>(
    domain: &str,
    algorithm: SignatureAlgorithm,
    signing_key: &'a SigningKey,
) -> ArcSealRequest<&'a SigningKey> {
    ArcSealRequest::new(
        DomainName::new(domain).unwrap(),
        Selector::new("rsa").unwrap(),
        algorithm,
        signing_key,
    )
}

// Signs the message as the originator, and verifies and seals it at the
// first intermediary.
async fn first_hop(
    signing_key: &SigningKey,
    locator: &TxtLocator<MockLookup>,
    headers: &mut HeaderFields,
    body: &[u8],
) {
    let request = SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        SignatureAlgorithm::Ed25519Sha256,
        signing_key,
    );
    Signer::sign_message(request, headers, body).unwrap();

    let results = common::verify_all(&Verifier::default(), locator, headers, body).await;
    assert_eq!(results[0].status, VerificationStatus::Success);

    let mut request = make_seal_request("example.org", signing_key);
    request.results.push(results[0].to_method_result());

    let sealer = ArcSealer::new("mx.example.org");
    let outcome = sealer
        .seal_verified_message(&ArcVerifier::default(), locator, request, headers, body)
        .await
        .unwrap();

    let ArcSealOutcome::Sealed(result) = outcome else {
        panic!("first hop did not seal");
    };
    assert_eq!(result.instance, 1);
    assert_eq!(result.chain_validation, ChainValidationStatus::None);
}

#[tokio::test]
async fn seal_and_validate_chain() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let locator = make_locator(&signing_key);
    let verifier = ArcVerifier::default();

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let result = verifier.verify(&locator, &headers, &body).await;
    assert_eq!(result.chain, ArcSignatureValidationResult::None);

    first_hop(&signing_key, &locator, &mut headers, &body).await;

    let result = verifier.verify(&locator, &headers, &body).await;
    assert_eq!(result.chain, ArcSignatureValidationResult::Pass);
    assert_eq!(result.oldest_pass, Some(0));

    let sealer = ArcSealer::new("mx.example.net");
    let request = make_seal_request("example.net", &signing_key);
    let outcome = sealer
        .seal_verified_message(&verifier, &locator, request, &mut headers, &body)
        .await
        .unwrap();

    let ArcSealOutcome::Sealed(sealed) = outcome else {
        panic!("second hop did not seal");
    };
    assert_eq!(sealed.instance, 2);
    assert_eq!(sealed.chain_validation, ChainValidationStatus::Pass);
    assert_eq!(
        sealed.authentication_results.results.last().map(|r| r.result.as_str()),
        Some("pass")
    );

    let result = verifier.verify(&locator, &headers, &body).await;

    assert_eq!(result.chain, ArcSignatureValidationResult::Pass);
    assert_eq!(result.instances.len(), 2);
    assert_eq!(result.instances[0].instance, 2);
    assert!(result
        .instances
        .iter()
        .all(|i| i.message_signature == VerificationStatus::Success && i.seal == VerificationStatus::Success));

    let mut ar = AuthenticationResults::new("mx.example.net");
    ar.results.push(result.to_method_result());
    assert_eq!(ar.to_string(), "mx.example.net; arc=pass");
}

#[tokio::test]
async fn modified_message_reports_oldest_pass() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let locator = make_locator(&signing_key);
    let verifier = ArcVerifier::default();

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    first_hop(&signing_key, &locator, &mut headers, &body).await;

    // a mailing list rewrites the subject, but vouches for the chain
    let mut headers = common::replace_header(headers, "Subject", " [list] Lunch");

    let sealer = ArcSealer::new("lists.example.net");
    let mut request = make_seal_request("example.net", &signing_key);
    request.chain_validation = Some(ChainValidationStatus::Pass);
    sealer.seal_message(request, &mut headers, &body).unwrap();

    let result = verifier.verify(&locator, &headers, &body).await;

    assert_eq!(result.chain, ArcSignatureValidationResult::Pass);
    assert_eq!(result.oldest_pass, Some(2));
    assert_eq!(result.instances[1].message_signature, VerificationStatus::Failure(
        viaauth::VerifierError::VerificationFailure(viaauth::crypto::VerificationError::VerificationFailure)
    ));
    assert_eq!(result.instances[1].seal, VerificationStatus::Success);
    assert_eq!(
        result.to_method_result().property("header", "oldest-pass"),
        Some("2")
    );
}

#[tokio::test]
async fn failed_chain_is_not_extended() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let locator = make_locator(&signing_key);
    let verifier = ArcVerifier::default();

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    first_hop(&signing_key, &locator, &mut headers, &body).await;

    // the modification breaks the newest message signature
    let mut headers = common::replace_header(headers, "Subject", " [list] Lunch");

    let sealer = ArcSealer::new("mx.example.net");
    let request = make_seal_request("example.net", &signing_key);
    let outcome = sealer
        .seal_verified_message(&verifier, &locator, request, &mut headers, &body)
        .await
        .unwrap();

    let ArcSealOutcome::Sealed(sealed) = outcome else {
        panic!("second hop did not seal");
    };
    assert_eq!(sealed.chain_validation, ChainValidationStatus::Fail);

    let result = verifier.verify(&locator, &headers, &body).await;
    assert_eq!(result.chain, ArcSignatureValidationResult::Fail);
    assert_eq!(result.oldest_pass, None);

    let header_count = headers.len();
    let seal_index = headers.position(ARC_SEAL_NAME);

    let request = make_seal_request("example.net", &signing_key);
    let outcome = sealer.seal_message(request, &mut headers, &body).unwrap();

    assert_eq!(outcome, ArcSealOutcome::NotSealed(NotSealedReason::ChainFailed));
    assert_eq!(headers.len(), header_count);
    assert_eq!(headers.position(ARC_SEAL_NAME), seal_index);
}

#[tokio::test]
async fn incoming_results_merged() {
    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();

    let mut headers = common::make_header_fields();
    headers.prepend((
        viaauth::FieldName::new(AUTHENTICATION_RESULTS_NAME).unwrap(),
        viaauth::FieldBody::new(&b" mx.example.org; spf=pass smtp.mailfrom=example.com"[..]).unwrap(),
    ));
    headers.prepend((
        viaauth::FieldName::new(AUTHENTICATION_RESULTS_NAME).unwrap(),
        viaauth::FieldBody::new(&b" MX.example.org; dmarc=pass header.from=example.com"[..]).unwrap(),
    ));
    let body = common::make_body();

    let sealer = ArcSealer::new("mx.example.org");
    let outcome = sealer
        .seal_message(make_seal_request("example.org", &signing_key), &mut headers, &body)
        .unwrap();

    let ArcSealOutcome::Sealed(sealed) = outcome else {
        panic!("not sealed");
    };

    let methods: Vec<_> = sealed
        .authentication_results
        .results
        .iter()
        .map(|r| r.method.as_str())
        .collect();
    assert_eq!(methods, ["dmarc", "spf"]);
    assert_eq!(sealed.authentication_results.instance, Some(1));
}

#[tokio::test]
async fn rsa_sha1_seal_needs_enabled_algorithm() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let locator = make_rsa_locator().await;
    let mut verifier = ArcVerifier::default();

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let sealer = ArcSealer::new("mx.example.org");
    let request = make_rsa_seal_request("example.org", SignatureAlgorithm::RsaSha1, &signing_key);
    let outcome = sealer.seal_message(request, &mut headers, &body).unwrap();
    assert!(matches!(outcome, ArcSealOutcome::Sealed(_)));

    let result = verifier.verify(&locator, &headers, &body).await;

    assert_eq!(result.chain, ArcSignatureValidationResult::Fail);
    assert_eq!(result.oldest_pass, None);
    assert!(result.reason.as_deref().map_or(false, |r| r.contains("not enabled")));
    assert_eq!(
        result.instances[0].seal,
        VerificationStatus::Failure(VerifierError::DisabledAlgorithm)
    );
    assert_eq!(
        result.instances[0].message_signature,
        VerificationStatus::Failure(VerifierError::DisabledAlgorithm)
    );

    verifier.algorithms_mut().enable(SignatureAlgorithm::RsaSha1);

    let result = verifier.verify(&locator, &headers, &body).await;

    assert_eq!(result.chain, ArcSignatureValidationResult::Pass);
    assert_eq!(result.oldest_pass, Some(0));
}

#[tokio::test]
async fn rsa_chain_with_mixed_algorithms() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let locator = make_rsa_locator().await;

    let mut verifier = ArcVerifier::default();
    verifier.algorithms_mut().enable(SignatureAlgorithm::RsaSha1);

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let request = make_rsa_seal_request("example.org", SignatureAlgorithm::RsaSha1, &signing_key);
    ArcSealer::new("mx.example.org")
        .seal_message(request, &mut headers, &body)
        .unwrap();

    let sealer = ArcSealer::new("mx.example.net");
    let request = make_rsa_seal_request("example.net", SignatureAlgorithm::RsaSha256, &signing_key);
    let outcome = sealer
        .seal_verified_message(&verifier, &locator, request, &mut headers, &body)
        .await
        .unwrap();

    let ArcSealOutcome::Sealed(sealed) = outcome else {
        panic!("second hop did not seal");
    };
    assert_eq!(sealed.instance, 2);
    assert_eq!(sealed.chain_validation, ChainValidationStatus::Pass);
    assert_eq!(sealed.seal.algorithm, SignatureAlgorithm::RsaSha256);
    assert_eq!(sealed.message_signature.algorithm, SignatureAlgorithm::RsaSha256);

    let result = verifier.verify(&locator, &headers, &body).await;

    assert_eq!(result.chain, ArcSignatureValidationResult::Pass);
    assert_eq!(result.oldest_pass, Some(0));
    assert_eq!(result.instances.len(), 2);

    // without rsa-sha1, the older seal no longer verifies and fails the chain
    let result = ArcVerifier::default().verify(&locator, &headers, &body).await;

    assert_eq!(result.chain, ArcSignatureValidationResult::Fail);
    assert_eq!(result.instances[0].instance, 2);
    assert_eq!(result.instances[0].seal, VerificationStatus::Success);
    assert_eq!(result.instances[0].message_signature, VerificationStatus::Success);
    assert_eq!(
        result.instances[1].seal,
        VerificationStatus::Failure(VerifierError::DisabledAlgorithm)
    );
}
