pub mod common;

use std::time::{Duration, UNIX_EPOCH};
use viaauth::{
    header::{FieldName, HeaderFields},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{BodyLength, HeaderSelection, SignRequest, Signer, Timestamp},
    verifier::{Config, ErrorKind, PolicyError, VerificationStatus, Verifier, VerifierError},
};

fn make_request<T>(algorithm: SignatureAlgorithm, signing_key: T) -> SignRequest<T> {
    SignRequest::new(
        DomainName::new("example.com").unwrap(),
        Selector::new("sel").unwrap(),
        algorithm,
        signing_key,
    )
}

#[tokio::test]
async fn rsa_sign_and_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let locator = common::make_locator([("sel._domainkey.example.com.", common::rsa_key_record().await)]);

    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let request = make_request(SignatureAlgorithm::RsaSha256, signing_key);

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let result = Signer::sign_message(request, &mut headers, &body).unwrap();

    assert_eq!(headers.as_ref()[0].0, "DKIM-Signature");
    assert!(result.header_value.starts_with(" v=1; a=rsa-sha256; c=relaxed/simple; d=example.com;"));

    let verifier = Verifier::default();

    assert_eq!(verifier.verify(&locator, &headers, &body, 0).await, Ok(true));

    let results = common::verify_all(&verifier, &locator, &headers, &body).await;

    assert_eq!(results.len(), 1);
    assert_eq!(results[0].status, VerificationStatus::Success);
    assert_eq!(results[0].key_size, Some(2048));
    assert_eq!(
        results[0].to_method_result().property("header", "d"),
        Some("example.com")
    );
}

#[tokio::test]
async fn testing_key_marks_result() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let record = common::ed25519_key_record(&signing_key).replace("k=ed25519;", "k=ed25519; t=y;");
    let locator = common::make_locator([("sel._domainkey.example.com.", record)]);

    let request = make_request(SignatureAlgorithm::Ed25519Sha256, &signing_key);

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    Signer::sign_message(request, &mut headers, &body).unwrap();

    let results = common::verify_all(&Verifier::default(), &locator, &headers, &body).await;

    assert_eq!(results[0].status, VerificationStatus::Success);
    assert!(results[0].testing());
    assert_eq!(results[0].to_method_result().result_comment.as_deref(), Some("test mode"));
}

#[tokio::test]
async fn ed25519_sign_and_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let locator = common::make_locator([(
        "sel._domainkey.example.com.",
        common::ed25519_key_record(&signing_key),
    )]);

    let mut request = make_request(SignatureAlgorithm::Ed25519Sha256, &signing_key);
    request.body_length = BodyLength::OnlyMessageLength;

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let result = Signer::sign_message(request, &mut headers, &body).unwrap();

    assert!(result.signature.body_length.is_some());

    let verifier = Verifier::default();

    assert_eq!(verifier.verify(&locator, &headers, &body, 0).await, Ok(true));

    // content appended after the signed length is tolerated by default
    let mut longer_body = body.clone();
    longer_body.extend(b"-- \r\nappended footer\r\n");
    assert_eq!(verifier.verify(&locator, &headers, &longer_body, 0).await, Ok(true));

    let config = Config {
        forbid_partially_signed_body: true,
        ..Default::default()
    };
    let verifier = Verifier::new(config);
    let results = common::verify_all(&verifier, &locator, &headers, &longer_body).await;
    assert_eq!(
        results[0].status,
        VerificationStatus::Failure(VerifierError::Policy(PolicyError::ForbidPartiallySignedBody))
    );
}

#[tokio::test]
async fn several_requests() {
    let _ = tracing_subscriber::fmt::try_init();

    let rsa_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let ed25519_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();

    let locator = common::make_locator([
        ("sel._domainkey.example.com.", common::rsa_key_record().await),
        ("ed._domainkey.example.com.", common::ed25519_key_record(&ed25519_key)),
    ]);

    let headers = common::make_header_fields();
    let body = common::make_body();

    let mut ed25519_request = make_request(SignatureAlgorithm::Ed25519Sha256, &ed25519_key);
    ed25519_request.selector = Selector::new("ed").unwrap();
    let requests = [
        make_request(SignatureAlgorithm::RsaSha256, &rsa_key),
        ed25519_request,
    ];

    let mut headers_signed = headers.clone();
    for result in common::sign(&headers, &body, requests) {
        headers_signed.prepend(result.unwrap().to_header_field().unwrap());
    }

    let results = common::verify_all(&Verifier::default(), &locator, &headers_signed, &body).await;

    assert_eq!(results.len(), 2);
    assert!(results.iter().all(|r| r.status == VerificationStatus::Success));
    assert_eq!(results[0].signature.as_ref().unwrap().selector.as_ref(), "ed");
}

#[tokio::test]
async fn modified_message_does_not_verify() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let locator = common::make_locator([(
        "sel._domainkey.example.com.",
        common::ed25519_key_record(&signing_key),
    )]);

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let request = make_request(SignatureAlgorithm::Ed25519Sha256, &signing_key);
    Signer::sign_message(request, &mut headers, &body).unwrap();

    let verifier = Verifier::default();

    let tampered = common::replace_header(headers.clone(), "Subject", " Dinner");
    assert_eq!(verifier.verify(&locator, &tampered, &body, 0).await, Ok(false));

    let results = common::verify_all(&verifier, &locator, &headers, b"Hello\r\n").await;
    assert_eq!(
        results[0].status,
        VerificationStatus::Failure(VerifierError::BodyHashMismatch)
    );
    assert_eq!(results[0].to_method_result().result, "fail");
}

#[tokio::test]
async fn rsa_sha1_disabled_by_default() {
    let _ = tracing_subscriber::fmt::try_init();

    let locator = common::make_locator([("sel._domainkey.example.com.", common::rsa_key_record().await)]);

    let signing_key = common::read_signing_key("tests/keys/rsa2048.pem").await.unwrap();
    let request = make_request(SignatureAlgorithm::RsaSha1, signing_key);

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    Signer::sign_message(request, &mut headers, &body).unwrap();

    let mut verifier = Verifier::default();

    assert_eq!(verifier.verify(&locator, &headers, &body, 0).await, Ok(false));

    let results = common::verify_all(&verifier, &locator, &headers, &body).await;
    assert_eq!(
        results[0].status,
        VerificationStatus::Failure(VerifierError::DisabledAlgorithm)
    );
    assert_eq!(results[0].to_method_result().result, "policy");

    verifier.algorithms_mut().enable(SignatureAlgorithm::RsaSha1);

    assert_eq!(verifier.verify(&locator, &headers, &body, 0).await, Ok(true));
}

#[tokio::test]
async fn deterministic_signatures() {
    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();

    let headers = common::make_header_fields();
    let body = common::make_body();

    let make = || {
        let mut request = make_request(SignatureAlgorithm::Ed25519Sha256, &signing_key);
        request.timestamp = Some(Timestamp::Exact(1_700_000_000));
        request
    };

    let first = common::sign(&headers, &body, [make()]).remove(0).unwrap();
    let second = common::sign(&headers, &body, [make()]).remove(0).unwrap();

    assert_eq!(first.header_value, second.header_value);
    assert_eq!(first.signature.expiration, Some(1_700_000_000 + 5 * 24 * 60 * 60));
}

#[tokio::test]
async fn expired_signature() {
    let _ = tracing_subscriber::fmt::try_init();

    let signing_key = common::read_signing_key("tests/keys/ed25519.pem").await.unwrap();
    let locator = common::make_locator([(
        "sel._domainkey.example.com.",
        common::ed25519_key_record(&signing_key),
    )]);

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let mut request = make_request(SignatureAlgorithm::Ed25519Sha256, &signing_key);
    request.timestamp = Some(Timestamp::Exact(1_700_000_000));
    request.valid_duration = Some(Duration::from_secs(60));

    Signer::sign_message(request, &mut headers, &body).unwrap();

    let config = Config {
        fixed_system_time: Some(UNIX_EPOCH + Duration::from_secs(1_700_000_030)),
        ..Default::default()
    };
    let verifier = Verifier::new(config);
    assert_eq!(verifier.verify(&locator, &headers, &body, 0).await, Ok(true));

    let config = Config {
        fixed_system_time: Some(UNIX_EPOCH + Duration::from_secs(1_700_001_000)),
        ..Default::default()
    };
    let verifier = Verifier::new(config);
    let results = common::verify_all(&verifier, &locator, &headers, &body).await;
    assert_eq!(
        results[0].status,
        VerificationStatus::Failure(VerifierError::Policy(PolicyError::SignatureExpired))
    );
}

#[tokio::test]
async fn format_and_key_errors() {
    let _ = tracing_subscriber::fmt::try_init();

    let locator = common::make_locator([
        ("sel._domainkey.example.com.", "v=DKIM1; k=ed25519; p=".to_owned()),
    ]);

    let verifier = Verifier::default();
    let body = common::make_body();

    let headers: HeaderFields = "DKIM-Signature: v=1; a=ed25519-sha256; d=example.com; s=sel;\r\n\
        \th=Subject; bh=YWJj; b=YWJj\r\n\
        From: me@example.com\r\n\
        Subject: hi\r\n"
        .parse()
        .unwrap();

    let error = verifier.verify(&locator, &headers, &body, 0).await.unwrap_err();
    assert_eq!(error.kind(), ErrorKind::Format);

    let headers: HeaderFields = "DKIM-Signature: v=1; a=ed25519-sha256; d=example.com; s=sel;\r\n\
        \th=From:Subject; bh=YWJj; b=YWJj\r\n\
        From: me@example.com\r\n\
        Subject: hi\r\n"
        .parse()
        .unwrap();

    let error = verifier.verify(&locator, &headers, &body, 0).await.unwrap_err();
    assert_eq!(error, VerifierError::KeyRevoked);
    assert_eq!(error.kind(), ErrorKind::Key);

    let headers = common::replace_header(headers, "DKIM-Signature", " v=1; a=ed25519-sha256;\r\n\
        \td=example.com; s=other; h=From:Subject; bh=YWJj; b=YWJj");

    let error = verifier.verify(&locator, &headers, &body, 0).await.unwrap_err();
    assert_eq!(error, VerifierError::NoKeyFound);

    assert_eq!(
        verifier.verify(&locator, &headers, &body, 1).await,
        Err(VerifierError::NoSignature)
    );
}

#[test]
fn signing_argument_errors() {
    let signing_key = viaauth::SigningKey::from_pkcs8_pem(include_str!("keys/ed25519.pem")).unwrap();

    let mut headers = common::make_header_fields();
    let body = common::make_body();

    let mut request = make_request(SignatureAlgorithm::Ed25519Sha256, &signing_key);
    request.header_selection = HeaderSelection::Manual(vec![
        FieldName::new("From").unwrap(),
        FieldName::new("Received").unwrap(),
    ]);

    let error = Signer::sign_message(request, &mut headers, &body).unwrap_err();
    assert_eq!(error.argument(), Some("header_selection"));
    assert_eq!(error.to_string(), "invalid argument header_selection: trace header signed");

    let request = make_request(SignatureAlgorithm::RsaSha256, &signing_key);
    let error = Signer::sign_message(request, &mut headers, &body).unwrap_err();
    assert_eq!(error.argument(), Some("signing_key"));

    assert_eq!(headers, common::make_header_fields());
}
