//! Signer and supporting types.
//!
//! Signing is a staged process: [`Signer::prepare_signing`] validates the
//! requests against the message header, [`Signer::process_body_chunk`] feeds
//! the body through the body hasher, and [`Signer::finish`] produces the
//! signatures. [`Signer::sign_message`] does all of this in one call for a
//! message held in memory.

pub(crate) mod format;
mod request;
mod sign;

pub use crate::signer::{
    format::{order_by, LINE_WIDTH},
    request::{
        default_signed_headers, default_unsigned_headers, select_headers, BodyLength,
        HeaderSelection, OutputFormat, SignRequest, Timestamp,
    },
};
pub(crate) use crate::signer::{request::validate_signed_headers, sign::sign_hash};

use crate::{
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields, HeaderFieldError},
    message_hash::{self, BodyHasher, BodyHasherBuilder, BodyHasherStance},
    signature::{CanonicalizationAlgorithm, DkimSignature, SignatureAlgorithm},
    util,
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};
use tracing::trace;

/// The maximum number of requests a signer processes.
pub const MAX_REQUESTS: usize = 10;

/// An error that occurs when using a [`Signer`].
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignerError {
    TooManyRequests,
    EmptyRequests,
    MissingFromHeader,
    EmptySignedHeaders,
    FromHeaderNotSigned,
    InvalidSignedFieldName,
    TraceHeaderSigned,
    ContentHeaderSigned,
    KeyTypeMismatch,
    ZeroExpirationDuration,
    InvalidExtraTags,
    InvalidIdentity,
    InvalidFormat,
    InsufficientBodyLength,
    /// Conversion from or to a requested integer data type cannot be supported
    /// in this implementation or on the current platform.
    Overflow,
    SigningFailure,
}

impl SignerError {
    /// Returns the name of the argument that caused this error, if the error
    /// is an argument error.
    pub fn argument(&self) -> Option<&'static str> {
        match self {
            Self::TooManyRequests | Self::EmptyRequests => Some("requests"),
            Self::MissingFromHeader => Some("headers"),
            Self::EmptySignedHeaders
            | Self::FromHeaderNotSigned
            | Self::InvalidSignedFieldName
            | Self::TraceHeaderSigned
            | Self::ContentHeaderSigned => Some("header_selection"),
            Self::KeyTypeMismatch => Some("signing_key"),
            Self::ZeroExpirationDuration => Some("valid_duration"),
            Self::InvalidExtraTags => Some("extra_tags"),
            Self::InvalidIdentity => Some("identity"),
            Self::InvalidFormat => Some("format"),
            Self::Overflow => Some("body_length"),
            Self::InsufficientBodyLength | Self::SigningFailure => None,
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::TooManyRequests => "too many signing requests",
            Self::EmptyRequests => "no signing requests",
            Self::MissingFromHeader => "no From header",
            Self::EmptySignedHeaders => "no headers to sign",
            Self::FromHeaderNotSigned => "From header not signed",
            Self::InvalidSignedFieldName => "signed header name contains semicolon",
            Self::TraceHeaderSigned => "trace header signed",
            Self::ContentHeaderSigned => "content header signed",
            Self::KeyTypeMismatch => "signing key does not match algorithm",
            Self::ZeroExpirationDuration => "zero expiration duration",
            Self::InvalidExtraTags => "invalid additional tags",
            Self::InvalidIdentity => "identity not in signing domain",
            Self::InvalidFormat => "invalid output format",
            Self::InsufficientBodyLength => "body shorter than signed length",
            Self::Overflow => "integer size too large",
            Self::SigningFailure => "signing failed",
        }
    }
}

impl Display for SignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self.argument() {
            Some(arg) => write!(f, "invalid argument {arg}: {}", self.description()),
            None => f.write_str(self.description()),
        }
    }
}

impl Error for SignerError {}

/// A successfully produced signature.
///
/// The header name and value are meant to be joined with only an intervening
/// colon; the value carries its own leading space. This matters for *simple*
/// header canonicalization, where whitespace changes are not allowed.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SigningResult {
    pub header_name: String,
    pub header_value: String,
    pub signature: DkimSignature,
}

impl SigningResult {
    /// Returns the signature as a header field ready to be prepended.
    pub fn to_header_field(&self) -> Result<HeaderField, HeaderFieldError> {
        let name = FieldName::new(self.header_name.as_str())?;
        let value = FieldBody::new(self.header_value.as_bytes())?;
        Ok((name, value))
    }
}

/// A signer for an email message.
///
/// The signer does not hold on to the message header; pass the same header to
/// [`Signer::prepare_signing`] and [`Signer::finish`].
pub struct Signer<T> {
    requests: Vec<SignRequest<T>>,  // non-empty
    body_hasher: BodyHasher,
}

impl<T> Signer<T>
where
    T: AsRef<SigningKey>,
{
    /// Prepares a message signing process.
    ///
    /// All requests are validated here, before any hashing or signing is done.
    pub fn prepare_signing<I>(requests: I, headers: &HeaderFields) -> Result<Self, SignerError>
    where
        I: IntoIterator<Item = SignRequest<T>>,
    {
        if !headers.as_ref().iter().any(|(name, _)| *name == "From") {
            return Err(SignerError::MissingFromHeader);
        }

        let mut body_hasher = BodyHasherBuilder::new(false);
        let mut tasks = vec![];

        for (i, request) in requests.into_iter().enumerate() {
            if i >= MAX_REQUESTS {
                return Err(SignerError::TooManyRequests);
            }

            request::validate_request(&request, headers)?;

            let body_length = request.body_length.to_limit()?;
            let hash_alg = request.algorithm.hash_algorithm();
            let canon_kind = request.canonicalization.body;
            body_hasher.register_canonicalization(body_length, hash_alg, canon_kind);

            trace!(domain = %request.domain, selector = %request.selector, "signing request accepted");

            tasks.push(request);
        }

        if tasks.is_empty() {
            return Err(SignerError::EmptyRequests);
        }

        Ok(Self {
            requests: tasks,
            body_hasher: body_hasher.build(),
        })
    }

    /// Processes a chunk of the message body.
    ///
    /// The chunk is canonicalised and hashed, but not otherwise retained in
    /// memory. Empty chunks are allowed.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Produces one signing result per request, in request order.
    pub fn finish(self, headers: &HeaderFields) -> Vec<Result<SigningResult, SignerError>> {
        let hasher_results = self.body_hasher.finish();

        self.requests
            .into_iter()
            .map(|request| sign::perform_signing(request, headers, &hasher_results))
            .collect()
    }

    /// Signs a message held in memory, and prepends the new *DKIM-Signature*
    /// header to its header.
    pub fn sign_message(
        request: SignRequest<T>,
        headers: &mut HeaderFields,
        body: &[u8],
    ) -> Result<SigningResult, SignerError> {
        let mut signer = Self::prepare_signing([request], headers)?;

        let _ = signer.process_body_chunk(body);

        let result = signer
            .finish(headers)
            .into_iter()
            .next()
            .ok_or(SignerError::EmptyRequests)??;

        let field = result
            .to_header_field()
            .map_err(|_| SignerError::InvalidFormat)?;
        headers.prepend(field);

        Ok(result)
    }
}

/// Computes the Base64 body hash of a message body, as it would appear in the
/// *bh=* tag.
pub fn body_hash_base64(
    algorithm: SignatureAlgorithm,
    canonicalization: CanonicalizationAlgorithm,
    body: &[u8],
) -> String {
    let mut hasher = BodyHasherBuilder::new(false);
    let key = message_hash::body_hasher_key(None, algorithm, canonicalization);
    hasher.register(key);
    let mut hasher = hasher.build();
    let _ = hasher.hash_chunk(body);
    match hasher.finish().get(&key) {
        Some(Ok((hash, _))) => util::encode_base64(hash),
        _ => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signature::{DomainName, Selector};

    fn ed25519_key() -> SigningKey {
        SigningKey::from_pkcs8_pem(include_str!("../../tests/keys/ed25519.pem")).unwrap()
    }

    fn request(key: &SigningKey) -> SignRequest<&SigningKey> {
        let mut request = SignRequest::new(
            DomainName::new("example.com").unwrap(),
            Selector::new("sel").unwrap(),
            SignatureAlgorithm::Ed25519Sha256,
            key,
        );
        request.timestamp = Some(Timestamp::Exact(1_700_000_000));
        request
    }

    fn headers() -> HeaderFields {
        "From: me@example.com\r\nTo: you@example.org\r\nSubject: hello\r\n"
            .parse()
            .unwrap()
    }

    #[test]
    fn empty_body_relaxed_body_hash() {
        assert_eq!(
            body_hash_base64(
                SignatureAlgorithm::RsaSha256,
                CanonicalizationAlgorithm::Relaxed,
                b""
            ),
            "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="
        );
    }

    #[test]
    fn sign_message_prepends_header() {
        let key = ed25519_key();
        let mut headers = headers();

        let result = Signer::sign_message(request(&key), &mut headers, b"Hello!\r\n").unwrap();

        assert_eq!(headers.len(), 4);
        let (name, value) = &headers.as_ref()[0];
        assert_eq!(*name, "DKIM-Signature");
        assert_eq!(value.as_ref(), result.header_value.as_bytes());
        assert!(result.header_value.starts_with(" v=1; a=ed25519-sha256; c=relaxed/simple;"));
        assert_eq!(result.signature.timestamp, Some(1_700_000_000));
        assert_eq!(result.signature.expiration, Some(1_700_000_000 + 432_000));
    }

    #[test]
    fn signing_is_deterministic() {
        let key = ed25519_key();

        let mut headers1 = headers();
        let mut headers2 = headers();
        let r1 = Signer::sign_message(request(&key), &mut headers1, b"body\r\n").unwrap();
        let r2 = Signer::sign_message(request(&key), &mut headers2, b"body\r\n").unwrap();

        assert_eq!(r1, r2);
        assert_eq!(headers1, headers2);
    }

    #[test]
    fn argument_errors_before_signing() {
        let key = ed25519_key();
        let headers = headers();

        let mut req = request(&key);
        req.header_selection = HeaderSelection::Manual(vec![
            FieldName::new("From").unwrap(),
            FieldName::new("Received").unwrap(),
        ]);
        let error = Signer::prepare_signing([req], &headers).err().unwrap();
        assert_eq!(error, SignerError::TraceHeaderSigned);
        assert_eq!(error.argument(), Some("header_selection"));

        let mut req = request(&key);
        req.algorithm = SignatureAlgorithm::RsaSha256;
        let error = Signer::prepare_signing([req], &headers).err().unwrap();
        assert_eq!(error, SignerError::KeyTypeMismatch);
        assert_eq!(error.to_string(), "invalid argument signing_key: signing key does not match algorithm");

        let mut req = request(&key);
        req.format.indentation = "".into();
        let error = Signer::prepare_signing([req], &headers).err().unwrap();
        assert_eq!(error, SignerError::InvalidFormat);

        let requests: Vec<SignRequest<&SigningKey>> = vec![];
        let error = Signer::prepare_signing(requests, &headers).err().unwrap();
        assert_eq!(error, SignerError::EmptyRequests);
    }

    #[test]
    fn insufficient_body_length() {
        let key = ed25519_key();
        let mut headers = headers();

        let mut req = request(&key);
        req.body_length = BodyLength::Exact(100);

        let error = Signer::sign_message(req, &mut headers, b"short\r\n").unwrap_err();

        assert_eq!(error, SignerError::InsufficientBodyLength);
        assert_eq!(headers.len(), 3);
    }
}
