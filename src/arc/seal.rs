//! The ARC sealer.

use crate::{
    arc::{
        chain,
        ArcMessageSignature, ArcSeal, ArcVerifier, ArcSignatureValidationResult,
        ChainValidationStatus, ARC_MESSAGE_SIGNATURE_NAME, ARC_SEAL_NAME,
    },
    authres::{
        AuthenticationResults, FormatOptions, MethodResult, ARC_AUTHENTICATION_RESULTS_NAME,
        AUTHENTICATION_RESULTS_NAME,
    },
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    message_hash::{self, BodyHasherBuilder},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, DomainName, Selector, SignatureAlgorithm,
        MAX_ARC_INSTANCE,
    },
    signer::{
        format::{self, TagValue},
        sign_hash, validate_signed_headers, HeaderSelection, SignerError, Timestamp,
    },
    util::{self, CanonicalStr},
    verifier::PublicKeyLocator,
};
use std::{
    borrow::Cow,
    error::Error,
    fmt::{self, Debug, Display, Formatter},
};
use tracing::trace;

/// A request for adding an ARC set to a message.
pub struct ArcSealRequest<T> {
    /// The key used for both the message signature and the seal.
    pub signing_key: T,
    pub algorithm: SignatureAlgorithm,
    pub domain: DomainName,
    pub selector: Selector,
    /// The canonicalization of the message signature. The seal always uses
    /// relaxed header canonicalization.
    pub canonicalization: Canonicalization,
    pub header_selection: HeaderSelection,
    pub timestamp: Option<Timestamp>,
    /// Results to record in the *ARC-Authentication-Results* header, after
    /// those found in the message.
    pub results: Vec<MethodResult>,
    /// The chain validation status to record. When absent, it is taken from an
    /// `arc` result, or else assumed to be `fail`.
    pub chain_validation: Option<ChainValidationStatus>,
}

impl<T> ArcSealRequest<T> {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,
            algorithm,
            domain,
            selector,
            canonicalization: Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Relaxed,
            ),
            header_selection: HeaderSelection::Auto,
            timestamp: Some(Timestamp::Now),
            results: vec![],
            chain_validation: None,
        }
    }
}

impl<T> Debug for ArcSealRequest<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcSealRequest")
            .field("algorithm", &self.algorithm)
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("canonicalization", &self.canonicalization)
            .field("header_selection", &self.header_selection)
            .field("timestamp", &self.timestamp)
            .field("results", &self.results)
            .field("chain_validation", &self.chain_validation)
            .finish_non_exhaustive()
    }
}

/// An error in the arguments of a seal request.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ArcSignerError {
    KeyTypeMismatch,
    InvalidAuthservId,
    SignedHeaders(SignerError),
    SealHeaderSigned,
    InvalidResults,
    InvalidFormat,
    SigningFailure,
}

impl ArcSignerError {
    /// Returns the name of the argument that caused this error, if the error
    /// is an argument error.
    pub fn argument(&self) -> Option<&'static str> {
        match self {
            Self::KeyTypeMismatch => Some("signing_key"),
            Self::InvalidAuthservId => Some("authserv_id"),
            Self::SignedHeaders(_) | Self::SealHeaderSigned => Some("header_selection"),
            Self::InvalidResults => Some("results"),
            Self::InvalidFormat => Some("format"),
            Self::SigningFailure => None,
        }
    }
}

impl Display for ArcSignerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        let description = match self {
            Self::KeyTypeMismatch => "signing key does not match algorithm",
            Self::InvalidAuthservId => "invalid authentication service identifier",
            Self::SignedHeaders(e) => return write!(f, "{e}"),
            Self::SealHeaderSigned => "ARC-Seal header signed",
            Self::InvalidResults => "results cannot be encoded",
            Self::InvalidFormat => "invalid output format",
            Self::SigningFailure => "signing failed",
        };
        match self.argument() {
            Some(arg) => write!(f, "invalid argument {arg}: {description}"),
            None => f.write_str(description),
        }
    }
}

impl Error for ArcSignerError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SignedHeaders(e) => Some(e),
            _ => None,
        }
    }
}

/// The reason why no ARC set was added.
#[derive(Clone, Debug, PartialEq)]
pub enum NotSealedReason {
    /// The chain already records a failure.
    ChainFailed,
    /// The existing ARC header fields do not form a valid chain.
    InvalidChain(chain::ArcChainError),
    /// The chain has reached the maximum instance.
    InstanceLimit,
}

/// A newly added ARC set.
#[derive(Clone, Debug, PartialEq)]
pub struct ArcSealResult {
    pub instance: u32,
    pub chain_validation: ChainValidationStatus,
    pub authentication_results: AuthenticationResults,
    pub message_signature: ArcMessageSignature,
    pub seal: ArcSeal,
}

#[derive(Clone, Debug, PartialEq)]
pub enum ArcSealOutcome {
    Sealed(ArcSealResult),
    NotSealed(NotSealedReason),
}

/// An ARC sealer acting on behalf of an authentication service.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArcSealer {
    /// The authserv-id under which results are recorded. Incoming
    /// *Authentication-Results* headers with this identifier are merged into
    /// the new *ARC-Authentication-Results* header.
    pub authserv_id: String,
    pub format: FormatOptions,
}

impl ArcSealer {
    pub fn new(authserv_id: impl Into<String>) -> Self {
        Self {
            authserv_id: authserv_id.into(),
            format: Default::default(),
        }
    }

    /// Adds a new ARC set on top of the header.
    ///
    /// When the existing chain has failed or is unusable, the header is left
    /// untouched and [`ArcSealOutcome::NotSealed`] is returned.
    pub fn seal_message<T>(
        &self,
        request: ArcSealRequest<T>,
        headers: &mut HeaderFields,
        body: &[u8],
    ) -> Result<ArcSealOutcome, ArcSignerError>
    where
        T: AsRef<SigningKey>,
    {
        let signed_headers = self.validate_request(&request, headers)?;

        let original: &HeaderFields = headers;

        let sets = match chain::collect_arc_sets(original) {
            Ok(sets) => sets,
            Err(e) => {
                trace!("not sealing, invalid chain: {e}");
                return Ok(ArcSealOutcome::NotSealed(NotSealedReason::InvalidChain(e)));
            }
        };

        if sets.iter().any(|s| s.seal.chain_validation == ChainValidationStatus::Fail) {
            trace!("not sealing, chain already failed");
            return Ok(ArcSealOutcome::NotSealed(NotSealedReason::ChainFailed));
        }
        if let Err(e) = chain::check_chain_validation(&sets) {
            trace!("not sealing, invalid chain: {e}");
            return Ok(ArcSealOutcome::NotSealed(NotSealedReason::InvalidChain(e)));
        }

        let instance = match u32::try_from(sets.len()) {
            Ok(n) if n < MAX_ARC_INSTANCE => n + 1,
            _ => {
                trace!("not sealing, instance limit reached");
                return Ok(ArcSealOutcome::NotSealed(NotSealedReason::InstanceLimit));
            }
        };

        let timestamp = request.timestamp.map(|timestamp| match timestamp {
            Timestamp::Now => util::now_unix_secs(),
            Timestamp::Exact(t) => t,
        });

        // `headers` is replaced only once all three fields are produced
        let mut sealed = original.clone();

        let authentication_results = self.merge_results(instance, original, request.results);
        let chain_validation = match instance {
            1 => ChainValidationStatus::None,
            _ => request
                .chain_validation
                .or_else(|| chain_validation_from_results(&authentication_results))
                .filter(|cv| *cv != ChainValidationStatus::None)
                .unwrap_or(ChainValidationStatus::Fail),
        };

        let mut results_value = String::new();
        authentication_results.encode(
            &self.format,
            &mut results_value,
            ARC_AUTHENTICATION_RESULTS_NAME.len() + 1,
        );
        let results_field = make_header_field(ARC_AUTHENTICATION_RESULTS_NAME, &results_value)
            .ok_or(ArcSignerError::InvalidResults)?;
        sealed.prepend(results_field.clone());

        let signing_key = request.signing_key.as_ref();
        let algorithm = request.algorithm;
        let hash_alg = algorithm.hash_algorithm();
        let canonicalization = request.canonicalization;

        // message signature

        let mut hasher = BodyHasherBuilder::new(false);
        hasher.register_canonicalization(None, hash_alg, canonicalization.body);
        let mut hasher = hasher.build();
        let _ = hasher.hash_chunk(body);
        let hasher_results = hasher.finish();

        let body_hash = match hasher_results.get(&(None, hash_alg, canonicalization.body)) {
            Some(Ok((h, _))) => h.clone(),
            _ => return Err(ArcSignerError::SigningFailure),
        };

        let instance_str = instance.to_string();
        let timestamp_str = timestamp.map(|t| t.to_string());

        let mut tags = vec![
            ("i", TagValue::Text(Cow::Borrowed(instance_str.as_str()))),
            ("a", TagValue::Text(algorithm.canonical_str().into())),
            ("c", TagValue::Text(canonicalization.canonical_str().into())),
            ("d", TagValue::Text(Cow::Borrowed(request.domain.as_ref()))),
            ("s", TagValue::Text(Cow::Borrowed(request.selector.as_ref()))),
        ];
        if let Some(t) = &timestamp_str {
            tags.push(("t", TagValue::Text(Cow::Borrowed(t.as_str()))));
        }
        tags.push(("h", TagValue::Names(&signed_headers)));
        tags.push(("bh", TagValue::Base64(&body_hash)));
        tags.push(("b", TagValue::Signature));

        let (mut ams_value, insertion_index) = format::format_tags(
            ARC_MESSAGE_SIGNATURE_NAME,
            self.format.line_width,
            &self.format.indentation,
            &tags,
        );

        let data_hash = message_hash::compute_data_hash(
            hash_alg,
            canonicalization.header,
            &sealed,
            &signed_headers,
            ARC_MESSAGE_SIGNATURE_NAME,
            &ams_value,
        );

        let ams_data = sign_hash(signing_key, hash_alg, &data_hash)
            .map_err(|_| ArcSignerError::SigningFailure)?;

        format::insert_signature_data(
            &mut ams_value,
            insertion_index,
            ARC_MESSAGE_SIGNATURE_NAME,
            &ams_data,
            self.format.line_width,
            &self.format.indentation,
        );

        let ams_field = make_header_field(ARC_MESSAGE_SIGNATURE_NAME, &ams_value)
            .ok_or(ArcSignerError::InvalidFormat)?;
        sealed.prepend(ams_field.clone());

        // seal

        let mut tags = vec![
            ("i", TagValue::Text(Cow::Borrowed(instance_str.as_str()))),
            ("a", TagValue::Text(algorithm.canonical_str().into())),
        ];
        if let Some(t) = &timestamp_str {
            tags.push(("t", TagValue::Text(Cow::Borrowed(t.as_str()))));
        }
        tags.push(("cv", TagValue::Text(chain_validation.canonical_str().into())));
        tags.push(("d", TagValue::Text(Cow::Borrowed(request.domain.as_ref()))));
        tags.push(("s", TagValue::Text(Cow::Borrowed(request.selector.as_ref()))));
        tags.push(("b", TagValue::Signature));

        let (mut seal_value, insertion_index) = format::format_tags(
            ARC_SEAL_NAME,
            self.format.line_width,
            &self.format.indentation,
            &tags,
        );

        let fields = sets
            .iter()
            .flat_map(|set| set.header_fields(original))
            .chain([&results_field, &ams_field].map(|(name, value)| (name.as_ref(), value.as_ref())));

        let seal_hash = chain::compute_seal_hash(hash_alg, fields, &seal_value);

        let seal_data = sign_hash(signing_key, hash_alg, &seal_hash)
            .map_err(|_| ArcSignerError::SigningFailure)?;

        format::insert_signature_data(
            &mut seal_value,
            insertion_index,
            ARC_SEAL_NAME,
            &seal_data,
            self.format.line_width,
            &self.format.indentation,
        );

        let seal_field =
            make_header_field(ARC_SEAL_NAME, &seal_value).ok_or(ArcSignerError::InvalidFormat)?;
        sealed.prepend(seal_field);

        *headers = sealed;

        trace!(instance, %chain_validation, domain = %request.domain, "ARC set added");

        Ok(ArcSealOutcome::Sealed(ArcSealResult {
            instance,
            chain_validation,
            authentication_results,
            message_signature: ArcMessageSignature {
                instance,
                algorithm,
                signature_data: ams_data.into(),
                body_hash,
                canonicalization,
                domain: request.domain.clone(),
                signed_headers: signed_headers.into(),
                body_length: None,
                selector: request.selector.clone(),
                timestamp,
            },
            seal: ArcSeal {
                instance,
                algorithm,
                signature_data: seal_data.into(),
                chain_validation,
                domain: request.domain,
                selector: request.selector,
                timestamp,
            },
        }))
    }

    /// Validates the existing chain and the DKIM state of the message first,
    /// then adds a new ARC set recording the chain validation result.
    pub async fn seal_verified_message<L, T>(
        &self,
        verifier: &ArcVerifier,
        locator: &L,
        mut request: ArcSealRequest<T>,
        headers: &mut HeaderFields,
        body: &[u8],
    ) -> Result<ArcSealOutcome, ArcSignerError>
    where
        L: PublicKeyLocator + ?Sized,
        T: AsRef<SigningKey>,
    {
        let validation = verifier.verify(locator, headers, body).await;

        if request.chain_validation.is_none() {
            request.chain_validation = match validation.chain {
                ArcSignatureValidationResult::None => None,
                ArcSignatureValidationResult::Pass => Some(ChainValidationStatus::Pass),
                ArcSignatureValidationResult::Fail => Some(ChainValidationStatus::Fail),
            };
        }

        request.results.push(validation.to_method_result());

        self.seal_message(request, headers, body)
    }

    fn validate_request<T: AsRef<SigningKey>>(
        &self,
        request: &ArcSealRequest<T>,
        headers: &HeaderFields,
    ) -> Result<Vec<FieldName>, ArcSignerError> {
        if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
            return Err(ArcSignerError::KeyTypeMismatch);
        }

        if !is_valid_authserv_id(&self.authserv_id) {
            return Err(ArcSignerError::InvalidAuthservId);
        }

        if self.format.line_width == 0
            || self.format.indentation.is_empty()
            || !self.format.indentation.chars().all(|c| matches!(c, ' ' | '\t'))
        {
            return Err(ArcSignerError::InvalidFormat);
        }

        let signed_headers = request.header_selection.resolve(headers);
        if signed_headers.iter().any(|name| *name == ARC_SEAL_NAME) {
            return Err(ArcSignerError::SealHeaderSigned);
        }
        validate_signed_headers(&signed_headers, false, true)
            .map_err(ArcSignerError::SignedHeaders)?;

        Ok(signed_headers)
    }

    // Collects the results recorded under our authserv-id, topmost header
    // first, followed by the given results.
    fn merge_results(
        &self,
        instance: u32,
        headers: &HeaderFields,
        extra_results: Vec<MethodResult>,
    ) -> AuthenticationResults {
        let mut results = vec![];

        for (_, value) in headers.get_all(AUTHENTICATION_RESULTS_NAME) {
            match AuthenticationResults::try_parse(value.as_ref()) {
                Some(ar)
                    if ar
                        .authserv_id
                        .as_deref()
                        .map_or(false, |id| id.eq_ignore_ascii_case(&self.authserv_id)) =>
                {
                    results.extend(ar.results);
                }
                Some(_) => {}
                None => trace!("ignoring ill-formed Authentication-Results header"),
            }
        }

        results.extend(extra_results);

        AuthenticationResults {
            instance: Some(instance),
            authserv_id: Some(self.authserv_id.clone()),
            version: None,
            results,
        }
    }
}

fn chain_validation_from_results(ar: &AuthenticationResults) -> Option<ChainValidationStatus> {
    ar.results
        .iter()
        .rev()
        .find(|r| r.method.eq_ignore_ascii_case("arc"))
        .and_then(|r| r.result.parse().ok())
}

fn is_valid_authserv_id(id: &str) -> bool {
    !id.is_empty()
        && id
            .chars()
            .all(|c| !c.is_ascii_whitespace() && !c.is_ascii_control() && !matches!(c, ';' | '(' | ')'))
}

fn make_header_field(name: &str, value: &str) -> Option<HeaderField> {
    let name = FieldName::new(name).ok()?;
    let value = FieldBody::new(value.as_bytes()).ok()?;
    Some((name, value))
}
