// viaauth – implementation of the DKIM and ARC specifications
// Copyright © 2022–2023 David Bürgin <dbuergin@gluet.ch>
//
// This program is free software: you can redistribute it and/or modify it under
// the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later
// version.
//
// This program is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS
// FOR A PARTICULAR PURPOSE. See the GNU General Public License for more
// details.
//
// You should have received a copy of the GNU General Public License along with
// this program. If not, see <https://www.gnu.org/licenses/>.

//! Verifier and supporting types.
//!
//! A [`Verifier`] holds configuration only, and can be shared between tasks.
//! [`Verifier::verify`] checks one signature of a message held in memory;
//! [`Verifier::verify_header`] starts a verification of all signatures whose
//! body is then supplied in chunks.

mod header;
mod lookup;
mod verify;

pub use lookup::{LocatorError, LookupTxt, PublicKeyLocator, TxtLocator, QUERY_METHOD_DNS_TXT};

pub(crate) use self::{
    header::{check_timestamps, look_up_key},
    verify::{verify_header_data, verify_seal_data},
};

use crate::{
    authres::MethodResult,
    crypto::{KeyType, VerificationError},
    header::{FieldName, HeaderFields},
    message_hash::{
        BodyHashError, BodyHashResults, BodyHasher, BodyHasherBuilder, BodyHasherKey,
        BodyHasherStance,
    },
    record::DkimKeyRecord,
    signature::{
        DkimSignature, SignatureAlgorithm, SignatureError, SignatureErrorKind, DKIM_SIGNATURE_NAME,
    },
    util::{self, CanonicalStr},
    verifier::header::VerifyingTask,
};
use std::{
    collections::HashSet,
    error::Error,
    fmt::{self, Display, Formatter},
    time::{Duration, SystemTime},
};
use tracing::trace;

/// The set of signature algorithms a verifier accepts.
///
/// By default *rsa-sha256* and *ed25519-sha256* are enabled. *rsa-sha1* is
/// disabled (RFC 8301), but can be enabled for legacy signatures.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlgorithmSet {
    enabled: HashSet<SignatureAlgorithm>,
}

impl AlgorithmSet {
    pub fn enable(&mut self, algorithm: SignatureAlgorithm) {
        self.enabled.insert(algorithm);
    }

    pub fn disable(&mut self, algorithm: SignatureAlgorithm) {
        self.enabled.remove(&algorithm);
    }

    pub fn is_enabled(&self, algorithm: SignatureAlgorithm) -> bool {
        self.enabled.contains(&algorithm)
    }
}

impl Default for AlgorithmSet {
    fn default() -> Self {
        Self {
            enabled: HashSet::from([SignatureAlgorithm::RsaSha256, SignatureAlgorithm::Ed25519Sha256]),
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Config {
    /// The maximum duration of public key record lookups. When this duration is
    /// exceeded evaluation fails (temporary error).
    pub lookup_timeout: Duration,

    /// Only validate at most this number of signatures, any extra signatures
    /// are ignored.
    pub max_signatures: usize,

    /// If given required headers are not signed in a DKIM signature, the
    /// signature will not validate. Note that the header `From` is always
    /// required by the RFC independent of this configuration setting.
    pub required_signed_headers: Vec<FieldName>,

    /// Minimum acceptable key size in bits. When the key size of an RSA public
    /// key is below this limit, the signature will not validate.
    ///
    /// Note that keys smaller than 1024 bits are never accepted (RFC 8301).
    pub min_key_bits: usize,

    /// The signature algorithms that are acceptable. Signatures using other
    /// algorithms do not validate.
    pub algorithms: AlgorithmSet,

    /// If a DKIM signature has the l= tag, and the body length given in this
    /// tag is less than the actual message body length, the signature will not
    /// validate. In other words, signatures that cover only part of the message
    /// body are not accepted.
    pub forbid_partially_signed_body: bool,

    /// When this flag is set, an expired DKIM signature (x=) will not validate.
    pub fail_if_expired: bool,

    /// When this flag is set, a DKIM signature with a timestamp in the future
    /// (t=) will not validate.
    pub fail_if_in_future: bool,

    /// Tolerance applied to time values when checking signature expiration or
    /// timestamp validity, to allow for clock drift. Resolution is in seconds.
    pub time_tolerance: Duration,

    /// The `SystemTime` value to use as the instant ‘now’.
    pub fixed_system_time: Option<SystemTime>,
}

impl Config {
    fn current_timestamp(&self) -> u64 {
        util::unix_secs(self.fixed_system_time.unwrap_or_else(SystemTime::now))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookup_timeout: Duration::from_secs(10),
            max_signatures: 10,
            required_signed_headers: vec![],
            min_key_bits: 1024,
            algorithms: Default::default(),
            forbid_partially_signed_body: false,
            fail_if_expired: true,
            fail_if_in_future: true,
            time_tolerance: Duration::from_secs(30),
            fixed_system_time: None,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum PolicyError {
    RequiredHeadersNotSigned,
    ForbidPartiallySignedBody,
    SignatureExpired,
    TimestampInFuture,
    KeyTooSmall,
}

impl Display for PolicyError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RequiredHeadersNotSigned => write!(f, "headers required to be signed were not signed"),
            Self::ForbidPartiallySignedBody => write!(f, "partial body signing not acceptable"),
            Self::SignatureExpired => write!(f, "signature expired"),
            Self::TimestampInFuture => write!(f, "timestamp in future"),
            Self::KeyTooSmall => write!(f, "public key size too small"),
        }
    }
}

impl Error for PolicyError {}

/// A broad classification of verifier errors.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ErrorKind {
    /// The signature is structurally invalid.
    Format,
    /// No usable public key could be obtained.
    Key,
    /// The signature was understood, but does not verify.
    Failure,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerifierError {
    DkimSignatureFormat(SignatureError),
    NoSignature,
    WrongKeyType,
    KeyRecordFormat,
    KeyRevoked,
    InvalidKey,
    DisallowedHashAlgorithm,
    DisallowedServiceType,
    DomainMismatch,
    DisabledAlgorithm,
    VerificationFailure(VerificationError),
    BodyHashMismatch,
    InsufficientBodyLength,
    NoKeyFound,
    KeyLookupTimeout,
    KeyLookup,
    Policy(PolicyError),
    Overflow,
}

impl VerifierError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::DkimSignatureFormat(_) | Self::NoSignature | Self::Overflow => ErrorKind::Format,
            Self::WrongKeyType
            | Self::KeyRecordFormat
            | Self::KeyRevoked
            | Self::InvalidKey
            | Self::DisallowedHashAlgorithm
            | Self::DisallowedServiceType
            | Self::DomainMismatch
            | Self::NoKeyFound
            | Self::KeyLookup => ErrorKind::Key,
            Self::DisabledAlgorithm
            | Self::VerificationFailure(_)
            | Self::BodyHashMismatch
            | Self::InsufficientBodyLength
            | Self::KeyLookupTimeout
            | Self::Policy(_) => ErrorKind::Failure,
        }
    }
}

impl Display for VerifierError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::DkimSignatureFormat(error) => error.kind.fmt(f),
            Self::NoSignature => write!(f, "no such signature"),
            Self::WrongKeyType => write!(f, "wrong key type"),
            Self::KeyRecordFormat => write!(f, "invalid syntax in key record"),
            Self::KeyRevoked => write!(f, "key in key record revoked"),
            Self::InvalidKey => write!(f, "invalid public key"),
            Self::DisallowedHashAlgorithm => write!(f, "hash algorithm not allowed"),
            Self::DisallowedServiceType => write!(f, "service type not allowed"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::DisabledAlgorithm => write!(f, "signature algorithm not enabled"),
            Self::VerificationFailure(error) => error.fmt(f),
            Self::BodyHashMismatch => write!(f, "body hash mismatch"),
            Self::InsufficientBodyLength => write!(f, "truncated body"),
            Self::NoKeyFound => write!(f, "no key record found"),
            Self::KeyLookupTimeout => write!(f, "key record lookup timed out"),
            Self::KeyLookup => write!(f, "key record lookup failed"),
            Self::Policy(error) => error.fmt(f),
            Self::Overflow => write!(f, "integer size too large"),
        }
    }
}

impl Error for VerifierError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::DkimSignatureFormat(error) => Some(error),
            Self::VerificationFailure(error) => Some(error),
            Self::Policy(error) => Some(error),
            _ => None,
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct VerificationResult {
    /// The verification status.
    pub status: VerificationStatus,
    /// The index of the evaluated *DKIM-Signature* header in the original
    /// `HeaderFields` input.
    pub index: usize,
    /// The parsed DKIM signature data obtained from the *DKIM-Signature*
    /// header, if available.
    pub signature: Option<DkimSignature>,
    /// The public key record used in the verification, if available.
    pub key_record: Option<DkimKeyRecord>,
    /// The size of the public key in bits, for RSA keys.
    pub key_size: Option<usize>,
}

impl VerificationResult {
    pub fn key_type(&self) -> Option<KeyType> {
        self.key_record.as_ref().map(|r| r.key_type)
    }

    /// Whether the signing domain is testing DKIM (t=y).
    pub fn testing(&self) -> bool {
        self.key_record.as_ref().map_or(false, |r| r.is_testing())
    }

    /// Produces a *dkim* method result for an *Authentication-Results* header.
    pub fn to_method_result(&self) -> MethodResult {
        let mut result = MethodResult::new("dkim", self.status.to_dkim_auth_result().canonical_str());

        if let VerificationStatus::Failure(error) = &self.status {
            result.reason = Some(error.to_string());
        }
        if self.testing() {
            result.result_comment = Some("test mode".into());
        }

        let (domain, signature_data) = match (&self.signature, &self.status) {
            (Some(sig), _) => (Some(sig.domain.to_string()), Some(util::encode_base64(&sig.signature_data))),
            (None, VerificationStatus::Failure(VerifierError::DkimSignatureFormat(e))) => {
                (e.domain.as_ref().map(|d| d.to_string()), e.signature_data_base64.clone())
            }
            _ => (None, None),
        };

        if let Some(domain) = domain {
            result = result.with_property("header", "d", domain);
        }
        if let Some(sig) = &self.signature {
            if let Some(identity) = &sig.identity {
                result = result.with_property("header", "i", identity.to_string());
            }
            result = result
                .with_property("header", "s", sig.selector.to_string())
                .with_property("header", "a", sig.algorithm.canonical_str());
        }
        if let Some(b) = signature_data {
            // RFC 6008: a prefix of eight characters suffices to identify the
            // signature
            let prefix: String = b.chars().take(8).collect();
            result = result.with_property("header", "b", prefix);
        }

        result
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum VerificationStatus {
    /// A *SUCCESS* result status.
    Success,
    /// A *PERMFAIL* or *TEMPFAIL* result status, with failure cause attached.
    Failure(VerifierError),
}

impl VerificationStatus {
    /// Converts this verification status to an RFC 8601 DKIM result.
    pub fn to_dkim_auth_result(&self) -> DkimAuthResult {
        use VerifierError::*;

        match self {
            Self::Success => DkimAuthResult::Pass,
            Self::Failure(error) => match error {
                NoSignature => DkimAuthResult::None,
                WrongKeyType
                | KeyRecordFormat
                | KeyRevoked
                | InvalidKey
                | DisallowedHashAlgorithm
                | DisallowedServiceType
                | DomainMismatch
                | InsufficientBodyLength
                | NoKeyFound => DkimAuthResult::Permerror,
                BodyHashMismatch => DkimAuthResult::Fail,
                KeyLookupTimeout | KeyLookup => DkimAuthResult::Temperror,
                DkimSignatureFormat(error) => match error.kind {
                    SignatureErrorKind::MissingVersionTag
                    | SignatureErrorKind::MissingAlgorithmTag
                    | SignatureErrorKind::MissingSignatureTag
                    | SignatureErrorKind::MissingBodyHashTag
                    | SignatureErrorKind::MissingDomainTag
                    | SignatureErrorKind::SignedHeadersEmpty
                    | SignatureErrorKind::FromHeaderNotSigned
                    | SignatureErrorKind::MissingSignedHeadersTag
                    | SignatureErrorKind::MissingSelectorTag
                    | SignatureErrorKind::DomainMismatch
                    | SignatureErrorKind::ExpirationNotAfterTimestamp => DkimAuthResult::Permerror,
                    _ => DkimAuthResult::Neutral,
                },
                VerificationFailure(error) => match error {
                    VerificationError::InvalidKey
                    | VerificationError::InsufficientKeySize
                    | VerificationError::InvalidSignature => DkimAuthResult::Permerror,
                    VerificationError::VerificationFailure => DkimAuthResult::Fail,
                },
                DisabledAlgorithm | Policy(_) => DkimAuthResult::Policy,
                Overflow => DkimAuthResult::Neutral,
            },
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DkimAuthResult {
    /// The *none* result. This result indicates that a message was not signed.
    None,

    /// The *pass* result. This result means that verification could be
    /// performed on a DKIM signature, and the verification was successful.
    Pass,

    /// The *fail* result. This result means that a DKIM signature was
    /// understood and verification could be performed, and the verification
    /// result was failure.
    ///
    /// Examples include: cryptographic verification failure, body hash
    /// mismatch.
    Fail,

    /// The *policy* result. This result means that a DKIM signature could not
    /// be or was not verified, because some aspect of it was unacceptable due
    /// to a configurable policy reason.
    ///
    /// Examples include: signature expired, algorithm not enabled.
    Policy,

    /// The *neutral* result. This result means that a DKIM signature could not
    /// be entirely understood or cannot be processed by this implementation
    /// (but might be by other implementations).
    ///
    /// Examples include: syntax errors, an unsupported cryptographic or other
    /// algorithm.
    Neutral,

    /// The *temperror* result. This result means that signature evaluation
    /// could not be performed due to a temporary reason that might be gone when
    /// evaluation is retried.
    ///
    /// Examples include: DNS lookup timeout, temporary I/O error.
    Temperror,

    /// The *permerror* result. This result means that a DKIM signature was
    /// determined to be definitely broken or not verifiable.
    ///
    /// Examples include: missing required tag in signature, missing public key
    /// record in DNS, l= tag larger than message body length.
    Permerror,
}

impl CanonicalStr for DkimAuthResult {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Policy => "policy",
            Self::Neutral => "neutral",
            Self::Temperror => "temperror",
            Self::Permerror => "permerror",
        }
    }
}

impl Display for DkimAuthResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// A DKIM verifier.
#[derive(Clone, Debug, Default)]
pub struct Verifier {
    config: Config,
}

impl Verifier {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// The accepted signature algorithms.
    pub fn algorithms(&self) -> &AlgorithmSet {
        &self.config.algorithms
    }

    /// The accepted signature algorithms, for modification.
    pub fn algorithms_mut(&mut self) -> &mut AlgorithmSet {
        &mut self.config.algorithms
    }

    /// Verifies one DKIM signature of a message.
    ///
    /// `index` selects the *DKIM-Signature* header, counting from the top of
    /// the header starting at 0.
    ///
    /// Returns `Ok(true)` if the signature verifies, `Ok(false)` if it was
    /// understood but does not verify, and an error if the signature is
    /// malformed or no usable key could be found.
    pub async fn verify<L>(
        &self,
        locator: &L,
        headers: &HeaderFields,
        body: &[u8],
        index: usize,
    ) -> Result<bool, VerifierError>
    where
        L: PublicKeyLocator + ?Sized,
    {
        let (header_index, (name, value)) = headers
            .as_ref()
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME)
            .nth(index)
            .ok_or(VerifierError::NoSignature)?;

        let task =
            header::verify_header_field(locator, &self.config, headers, header_index, name.as_ref(), value)
                .await;

        let mut pending = PendingVerification::new(vec![task], &self.config);
        let _ = pending.process_body_chunk(body);

        let result = pending
            .finish()
            .into_iter()
            .next()
            .ok_or(VerifierError::NoSignature)?;

        match result.status {
            VerificationStatus::Success => Ok(true),
            VerificationStatus::Failure(e) if e.kind() == ErrorKind::Failure => {
                trace!("signature does not verify: {e}");
                Ok(false)
            }
            VerificationStatus::Failure(e) => Err(e),
        }
    }

    /// Initiates a message verification process by verifying the header of a
    /// message.
    ///
    /// Returns a pending verification for all signatures in the given header,
    /// or `None` if the header contains no signatures.
    pub async fn verify_header<L>(
        &self,
        locator: &L,
        headers: &HeaderFields,
    ) -> Option<PendingVerification>
    where
        L: PublicKeyLocator + ?Sized,
    {
        let signature_headers = headers
            .as_ref()
            .iter()
            .enumerate()
            .filter(|(_, (name, _))| *name == DKIM_SIGNATURE_NAME)
            .take(self.config.max_signatures);

        let mut tasks = vec![];
        for (index, (name, value)) in signature_headers {
            let task =
                header::verify_header_field(locator, &self.config, headers, index, name.as_ref(), value)
                    .await;
            tasks.push(task);
        }

        if tasks.is_empty() {
            return None;
        }

        Some(PendingVerification::new(tasks, &self.config))
    }
}

/// A verification whose header part is done, awaiting the message body.
pub struct PendingVerification {
    tasks: Vec<VerifyingTask>,
    body_hasher: BodyHasher,
}

impl PendingVerification {
    fn new(tasks: Vec<VerifyingTask>, config: &Config) -> Self {
        let mut body_hasher = BodyHasherBuilder::new(config.forbid_partially_signed_body);

        // only signatures whose header verified need a body hash
        for key in tasks.iter().filter_map(|t| t.body_hasher_key()) {
            body_hasher.register(key);
        }

        Self {
            tasks,
            body_hasher: body_hasher.build(),
        }
    }

    /// Processes a chunk of the message body.
    ///
    /// Clients should pass the message body either whole or in chunks of
    /// arbitrary size to this method in order to calculate the body hash (the
    /// *bh=* tag). The returned [`BodyHasherStance`] instructs the client how
    /// to proceed if more chunks are outstanding. Note that the given body
    /// chunk is canonicalised and hashed, but not otherwise retained in memory.
    ///
    /// Remember that email message bodies generally use CRLF line endings; this
    /// is important for correct body hash calculation.
    pub fn process_body_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        self.body_hasher.hash_chunk(chunk)
    }

    /// Finishes the verification process and returns the results.
    ///
    /// The returned result vector is never empty.
    pub fn finish(self) -> Vec<VerificationResult> {
        let hasher_results = self.body_hasher.finish();

        self.tasks
            .into_iter()
            .map(|task| {
                let key = task.body_hasher_key();

                // those tasks that did verify successfully, now must have their
                // body hashes verify, too
                let status = match (task.status, key, &task.signature) {
                    (Ok(()), Some(key), Some(sig)) => {
                        verify_body_hash(&sig.body_hash, &key, &hasher_results)
                    }
                    (Ok(()), _, _) => VerificationStatus::Failure(VerifierError::Overflow),
                    (Err(e), _, _) => VerificationStatus::Failure(e),
                };

                VerificationResult {
                    status,
                    index: task.index,
                    signature: task.signature,
                    key_record: task.key_record,
                    key_size: task.key_size,
                }
            })
            .collect()
    }
}

/// Compares a body hash against the computed one.
pub(crate) fn verify_body_hash(
    body_hash: &[u8],
    key: &BodyHasherKey,
    hasher_results: &BodyHashResults,
) -> VerificationStatus {
    trace!("now checking body hash for signature");

    match hasher_results.get(key) {
        Some(Ok((h, _))) => {
            if **h != *body_hash {
                trace!("body hash mismatch: {}", util::encode_base64(h));
                VerificationStatus::Failure(VerifierError::BodyHashMismatch)
            } else {
                trace!("body hash matched");
                VerificationStatus::Success
            }
        }
        Some(Err(BodyHashError::InsufficientInput)) => {
            VerificationStatus::Failure(VerifierError::InsufficientBodyLength)
        }
        Some(Err(BodyHashError::InputTruncated)) => {
            VerificationStatus::Failure(VerifierError::Policy(PolicyError::ForbidPartiallySignedBody))
        }
        None => VerificationStatus::Failure(VerifierError::Overflow),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::authres::AuthenticationResults;

    #[test]
    fn algorithm_set_defaults() {
        let mut algorithms = AlgorithmSet::default();

        assert!(algorithms.is_enabled(SignatureAlgorithm::RsaSha256));
        assert!(algorithms.is_enabled(SignatureAlgorithm::Ed25519Sha256));
        assert!(!algorithms.is_enabled(SignatureAlgorithm::RsaSha1));

        algorithms.enable(SignatureAlgorithm::RsaSha1);
        algorithms.disable(SignatureAlgorithm::Ed25519Sha256);

        assert!(algorithms.is_enabled(SignatureAlgorithm::RsaSha1));
        assert!(!algorithms.is_enabled(SignatureAlgorithm::Ed25519Sha256));
    }

    #[test]
    fn error_kinds() {
        assert_eq!(VerifierError::NoKeyFound.kind(), ErrorKind::Key);
        assert_eq!(VerifierError::BodyHashMismatch.kind(), ErrorKind::Failure);
        assert_eq!(VerifierError::KeyLookupTimeout.kind(), ErrorKind::Failure);
        assert_eq!(
            VerifierError::DkimSignatureFormat(SignatureError::new(SignatureErrorKind::MissingVersionTag)).kind(),
            ErrorKind::Format
        );
    }

    #[test]
    fn auth_results() {
        let status = VerificationStatus::Failure(VerifierError::KeyLookupTimeout);
        assert_eq!(status.to_dkim_auth_result(), DkimAuthResult::Temperror);

        let status = VerificationStatus::Failure(VerifierError::DisabledAlgorithm);
        assert_eq!(status.to_dkim_auth_result(), DkimAuthResult::Policy);

        let status = VerificationStatus::Failure(VerifierError::DkimSignatureFormat(
            SignatureError::new(SignatureErrorKind::UnsupportedAlgorithm),
        ));
        assert_eq!(status.to_dkim_auth_result(), DkimAuthResult::Neutral);
    }

    #[test]
    fn method_result_for_format_error() {
        let mut error = SignatureError::new(SignatureErrorKind::MissingVersionTag);
        error.signature_data_base64 = Some("YWJjZGVmZ2hpamts".into());

        let result = VerificationResult {
            status: VerificationStatus::Failure(VerifierError::DkimSignatureFormat(error)),
            index: 0,
            signature: None,
            key_record: None,
            key_size: None,
        };

        let ar = AuthenticationResults {
            results: vec![result.to_method_result()],
            ..AuthenticationResults::new("example.org")
        };

        assert_eq!(
            ar.to_string(),
            "example.org; dkim=permerror reason=\"v= tag missing\" header.b=YWJjZGVm"
        );
    }
}
