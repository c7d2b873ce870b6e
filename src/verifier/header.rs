//! Verification of signature headers, up to but excluding the body hash.

use crate::{
    crypto::{HashAlgorithm, KeyType, VerificationError, VerifyingKey},
    header::{FieldBody, HeaderFields},
    message_hash::{self, BodyHasherKey},
    record::{DkimKeyRecord, DkimKeyRecordParseError, Flags},
    signature::{
        DkimSignature, DomainName, Identity, Selector, SignatureAlgorithm, SignatureError,
        SignatureErrorKind,
    },
    verifier::{
        lookup::{LocatorError, PublicKeyLocator, QUERY_METHOD_DNS_TXT},
        verify, Config, PolicyError, VerifierError,
    },
};
use std::str;
use tokio::time;
use tracing::trace;

/// A signature whose header part has been evaluated.
pub struct VerifyingTask {
    pub index: usize,
    pub signature: Option<DkimSignature>,
    /// `Ok` if the header verified and only the body hash remains to be
    /// checked.
    pub status: Result<(), VerifierError>,
    pub key_record: Option<DkimKeyRecord>,
    pub key_size: Option<usize>,
}

impl VerifyingTask {
    fn failed(index: usize, signature: Option<DkimSignature>, error: VerifierError) -> Self {
        Self {
            index,
            signature,
            status: Err(error),
            key_record: None,
            key_size: None,
        }
    }

    /// The body hash this task still needs, if any.
    pub fn body_hasher_key(&self) -> Option<BodyHasherKey> {
        match (&self.status, &self.signature) {
            (Ok(()), Some(sig)) => Some(message_hash::body_hasher_key(
                sig.body_length,
                sig.algorithm,
                sig.canonicalization.body,
            )),
            _ => None,
        }
    }
}

/// Verifies the *DKIM-Signature* header at `index`.
pub async fn verify_header_field<L>(
    locator: &L,
    config: &Config,
    headers: &HeaderFields,
    index: usize,
    name: &str,
    value: &FieldBody,
) -> VerifyingTask
where
    L: PublicKeyLocator + ?Sized,
{
    trace!(index, "processing DKIM-Signature");

    // well-formed DKIM-Signature contain only UTF-8
    let value = match str::from_utf8(value.as_ref()) {
        Ok(value) => value,
        Err(_) => {
            let error = SignatureError::new(SignatureErrorKind::ValueSyntax);
            return VerifyingTask::failed(index, None, VerifierError::DkimSignatureFormat(error));
        }
    };

    let sig: DkimSignature = match value.parse() {
        Ok(sig) => sig,
        Err(e) => {
            trace!("invalid DKIM-Signature: {e}");
            return VerifyingTask::failed(index, None, VerifierError::DkimSignatureFormat(e));
        }
    };

    if let Err(e) = check_policy(config, &sig) {
        trace!(domain = %sig.domain, "signature not acceptable: {e}");
        return VerifyingTask::failed(index, Some(sig), e);
    }

    let (public_key, key_record) =
        match look_up_key(locator, config, sig.algorithm, &sig.domain, &sig.selector).await {
            Ok(key) => key,
            Err(e) => return VerifyingTask::failed(index, Some(sig), e),
        };

    let key_size = public_key.key_size();

    let status = check_identity(&key_record, &sig.domain, sig.identity.as_ref())
        .and_then(|_| {
            verify::verify_header_data(headers, &public_key, (&sig).into(), name, value)
        });

    VerifyingTask {
        index,
        signature: Some(sig),
        status,
        key_record: Some(key_record),
        key_size,
    }
}

fn check_policy(config: &Config, sig: &DkimSignature) -> Result<(), VerifierError> {
    if !config.algorithms.is_enabled(sig.algorithm) {
        return Err(VerifierError::DisabledAlgorithm);
    }

    if config
        .required_signed_headers
        .iter()
        .any(|h| !sig.signed_headers.contains(h))
    {
        return Err(VerifierError::Policy(PolicyError::RequiredHeadersNotSigned));
    }

    if let Some(len) = sig.body_length {
        // signed body length too large to undergo processing on this platform
        if usize::try_from(len).is_err() {
            return Err(VerifierError::Overflow);
        }
    }

    check_timestamps(config, sig.timestamp, sig.expiration)
}

/// Checks the *t=* and *x=* values against the current time.
pub fn check_timestamps(
    config: &Config,
    timestamp: Option<u64>,
    expiration: Option<u64>,
) -> Result<(), VerifierError> {
    let current_t = config.current_timestamp();
    let delta = config.time_tolerance.as_secs();

    if config.fail_if_expired {
        if let Some(x) = expiration {
            if current_t >= x.saturating_add(delta) {
                return Err(VerifierError::Policy(PolicyError::SignatureExpired));
            }
        }
    }
    if config.fail_if_in_future {
        if let Some(t) = timestamp {
            if t.saturating_sub(delta) > current_t {
                return Err(VerifierError::Policy(PolicyError::TimestampInFuture));
            }
        }
    }

    Ok(())
}

/// Locates and reads the public key for a signature.
pub async fn look_up_key<L>(
    locator: &L,
    config: &Config,
    algorithm: SignatureAlgorithm,
    domain: &DomainName,
    selector: &Selector,
) -> Result<(VerifyingKey, DkimKeyRecord), VerifierError>
where
    L: PublicKeyLocator + ?Sized,
{
    trace!(%domain, %selector, "locating public key");

    let query = locator.locate_public_key(QUERY_METHOD_DNS_TXT, domain, selector);

    let record = match time::timeout(config.lookup_timeout, query).await {
        Ok(Ok(record)) => record,
        Ok(Err(e)) => {
            trace!(%domain, %selector, "public key not available: {e}");
            return Err(match e {
                LocatorError::NotFound => VerifierError::NoKeyFound,
                LocatorError::InvalidKey(DkimKeyRecordParseError::RevokedKey) => {
                    VerifierError::KeyRevoked
                }
                LocatorError::InvalidKey(_) => VerifierError::KeyRecordFormat,
                LocatorError::Timeout => VerifierError::KeyLookupTimeout,
                LocatorError::Io => VerifierError::KeyLookup,
            });
        }
        Err(_) => {
            trace!(%domain, %selector, "public key lookup timed out");
            return Err(VerifierError::KeyLookupTimeout);
        }
    };

    validate_key_record(&record, algorithm.key_type(), algorithm.hash_algorithm())?;

    let public_key = match VerifyingKey::from_key_data(record.key_type, &record.key_data) {
        Ok(k) => k,
        Err(VerificationError::InsufficientKeySize) => {
            return Err(VerifierError::Policy(PolicyError::KeyTooSmall));
        }
        Err(e) => {
            trace!("unusable public key: {e}");
            return Err(VerifierError::InvalidKey);
        }
    };

    if let Some(size) = public_key.key_size() {
        if size < config.min_key_bits {
            trace!(size, "public key too small");
            return Err(VerifierError::Policy(PolicyError::KeyTooSmall));
        }
    }

    Ok((public_key, record))
}

fn validate_key_record(
    rec: &DkimKeyRecord,
    key_type: KeyType,
    hash_alg: HashAlgorithm,
) -> Result<(), VerifierError> {
    if rec.key_type != key_type {
        trace!("wrong public key type");
        return Err(VerifierError::WrongKeyType);
    }
    if !rec.allows_hash_algorithm(hash_alg) {
        trace!("disallowed hash algorithm");
        return Err(VerifierError::DisallowedHashAlgorithm);
    }
    if !rec.allows_email() {
        trace!("disallowed service type");
        return Err(VerifierError::DisallowedServiceType);
    }
    Ok(())
}

// With t=s, the i= domain must equal d= exactly. Parsing has already ensured
// that it is at least a subdomain.
fn check_identity(
    rec: &DkimKeyRecord,
    domain: &DomainName,
    identity: Option<&Identity>,
) -> Result<(), VerifierError> {
    if rec.flags.contains(&Flags::NoSubdomains) {
        if let Some(identity) = identity {
            if domain.to_ascii() != identity.domain_part.to_ascii() {
                trace!("domain mismatch");
                return Err(VerifierError::DomainMismatch);
            }
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::{Duration, SystemTime};

    #[test]
    fn check_timestamps_ok() {
        let config = Config {
            fixed_system_time: Some(SystemTime::UNIX_EPOCH + Duration::from_secs(1000)),
            ..Default::default()
        };

        assert_eq!(check_timestamps(&config, Some(900), Some(2000)), Ok(()));
        assert_eq!(check_timestamps(&config, Some(1020), None), Ok(()));
        assert_eq!(
            check_timestamps(&config, Some(1100), None),
            Err(VerifierError::Policy(PolicyError::TimestampInFuture))
        );
        assert_eq!(
            check_timestamps(&config, Some(100), Some(960)),
            Err(VerifierError::Policy(PolicyError::SignatureExpired))
        );
        assert_eq!(check_timestamps(&config, Some(100), Some(980)), Ok(()));
    }

    #[test]
    fn validate_key_record_ok() {
        let record: DkimKeyRecord = "v=DKIM1; k=ed25519; h=sha256; s=email; p=YWJj".parse().unwrap();

        assert_eq!(validate_key_record(&record, KeyType::Ed25519, HashAlgorithm::Sha256), Ok(()));
        assert_eq!(
            validate_key_record(&record, KeyType::Rsa, HashAlgorithm::Sha256),
            Err(VerifierError::WrongKeyType)
        );
        assert_eq!(
            validate_key_record(&record, KeyType::Ed25519, HashAlgorithm::Sha1),
            Err(VerifierError::DisallowedHashAlgorithm)
        );
    }

    #[test]
    fn check_identity_no_subdomains() {
        let record: DkimKeyRecord = "v=DKIM1; t=s; p=YWJj".parse().unwrap();
        let domain = DomainName::new("example.com").unwrap();

        let identity = Identity::new("me@mail.example.com").unwrap();
        assert_eq!(
            check_identity(&record, &domain, Some(&identity)),
            Err(VerifierError::DomainMismatch)
        );

        let identity = Identity::new("me@example.com").unwrap();
        assert_eq!(check_identity(&record, &domain, Some(&identity)), Ok(()));
    }
}
