//! The ARC verifier.

use crate::{
    arc::{
        chain::{self, ArcSet},
        ChainValidationStatus, ARC_MESSAGE_SIGNATURE_NAME,
    },
    authres::MethodResult,
    header::HeaderFields,
    message_hash::{self, BodyHasherBuilder},
    signature::{SignatureError, SignatureErrorKind},
    util::CanonicalStr,
    verifier::{
        check_timestamps, look_up_key, verify_body_hash, verify_header_data, verify_seal_data,
        AlgorithmSet, Config, PublicKeyLocator, VerificationStatus, VerifierError,
    },
};
use std::{
    fmt::{self, Display, Formatter},
    str,
};
use tracing::trace;

/// The overall result of ARC chain validation.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ArcSignatureValidationResult {
    /// The message carries no ARC sets.
    None,
    Pass,
    Fail,
}

impl CanonicalStr for ArcSignatureValidationResult {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl Display for ArcSignatureValidationResult {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

/// The verification outcome of one ARC set.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArcInstanceResult {
    pub instance: u32,
    pub message_signature: VerificationStatus,
    pub seal: VerificationStatus,
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ArcValidationResult {
    pub chain: ArcSignatureValidationResult,
    /// Per-instance results, newest first. Empty if the chain could not be
    /// evaluated at all.
    pub instances: Vec<ArcInstanceResult>,
    /// For a passing chain, the oldest instance from which on all message
    /// signatures still verify, or 0 if all of them do.
    pub oldest_pass: Option<u32>,
    pub reason: Option<String>,
}

impl ArcValidationResult {
    fn new(chain: ArcSignatureValidationResult, reason: Option<String>) -> Self {
        Self {
            chain,
            instances: vec![],
            oldest_pass: None,
            reason,
        }
    }

    /// Produces an *arc* method result for an *Authentication-Results* header.
    pub fn to_method_result(&self) -> MethodResult {
        let mut result = MethodResult::new("arc", self.chain.canonical_str());

        if let Some(reason) = &self.reason {
            result.reason = Some(reason.clone());
        }
        if let Some(oldest_pass) = self.oldest_pass.filter(|&n| n > 0) {
            result = result.with_property("header", "oldest-pass", oldest_pass.to_string());
        }

        result
    }
}

/// A verifier of ARC chains.
///
/// Message signatures are checked like DKIM signatures, subject to the same
/// configuration.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ArcVerifier {
    config: Config,
}

impl ArcVerifier {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn algorithms_mut(&mut self) -> &mut AlgorithmSet {
        &mut self.config.algorithms
    }

    /// Validates the ARC chain of a message.
    pub async fn verify<L>(
        &self,
        locator: &L,
        headers: &HeaderFields,
        body: &[u8],
    ) -> ArcValidationResult
    where
        L: PublicKeyLocator + ?Sized,
    {
        use ArcSignatureValidationResult as Chain;

        let sets = match chain::collect_arc_sets(headers) {
            Ok(sets) => sets,
            Err(e) => {
                trace!("invalid ARC chain: {e}");
                return ArcValidationResult::new(Chain::Fail, Some(e.to_string()));
            }
        };

        let Some(newest) = sets.last() else {
            return ArcValidationResult::new(Chain::None, None);
        };

        if newest.seal.chain_validation == ChainValidationStatus::Fail {
            trace!(instance = newest.instance, "ARC chain already failed");
            let reason = format!("chain marked as failed in instance {}", newest.instance);
            return ArcValidationResult::new(Chain::Fail, Some(reason));
        }

        if let Err(e) = chain::check_chain_validation(&sets) {
            trace!("invalid ARC chain: {e}");
            return ArcValidationResult::new(Chain::Fail, Some(e.to_string()));
        }

        // header part: message signatures, then seals, newest first

        let mut pending = vec![];
        for set in sets.iter().rev() {
            let status = self.verify_message_signature(locator, headers, set).await;
            let key = status.is_ok().then(|| {
                let ams = &set.message_signature;
                message_hash::body_hasher_key(ams.body_length, ams.algorithm, ams.canonicalization.body)
            });
            pending.push((set, status, key));
        }

        let mut seals = vec![];
        for k in (0..sets.len()).rev() {
            let status = match self.verify_seal(locator, headers, &sets, k).await {
                Ok(()) => VerificationStatus::Success,
                Err(e) => VerificationStatus::Failure(e),
            };
            seals.push(status);
        }

        // body part

        let mut hasher = BodyHasherBuilder::new(self.config.forbid_partially_signed_body);
        for key in pending.iter().filter_map(|(_, _, key)| *key) {
            hasher.register(key);
        }
        let mut hasher = hasher.build();
        let _ = hasher.hash_chunk(body);
        let hasher_results = hasher.finish();

        let instances: Vec<_> = pending
            .into_iter()
            .zip(seals)
            .map(|((set, status, key), seal)| {
                let message_signature = match (status, key) {
                    (Ok(()), Some(key)) => {
                        verify_body_hash(&set.message_signature.body_hash, &key, &hasher_results)
                    }
                    (Ok(()), None) => VerificationStatus::Failure(VerifierError::Overflow),
                    (Err(e), _) => VerificationStatus::Failure(e),
                };
                ArcInstanceResult {
                    instance: set.instance,
                    message_signature,
                    seal,
                }
            })
            .collect();

        evaluate(instances)
    }

    async fn verify_message_signature<L>(
        &self,
        locator: &L,
        headers: &HeaderFields,
        set: &ArcSet,
    ) -> Result<(), VerifierError>
    where
        L: PublicKeyLocator + ?Sized,
    {
        let ams = &set.message_signature;

        trace!(instance = set.instance, domain = %ams.domain, "verifying ARC-Message-Signature");

        if !self.config.algorithms.is_enabled(ams.algorithm) {
            return Err(VerifierError::DisabledAlgorithm);
        }
        if let Some(len) = ams.body_length {
            usize::try_from(len).map_err(|_| VerifierError::Overflow)?;
        }
        check_timestamps(&self.config, ams.timestamp, None)?;

        let (public_key, _) =
            look_up_key(locator, &self.config, ams.algorithm, &ams.domain, &ams.selector).await?;

        let value = header_value_str(headers, set.message_signature_index)?;

        verify_header_data(headers, &public_key, ams.into(), ARC_MESSAGE_SIGNATURE_NAME, value)
    }

    // Verifies the seal of `sets[k]`, which covers all sets up to and
    // including `k`.
    async fn verify_seal<L>(
        &self,
        locator: &L,
        headers: &HeaderFields,
        sets: &[ArcSet],
        k: usize,
    ) -> Result<(), VerifierError>
    where
        L: PublicKeyLocator + ?Sized,
    {
        let set = &sets[k];
        let seal = &set.seal;

        trace!(instance = set.instance, domain = %seal.domain, "verifying ARC-Seal");

        if !self.config.algorithms.is_enabled(seal.algorithm) {
            return Err(VerifierError::DisabledAlgorithm);
        }
        check_timestamps(&self.config, seal.timestamp, None)?;

        let (public_key, _) =
            look_up_key(locator, &self.config, seal.algorithm, &seal.domain, &seal.selector).await?;

        let value = header_value_str(headers, set.seal_index)?;

        let [results, message_signature, _] = set.header_fields(headers);
        let fields = sets[..k]
            .iter()
            .flat_map(|s| s.header_fields(headers))
            .chain([results, message_signature]);

        verify_seal_data(&public_key, seal, fields, value)
    }
}

fn header_value_str(headers: &HeaderFields, index: usize) -> Result<&str, VerifierError> {
    let (_, value) = &headers.as_ref()[index];
    str::from_utf8(value.as_ref()).map_err(|_| {
        VerifierError::DkimSignatureFormat(SignatureError::new(SignatureErrorKind::ValueSyntax))
    })
}

// Derives the chain result from the per-instance results, ordered newest
// first.
fn evaluate(instances: Vec<ArcInstanceResult>) -> ArcValidationResult {
    use ArcSignatureValidationResult as Chain;

    let mut reason = None;

    if let Some(failed) = instances.iter().find(|r| r.seal != VerificationStatus::Success) {
        if let VerificationStatus::Failure(e) = &failed.seal {
            reason = Some(format!("ARC-Seal {} does not verify: {e}", failed.instance));
        }
    } else if let Some(ArcInstanceResult {
        instance,
        message_signature: VerificationStatus::Failure(e),
        ..
    }) = instances.first()
    {
        reason = Some(format!("ARC-Message-Signature {instance} does not verify: {e}"));
    }

    let chain = if reason.is_none() { Chain::Pass } else { Chain::Fail };

    let oldest_pass = (chain == Chain::Pass).then(|| {
        instances
            .iter()
            .find(|r| r.message_signature != VerificationStatus::Success)
            .map_or(0, |r| r.instance + 1)
    });

    trace!(%chain, ?oldest_pass, "ARC chain evaluated");

    ArcValidationResult {
        chain,
        instances,
        oldest_pass,
        reason,
    }
}
