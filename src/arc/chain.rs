//! Discovery of the ARC sets in a message header.

use crate::{
    arc::{ArcMessageSignature, ArcSeal, ChainValidationStatus, ARC_MESSAGE_SIGNATURE_NAME, ARC_SEAL_NAME},
    authres::{AuthenticationResults, ARC_AUTHENTICATION_RESULTS_NAME},
    canonicalize,
    crypto::{self, HashAlgorithm},
    header::{FieldBody, HeaderFields},
    signature::{SignatureError, SignatureErrorKind, MAX_ARC_INSTANCE},
};
use std::{
    collections::BTreeMap,
    error::Error,
    fmt::{self, Display, Formatter},
    str,
};
use tracing::trace;

/// One complete ARC set, together with the positions of its header fields.
#[derive(Clone, Debug, PartialEq)]
pub struct ArcSet {
    pub instance: u32,
    pub results: AuthenticationResults,
    pub message_signature: ArcMessageSignature,
    pub seal: ArcSeal,
    pub results_index: usize,
    pub message_signature_index: usize,
    pub seal_index: usize,
}

impl ArcSet {
    /// The AAR, AMS, and AS header fields of this set, in seal hash order.
    pub(crate) fn header_fields<'a>(&self, headers: &'a HeaderFields) -> [(&'a str, &'a [u8]); 3] {
        let fields = headers.as_ref();
        [self.results_index, self.message_signature_index, self.seal_index].map(|i| {
            let (name, value) = &fields[i];
            (name.as_ref(), value.as_ref())
        })
    }
}

/// An error that makes an ARC chain structurally invalid.
#[derive(Clone, Debug, PartialEq)]
pub enum ArcChainError {
    InvalidResults { index: usize },
    InvalidMessageSignature { index: usize, error: SignatureError },
    InvalidSeal { index: usize, error: SignatureError },
    DuplicateInstance(u32),
    MissingInstance(u32),
    TooManyInstances,
    InvalidChainValidation(u32),
}

impl Display for ArcChainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidResults { index } => {
                write!(f, "ill-formed ARC-Authentication-Results at index {index}")
            }
            Self::InvalidMessageSignature { index, error } => {
                write!(f, "ill-formed ARC-Message-Signature at index {index}: {error}")
            }
            Self::InvalidSeal { index, error } => {
                write!(f, "ill-formed ARC-Seal at index {index}: {error}")
            }
            Self::DuplicateInstance(i) => write!(f, "duplicate ARC instance {i}"),
            Self::MissingInstance(i) => write!(f, "incomplete ARC set for instance {i}"),
            Self::TooManyInstances => write!(f, "too many ARC instances"),
            Self::InvalidChainValidation(i) => {
                write!(f, "unexpected chain validation status in ARC-Seal {i}")
            }
        }
    }
}

impl Error for ArcChainError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::InvalidMessageSignature { error, .. } | Self::InvalidSeal { error, .. } => {
                Some(error)
            }
            _ => None,
        }
    }
}

/// Collects the ARC sets in the header, ordered by instance, oldest first.
///
/// A header without ARC header fields yields an empty chain. Instances must
/// be numbered 1 to N without gaps, and every instance must have exactly one
/// header field of each kind.
pub fn collect_arc_sets(headers: &HeaderFields) -> Result<Vec<ArcSet>, ArcChainError> {
    let mut results = BTreeMap::new();
    let mut signatures = BTreeMap::new();
    let mut seals = BTreeMap::new();

    for (index, (name, value)) in headers.as_ref().iter().enumerate() {
        if *name == ARC_AUTHENTICATION_RESULTS_NAME {
            let ar = AuthenticationResults::parse(value.as_ref())
                .map_err(|_| ArcChainError::InvalidResults { index })?;
            let instance = ar.instance.ok_or(ArcChainError::InvalidResults { index })?;
            if instance > MAX_ARC_INSTANCE {
                return Err(ArcChainError::TooManyInstances);
            }
            insert_unique(&mut results, instance, (index, ar))?;
        } else if *name == ARC_MESSAGE_SIGNATURE_NAME {
            let ams: ArcMessageSignature = parse_value(value)
                .map_err(|error| ArcChainError::InvalidMessageSignature { index, error })?;
            insert_unique(&mut signatures, ams.instance, (index, ams))?;
        } else if *name == ARC_SEAL_NAME {
            let seal: ArcSeal = parse_value(value)
                .map_err(|error| ArcChainError::InvalidSeal { index, error })?;
            insert_unique(&mut seals, seal.instance, (index, seal))?;
        }
    }

    let max_instance = [results.keys().last(), signatures.keys().last(), seals.keys().last()]
        .into_iter()
        .flatten()
        .max()
        .copied()
        .unwrap_or(0);

    let mut sets = vec![];

    for instance in 1..=max_instance {
        let (Some((results_index, results)), Some((message_signature_index, message_signature)), Some((seal_index, seal))) = (
            results.remove(&instance),
            signatures.remove(&instance),
            seals.remove(&instance),
        ) else {
            return Err(ArcChainError::MissingInstance(instance));
        };

        sets.push(ArcSet {
            instance,
            results,
            message_signature,
            seal,
            results_index,
            message_signature_index,
            seal_index,
        });
    }

    trace!("found {} ARC sets", sets.len());

    Ok(sets)
}

fn insert_unique<T>(map: &mut BTreeMap<u32, T>, instance: u32, value: T) -> Result<(), ArcChainError> {
    if map.insert(instance, value).is_some() {
        return Err(ArcChainError::DuplicateInstance(instance));
    }
    Ok(())
}

fn parse_value<T>(value: &FieldBody) -> Result<T, SignatureError>
where
    T: str::FromStr<Err = SignatureError>,
{
    let value = str::from_utf8(value.as_ref())
        .map_err(|_| SignatureError::new(SignatureErrorKind::ValueSyntax))?;
    value.parse()
}

/// Checks the *cv=* tags of a chain that does not end in failure: the first
/// seal must say `none`, all later seals `pass`.
pub fn check_chain_validation(sets: &[ArcSet]) -> Result<(), ArcChainError> {
    for set in sets {
        let expected = if set.instance == 1 {
            ChainValidationStatus::None
        } else {
            ChainValidationStatus::Pass
        };
        if set.seal.chain_validation != expected {
            return Err(ArcChainError::InvalidChainValidation(set.instance));
        }
    }
    Ok(())
}

/// Produces the canonicalized input of an ARC seal.
///
/// `fields` are the AAR, AMS, and AS header fields of all earlier instances,
/// followed by the AAR and AMS of the sealed instance; the seal value must
/// have an empty `b=` tag.
pub fn seal_hash_input<'a, I>(fields: I, seal_value: &str) -> Vec<u8>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let mut result = vec![];

    for (name, value) in fields {
        canonicalize::canonicalize_header(&mut result, ArcSeal::CANONICALIZATION, name, value);
        result.extend(b"\r\n");
    }

    canonicalize::canonicalize_header(&mut result, ArcSeal::CANONICALIZATION, ARC_SEAL_NAME, seal_value);

    result
}

pub(crate) fn compute_seal_hash<'a, I>(hash_alg: HashAlgorithm, fields: I, seal_value: &str) -> Box<[u8]>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    crypto::digest(hash_alg, &seal_hash_input(fields, seal_value))
}
