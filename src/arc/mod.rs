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

//! Authenticated Received Chain (ARC).
//!
//! An ARC set consists of an *ARC-Authentication-Results* header recording
//! the verdicts of an intermediary, an *ARC-Message-Signature* over the
//! message, and an *ARC-Seal* over the chain so far. Sets are numbered by
//! their instance tag, starting at 1, and are prepended most recent first.
//!
//! [`ArcSealer`] adds a new set to a message, [`ArcVerifier`] validates the
//! existing chain.

mod chain;
mod seal;
mod validate;

pub use self::{
    chain::{check_chain_validation, collect_arc_sets, seal_hash_input, ArcChainError, ArcSet},
    seal::{ArcSealOutcome, ArcSealRequest, ArcSealResult, ArcSealer, ArcSignerError, NotSealedReason},
    validate::{ArcInstanceResult, ArcSignatureValidationResult, ArcValidationResult, ArcVerifier},
};

pub use crate::authres::ARC_AUTHENTICATION_RESULTS_NAME;

pub(crate) use self::chain::compute_seal_hash;

use crate::{
    header::FieldName,
    signature::{
        parse_algorithm_tag, parse_base64_tag, parse_body_length_tag, parse_canonicalization_tag,
        parse_domain_tag, parse_instance_tag, parse_selector_tag, parse_signed_headers_tag,
        parse_timestamp_tag, Canonicalization, CanonicalizationAlgorithm, DomainName, Selector,
        SignatureAlgorithm, SignatureError, SignatureErrorKind,
    },
    tag_list::{Tag, TagList},
    util::{self, CanonicalStr},
};
use std::{
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub const ARC_MESSAGE_SIGNATURE_NAME: &str = "ARC-Message-Signature";
pub const ARC_SEAL_NAME: &str = "ARC-Seal";

/// The chain validation status recorded in the *cv=* tag of an ARC seal.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ChainValidationStatus {
    None,
    Pass,
    Fail,
}

impl CanonicalStr for ChainValidationStatus {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Pass => "pass",
            Self::Fail => "fail",
        }
    }
}

impl Display for ChainValidationStatus {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for ChainValidationStatus {
    type Err = SignatureErrorKind;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [Self::None, Self::Pass, Self::Fail]
            .into_iter()
            .find(|cv| s.eq_ignore_ascii_case(cv.canonical_str()))
            .ok_or(SignatureErrorKind::InvalidChainValidation)
    }
}

/// An *ARC-Message-Signature*.
///
/// The tags are those of a DKIM signature, except that *i=* holds the
/// instance and there is no *v=*.
#[derive(Clone, Eq, PartialEq)]
pub struct ArcMessageSignature {
    pub instance: u32,
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,  // not empty, no ARC-Seal
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
}

impl ArcMessageSignature {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, SignatureErrorKind> {
        let mut instance = None;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut body_length = None;
        let mut selector = None;
        let mut timestamp = None;

        for &Tag { name, value, .. } in tag_list.iter() {
            match name {
                "i" => instance = Some(parse_instance_tag(value)?),
                "a" => algorithm = Some(parse_algorithm_tag(value)?),
                "b" => signature_data = Some(parse_base64_tag(value)?),
                "bh" => body_hash = Some(parse_base64_tag(value)?),
                "c" => canonicalization = Some(parse_canonicalization_tag(value)?),
                "d" => domain = Some(parse_domain_tag(value)?),
                "h" => {
                    let value = parse_signed_headers_tag(value)?;
                    if value.iter().any(|h| *h == ARC_SEAL_NAME) {
                        return Err(SignatureErrorKind::SealHeaderSigned);
                    }
                    signed_headers = Some(value);
                }
                "l" => body_length = Some(parse_body_length_tag(value)?),
                "s" => selector = Some(parse_selector_tag(value)?),
                "t" => timestamp = Some(parse_timestamp_tag(value)?),
                _ => {}
            }
        }

        Ok(Self {
            instance: instance.ok_or(SignatureErrorKind::MissingInstanceTag)?,
            algorithm: algorithm.ok_or(SignatureErrorKind::MissingAlgorithmTag)?,
            signature_data: signature_data.ok_or(SignatureErrorKind::MissingSignatureTag)?,
            body_hash: body_hash.ok_or(SignatureErrorKind::MissingBodyHashTag)?,
            canonicalization: canonicalization.unwrap_or_default(),
            domain: domain.ok_or(SignatureErrorKind::MissingDomainTag)?,
            signed_headers: signed_headers.ok_or(SignatureErrorKind::MissingSignedHeadersTag)?,
            body_length,
            selector: selector.ok_or(SignatureErrorKind::MissingSelectorTag)?,
            timestamp,
        })
    }
}

impl FromStr for ArcMessageSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::parse(s)
            .map_err(|_| SignatureError::new(SignatureErrorKind::InvalidTagList))?;

        Self::from_tag_list(&tag_list)
            .map_err(|kind| SignatureError::with_diagnostics(&tag_list, kind))
    }
}

impl fmt::Debug for ArcMessageSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcMessageSignature")
            .field("instance", &self.instance)
            .field("algorithm", &self.algorithm)
            .field("signature_data", &util::encode_base64(&self.signature_data))
            .field("body_hash", &util::encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

/// An *ARC-Seal*.
///
/// A seal has no *h=* tag and no canonicalization: it always covers the ARC
/// headers of all instances up to its own, in relaxed canonicalization.
#[derive(Clone, Eq, PartialEq)]
pub struct ArcSeal {
    pub instance: u32,
    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub chain_validation: ChainValidationStatus,
    pub domain: DomainName,
    pub selector: Selector,
    pub timestamp: Option<u64>,
}

impl ArcSeal {
    /// The canonicalization used for seals.
    pub const CANONICALIZATION: CanonicalizationAlgorithm = CanonicalizationAlgorithm::Relaxed;

    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, SignatureErrorKind> {
        let mut instance = None;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut chain_validation = None;
        let mut domain = None;
        let mut selector = None;
        let mut timestamp = None;

        for &Tag { name, value, .. } in tag_list.iter() {
            match name {
                "i" => instance = Some(parse_instance_tag(value)?),
                "a" => algorithm = Some(parse_algorithm_tag(value)?),
                "b" => signature_data = Some(parse_base64_tag(value)?),
                "cv" => chain_validation = Some(value.parse::<ChainValidationStatus>()?),
                "d" => domain = Some(parse_domain_tag(value)?),
                "h" => return Err(SignatureErrorKind::UnexpectedSignedHeadersTag),
                "s" => selector = Some(parse_selector_tag(value)?),
                "t" => timestamp = Some(parse_timestamp_tag(value)?),
                _ => {}
            }
        }

        Ok(Self {
            instance: instance.ok_or(SignatureErrorKind::MissingInstanceTag)?,
            algorithm: algorithm.ok_or(SignatureErrorKind::MissingAlgorithmTag)?,
            signature_data: signature_data.ok_or(SignatureErrorKind::MissingSignatureTag)?,
            chain_validation: chain_validation
                .ok_or(SignatureErrorKind::MissingChainValidationTag)?,
            domain: domain.ok_or(SignatureErrorKind::MissingDomainTag)?,
            selector: selector.ok_or(SignatureErrorKind::MissingSelectorTag)?,
            timestamp,
        })
    }
}

impl FromStr for ArcSeal {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::parse(s)
            .map_err(|_| SignatureError::new(SignatureErrorKind::InvalidTagList))?;

        Self::from_tag_list(&tag_list)
            .map_err(|kind| SignatureError::with_diagnostics(&tag_list, kind))
    }
}

impl fmt::Debug for ArcSeal {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArcSeal")
            .field("instance", &self.instance)
            .field("algorithm", &self.algorithm)
            .field("signature_data", &util::encode_base64(&self.signature_data))
            .field("chain_validation", &self.chain_validation)
            .field("domain", &self.domain)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_message_signature() {
        let ams: ArcMessageSignature = "i=2; a=rsa-sha256; c=relaxed/relaxed; d=example.org;\r\n\
            \ts=sel; t=1700000000; h=From:To:Subject; bh=YWJj; b=ZGVm"
            .parse()
            .unwrap();

        assert_eq!(ams.instance, 2);
        assert_eq!(ams.algorithm, SignatureAlgorithm::RsaSha256);
        assert_eq!(ams.canonicalization.canonical_str(), "relaxed/relaxed");
        assert_eq!(ams.signed_headers.len(), 3);
        assert_eq!(&*ams.body_hash, b"abc");
        assert_eq!(ams.timestamp, Some(1700000000));
    }

    #[test]
    fn parse_message_signature_errors() {
        let error = "a=rsa-sha256; d=example.org; s=sel; h=From; bh=YWJj; b=ZGVm"
            .parse::<ArcMessageSignature>()
            .unwrap_err();
        assert_eq!(error.kind, SignatureErrorKind::MissingInstanceTag);
        assert_eq!(error.domain, Some(DomainName::new("example.org").unwrap()));

        let error = "i=1; a=rsa-sha256; d=example.org; s=sel; h=From:ARC-Seal; bh=YWJj; b=ZGVm"
            .parse::<ArcMessageSignature>()
            .unwrap_err();
        assert_eq!(error.kind, SignatureErrorKind::SealHeaderSigned);

        let error = "i=51; a=rsa-sha256; d=example.org; s=sel; h=From; bh=YWJj; b=ZGVm"
            .parse::<ArcMessageSignature>()
            .unwrap_err();
        assert_eq!(error.kind, SignatureErrorKind::InvalidInstance);
    }

    #[test]
    fn parse_seal() {
        let seal: ArcSeal = "i=1; a=ed25519-sha256; t=1700000000; cv=none; d=example.org;\r\n\
            \ts=sel; b=ZGVm"
            .parse()
            .unwrap();

        assert_eq!(seal.instance, 1);
        assert_eq!(seal.chain_validation, ChainValidationStatus::None);

        let error = "i=1; a=ed25519-sha256; d=example.org; s=sel; b=ZGVm"
            .parse::<ArcSeal>()
            .unwrap_err();
        assert_eq!(error.kind, SignatureErrorKind::MissingChainValidationTag);

        let error = "i=1; a=ed25519-sha256; cv=pass; d=example.org; s=sel; h=From; b=ZGVm"
            .parse::<ArcSeal>()
            .unwrap_err();
        assert_eq!(error.kind, SignatureErrorKind::UnexpectedSignedHeadersTag);

        let error = "i=1; a=ed25519-sha256; cv=maybe; d=example.org; s=sel; b=ZGVm"
            .parse::<ArcSeal>()
            .unwrap_err();
        assert_eq!(error.kind, SignatureErrorKind::InvalidChainValidation);
    }
}
