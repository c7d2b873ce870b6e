//! Signature algorithms, canonicalization, and the DKIM signature.
//!
//! The tag parsing helpers in this module are shared by the *DKIM-Signature*
//! and the ARC signature headers.

mod names;

pub use names::{DomainName, Identity, ParseDomainError, Selector};

use crate::{
    crypto::{HashAlgorithm, KeyType},
    header::FieldName,
    tag_list::{
        parse_base64_tag_value, parse_colon_separated_tag_value, strip_fws_from_tag_value,
        Tag, TagList,
    },
    util::{self, CanonicalStr},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

/// A signature algorithm.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureAlgorithm {
    /// The *rsa-sha1* signature algorithm.
    RsaSha1,
    /// The *rsa-sha256* signature algorithm.
    RsaSha256,
    /// The *ed25519-sha256* signature algorithm.
    Ed25519Sha256,
}

impl SignatureAlgorithm {
    /// Returns this signature algorithm’s key type.
    pub fn key_type(self) -> KeyType {
        match self {
            Self::RsaSha1 | Self::RsaSha256 => KeyType::Rsa,
            Self::Ed25519Sha256 => KeyType::Ed25519,
        }
    }

    /// Returns this signature algorithm’s hash algorithm.
    pub fn hash_algorithm(self) -> HashAlgorithm {
        match self {
            Self::RsaSha1 => HashAlgorithm::Sha1,
            Self::RsaSha256 | Self::Ed25519Sha256 => HashAlgorithm::Sha256,
        }
    }

    /// Combines a key type and a hash algorithm, if that combination exists.
    pub fn from_parts(key_type: KeyType, hash_alg: HashAlgorithm) -> Option<Self> {
        match (key_type, hash_alg) {
            (KeyType::Rsa, HashAlgorithm::Sha1) => Some(Self::RsaSha1),
            (KeyType::Rsa, HashAlgorithm::Sha256) => Some(Self::RsaSha256),
            (KeyType::Ed25519, HashAlgorithm::Sha256) => Some(Self::Ed25519Sha256),
            (KeyType::Ed25519, HashAlgorithm::Sha1) => None,
        }
    }

    pub fn all() -> [Self; 3] {
        [Self::RsaSha1, Self::RsaSha256, Self::Ed25519Sha256]
    }
}

impl CanonicalStr for SignatureAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::RsaSha1 => "rsa-sha1",
            Self::RsaSha256 => "rsa-sha256",
            Self::Ed25519Sha256 => "ed25519-sha256",
        }
    }
}

impl Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::all()
            .into_iter()
            .find(|alg| s.eq_ignore_ascii_case(alg.canonical_str()))
            .ok_or("unknown signature algorithm")
    }
}

/// A canonicalization algorithm.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum CanonicalizationAlgorithm {
    /// The *simple* canonicalization algorithm.
    #[default]
    Simple,
    /// The *relaxed* canonicalization algorithm.
    Relaxed,
}

impl CanonicalStr for CanonicalizationAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Simple => "simple",
            Self::Relaxed => "relaxed",
        }
    }
}

impl Display for CanonicalizationAlgorithm {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl FromStr for CanonicalizationAlgorithm {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.eq_ignore_ascii_case("simple") {
            Ok(Self::Simple)
        } else if s.eq_ignore_ascii_case("relaxed") {
            Ok(Self::Relaxed)
        } else {
            Err("unknown canonicalization algorithm")
        }
    }
}

/// A pair of header/body canonicalization algorithms.
#[derive(Clone, Copy, Default, Eq, Hash, PartialEq)]
pub struct Canonicalization {
    /// The header canonicalization.
    pub header: CanonicalizationAlgorithm,
    /// The body canonicalization.
    pub body: CanonicalizationAlgorithm,
}

impl Canonicalization {
    pub fn new(header: CanonicalizationAlgorithm, body: CanonicalizationAlgorithm) -> Self {
        Self { header, body }
    }
}

impl CanonicalStr for Canonicalization {
    fn canonical_str(&self) -> &'static str {
        use CanonicalizationAlgorithm::*;

        match (self.header, self.body) {
            (Simple, Simple) => "simple/simple",
            (Simple, Relaxed) => "simple/relaxed",
            (Relaxed, Simple) => "relaxed/simple",
            (Relaxed, Relaxed) => "relaxed/relaxed",
        }
    }
}

impl Display for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.canonical_str())
    }
}

impl fmt::Debug for Canonicalization {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}/{:?}", &self.header, &self.body)
    }
}

impl FromStr for Canonicalization {
    type Err = &'static str;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(if let Some((header, body)) = s.split_once('/') {
            Self {
                header: CanonicalizationAlgorithm::from_str(header)?,
                body: CanonicalizationAlgorithm::from_str(body)?,
            }
        } else {
            Self {
                header: CanonicalizationAlgorithm::from_str(s)?,
                body: Default::default(),
            }
        })
    }
}

pub const DKIM_SIGNATURE_NAME: &str = "DKIM-Signature";

/// An error that occurs when parsing a signature header.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SignatureError {
    // circumstantial diagnostics:
    pub domain: Option<DomainName>,  // header.d=   (a valid domain name)
    pub signature_data_base64: Option<String>,  // header.b=  (the string value!)

    // error:
    pub kind: SignatureErrorKind,
}

impl SignatureError {
    pub fn new(kind: SignatureErrorKind) -> Self {
        Self {
            domain: None,
            signature_data_base64: None,
            kind,
        }
    }

    /// Creates an error, attempting to find *some* info for diagnostics in the
    /// tag list.
    pub(crate) fn with_diagnostics(tag_list: &TagList<'_>, kind: SignatureErrorKind) -> Self {
        let domain = tag_list.get("d").and_then(|value| DomainName::new(value).ok());
        let signature_data_base64 = tag_list.get("b").map(strip_fws_from_tag_value);
        Self {
            domain,
            signature_data_base64,
            kind,
        }
    }
}

impl Display for SignatureError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.kind.fmt(f)
    }
}

impl Error for SignatureError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SignatureErrorKind {
    InvalidTagList,
    MissingVersionTag,
    UnsupportedVersion,
    UnsupportedAlgorithm,
    MissingAlgorithmTag,
    MissingSignatureTag,
    MissingBodyHashTag,
    UnsupportedCanonicalization,
    InvalidDomain,
    MissingDomainTag,
    SignedHeadersEmpty,
    FromHeaderNotSigned,
    SealHeaderSigned,
    MissingSignedHeadersTag,
    UnexpectedSignedHeadersTag,
    InvalidBodyLength,
    QueryMethodsNotSupported,
    InvalidSelector,
    MissingSelectorTag,
    InvalidTimestamp,
    InvalidExpiration,
    ExpirationNotAfterTimestamp,
    ValueSyntax,
    DomainMismatch,
    InvalidUserId,
    MissingInstanceTag,
    InvalidInstance,
    MissingChainValidationTag,
    InvalidChainValidation,
}

impl Display for SignatureErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidTagList => write!(f, "invalid tag-list"),
            Self::MissingVersionTag => write!(f, "v= tag missing"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::UnsupportedAlgorithm => write!(f, "unsupported algorithm"),
            Self::MissingAlgorithmTag => write!(f, "a= tag missing"),
            Self::MissingSignatureTag => write!(f, "b= tag missing"),
            Self::MissingBodyHashTag => write!(f, "bh= tag missing"),
            Self::UnsupportedCanonicalization => write!(f, "unsupported canonicalization"),
            Self::InvalidDomain => write!(f, "invalid domain"),
            Self::MissingDomainTag => write!(f, "d= tag missing"),
            Self::SignedHeadersEmpty => write!(f, "no signed headers"),
            Self::FromHeaderNotSigned => write!(f, "From header not signed"),
            Self::SealHeaderSigned => write!(f, "ARC-Seal header signed"),
            Self::MissingSignedHeadersTag => write!(f, "h= tag missing"),
            Self::UnexpectedSignedHeadersTag => write!(f, "h= tag not allowed"),
            Self::InvalidBodyLength => write!(f, "invalid body length"),
            Self::QueryMethodsNotSupported => write!(f, "query method not supported"),
            Self::InvalidSelector => write!(f, "invalid selector"),
            Self::MissingSelectorTag => write!(f, "s= tag missing"),
            Self::InvalidTimestamp => write!(f, "invalid timestamp"),
            Self::InvalidExpiration => write!(f, "invalid expiration"),
            Self::ExpirationNotAfterTimestamp => write!(f, "expiration not after timestamp"),
            Self::ValueSyntax => write!(f, "syntax error"),
            Self::DomainMismatch => write!(f, "domain mismatch"),
            Self::InvalidUserId => write!(f, "invalid user ID"),
            Self::MissingInstanceTag => write!(f, "i= tag missing"),
            Self::InvalidInstance => write!(f, "invalid instance"),
            Self::MissingChainValidationTag => write!(f, "cv= tag missing"),
            Self::InvalidChainValidation => write!(f, "invalid chain validation status"),
        }
    }
}

/// The highest ARC instance number allowed.
pub const MAX_ARC_INSTANCE: u32 = 50;

pub(crate) fn parse_algorithm_tag(value: &str) -> Result<SignatureAlgorithm, SignatureErrorKind> {
    value.parse().map_err(|_| SignatureErrorKind::UnsupportedAlgorithm)
}

pub(crate) fn parse_base64_tag(value: &str) -> Result<Box<[u8]>, SignatureErrorKind> {
    parse_base64_tag_value(value)
        .map(Into::into)
        .map_err(|_| SignatureErrorKind::ValueSyntax)
}

pub(crate) fn parse_canonicalization_tag(
    value: &str,
) -> Result<Canonicalization, SignatureErrorKind> {
    value.parse().map_err(|_| SignatureErrorKind::UnsupportedCanonicalization)
}

pub(crate) fn parse_domain_tag(value: &str) -> Result<DomainName, SignatureErrorKind> {
    DomainName::new(value).map_err(|_| SignatureErrorKind::InvalidDomain)
}

pub(crate) fn parse_selector_tag(value: &str) -> Result<Selector, SignatureErrorKind> {
    Selector::new(value).map_err(|_| SignatureErrorKind::InvalidSelector)
}

pub(crate) fn parse_timestamp_tag(value: &str) -> Result<u64, SignatureErrorKind> {
    value.parse().map_err(|_| SignatureErrorKind::InvalidTimestamp)
}

pub(crate) fn parse_body_length_tag(value: &str) -> Result<u64, SignatureErrorKind> {
    // u64::from_str accepts a leading '+', the tag grammar does not
    if !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SignatureErrorKind::InvalidBodyLength);
    }
    value.parse().map_err(|_| SignatureErrorKind::InvalidBodyLength)
}

/// Parses the colon-separated h= tag. Names are kept in the given order,
/// duplicates included.
pub(crate) fn parse_signed_headers_tag(
    value: &str,
) -> Result<Box<[FieldName]>, SignatureErrorKind> {
    let mut sh = vec![];
    for v in parse_colon_separated_tag_value(value) {
        if v.is_empty() {
            continue;
        }
        let name = FieldName::new(v).map_err(|_| SignatureErrorKind::ValueSyntax)?;
        sh.push(name);
    }
    if sh.is_empty() {
        return Err(SignatureErrorKind::SignedHeadersEmpty);
    }
    Ok(sh.into())
}

/// Parses an ARC instance tag, which must be an integer in 1 to 50.
pub(crate) fn parse_instance_tag(value: &str) -> Result<u32, SignatureErrorKind> {
    if value.is_empty() || !value.bytes().all(|b| b.is_ascii_digit()) {
        return Err(SignatureErrorKind::InvalidInstance);
    }
    match value.parse() {
        Ok(n) if (1..=MAX_ARC_INSTANCE).contains(&n) => Ok(n),
        _ => Err(SignatureErrorKind::InvalidInstance),
    }
}

/// A DKIM signature as encoded in a `DKIM-Signature` header field.
#[derive(Clone, Eq, PartialEq)]
pub struct DkimSignature {
    // Notes:
    // - i= is Option, because §3.5: "the Signer might wish to assert that
    // although it is willing to go as far as signing for the domain, it is
    // unable or unwilling to commit to an individual user name within the
    // domain."

    pub algorithm: SignatureAlgorithm,
    pub signature_data: Box<[u8]>,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,  // not empty, contains From
    pub identity: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
}

impl DkimSignature {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, SignatureErrorKind> {
        let mut version_seen = false;
        let mut algorithm = None;
        let mut signature_data = None;
        let mut body_hash = None;
        let mut canonicalization = None;
        let mut domain = None;
        let mut signed_headers = None;
        let mut identity = None;
        let mut body_length = None;
        let mut selector = None;
        let mut timestamp = None;
        let mut expiration = None;

        for &Tag { name, value, .. } in tag_list.iter() {
            match name {
                "v" => {
                    if value != "1" {
                        return Err(SignatureErrorKind::UnsupportedVersion);
                    }
                    version_seen = true;
                }
                "a" => algorithm = Some(parse_algorithm_tag(value)?),
                "b" => signature_data = Some(parse_base64_tag(value)?),
                "bh" => body_hash = Some(parse_base64_tag(value)?),
                "c" => canonicalization = Some(parse_canonicalization_tag(value)?),
                "d" => domain = Some(parse_domain_tag(value)?),
                "h" => {
                    let value = parse_signed_headers_tag(value)?;
                    if !value.iter().any(|h| *h == "From") {
                        return Err(SignatureErrorKind::FromHeaderNotSigned);
                    }
                    signed_headers = Some(value);
                }
                "i" => {
                    let value = Identity::new(value)
                        .map_err(|_| SignatureErrorKind::InvalidUserId)?;
                    identity = Some(value);
                }
                "l" => body_length = Some(parse_body_length_tag(value)?),
                "q" => {
                    let dns_txt_seen = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .any(|v| v.eq_ignore_ascii_case("dns/txt"));
                    if !dns_txt_seen {
                        return Err(SignatureErrorKind::QueryMethodsNotSupported);
                    }
                }
                "s" => selector = Some(parse_selector_tag(value)?),
                "t" => timestamp = Some(parse_timestamp_tag(value)?),
                "x" => {
                    let value = value
                        .parse()
                        .map_err(|_| SignatureErrorKind::InvalidExpiration)?;
                    expiration = Some(value);
                }
                _ => {}
            }
        }

        if !version_seen {
            return Err(SignatureErrorKind::MissingVersionTag);
        }

        let algorithm = algorithm.ok_or(SignatureErrorKind::MissingAlgorithmTag)?;
        let signature_data = signature_data.ok_or(SignatureErrorKind::MissingSignatureTag)?;
        let body_hash = body_hash.ok_or(SignatureErrorKind::MissingBodyHashTag)?;
        let domain = domain.ok_or(SignatureErrorKind::MissingDomainTag)?;
        let signed_headers = signed_headers.ok_or(SignatureErrorKind::MissingSignedHeadersTag)?;
        let selector = selector.ok_or(SignatureErrorKind::MissingSelectorTag)?;

        if let Some(i) = &identity {
            if !i.domain_part.eq_or_subdomain_of(&domain) {
                return Err(SignatureErrorKind::DomainMismatch);
            }
        }

        if let (Some(timestamp), Some(expiration)) = (timestamp, expiration) {
            if expiration <= timestamp {
                return Err(SignatureErrorKind::ExpirationNotAfterTimestamp);
            }
        }

        let canonicalization = canonicalization.unwrap_or_default();

        Ok(Self {
            algorithm,
            signature_data,
            body_hash,
            canonicalization,
            domain,
            signed_headers,
            identity,
            body_length,
            selector,
            timestamp,
            expiration,
        })
    }
}

impl FromStr for DkimSignature {
    type Err = SignatureError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list = TagList::parse(s)
            .map_err(|_| SignatureError::new(SignatureErrorKind::InvalidTagList))?;

        Self::from_tag_list(&tag_list)
            .map_err(|kind| SignatureError::with_diagnostics(&tag_list, kind))
    }
}

impl fmt::Debug for DkimSignature {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("DkimSignature")
            .field("algorithm", &self.algorithm)
            .field("signature_data", &util::encode_base64(&self.signature_data))
            .field("body_hash", &util::encode_base64(&self.body_hash))
            .field("canonicalization", &self.canonicalization)
            .field("domain", &self.domain)
            .field("signed_headers", &self.signed_headers)
            .field("identity", &self.identity)
            .field("body_length", &self.body_length)
            .field("selector", &self.selector)
            .field("timestamp", &self.timestamp)
            .field("expiration", &self.expiration)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::decode_base64;

    #[test]
    fn example_signature() {
        let example = "v=1; a=rsa-sha256; d=example.net; s=brisbane;
  c=simple; q=dns/txt; i=@eng.example.net;
  t=1117574938; x=1118006938;
  h=from:to:subject:date;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let hdr = DkimSignature::from_str(&example).unwrap();

        assert_eq!(
            hdr,
            DkimSignature {
                algorithm: SignatureAlgorithm::RsaSha256,
                signature_data: decode_base64(
                        "dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR"
                    ).unwrap().into(),
                body_hash: decode_base64("MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=").unwrap().into(),
                canonicalization: Canonicalization {
                    header: CanonicalizationAlgorithm::Simple,
                    body: CanonicalizationAlgorithm::Simple,
                },
                domain: DomainName::new("example.net").unwrap(),
                signed_headers: [
                    FieldName::new("from").unwrap(),
                    FieldName::new("to").unwrap(),
                    FieldName::new("subject").unwrap(),
                    FieldName::new("date").unwrap(),
                ].into(),
                identity: Some(Identity::new("@eng.example.net").unwrap()),
                selector: Selector::new("brisbane").unwrap(),
                body_length: None,
                timestamp: Some(1117574938),
                expiration: Some(1118006938),
            }
        );
    }

    #[test]
    fn dkim_signature_from_str_unicode_identity() {
        let example = " v = 1 ; a=rsa-sha1;d=example.net; s=brisbane;
  c=relaxed; q=dns/txt; i=中文@eng.example.net;
  h=from:to:subject:date;
  bh=MTIzNDU2Nzg5MDEyMzQ1Njc4OTAxMjM0NTY3ODkwMTI=;
  b=dzdVyOfAKCdLXdJOc9G2q8LoXSlEniSbav+yuU4zGeeruD00lszZVoG4ZHRNiYzR";
        let example = example.replace('\n', "\r\n");

        let hdr = DkimSignature::from_str(&example).unwrap();

        assert_eq!(hdr.algorithm, SignatureAlgorithm::RsaSha1);
        assert_eq!(
            hdr.canonicalization,
            Canonicalization::new(CanonicalizationAlgorithm::Relaxed, CanonicalizationAlgorithm::Simple)
        );
        assert_eq!(hdr.signed_headers.len(), 4);
    }

    #[test]
    fn dkim_signature_format_errors() {
        let base = "a=rsa-sha256; d=example.net; s=sel; h=from; bh=YWJj; b=YWJj";

        let kind = |s: &str| DkimSignature::from_str(s).unwrap_err().kind;

        assert_eq!(kind(base), SignatureErrorKind::MissingVersionTag);
        assert_eq!(kind(&format!("v=2; {base}")), SignatureErrorKind::UnsupportedVersion);
        assert_eq!(
            kind(&format!("v=1; c=loose/simple; {base}")),
            SignatureErrorKind::UnsupportedCanonicalization
        );
        assert_eq!(kind(&format!("v=1; l=12x; {base}")), SignatureErrorKind::InvalidBodyLength);
        assert_eq!(
            kind(&format!("v=1; i=me@example.org; {base}")),
            SignatureErrorKind::DomainMismatch
        );
        assert_eq!(
            kind("v=1; a=rsa-sha256; d=example.net; s=sel; h=to:subject; bh=YWJj; b=YWJj"),
            SignatureErrorKind::FromHeaderNotSigned
        );
        assert_eq!(kind("v=1; v=1"), SignatureErrorKind::InvalidTagList);

        let error = DkimSignature::from_str(&format!("v=3; {base}")).unwrap_err();
        assert_eq!(error.domain, Some(DomainName::new("example.net").unwrap()));
        assert_eq!(error.signature_data_base64.as_deref(), Some("YWJj"));
    }

    #[test]
    fn instance_tag_bounds() {
        assert_eq!(parse_instance_tag("1"), Ok(1));
        assert_eq!(parse_instance_tag("50"), Ok(50));
        assert_eq!(parse_instance_tag("0"), Err(SignatureErrorKind::InvalidInstance));
        assert_eq!(parse_instance_tag("51"), Err(SignatureErrorKind::InvalidInstance));
        assert_eq!(parse_instance_tag("+3"), Err(SignatureErrorKind::InvalidInstance));
        assert_eq!(parse_instance_tag(""), Err(SignatureErrorKind::InvalidInstance));
    }

    #[test]
    fn signature_algorithm_parts() {
        for alg in SignatureAlgorithm::all() {
            assert_eq!(
                SignatureAlgorithm::from_parts(alg.key_type(), alg.hash_algorithm()),
                Some(alg)
            );
            assert_eq!(alg.canonical_str().parse::<SignatureAlgorithm>(), Ok(alg));
        }
        assert_eq!(SignatureAlgorithm::from_parts(KeyType::Ed25519, HashAlgorithm::Sha1), None);
    }
}
