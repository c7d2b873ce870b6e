//! DKIM public key record.

use crate::{
    crypto::{HashAlgorithm, KeyType},
    tag_list::{parse_base64_tag_value, parse_colon_separated_tag_value, Tag, TagList},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServiceType {
    Any,
    Email,
    Other(Box<str>),
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Flags {
    Testing,
    NoSubdomains,
    Other(Box<str>),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DkimKeyRecordParseError {
    RecordSyntax,  // DNS record format or invalid UTF-8 data
    InvalidBase64,
    TagListSyntax,
    UnsupportedVersion,
    MisplacedVersionTag,
    UnsupportedKeyType,
    NoSupportedHashAlgorithms,
    RevokedKey,
    MissingKeyTag,
    ServiceTypesEmpty,
}

impl Display for DkimKeyRecordParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::RecordSyntax => write!(f, "ill-formed key record"),
            Self::InvalidBase64 => write!(f, "invalid Base64 string"),
            Self::TagListSyntax => write!(f, "invalid tag-list"),
            Self::UnsupportedVersion => write!(f, "unsupported version"),
            Self::MisplacedVersionTag => write!(f, "v= tag not initial"),
            Self::UnsupportedKeyType => write!(f, "unsupported key type"),
            Self::NoSupportedHashAlgorithms => write!(f, "no supported hash algorithms"),
            Self::RevokedKey => write!(f, "key revoked"),
            Self::MissingKeyTag => write!(f, "p= tag missing"),
            Self::ServiceTypesEmpty => write!(f, "service types empty"),
        }
    }
}

impl Error for DkimKeyRecordParseError {}

/// A DKIM public key record.
///
/// The same record format is used for the keys of ARC signatures.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DkimKeyRecord {
    pub hash_algorithms: Box<[HashAlgorithm]>,  // non-empty
    pub key_type: KeyType,
    /// The n= notes, as they appear in the record.
    pub notes: Option<Box<str>>,
    pub key_data: Box<[u8]>,
    pub service_types: Box<[ServiceType]>,  // non-empty
    pub flags: Box<[Flags]>,
}

impl DkimKeyRecord {
    fn from_tag_list(tag_list: &TagList<'_>) -> Result<Self, DkimKeyRecordParseError> {
        let mut hash_algorithms = vec![HashAlgorithm::Sha256, HashAlgorithm::Sha1];
        let mut key_type = KeyType::Rsa;
        let mut notes = None;
        let mut key_data = None;
        let mut service_types = vec![ServiceType::Any];
        let mut flags = vec![];

        for (i, &Tag { name, value, .. }) in tag_list.iter().enumerate() {
            match name {
                "v" => {
                    if i != 0 {
                        return Err(DkimKeyRecordParseError::MisplacedVersionTag);
                    }
                    if value != "DKIM1" {
                        return Err(DkimKeyRecordParseError::UnsupportedVersion);
                    }
                }
                "h" => {
                    hash_algorithms.clear();

                    for s in parse_colon_separated_tag_value(value) {
                        if s.eq_ignore_ascii_case("sha256") {
                            hash_algorithms.push(HashAlgorithm::Sha256);
                        } else if s.eq_ignore_ascii_case("sha1") {
                            hash_algorithms.push(HashAlgorithm::Sha1);
                        }
                    }

                    if hash_algorithms.is_empty() {
                        return Err(DkimKeyRecordParseError::NoSupportedHashAlgorithms);
                    }
                }
                "k" => {
                    if value.eq_ignore_ascii_case("ed25519") {
                        key_type = KeyType::Ed25519;
                    } else if !value.eq_ignore_ascii_case("rsa") {
                        return Err(DkimKeyRecordParseError::UnsupportedKeyType);
                    }
                }
                "n" => notes = Some(value.into()),
                "p" => {
                    if value.is_empty() {
                        return Err(DkimKeyRecordParseError::RevokedKey);
                    }

                    let s = parse_base64_tag_value(value)
                        .map_err(|_| DkimKeyRecordParseError::InvalidBase64)?;

                    key_data = Some(s.into());
                }
                "s" => {
                    let st: Vec<_> = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            if s == "*" {
                                ServiceType::Any
                            } else if s.eq_ignore_ascii_case("email") {
                                ServiceType::Email
                            } else {
                                ServiceType::Other(s.into())
                            }
                        })
                        .collect();

                    if st.is_empty() {
                        return Err(DkimKeyRecordParseError::ServiceTypesEmpty);
                    }

                    service_types = st;
                }
                "t" => {
                    flags = parse_colon_separated_tag_value(value)
                        .into_iter()
                        .filter(|s| !s.is_empty())
                        .map(|s| {
                            if s.eq_ignore_ascii_case("y") {
                                Flags::Testing
                            } else if s.eq_ignore_ascii_case("s") {
                                Flags::NoSubdomains
                            } else {
                                Flags::Other(s.into())
                            }
                        })
                        .collect();
                }
                // RFC 6376, section 3.6.1: unknown tags are ignored
                _ => {}
            }
        }

        let key_data = key_data.ok_or(DkimKeyRecordParseError::MissingKeyTag)?;

        Ok(Self {
            hash_algorithms: hash_algorithms.into(),
            key_type,
            notes,
            key_data,
            service_types: service_types.into(),
            flags: flags.into(),
        })
    }

    /// Whether this key is in testing mode (t=y).
    pub fn is_testing(&self) -> bool {
        self.flags.contains(&Flags::Testing)
    }

    /// Whether this key may be used for email.
    pub fn allows_email(&self) -> bool {
        self.service_types
            .iter()
            .any(|s| matches!(s, ServiceType::Any | ServiceType::Email))
    }

    /// Whether this key may be used with the given hash algorithm.
    pub fn allows_hash_algorithm(&self, hash_alg: HashAlgorithm) -> bool {
        self.hash_algorithms.contains(&hash_alg)
    }
}

impl FromStr for DkimKeyRecord {
    type Err = DkimKeyRecordParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let tag_list =
            TagList::parse(s).map_err(|_| DkimKeyRecordParseError::TagListSyntax)?;

        Self::from_tag_list(&tag_list)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dkim_key_record_from_tag_list_ok() {
        let tags = TagList::parse("v=DKIM1; p=YWJj; s = email; n = highly=20interesting;").unwrap();

        let dkim_key_record = DkimKeyRecord::from_tag_list(&tags).unwrap();

        assert_eq!(
            dkim_key_record,
            DkimKeyRecord {
                hash_algorithms: [HashAlgorithm::Sha256, HashAlgorithm::Sha1].into(),
                key_type: KeyType::Rsa,
                notes: Some("highly=20interesting".into()),
                key_data: b"abc".to_vec().into(),
                service_types: [ServiceType::Email].into(),
                flags: [].into(),
            }
        );
        assert!(dkim_key_record.allows_email());
        assert!(!dkim_key_record.is_testing());
    }

    #[test]
    fn dkim_key_record_tags() {
        let record = DkimKeyRecord::from_str("v=DKIM1; k=ed25519; h=sha1:sha256:md5; t=y:s; p=YWJj")
            .unwrap();

        assert_eq!(record.key_type, KeyType::Ed25519);
        assert_eq!(&record.hash_algorithms[..], [HashAlgorithm::Sha1, HashAlgorithm::Sha256]);
        assert_eq!(&record.flags[..], [Flags::Testing, Flags::NoSubdomains]);
        assert!(record.is_testing());

        let record = DkimKeyRecord::from_str("h=sha1; p=YWJj").unwrap();
        assert!(record.allows_hash_algorithm(HashAlgorithm::Sha1));
        assert!(!record.allows_hash_algorithm(HashAlgorithm::Sha256));

        let record = DkimKeyRecord::from_str("s=other; p=YWJj").unwrap();
        assert!(!record.allows_email());
    }

    #[test]
    fn dkim_key_record_errors() {
        assert_eq!(
            DkimKeyRecord::from_str("v=DKIM1; p="),
            Err(DkimKeyRecordParseError::RevokedKey)
        );
        assert_eq!(
            DkimKeyRecord::from_str("p=YWJj; v=DKIM1"),
            Err(DkimKeyRecordParseError::MisplacedVersionTag)
        );
        assert_eq!(
            DkimKeyRecord::from_str("v=DKIM1; k=dsa; p=YWJj"),
            Err(DkimKeyRecordParseError::UnsupportedKeyType)
        );
        assert_eq!(
            DkimKeyRecord::from_str("v=DKIM1; h=md5; p=YWJj"),
            Err(DkimKeyRecordParseError::NoSupportedHashAlgorithms)
        );
        assert_eq!(
            DkimKeyRecord::from_str("v=DKIM1; k=rsa"),
            Err(DkimKeyRecordParseError::MissingKeyTag)
        );
    }

    #[test]
    fn dkim_key_record_from_str_broken() {
        // This is an actual record from mail._domainkey.circleshop.ch. Note
        // OpenDKIM accepts this record even though it is ill-formed (uses LF
        // instead of CRLF in FWS).
        let s = "v=DKIM1; h=sha256; k=rsa; \n\t  p=MIIBIjANBgkqhkiG9w0BAQEFAAOCAQ8AMIIBCgKCAQEAxjVprCb0VDFsrDawxGnwI6OoMUXIc7MKm6354dN9sDDxKi4w3jLQZhiMGHrc/j1JqxWX0CA6lGKfJxlmoLahSD3o92hBkG0b4b2B3erza26gzbKEkKr223WAhxNTfPllECF2HBXPp5tuvMVCQXGJ9uEi9WkgmD4Ns8Va9SLMOg9UKD/vbzE CGuf6jNCVhngzXTVli2vIL/OTE7\n\t  ZWOuXnRENt01sv/aiAQC4PFOMKs1ZVkpcgOQMIZO/5PrMKU/bjUx/9uaaIDLkLJ0RBFgkSJ2uXWtrm6kP7lI8H/7zGunbiDoLiEoAUU7PT98VR4TXvU0DDItzHVoiF/CZsLKwSvQIDAQAB";

        assert!(DkimKeyRecord::from_str(s).is_err());
    }
}
