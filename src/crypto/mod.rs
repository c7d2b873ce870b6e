//! Cryptographic utilities.
//!
//! # Public key formats in DNS
//!
//! RFC 6376 states that the p= tag of an RSA key record contains a public key
//! in format RSAPublicKey (RFC 3447), yet the example in its appendix C
//! installs a key in format SubjectPublicKeyInfo (RFC 5280). The latter has
//! become the de facto standard. RSA public keys are therefore first read as
//! SubjectPublicKeyInfo, and then as RSAPublicKey.
//!
//! RFC 8463 mandates that the 32 bytes of an Ed25519 public key be installed
//! in DNS. OpenSSL however outputs Ed25519 public keys as
//! SubjectPublicKeyInfo, which may end up in DNS as well. Ed25519 public keys
//! are therefore first read as raw key bytes, and then as
//! SubjectPublicKeyInfo.

mod ed25519;
mod hash;
mod rsa;

pub use self::{
    ed25519::{read_ed25519_verifying_key, sign_ed25519, verify_ed25519},
    hash::{digest, InsufficientInput, LimitedDigest},
    rsa::{read_rsa_public_key, sign_rsa, verify_rsa},
};

use crate::util::CanonicalStr;
use ::rsa::{pkcs1::DecodeRsaPrivateKey, RsaPrivateKey, RsaPublicKey};
use ed25519_dalek::{SigningKey as Ed25519SigningKey, VerifyingKey as Ed25519VerifyingKey};
use pkcs8::{der::pem::PemLabel, Document, PrivateKeyInfo};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
};

/// A private key used for signing.
#[derive(Debug)]
pub enum SigningKey {
    Rsa(RsaPrivateKey),
    Ed25519(Ed25519SigningKey),
}

impl SigningKey {
    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }

    /// Reads a private key from a PEM document.
    ///
    /// PKCS#8 documents (label `PRIVATE KEY`) may contain an RSA or an Ed25519
    /// key. PKCS#1 documents (label `RSA PRIVATE KEY`) are accepted for RSA.
    pub fn from_pkcs8_pem(s: &str) -> Result<Self, KeySourceError> {
        let (label, private_key_der) =
            Document::from_pem(s).map_err(|_| KeySourceError::NotPem)?;

        if PrivateKeyInfo::validate_pem_label(label).is_err() {
            return RsaPrivateKey::from_pkcs1_pem(s)
                .map(Self::Rsa)
                .map_err(|_| KeySourceError::InvalidFormat);
        }

        Self::from_pkcs8_der(private_key_der.as_bytes())
    }

    /// Reads a private key from PKCS#8 DER bytes.
    pub fn from_pkcs8_der(bytes: &[u8]) -> Result<Self, KeySourceError> {
        // lightweight, therefore clonable:
        let pk = PrivateKeyInfo::try_from(bytes).map_err(|_| KeySourceError::InvalidFormat)?;

        if let Ok(rpk) = RsaPrivateKey::try_from(pk.clone()) {
            Ok(Self::Rsa(rpk))
        } else if let Ok(esk) = Ed25519SigningKey::try_from(pk) {
            Ok(Self::Ed25519(esk))
        } else {
            Err(KeySourceError::UnsupportedKeyType)
        }
    }

    /// Resolves a key source to a signing key.
    pub fn from_source(source: KeySource) -> Result<Self, KeySourceError> {
        match source {
            KeySource::Pem(s) => Self::from_pkcs8_pem(&s),
            KeySource::Der(bytes) => Self::from_pkcs8_der(&bytes),
            KeySource::Parsed(key) => Ok(key),
        }
    }
}

impl AsRef<SigningKey> for SigningKey {
    fn as_ref(&self) -> &SigningKey {
        self
    }
}

/// The form in which a private key is supplied.
#[derive(Debug)]
pub enum KeySource {
    /// A PEM document.
    Pem(String),
    /// PKCS#8 DER bytes.
    Der(Vec<u8>),
    /// An already parsed key.
    Parsed(SigningKey),
}

impl From<SigningKey> for KeySource {
    fn from(key: SigningKey) -> Self {
        Self::Parsed(key)
    }
}

/// An error that occurs when a private key cannot be read.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeySourceError {
    NotPem,
    InvalidFormat,
    UnsupportedKeyType,
}

impl Display for KeySourceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotPem => write!(f, "not a PEM document"),
            Self::InvalidFormat => write!(f, "invalid private key format"),
            Self::UnsupportedKeyType => write!(f, "unsupported private key type"),
        }
    }
}

impl Error for KeySourceError {}

/// A public key used for verification.
#[derive(Debug)]
pub enum VerifyingKey {
    Rsa(RsaPublicKey),
    Ed25519(Ed25519VerifyingKey),
}

impl VerifyingKey {
    /// The key size in bits. Only RSA keys have a meaningful size.
    pub fn key_size(&self) -> Option<usize> {
        match self {
            Self::Rsa(public_key) => Some(self::rsa::get_public_key_size(public_key)),
            Self::Ed25519(_) => None,
        }
    }

    pub fn from_key_data(key_type: KeyType, key_data: &[u8]) -> Result<Self, VerificationError> {
        match key_type {
            KeyType::Rsa => {
                let public_key = read_rsa_public_key(key_data)?;
                Ok(VerifyingKey::Rsa(public_key))
            }
            KeyType::Ed25519 => {
                let verifying_key = read_ed25519_verifying_key(key_data)?;
                Ok(VerifyingKey::Ed25519(verifying_key))
            }
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            Self::Rsa(_) => KeyType::Rsa,
            Self::Ed25519(_) => KeyType::Ed25519,
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum KeyType {
    Rsa,
    Ed25519,
}

impl CanonicalStr for KeyType {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Rsa => "rsa",
            Self::Ed25519 => "ed25519",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum HashAlgorithm {
    Sha1,
    Sha256,
}

impl CanonicalStr for HashAlgorithm {
    fn canonical_str(&self) -> &'static str {
        match self {
            Self::Sha1 => "sha1",
            Self::Sha256 => "sha256",
        }
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum VerificationError {
    InvalidKey,
    InsufficientKeySize,
    InvalidSignature,
    VerificationFailure,
}

impl Display for VerificationError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidKey => write!(f, "invalid key data"),
            Self::InsufficientKeySize => write!(f, "key too small"),
            Self::InvalidSignature => write!(f, "invalid signature data"),
            Self::VerificationFailure => write!(f, "signature verification failed"),
        }
    }
}

impl Error for VerificationError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum SigningError {
    SigningFailure,
}

impl Display for SigningError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::SigningFailure => write!(f, "signing failed"),
        }
    }
}

impl Error for SigningError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn key_source_resolution() {
        let pem = include_str!("../../tests/keys/ed25519.pem");

        let key = SigningKey::from_source(KeySource::Pem(pem.into())).unwrap();
        assert_eq!(key.key_type(), KeyType::Ed25519);

        let key = SigningKey::from_source(key.into()).unwrap();
        assert_eq!(key.key_type(), KeyType::Ed25519);

        let (_, der) = Document::from_pem(pem).unwrap();
        let key = SigningKey::from_source(KeySource::Der(der.as_bytes().to_vec())).unwrap();
        assert_eq!(key.key_type(), KeyType::Ed25519);

        assert_eq!(
            SigningKey::from_source(KeySource::Pem("garbage".into())).unwrap_err(),
            KeySourceError::NotPem
        );
        assert_eq!(
            SigningKey::from_source(KeySource::Der(vec![1, 2, 3])).unwrap_err(),
            KeySourceError::InvalidFormat
        );
    }
}
