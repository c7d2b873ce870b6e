use crate::crypto::HashAlgorithm;
use digest::DynDigest;
use sha1::Sha1;
use sha2::Sha256;

fn new_digest(hash_alg: HashAlgorithm) -> Box<dyn DynDigest + Send> {
    match hash_alg {
        HashAlgorithm::Sha1 => Box::<Sha1>::default(),
        HashAlgorithm::Sha256 => Box::<Sha256>::default(),
    }
}

/// Computes the digest of the given bytes.
pub fn digest(hash_alg: HashAlgorithm, bytes: &[u8]) -> Box<[u8]> {
    let mut digest = new_digest(hash_alg);
    digest.update(bytes);
    digest.finalize()
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct InsufficientInput;

/// A digest over body content with an optional length limit, as given by the
/// *l=* tag.
///
/// Input beyond the limit is dropped, and the digest records that it was.
pub struct LimitedDigest {
    digest: Box<dyn DynDigest + Send>,
    limit: Option<usize>,
    digested: usize,
    truncated: bool,
}

impl LimitedDigest {
    pub fn new(hash_alg: HashAlgorithm, limit: Option<usize>) -> Self {
        Self {
            digest: new_digest(hash_alg),
            limit,
            digested: 0,
            truncated: false,
        }
    }

    pub fn update(&mut self, bytes: &[u8]) {
        let n = match self.limit {
            Some(limit) => bytes.len().min(limit - self.digested),
            None => bytes.len(),
        };

        if n < bytes.len() {
            self.truncated = true;
        }

        self.digest.update(&bytes[..n]);
        self.digested += n;
    }

    /// Whether the length limit has been reached. Without a limit, the digest
    /// is never full.
    pub fn is_full(&self) -> bool {
        self.limit == Some(self.digested)
    }

    /// Whether any input was dropped because of the length limit.
    pub fn is_truncated(&self) -> bool {
        self.truncated
    }

    /// Returns the digest and the number of bytes digested. Fails when there
    /// was less input than the limit requires.
    pub fn finish(self) -> Result<(Box<[u8]>, usize), InsufficientInput> {
        if self.limit.is_some() && !self.is_full() {
            return Err(InsufficientInput);
        }

        Ok((self.digest.finalize(), self.digested))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::util::encode_base64;

    #[test]
    fn limited_digest_without_limit() {
        let mut digest = LimitedDigest::new(HashAlgorithm::Sha256, None);
        digest.update(b"ab");
        digest.update(b"");
        digest.update(b"c");

        assert!(!digest.is_full());
        assert!(!digest.is_truncated());

        let (hash, len) = digest.finish().unwrap();
        assert_eq!(hash, super::digest(HashAlgorithm::Sha256, b"abc"));
        assert_eq!(len, 3);
    }

    #[test]
    fn limited_digest_with_limit() {
        let mut digest = LimitedDigest::new(HashAlgorithm::Sha256, Some(3));
        digest.update(b"ab");
        assert!(!digest.is_full());
        digest.update(b"c");
        assert!(digest.is_full());
        assert!(!digest.is_truncated());
        digest.update(b"");
        assert!(!digest.is_truncated());
        digest.update(b"de");
        assert!(digest.is_truncated());

        let (hash, len) = digest.finish().unwrap();
        assert_eq!(hash, super::digest(HashAlgorithm::Sha256, b"abc"));
        assert_eq!(len, 3);

        let mut digest = LimitedDigest::new(HashAlgorithm::Sha1, Some(3));
        digest.update(b"ab");
        assert_eq!(digest.finish(), Err(InsufficientInput));
    }

    #[test]
    fn empty_body_hashes() {
        // RFC 6376, sections 3.4.3 and 3.4.4
        let cases = [
            (HashAlgorithm::Sha256, &b"\r\n"[..], "frcCV1k9oG9oKj3dpUqdJg1PxRT2RSN/XKdLCPjaYaY="),
            (HashAlgorithm::Sha256, b"", "47DEQpj8HBSa+/TImW+5JCeuQeRkm5NMpJWZG3hSuFU="),
            (HashAlgorithm::Sha1, b"\r\n", "uoq1oCgLlTqpdDX/iUbLy7J1Wic="),
            (HashAlgorithm::Sha1, b"", "2jmj7l5rSw0yVb/vlWAYkK/YBwk="),
        ];

        for (alg, input, expected) in cases {
            assert_eq!(encode_base64(super::digest(alg, input)), expected);
        }
    }
}
