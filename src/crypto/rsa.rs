use crate::crypto::{HashAlgorithm, SigningError, VerificationError};
use rsa::{
    pkcs1::DecodeRsaPublicKey, pkcs8::DecodePublicKey, traits::PublicKeyParts, Pkcs1v15Sign,
    RsaPrivateKey, RsaPublicKey,
};
use sha1::Sha1;
use sha2::Sha256;

pub fn get_public_key_size(k: &RsaPublicKey) -> usize {
    k.size() * 8
}

pub fn read_rsa_public_key(key_data: &[u8]) -> Result<RsaPublicKey, VerificationError> {
    // first try reading data as SubjectPublicKeyInfo (de facto format),
    // then try reading data as RSAPublicKey (format in RFC 6376)
    let public_key = RsaPublicKey::from_public_key_der(key_data)
        .or_else(|_| RsaPublicKey::from_pkcs1_der(key_data))
        .map_err(|_| VerificationError::InvalidKey)?;

    // RFC 8301, section 3.2
    if get_public_key_size(&public_key) < 1024 {
        return Err(VerificationError::InsufficientKeySize);
    }

    Ok(public_key)
}

/// Verifies an RSASSA-PKCS1-v1_5 signature over an already computed digest.
pub fn verify_rsa(
    hash_alg: HashAlgorithm,
    public_key: &RsaPublicKey,
    hashed: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
    };

    public_key
        .verify(scheme, hashed, signature_data)
        .map_err(|_| VerificationError::VerificationFailure)
}

/// Produces an RSASSA-PKCS1-v1_5 signature over an already computed digest.
pub fn sign_rsa(
    hash_alg: HashAlgorithm,
    private_key: &RsaPrivateKey,
    hashed: &[u8],
) -> Result<Vec<u8>, SigningError> {
    let scheme = match hash_alg {
        HashAlgorithm::Sha256 => Pkcs1v15Sign::new::<Sha256>(),
        HashAlgorithm::Sha1 => Pkcs1v15Sign::new::<Sha1>(),
    };

    private_key
        .sign(scheme, hashed)
        .map_err(|_| SigningError::SigningFailure)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{digest, SigningKey};
    use rsa::pkcs8::{DecodePrivateKey, EncodePublicKey};

    const PRIVATE_KEY_PEM: &str = include_str!("../../tests/keys/rsa2048.pem");
    const PUBLIC_KEY_PEM: &str = include_str!("../../tests/keys/rsa2048.pub.pem");

    #[test]
    fn read_rsa2048_key() {
        let privkey = RsaPrivateKey::from_pkcs8_pem(PRIVATE_KEY_PEM).unwrap();
        let pubkey = RsaPublicKey::from_public_key_pem(PUBLIC_KEY_PEM).unwrap();

        assert_eq!(get_public_key_size(&pubkey), 2048);
        assert_eq!(RsaPublicKey::from(&privkey), pubkey);

        match SigningKey::from_pkcs8_pem(PRIVATE_KEY_PEM).unwrap() {
            SigningKey::Rsa(privkey2) => assert_eq!(privkey, privkey2),
            _ => panic!(),
        }

        let der = pubkey.to_public_key_der().unwrap();
        assert_eq!(read_rsa_public_key(der.as_bytes()).unwrap(), pubkey);
        assert_eq!(read_rsa_public_key(b"xyz"), Err(VerificationError::InvalidKey));
    }

    #[test]
    fn sign_and_verify_rsa() {
        let privkey = RsaPrivateKey::from_pkcs8_pem(PRIVATE_KEY_PEM).unwrap();
        let pubkey = RsaPublicKey::from(&privkey);

        for hash_alg in [HashAlgorithm::Sha256, HashAlgorithm::Sha1] {
            let hashed = digest(hash_alg, b"message");

            let signature = sign_rsa(hash_alg, &privkey, &hashed).unwrap();
            assert_eq!(signature.len(), 256);

            assert_eq!(verify_rsa(hash_alg, &pubkey, &hashed, &signature), Ok(()));

            let other = digest(hash_alg, b"massage");
            assert_eq!(
                verify_rsa(hash_alg, &pubkey, &other, &signature),
                Err(VerificationError::VerificationFailure)
            );
        }
    }
}
