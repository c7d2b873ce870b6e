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

use crate::{
    crypto::{self, HashAlgorithm, SigningKey},
    header::HeaderFields,
    message_hash::{self, BodyHashError, BodyHashResults},
    signer::{
        format::{self, UnsignedDkimSignature},
        BodyLength, OutputFormat, SignRequest, SignerError, SigningResult, Timestamp,
    },
    util,
};
use tracing::trace;

pub fn perform_signing<T>(
    request: SignRequest<T>,
    headers: &HeaderFields,
    hasher_results: &BodyHashResults,
) -> Result<SigningResult, SignerError>
where
    T: AsRef<SigningKey>,
{
    let algorithm = request.algorithm;
    let canonicalization = request.canonicalization;

    // calculate body hash

    let body_length = request.body_length.to_limit()?;
    let hash_alg = algorithm.hash_algorithm();
    let key = (body_length, hash_alg, canonicalization.body);

    let (body_hash, final_len) = match hasher_results.get(&key) {
        Some(Ok((h, final_len))) => (h.clone(), *final_len),
        Some(Err(BodyHashError::InsufficientInput)) => {
            trace!(domain = %request.domain, "body shorter than requested length");
            return Err(SignerError::InsufficientBodyLength);
        }
        Some(Err(BodyHashError::InputTruncated)) | None => {
            return Err(SignerError::SigningFailure);
        }
    };

    let body_length = match request.body_length {
        BodyLength::All => None,
        BodyLength::OnlyMessageLength | BodyLength::Exact(_) => {
            Some(final_len.try_into().map_err(|_| SignerError::Overflow)?)
        }
    };

    // select headers; validated in `prepare_signing`

    let signed_headers = request.header_selection.resolve(headers);

    // calculate timestamp and expiration

    let timestamp = request.timestamp.map(|timestamp| match timestamp {
        Timestamp::Now => util::now_unix_secs(),
        Timestamp::Exact(t) => t,
    });

    let expiration = request.valid_duration.map(|duration| {
        timestamp
            .unwrap_or_else(util::now_unix_secs)
            .saturating_add(duration.as_secs())
    });

    let ext_tags = request
        .extra_tags
        .into_iter()
        .map(|(k, v)| (k.into_boxed_str(), v.into_boxed_str()))
        .collect();

    // prepare complete formatted signature header with body hash except with
    // contents of b= tag

    let sig = UnsignedDkimSignature {
        algorithm,
        body_hash,
        canonicalization,
        domain: request.domain,
        signed_headers: signed_headers.into(),
        identity: request.identity,
        body_length,
        selector: request.selector,
        timestamp,
        expiration,
        ext_tags,
    };

    produce_signature(sig, request.signing_key.as_ref(), &request.format, headers)
}

fn produce_signature(
    sig: UnsignedDkimSignature,
    signing_key: &SigningKey,
    format: &OutputFormat,
    headers: &HeaderFields,
) -> Result<SigningResult, SignerError> {
    let (mut formatted_header_value, insertion_index) = sig.format_without_signature(format);

    let header_name = &format.header_name;

    let hash_alg = sig.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        sig.canonicalization.header,
        headers,
        &sig.signed_headers,
        header_name,
        &formatted_header_value,
    );

    let signature_data = sign_hash(signing_key, hash_alg, &data_hash)?.into_boxed_slice();

    let sig = sig.into_signature(signature_data);

    // insert signature into formatted header value

    format::insert_signature_data(
        &mut formatted_header_value,
        insertion_index,
        header_name,
        &sig.signature_data,
        format.line_width,
        &format.indentation,
    );

    trace!(domain = %sig.domain, selector = %sig.selector, "DKIM signature produced");

    Ok(SigningResult {
        header_name: header_name.clone(),
        header_value: formatted_header_value,
        signature: sig,
    })
}

/// Signs a header data hash with the given key.
pub fn sign_hash(
    signing_key: &SigningKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
) -> Result<Vec<u8>, SignerError> {
    match signing_key {
        SigningKey::Rsa(k) => match crypto::sign_rsa(hash_alg, k, data_hash) {
            Ok(s) => {
                trace!("RSA signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("RSA signing failed: {e}");
                Err(SignerError::SigningFailure)
            }
        },
        SigningKey::Ed25519(k) => match crypto::sign_ed25519(k, data_hash) {
            Ok(s) => {
                trace!("Ed25519 signing successful");
                Ok(s)
            }
            Err(e) => {
                trace!("Ed25519 signing failed: {e}");
                Err(SignerError::SigningFailure)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        header::FieldName,
        message_hash::BodyHasherBuilder,
        signature::{CanonicalizationAlgorithm, DomainName, Selector, SignatureAlgorithm},
        signer::HeaderSelection,
    };

    #[test]
    fn perform_signing_only_message_length() {
        let key = SigningKey::from_pkcs8_pem(include_str!("../../tests/keys/ed25519.pem")).unwrap();
        let headers: HeaderFields = "From: me@example.com\r\n".parse().unwrap();

        let mut request = SignRequest::new(
            DomainName::new("example.com").unwrap(),
            Selector::new("sel").unwrap(),
            SignatureAlgorithm::Ed25519Sha256,
            &key,
        );
        request.body_length = BodyLength::OnlyMessageLength;
        request.header_selection = HeaderSelection::Manual(vec![FieldName::new("From").unwrap()]);
        request.timestamp = None;
        request.valid_duration = None;

        let mut hasher = BodyHasherBuilder::new(false);
        hasher.register_canonicalization(None, HashAlgorithm::Sha256, CanonicalizationAlgorithm::Simple);
        let mut hasher = hasher.build();
        let _ = hasher.hash_chunk(b"abc\r\n\r\n");
        let results = hasher.finish();

        let result = perform_signing(request, &headers, &results).unwrap();

        assert_eq!(result.signature.body_length, Some(5));
        assert_eq!(result.signature.timestamp, None);
        assert!(result.header_value.contains("l=5;"));
    }
}
