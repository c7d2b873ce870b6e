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

//! Header data hash verification, shared by *DKIM-Signature*,
//! *ARC-Message-Signature*, and *ARC-Seal*.

use crate::{
    arc::{self, ArcMessageSignature, ArcSeal},
    crypto::{self, HashAlgorithm, VerificationError, VerifyingKey},
    header::{FieldName, HeaderFields},
    message_hash,
    signature::{CanonicalizationAlgorithm, DkimSignature, SignatureAlgorithm},
    tag_list::TagList,
    verifier::VerifierError,
};
use std::borrow::Cow;
use tracing::trace;

/// The parts of a signature that go into its header data hash.
#[derive(Clone, Copy)]
pub struct SignedHeaderData<'a> {
    pub algorithm: SignatureAlgorithm,
    pub canonicalization: CanonicalizationAlgorithm,
    pub signed_headers: &'a [FieldName],
    pub signature_data: &'a [u8],
}

impl<'a> From<&'a DkimSignature> for SignedHeaderData<'a> {
    fn from(sig: &'a DkimSignature) -> Self {
        Self {
            algorithm: sig.algorithm,
            canonicalization: sig.canonicalization.header,
            signed_headers: &sig.signed_headers,
            signature_data: &sig.signature_data,
        }
    }
}

impl<'a> From<&'a ArcMessageSignature> for SignedHeaderData<'a> {
    fn from(sig: &'a ArcMessageSignature) -> Self {
        Self {
            algorithm: sig.algorithm,
            canonicalization: sig.canonicalization.header,
            signed_headers: &sig.signed_headers,
            signature_data: &sig.signature_data,
        }
    }
}

/// Verifies the data hash over the signed headers and the signature header
/// `name: value` itself.
pub fn verify_header_data(
    headers: &HeaderFields,
    public_key: &VerifyingKey,
    data: SignedHeaderData<'_>,
    name: &str,
    value: &str,
) -> Result<(), VerifierError> {
    let hash_alg = data.algorithm.hash_algorithm();

    let data_hash = message_hash::compute_data_hash(
        hash_alg,
        data.canonicalization,
        headers,
        data.signed_headers,
        name,
        &strip_signature_data(value),
    );

    verify_signature(public_key, hash_alg, &data_hash, data.signature_data)
        .map_err(VerifierError::VerificationFailure)
}

/// Verifies an ARC seal with header value `value` over `fields`, the ARC
/// header fields of all earlier instances followed by the results and the
/// message signature of the seal’s own instance.
pub fn verify_seal_data<'a, I>(
    public_key: &VerifyingKey,
    seal: &ArcSeal,
    fields: I,
    value: &str,
) -> Result<(), VerifierError>
where
    I: IntoIterator<Item = (&'a str, &'a [u8])>,
{
    let hash_alg = seal.algorithm.hash_algorithm();

    let seal_hash = arc::compute_seal_hash(hash_alg, fields, &strip_signature_data(value));

    verify_signature(public_key, hash_alg, &seal_hash, &seal.signature_data)
        .map_err(VerifierError::VerificationFailure)
}

/// Removes the value of the *b=* tag from a signature header value, keeping
/// everything else, including whitespace, as it is.
pub fn strip_signature_data(value: &str) -> Cow<'_, str> {
    let span = match TagList::parse(value) {
        Ok(tags) => tags.find("b").map(|tag| tag.span.clone()),
        Err(_) => None,
    };

    match span {
        Some(span) if !span.is_empty() => {
            let mut stripped = String::with_capacity(value.len() - span.len());
            stripped.push_str(&value[..span.start]);
            stripped.push_str(&value[span.end..]);
            Cow::Owned(stripped)
        }
        _ => Cow::Borrowed(value),
    }
}

pub fn verify_signature(
    public_key: &VerifyingKey,
    hash_alg: HashAlgorithm,
    data_hash: &[u8],
    signature_data: &[u8],
) -> Result<(), VerificationError> {
    let result = match public_key {
        VerifyingKey::Rsa(pk) => crypto::verify_rsa(hash_alg, pk, data_hash, signature_data),
        VerifyingKey::Ed25519(pk) => crypto::verify_ed25519(pk, data_hash, signature_data),
    };

    let key_type = public_key.key_type();
    match &result {
        Ok(()) => trace!(?key_type, "public key verification successful"),
        Err(e) => trace!(?key_type, "public key verification failed: {e}"),
    }

    result
}
