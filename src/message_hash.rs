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

//! Computation of the message hashes, and streaming filters over the body.

use crate::{
    canonicalize::{self, BodyCanonicalizer},
    crypto::{self, HashAlgorithm, InsufficientInput, LimitedDigest},
    header::{FieldName, HeaderFields},
    signature::{CanonicalizationAlgorithm, SignatureAlgorithm},
};
use std::{
    collections::{HashMap, HashSet},
    error::Error,
    fmt::{self, Display, Formatter},
    io::{self, Write},
};

/// Computes the data hash over the selected headers and the signature header
/// itself.
///
/// The signature header value must be formatted with an empty `b=` tag. It
/// is canonicalized without a trailing CRLF.
pub fn compute_data_hash(
    hash_alg: HashAlgorithm,
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
    sig_header_name: &str,
    formatted_sig_header_value: &str,
) -> Box<[u8]> {
    // canonicalize selected headers
    let mut cheaders = canonicalize::canonicalize_headers(canon_alg, headers, selected_headers);

    // canonicalize the signature header
    canonicalize::canonicalize_header(
        &mut cheaders,
        canon_alg,
        sig_header_name,
        formatted_sig_header_value,
    );

    // produce message digest of the canonicalized value
    crypto::digest(hash_alg, &cheaders)
}

/// The stance of a body hasher regarding additional body content.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
#[must_use]
pub enum BodyHasherStance {
    // Note: the stance does not represent the ultimate truth: `Done` means it
    // is definitely done, but `Interested` is not necessarily true, because the
    // `BodyCanonicalizer`s are stateful and may already have the final pieces.

    /// When `Interested` is returned after digesting input, then the client
    /// should feed more inputs to the body hasher, if there are any available
    /// still.
    Interested,

    /// When `Done` is returned after digesting input, the body hasher requires
    /// no further inputs to answer all body hash requests, and the client need
    /// not feed any additional inputs to the body hasher even if there is any
    /// remaining.
    Done,
}

pub type BodyHasherKey = (Option<usize>, HashAlgorithm, CanonicalizationAlgorithm);

/// Produces the body hasher key for a signature with the given parameters.
pub fn body_hasher_key(
    body_length: Option<u64>,
    algorithm: SignatureAlgorithm,
    body_canonicalization: CanonicalizationAlgorithm,
) -> BodyHasherKey {
    // lengths beyond the address space cannot be satisfied anyway
    let body_len = body_length.map(|len| usize::try_from(len).unwrap_or(usize::MAX));
    (body_len, algorithm.hash_algorithm(), body_canonicalization)
}

#[derive(Clone)]
pub struct BodyHasherBuilder {
    fail_on_truncate: bool,  // truncated inputs must yield InputTruncated
    registrations: HashSet<BodyHasherKey>,
}

impl BodyHasherBuilder {
    pub fn new(fail_on_partially_hashed_input: bool) -> Self {
        Self {
            fail_on_truncate: fail_on_partially_hashed_input,
            registrations: HashSet::new(),
        }
    }

    pub fn register_canonicalization(
        &mut self,
        len: Option<usize>,
        alg: HashAlgorithm,
        canon: CanonicalizationAlgorithm,
    ) {
        self.registrations.insert((len, alg, canon));
    }

    pub fn register(&mut self, key: BodyHasherKey) {
        self.registrations.insert(key);
    }

    pub fn build(self) -> BodyHasher {
        use CanonicalizationAlgorithm::*;

        let hashers = self
            .registrations
            .into_iter()
            .map(|key @ (len, alg, _)| (key, LimitedDigest::new(alg, len)))
            .collect();

        BodyHasher {
            fail_on_truncate: self.fail_on_truncate,
            hashers,
            canonicalizer_simple: BodyCanonicalizer::new(Simple),
            canonicalizer_relaxed: BodyCanonicalizer::new(Relaxed),
        }
    }
}

/// A producer of *body hash* results.
///
/// The body hasher canonicalises and hashes chunks of the message body, until
/// all body hash requests can be answered. It can also be used as a
/// [`Write`] sink; zero-length writes are accepted and have no effect.
pub struct BodyHasher {
    fail_on_truncate: bool,
    hashers: HashMap<BodyHasherKey, LimitedDigest>,
    canonicalizer_simple: BodyCanonicalizer,
    canonicalizer_relaxed: BodyCanonicalizer,
}

impl BodyHasher {
    pub fn hash_chunk(&mut self, chunk: &[u8]) -> BodyHasherStance {
        let mut canonicalized_chunk_simple = None;
        let mut canonicalized_chunk_relaxed = None;

        let mut all_done = true;

        let fail_on_truncate = self.fail_on_truncate;
        let active_hashers = self.hashers.iter_mut().filter(|(_, hasher)| {
            !hasher.is_full() || (fail_on_truncate && !hasher.is_truncated())
        });

        for ((_, _, canon), hasher) in active_hashers {
            let canonicalized_chunk = match canon {
                CanonicalizationAlgorithm::Simple => canonicalized_chunk_simple
                    .get_or_insert_with(|| self.canonicalizer_simple.canonicalize_chunk(chunk)),
                CanonicalizationAlgorithm::Relaxed => canonicalized_chunk_relaxed
                    .get_or_insert_with(|| self.canonicalizer_relaxed.canonicalize_chunk(chunk)),
            };

            hasher.update(canonicalized_chunk);

            if !hasher.is_truncated() && (fail_on_truncate || !hasher.is_full()) {
                all_done = false;
            }
        }

        if all_done {
            BodyHasherStance::Done
        } else {
            BodyHasherStance::Interested
        }
    }

    pub fn finish(self) -> BodyHashResults {
        let final_chunk_simple = self.canonicalizer_simple.finish();
        let final_chunk_relaxed = self.canonicalizer_relaxed.finish();

        let mut results = HashMap::new();

        for (key @ (_, _, canon), mut hasher) in self.hashers {
            if !hasher.is_full() || (self.fail_on_truncate && !hasher.is_truncated()) {
                let final_chunk = match canon {
                    CanonicalizationAlgorithm::Simple => &final_chunk_simple,
                    CanonicalizationAlgorithm::Relaxed => &final_chunk_relaxed,
                };

                hasher.update(final_chunk);
            }

            let res = if self.fail_on_truncate && hasher.is_truncated() {
                Err(BodyHashError::InputTruncated)
            } else {
                hasher.finish().map_err(|InsufficientInput| BodyHashError::InsufficientInput)
            };

            results.insert(key, res);
        }

        BodyHashResults { results }
    }
}

impl Write for BodyHasher {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.hash_chunk(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum BodyHashError {
    InsufficientInput,
    InputTruncated,
}

impl Display for BodyHashError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::InsufficientInput => write!(f, "insufficient input data"),
            Self::InputTruncated => write!(f, "input not digested entirely"),
        }
    }
}

impl Error for BodyHashError {}

pub type BodyHashResult = Result<(Box<[u8]>, usize), BodyHashError>;

#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BodyHashResults {
    results: HashMap<BodyHasherKey, BodyHashResult>,
}

impl BodyHashResults {
    pub fn get(&self, key: &BodyHasherKey) -> Option<&BodyHashResult> {
        self.results.get(key)
    }
}

/// A sink filter that writes the canonical form of the body written to it
/// into an inner writer.
pub struct CanonicalizingWriter<W: Write> {
    inner: W,
    canonicalizer: BodyCanonicalizer,
    buf: Vec<u8>,
}

impl<W: Write> CanonicalizingWriter<W> {
    pub fn new(inner: W, kind: CanonicalizationAlgorithm) -> Self {
        Self {
            inner,
            canonicalizer: BodyCanonicalizer::new(kind),
            buf: vec![],
        }
    }

    /// Writes out the pending final line state and returns the inner writer.
    pub fn finish(self) -> io::Result<W> {
        let Self { mut inner, canonicalizer, .. } = self;
        inner.write_all(&canonicalizer.finish())?;
        inner.flush()?;
        Ok(inner)
    }
}

impl<W: Write> Write for CanonicalizingWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.clear();
        self.canonicalizer.canonicalize_chunk_into(buf, &mut self.buf);
        self.inner.write_all(&self.buf)?;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}
