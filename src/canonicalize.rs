//! Canonicalization of header fields and message body.
//!
//! Both the *simple* and the *relaxed* algorithms are implemented. Body
//! canonicalization is streaming: a [`BodyCanonicalizer`] consumes arbitrary
//! chunks and keeps only the state of the current line.
//!
//! Line endings in the body are normalized: CRLF and bare LF both terminate a
//! line, and every line is output with CRLF. A CR not followed by LF is
//! ordinary content.

use crate::{
    header::{FieldBody, FieldName, HeaderFields},
    signature::CanonicalizationAlgorithm,
};
use bstr::ByteSlice;
use std::collections::HashSet;

const CR: u8 = b'\r';
const LF: u8 = b'\n';
const SP: u8 = b' ';
const CRLF: [u8; 2] = [CR, LF];

/// A canonicalizer using the body canonicalization algorithm.
pub struct BodyCanonicalizer {
    kind: CanonicalizationAlgorithm,
    pending_cr: bool,     // CR seen, line ending not yet decided
    pending_wsp: bool,    // relaxed: WSP run seen on the current line
    line_content: bool,   // current line has canonical content
    empty_lines: usize,   // empty lines withheld until more content arrives
    output_seen: bool,    // any output produced yet
}

impl BodyCanonicalizer {
    pub fn new(kind: CanonicalizationAlgorithm) -> Self {
        Self {
            kind,
            pending_cr: false,
            pending_wsp: false,
            line_content: false,
            empty_lines: 0,
            output_seen: false,
        }
    }

    pub fn simple() -> Self {
        Self::new(CanonicalizationAlgorithm::Simple)
    }

    pub fn relaxed() -> Self {
        Self::new(CanonicalizationAlgorithm::Relaxed)
    }

    /// Canonicalizes a chunk of the body, returning the canonical output that
    /// is available so far.
    pub fn canonicalize_chunk(&mut self, bytes: &[u8]) -> Vec<u8> {
        let mut result = Vec::with_capacity(bytes.len());
        self.canonicalize_chunk_into(bytes, &mut result);
        result
    }

    /// Canonicalizes a chunk of the body, appending canonical output to
    /// `result`.
    pub fn canonicalize_chunk_into(&mut self, bytes: &[u8], result: &mut Vec<u8>) {
        let relaxed = self.kind == CanonicalizationAlgorithm::Relaxed;

        for &b in bytes {
            if self.pending_cr {
                self.pending_cr = false;
                if b == LF {
                    self.end_line(result);
                    continue;
                }
                self.push_content(result, CR);
            }

            match b {
                CR => self.pending_cr = true,
                LF => self.end_line(result),
                b' ' | b'\t' if relaxed => self.pending_wsp = true,
                b => self.push_content(result, b),
            }
        }
    }

    /// Finishes canonicalization, returning the final canonical output.
    pub fn finish(mut self) -> Vec<u8> {
        let mut result = vec![];

        if self.pending_cr {
            self.pending_cr = false;
            self.push_content(&mut result, CR);
        }

        // body needs final CRLF
        if self.line_content {
            result.extend(CRLF);
            self.output_seen = true;
        }

        // empty body is CRLF with simple, and empty with relaxed
        if !self.output_seen && self.kind == CanonicalizationAlgorithm::Simple {
            result.extend(CRLF);
        }

        result
    }

    fn push_content(&mut self, result: &mut Vec<u8>, b: u8) {
        if !self.line_content {
            // write out withheld empty lines before the content that ends them
            for _ in 0..self.empty_lines {
                result.extend(CRLF);
            }
            self.empty_lines = 0;
            self.line_content = true;
        }
        if self.pending_wsp {
            result.push(SP);
            self.pending_wsp = false;
        }
        result.push(b);
        self.output_seen = true;
    }

    fn end_line(&mut self, result: &mut Vec<u8>) {
        // relaxed: trailing WSP is dropped
        self.pending_wsp = false;

        if self.line_content {
            result.extend(CRLF);
            self.line_content = false;
        } else {
            self.empty_lines += 1;
        }
    }
}

/// Canonicalizes a complete body in one go.
pub fn canonicalize_body(kind: CanonicalizationAlgorithm, body: &[u8]) -> Vec<u8> {
    let mut canonicalizer = BodyCanonicalizer::new(kind);
    let mut result = canonicalizer.canonicalize_chunk(body);
    result.extend(canonicalizer.finish());
    result
}

/// Produces the header canonicalization result for some header fields.
///
/// Selected names are matched bottom-up; each physical header field is used
/// at most once. Names without a (further) matching field contribute nothing.
pub fn canonicalize_headers(
    canon_alg: CanonicalizationAlgorithm,
    headers: &HeaderFields,
    selected_headers: &[FieldName],
) -> Vec<u8> {
    let mut result = vec![];
    let mut processed_indexes = HashSet::with_capacity(selected_headers.len());

    for selected_header in selected_headers {
        let next = headers
            .as_ref()
            .iter()
            .enumerate()
            .rev()
            .find(|(i, (name, _))| name == selected_header && !processed_indexes.contains(i));

        if let Some((i, (name, value))) = next {
            canonicalize_header(&mut result, canon_alg, name, value);
            result.extend(CRLF);
            processed_indexes.insert(i);
        }
    }

    result
}

/// Canonicalizes a header field into some result vector. No CRLF is appended.
pub fn canonicalize_header(
    result: &mut Vec<u8>,
    algorithm: CanonicalizationAlgorithm,
    name: impl AsRef<str>,
    value: impl AsRef<[u8]>,
) {
    let name = name.as_ref();
    let value = value.as_ref();

    match algorithm {
        CanonicalizationAlgorithm::Simple => {
            result.extend(name.bytes());
            result.push(b':');
            result.extend(value);
        }
        CanonicalizationAlgorithm::Relaxed => {
            result.extend(name.to_ascii_lowercase().bytes());
            result.push(b':');
            canonicalize_header_relaxed(result, value);
        }
    }
}

fn canonicalize_header_relaxed(result: &mut Vec<u8>, value: &[u8]) {
    fn is_space(c: char) -> bool {
        matches!(c, ' ' | '\t' | '\r' | '\n')
    }

    debug_assert!(FieldBody::new(value).is_ok());

    let value = value.trim_with(is_space);

    let mut compressing = false;
    for &b in value {
        if is_space(b.into()) {
            if !compressing {
                result.push(SP);
                compressing = true;
            }
        } else {
            result.push(b);
            compressing = false;
        }
    }
}
