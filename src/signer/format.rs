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

//! Formatting of signature headers.
//!
//! The same formatter produces *DKIM-Signature*, *ARC-Message-Signature*, and
//! *ARC-Seal* headers. The *b=* tag is always the last tag; the formatted
//! value ends with an empty *b=* tag, over which the data hash is computed,
//! and the signature data is appended afterwards.

use crate::{
    header::FieldName,
    signature::{
        Canonicalization, DkimSignature, DomainName, Identity, Selector, SignatureAlgorithm,
    },
    signer::OutputFormat,
    util::{self, CanonicalStr},
};
use std::{borrow::Cow, cmp::Ordering, iter};

// Note: Careful with offsets: formatting works with *characters*, not bytes!

pub const LINE_WIDTH: usize = 78;

/// The value of a tag to be formatted.
pub enum TagValue<'a> {
    /// A value that is never broken across lines.
    Text(Cow<'a, str>),
    /// A colon-separated list of header names, broken after a colon.
    Names(&'a [FieldName]),
    /// Binary data in Base64 encoding, broken anywhere.
    Base64(&'a [u8]),
    /// The empty *b=* tag.
    Signature,
}

/// DKIM signature data that does not yet have a cryptographic signature.
pub struct UnsignedDkimSignature {
    pub algorithm: SignatureAlgorithm,
    pub body_hash: Box<[u8]>,
    pub canonicalization: Canonicalization,
    pub domain: DomainName,
    pub signed_headers: Box<[FieldName]>,
    pub identity: Option<Identity>,
    pub body_length: Option<u64>,
    pub selector: Selector,
    pub timestamp: Option<u64>,
    pub expiration: Option<u64>,
    pub ext_tags: Box<[(Box<str>, Box<str>)]>,
}

impl UnsignedDkimSignature {
    /// Returns the formatted signature without the *b=* tag value, and the
    /// index where the *b=* tag value is to be inserted.
    pub fn format_without_signature(&self, format: &OutputFormat) -> (String, usize) {
        let mut tags = vec![
            ("v", TagValue::Text("1".into())),
            ("a", TagValue::Text(self.algorithm.canonical_str().into())),
            ("c", TagValue::Text(self.canonicalization.canonical_str().into())),
            ("d", TagValue::Text(Cow::Borrowed(self.domain.as_ref()))),
        ];

        if let Some(identity) = &self.identity {
            tags.push(("i", TagValue::Text(identity.to_string().into())));
        }

        tags.push(("s", TagValue::Text(Cow::Borrowed(self.selector.as_ref()))));

        if let Some(body_length) = self.body_length {
            tags.push(("l", TagValue::Text(body_length.to_string().into())));
        }
        if let Some(timestamp) = self.timestamp {
            tags.push(("t", TagValue::Text(timestamp.to_string().into())));
        }
        if let Some(expiration) = self.expiration {
            tags.push(("x", TagValue::Text(expiration.to_string().into())));
        }

        tags.push(("h", TagValue::Names(&self.signed_headers)));
        tags.push(("bh", TagValue::Base64(&self.body_hash)));

        for (name, value) in self.ext_tags.iter() {
            tags.push((&**name, TagValue::Text(Cow::Borrowed(&**value))));
        }

        if let Some(tag_order) = &format.tag_order {
            tags.sort_by(|(a, _), (b, _)| tag_order(a, b));
        }

        tags.push(("b", TagValue::Signature));

        format_tags(&format.header_name, format.line_width, &format.indentation, &tags)
    }

    pub fn into_signature(self, signature_data: Box<[u8]>) -> DkimSignature {
        DkimSignature {
            algorithm: self.algorithm,
            signature_data,
            body_hash: self.body_hash,
            canonicalization: self.canonicalization,
            domain: self.domain,
            signed_headers: self.signed_headers,
            identity: self.identity,
            body_length: self.body_length,
            selector: self.selector,
            timestamp: self.timestamp,
            expiration: self.expiration,
        }
    }
}

pub fn is_output_tag(name: &str) -> bool {
    matches!(
        name,
        "v" | "a" | "b" | "bh" | "c" | "d" | "h" | "i" | "l" | "q" | "s" | "t" | "x" | "z"
    )
}

/// A comparator for tag names that keeps the given order, and orders all other
/// tags after them.
pub fn order_by(names: &'static [&'static str]) -> impl Fn(&str, &str) -> Ordering {
    move |a, b| {
        let pos = |x: &str| names.iter().position(|n| *n == x).unwrap_or(names.len());
        pos(a).cmp(&pos(b))
    }
}

// Ephemeral context holding current formatting options.
#[derive(Clone, Copy)]
struct Fmt<'a> {
    width: usize,
    indent: &'a str,
    last: bool,
}

/// Formats the given tags into a header value, starting with a space. The
/// cursor starts just past the header name and the colon.
///
/// Returns the formatted value and the index at which the signature data is
/// to be inserted.
pub fn format_tags(
    header_name: &str,
    width: usize,
    indent: &str,
    tags: &[(&str, TagValue<'_>)],
) -> (String, usize) {
    let width = width.max(1);

    let mut output = String::new();
    let mut i = header_name.chars().count() + 1;
    let mut insertion_i = None;

    let out = &mut output;
    let i = &mut i;

    for (index, (name, value)) in tags.iter().enumerate() {
        let last = index + 1 == tags.len();

        let fmt = Fmt { width, indent, last };

        match value {
            TagValue::Text(value) => format_tag(out, i, fmt, name, value),
            TagValue::Names(value) => format_tag_h(out, i, fmt, name, value),
            TagValue::Base64(value) => format_tag_bh(out, i, fmt, name, value),
            TagValue::Signature => format_tag_name_b(out, i, fmt, name, &mut insertion_i),
        }
    }

    let insertion_i = insertion_i.unwrap_or(output.len());

    (output, insertion_i)
}

// Note: Throughout, `out` is the final formatted output. `i` is the ‘cursor’ in
// the current line, based on *characters*, not bytes!

fn format_tag(out: &mut String, i: &mut usize, fmt: Fmt<'_>, name: &str, value: &str) {
    debug_assert!(name.is_ascii());

    let Fmt { last, .. } = fmt;

    // name + '=' + val [+ ';']
    let taglen = name.len() + value.chars().count() + if last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(name);
    out.push('=');
    out.push_str(value);

    if !last {
        out.push(';');
    }
}

fn format_tag_h(out: &mut String, i: &mut usize, fmt: Fmt<'_>, tag: &str, value: &[FieldName]) {
    let Fmt { last, .. } = fmt;

    let mut names = value.iter().map(|f| f.as_ref()).peekable();

    let Some(first_name) = names.next() else {
        format_tag(out, i, fmt, tag, "");
        return;
    };

    // tag + '=' + name [+ ';'/':']
    let taglen = tag.len() + first_name.chars().count()
        + if names.peek().is_none() && last { 1 } else { 2 };

    advance_i_initial(out, i, taglen, fmt);
    out.push_str(tag);
    out.push('=');
    out.push_str(first_name);
    // the following ;/: is already accounted for in the cursor

    while let Some(name) = names.next() {
        out.push(':');

        // name [+ ';'/':']
        let len = name.chars().count() + if names.peek().is_none() && last { 0 } else { 1 };

        advance_i(out, i, len, fmt);
        out.push_str(name);
    }

    if !last {
        out.push(';');
    }
}

fn format_tag_bh(out: &mut String, i: &mut usize, fmt: Fmt<'_>, tag: &str, value: &[u8]) {
    let Fmt { last, .. } = fmt;

    let value = util::encode_base64(value);

    // tag + '=' + 1 char (we prefer at least one additional char behind =)
    let taglen = tag.len() + 2;

    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str(tag);
    out.push('=');

    format_chunks_into_string(out, i, fmt, &value);

    // if final chunk makes line *width* chars long, the final ; will be
    // appended nevertheless (giving a width of *width + 1*; this is fine)
    if !last {
        out.push(';');
        *i += 1;
    }
}

fn format_tag_name_b(
    out: &mut String,
    i: &mut usize,
    fmt: Fmt<'_>,
    tag: &str,
    insertion_i: &mut Option<usize>,
) {
    // tag + '=' + 1 char (we prefer at least one additional char behind =)
    let taglen = tag.len() + 2;
    advance_i_initial(out, i, taglen, fmt);
    *i -= 1;  // backwards again before the ghost character
    out.push_str(tag);
    out.push('=');

    *insertion_i = Some(out.len());
}

fn push_line_break(out: &mut String, indent: &str) {
    out.push_str("\r\n");
    out.push_str(indent);
}

/// Advances the cursor `i`, making space for an item of length `len`, inserting
/// line break and indentation if necessary.
fn advance_i(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    if *i + len <= width {
        *i += len;
    } else {
        push_line_break(out, indent);
        *i = indent.chars().count() + len;
    }
}

fn advance_i_initial(out: &mut String, i: &mut usize, len: usize, fmt: Fmt<'_>) {
    let Fmt { width, indent, .. } = fmt;

    // + 1 for initial SP
    if *i + len < width {
        out.push(' ');
        *i += len + 1;
    } else {
        push_line_break(out, indent);
        *i = indent.chars().count() + len;
    }
}

fn format_chunks_into_string(out: &mut String, i: &mut usize, fmt: Fmt<'_>, mut s: &str) {
    let Fmt { width, indent, .. } = fmt;

    let indent_len = indent.chars().count();

    let first_chunk_len = width.saturating_sub(*i);
    let first_chunk_len = first_chunk_len.min(s.chars().count());

    if first_chunk_len > 0 {
        let c = match s.char_indices().nth(first_chunk_len) {
            Some((c, _)) => c,
            None => s.len(),
        };
        let first_chunk;
        (first_chunk, s) = s.split_at(c);
        out.push_str(first_chunk);
        *i += first_chunk.chars().count();
    }

    let chunk_width = width.saturating_sub(indent_len).max(1);  // no empty chunks
    let chunks = iter::from_fn(|| {
        if s.is_empty() {
            None
        } else {
            let chunk;
            match s.char_indices().nth(chunk_width) {
                Some((c, _)) => {
                    (chunk, s) = s.split_at(c);
                }
                None => {
                    (chunk, s) = s.split_at(s.len());
                }
            }
            Some(chunk)
        }
    });

    for chunk in chunks {
        push_line_break(out, indent);
        out.push_str(chunk);
        *i = chunk.chars().count() + indent_len;
    }
}

/// Inserts the Base64-encoded signature data into a formatted header value at
/// the given index, continuing the line breaking of the surrounding text.
pub fn insert_signature_data(
    formatted_header: &mut String,
    insertion_index: usize,
    header_name: &str,
    signature_data: &[u8],
    line_width: usize,
    indent: &str,
) {
    debug_assert!(insertion_index <= formatted_header.len());

    let fmt = Fmt { width: line_width.max(1), indent, last: true };

    let s = util::encode_base64(signature_data);

    let formatted_header_pre = &formatted_header[..insertion_index];

    let mut lines = formatted_header_pre.rsplit("\r\n");
    let last_line = lines.next().unwrap_or_default();
    let mut len = if lines.next().is_some() {
        last_line.chars().count()
    } else {
        header_name.chars().count() + last_line.chars().count() + 1
    };

    let mut result = String::with_capacity(s.len());
    format_chunks_into_string(&mut result, &mut len, fmt, &s);

    formatted_header.insert_str(insertion_index, &result);
}
