//! The *Authentication-Results* header.
//!
//! This module models the header defined in RFC 8601, which is also the
//! content of the *ARC-Authentication-Results* header of RFC 8617. Values can
//! be parsed from header text, built programmatically, and encoded back into
//! folded header text.
//!
//! ```
//! use viaauth::authres::AuthenticationResults;
//!
//! let ar: AuthenticationResults = "i=1; example.org; foo=pass".parse().unwrap();
//!
//! assert_eq!(ar.instance, Some(1));
//! assert_eq!(ar.authserv_id.as_deref(), Some("example.org"));
//! assert_eq!(ar.to_string(), "i=1; example.org; foo=pass");
//! ```

mod format;
pub(crate) mod lexer;
mod parse;

pub use format::FormatOptions;

use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    str::FromStr,
};

pub const AUTHENTICATION_RESULTS_NAME: &str = "Authentication-Results";
pub const ARC_AUTHENTICATION_RESULTS_NAME: &str = "ARC-Authentication-Results";

/// The content of an *Authentication-Results* header.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct AuthenticationResults {
    /// The ARC instance, present only in *ARC-Authentication-Results*.
    pub instance: Option<u32>,
    /// The authentication service identifier.
    ///
    /// Office 365 omits it, and the value then starts with the first method
    /// result. In that form there is no place for a version or for an
    /// identifier in front of the first result: encoding drops both, and
    /// without any results the value reads back with authserv-id `none`.
    pub authserv_id: Option<String>,
    /// The version following the authserv-id. Only encoded together with an
    /// authserv-id.
    pub version: Option<u32>,
    /// The method results; when empty, the header says `none`.
    pub results: Vec<MethodResult>,
}

impl AuthenticationResults {
    pub fn new(authserv_id: impl Into<String>) -> Self {
        Self {
            authserv_id: Some(authserv_id.into()),
            ..Default::default()
        }
    }

    /// Parses the header value found in the given range of the input.
    ///
    /// Returns the parsed value and the number of bytes consumed.
    pub fn parse_at(
        input: &[u8],
        offset: usize,
        length: usize,
    ) -> Result<(Self, usize), ParseError> {
        parse::parse_authentication_results(input, offset, length)
    }

    /// Parses a complete header value.
    pub fn parse(input: &[u8]) -> Result<Self, ParseError> {
        Self::parse_at(input, 0, input.len()).map(|(ar, _)| ar)
    }

    /// Parses a complete header value, returning `None` if it is malformed.
    pub fn try_parse(input: &[u8]) -> Option<Self> {
        Self::parse(input).ok()
    }

    /// Encodes this value as a folded header value, starting with a space.
    ///
    /// `start_column` is the column at which the value begins, usually the
    /// length of the header name plus one for the colon.
    pub fn encode(&self, options: &FormatOptions, out: &mut String, start_column: usize) {
        format::encode(self, options, out, start_column)
    }
}

impl FromStr for AuthenticationResults {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s.as_bytes())
    }
}

impl Display for AuthenticationResults {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&format::segments(self).join(" "))
    }
}

/// A single method result, such as `dkim=pass header.d=example.org`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MethodResult {
    pub method: String,
    pub method_version: Option<u32>,
    pub result: String,
    /// The comment following the result, without parentheses.
    pub result_comment: Option<String>,
    /// The bare token that precedes this result in headers written by Office
    /// 365.
    pub office365_authserv_id: Option<String>,
    pub reason: Option<String>,
    pub action: Option<String>,
    pub properties: Vec<MethodProperty>,
}

impl MethodResult {
    pub fn new(method: impl Into<String>, result: impl Into<String>) -> Self {
        Self {
            method: method.into(),
            result: result.into(),
            ..Default::default()
        }
    }

    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.result_comment = Some(comment.into());
        self
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_property(
        mut self,
        ptype: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        self.properties.push(MethodProperty::new(ptype, property, value));
        self
    }

    /// Returns the value of the first property with the given type and name.
    pub fn property(&self, ptype: &str, property: &str) -> Option<&str> {
        self.properties
            .iter()
            .find(|p| {
                p.ptype.eq_ignore_ascii_case(ptype) && p.property.eq_ignore_ascii_case(property)
            })
            .map(|p| p.value.as_str())
    }
}

/// A property of a method result, such as `header.d=example.org`.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct MethodProperty {
    pub ptype: String,
    pub property: String,
    /// The value, unquoted. It may be empty.
    pub value: String,
}

impl MethodProperty {
    pub fn new(
        ptype: impl Into<String>,
        property: impl Into<String>,
        value: impl Into<String>,
    ) -> Self {
        Self {
            ptype: ptype.into(),
            property: property.into(),
            value: value.into(),
        }
    }
}

/// An error that occurs when parsing an *Authentication-Results* value.
///
/// Both indexes are absolute offsets into the parsed input: `token_index` is
/// the start of the token that could not be processed, `error_index` the
/// byte at which processing failed.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub struct ParseError {
    pub token_index: usize,
    pub error_index: usize,
    pub kind: ParseErrorKind,
}

impl ParseError {
    pub fn new(token_index: usize, error_index: usize, kind: ParseErrorKind) -> Self {
        Self {
            token_index,
            error_index,
            kind,
        }
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{} at offset {}", self.kind, self.error_index)
    }
}

impl Error for ParseError {}

#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum ParseErrorKind {
    UnexpectedEnd,
    UnterminatedComment,
    UnterminatedQuotedString,
    InvalidInstance,
    InvalidAuthservId,
    InvalidVersion,
    ExpectedSemicolon,
    ExpectedMethod,
    ExpectedEquals,
    ExpectedResult,
    ExpectedValue,
    InvalidPropertyKey,
    ContentAfterNone,
}

impl Display for ParseErrorKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnexpectedEnd => write!(f, "unexpected end of input"),
            Self::UnterminatedComment => write!(f, "incomplete comment"),
            Self::UnterminatedQuotedString => write!(f, "incomplete quoted string"),
            Self::InvalidInstance => write!(f, "invalid instance"),
            Self::InvalidAuthservId => write!(f, "invalid authentication service identifier"),
            Self::InvalidVersion => write!(f, "invalid version"),
            Self::ExpectedSemicolon => write!(f, "expected ';'"),
            Self::ExpectedMethod => write!(f, "expected method"),
            Self::ExpectedEquals => write!(f, "expected '='"),
            Self::ExpectedResult => write!(f, "expected result"),
            Self::ExpectedValue => write!(f, "expected value"),
            Self::InvalidPropertyKey => write!(f, "invalid property"),
            Self::ContentAfterNone => write!(f, "unexpected content after none"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncated_comment_after_instance() {
        let error = AuthenticationResults::parse(b" i= (truncated comment").unwrap_err();

        assert_eq!(error.token_index, 4);
        assert_eq!(error.error_index, 22);
        assert_eq!(error.kind, ParseErrorKind::UnterminatedComment);
    }

    #[test]
    fn canonical_form_reproduced() {
        let s = "i=1; example.org; foo=pass";

        let ar: AuthenticationResults = s.parse().unwrap();

        assert_eq!(ar.to_string(), s);
    }

    #[test]
    fn try_parse_rejects_malformed() {
        for s in [
            "example.org; dkim=pass (truncated",
            "example.org; dkim=pass reason=\"truncated",
            "example.org; dkim=pass header.d example.org",
            "i=0; example.org; dkim=pass",
            "i=x; example.org; dkim=pass",
            "i=1 example.org; dkim=pass",
            "example.org; none; dkim=pass",
        ] {
            assert_eq!(AuthenticationResults::try_parse(s.as_bytes()), None, "{s}");
        }
    }

    #[test]
    fn none_result() {
        let ar: AuthenticationResults = "example.org 1; none".parse().unwrap();

        assert_eq!(ar.version, Some(1));
        assert!(ar.results.is_empty());
        assert_eq!(ar.to_string(), "example.org 1; none");
    }

    #[test]
    fn method_result_lookup() {
        let result = MethodResult::new("dkim", "pass").with_property("header", "d", "example.org");

        assert_eq!(result.property("Header", "D"), Some("example.org"));
        assert_eq!(result.property("header", "s"), None);
    }
}
