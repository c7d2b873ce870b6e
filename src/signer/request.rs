use crate::{
    crypto::SigningKey,
    header::{FieldName, HeaderFields},
    signature::{
        Canonicalization, CanonicalizationAlgorithm, DomainName, Identity, Selector,
        SignatureAlgorithm, DKIM_SIGNATURE_NAME,
    },
    signer::{
        format::{self, LINE_WIDTH},
        SignerError,
    },
    tag_list,
};
use std::{
    cmp::Ordering,
    collections::HashSet,
    fmt::{self, Debug, Formatter},
    time::Duration,
};

/// A generator for the body length limit tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum BodyLength {
    /// Do not limit the body length: no *l=* tag.
    #[default]
    All,
    /// Sign only the body as presented: set *l=* to the actual body length.
    OnlyMessageLength,
    /// Sign exactly the specified number of bytes of body content: set *l=* to
    /// the given value.
    Exact(u64),
}

impl BodyLength {
    /// The limit to apply when hashing the body.
    pub fn to_limit(self) -> Result<Option<usize>, SignerError> {
        match self {
            Self::All | Self::OnlyMessageLength => Ok(None),
            Self::Exact(n) => n.try_into().map(Some).map_err(|_| SignerError::Overflow),
        }
    }
}

/// A generator for the timestamp tag.
#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub enum Timestamp {
    #[default]
    Now,
    Exact(u64),
}

/// Selects all headers matching the predicate, in reverse (evaluation order).
pub fn select_headers<'a, 'b: 'a>(
    headers: &'a HeaderFields,
    mut pred: impl FnMut(&FieldName) -> bool + 'b,
) -> impl DoubleEndedIterator<Item = &'a FieldName> + 'a {
    headers
        .as_ref()
        .iter()
        .rev()
        .filter_map(move |(name, _)| if pred(name) { Some(name) } else { None })
}

/// Selection of headers to include in the h= tag.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub enum HeaderSelection {
    /// Given some `HeaderFields`, select the headers in the default set.
    #[default]
    Auto,
    /// Use exactly the headers given here as contents of the h= tag.
    Manual(Vec<FieldName>),
}

impl HeaderSelection {
    /// Resolves the selection against the given header.
    pub fn resolve(&self, headers: &HeaderFields) -> Vec<FieldName> {
        match self {
            Self::Auto => {
                let def: HashSet<_> = default_signed_headers().into_iter().collect();
                select_headers(headers, move |name| def.contains(name))
                    .cloned()
                    .collect()
            }
            Self::Manual(names) => names.clone(),
        }
    }
}

fn field_names(names: &[&str]) -> Vec<FieldName> {
    names.iter().filter_map(|&n| FieldName::new(n).ok()).collect()
}

/// Returns a collection of headers that should be signed.
///
/// RFC 6376 does not actually recommend a specific set of headers to be signed.
/// Instead, the collection returned here contains the so-called ‘examples’ from
/// section 5.4.1.
pub fn default_signed_headers() -> Vec<FieldName> {
    // This set is the same as in OpenDKIM (minus *Resent-Sender*).
    field_names(&[
        "From",
        "Reply-To",
        "Subject",
        "Date",
        "To",
        "Cc",
        "Resent-Date",
        "Resent-From",
        "Resent-To",
        "Resent-Cc",
        "In-Reply-To",
        "References",
        "List-Id",
        "List-Help",
        "List-Unsubscribe",
        "List-Subscribe",
        "List-Post",
        "List-Owner",
        "List-Archive",
    ])
}

/// Returns a collection of headers that should be excluded from a signature.
///
/// The trace headers *Return-Path* and *Received* are refused by the signer.
pub fn default_unsigned_headers() -> Vec<FieldName> {
    field_names(&["Return-Path", "Received", "Comments", "Keywords"])
}

fn is_trace_header(name: &FieldName) -> bool {
    *name == "Received" || *name == "Return-Path"
}

fn is_content_header(name: &FieldName) -> bool {
    *name == "Content-Type" || *name == "Content-Transfer-Encoding"
}

/// Checks a list of header names to be signed.
pub fn validate_signed_headers(
    names: &[FieldName],
    require_from: bool,
    permit_content_headers: bool,
) -> Result<(), SignerError> {
    if names.is_empty() {
        return Err(SignerError::EmptySignedHeaders);
    }
    if require_from && !names.iter().any(|name| *name == "From") {
        return Err(SignerError::FromHeaderNotSigned);
    }
    // names containing ; cannot be expressed in the h= tag
    if names.iter().any(|name| name.as_ref().contains(';')) {
        return Err(SignerError::InvalidSignedFieldName);
    }
    if names.iter().any(is_trace_header) {
        return Err(SignerError::TraceHeaderSigned);
    }
    if !permit_content_headers && names.iter().any(is_content_header) {
        return Err(SignerError::ContentHeaderSigned);
    }
    Ok(())
}

/// Formatting options.
pub struct OutputFormat {
    /// The header name, must be equal to `DKIM-Signature` ignoring case.
    pub header_name: String,
    /// The maximum line width in characters to use when breaking lines. The
    /// default is 78.
    pub line_width: usize,
    /// The indentation whitespace to use for continuation lines. Must be a
    /// non-empty sequence of space and tab characters. The default is `"\t"`.
    pub indentation: String,
    /// A comparator applied to tag names that determines the order of the tags
    /// included in the signature. The *b=* tag always comes last.
    pub tag_order: Option<Box<dyn Fn(&str, &str) -> Ordering + Send + Sync>>,
}

impl OutputFormat {
    pub(crate) fn validate(&self, header_name: &str) -> Result<(), SignerError> {
        if !self.header_name.eq_ignore_ascii_case(header_name)
            || self.line_width == 0
            || self.indentation.is_empty()
            || !self.indentation.chars().all(|c| matches!(c, ' ' | '\t'))
        {
            return Err(SignerError::InvalidFormat);
        }
        Ok(())
    }
}

impl Default for OutputFormat {
    fn default() -> Self {
        Self {
            header_name: DKIM_SIGNATURE_NAME.into(),
            line_width: LINE_WIDTH,
            indentation: "\t".into(),
            tag_order: None,
        }
    }
}

impl Debug for OutputFormat {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("OutputFormat")
            .field("header_name", &self.header_name)
            .field("line_width", &self.line_width)
            .field("indentation", &self.indentation)
            .field("tag_order", &self.tag_order.as_ref().map(|_| "<fn>"))
            .finish()
    }
}

/// A request for creation of a DKIM signature.
pub struct SignRequest<T> {
    /// The key to use for producing the cryptographic signature.
    pub signing_key: T,

    /// The signature algorithm to use in the *a=* tag. Must be compatible with
    /// the signing key.
    pub algorithm: SignatureAlgorithm,
    /// The canonicalization to use in the *c=* tag.
    pub canonicalization: Canonicalization,
    /// The selection of headers to include in the *h=* tag.
    pub header_selection: HeaderSelection,
    /// Whether *Content-Type* and *Content-Transfer-Encoding* may be signed.
    pub permit_content_headers: bool,
    /// The signing domain to use in the *d=* tag.
    pub domain: DomainName,
    /// The agent or user identifier to use in the *i=* tag.
    pub identity: Option<Identity>,
    /// The selector to use in the *s=* tag.
    pub selector: Selector,
    /// The strategy to use for generating the *l=* tag.
    pub body_length: BodyLength,
    /// The timestamp value to record in the *t=* tag.
    pub timestamp: Option<Timestamp>,
    /// The duration for which the signature will remain valid (*x=* tag).
    pub valid_duration: Option<Duration>,
    /// Additional tag/value pairs to include in the signature.
    pub extra_tags: Vec<(String, String)>,

    /// The formatting options to use for producing the formatted
    /// *DKIM-Signature* header.
    pub format: OutputFormat,
}

impl<T> SignRequest<T> {
    pub fn new(
        domain: DomainName,
        selector: Selector,
        algorithm: SignatureAlgorithm,
        signing_key: T,
    ) -> Self {
        Self {
            signing_key,

            algorithm,
            canonicalization: Canonicalization::new(
                CanonicalizationAlgorithm::Relaxed,
                CanonicalizationAlgorithm::Simple,
            ),
            header_selection: HeaderSelection::Auto,
            permit_content_headers: false,
            domain,
            identity: None,
            selector,
            body_length: BodyLength::All,
            timestamp: Some(Timestamp::Now),
            valid_duration: Some(Duration::from_secs(60 * 60 * 24 * 5)),  // five days
            extra_tags: vec![],

            format: Default::default(),
        }
    }
}

impl<T> Debug for SignRequest<T> {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignRequest")
            .field("algorithm", &self.algorithm)
            .field("canonicalization", &self.canonicalization)
            .field("header_selection", &self.header_selection)
            .field("domain", &self.domain)
            .field("identity", &self.identity)
            .field("selector", &self.selector)
            .field("body_length", &self.body_length)
            .field("timestamp", &self.timestamp)
            .field("valid_duration", &self.valid_duration)
            .field("extra_tags", &self.extra_tags)
            .finish_non_exhaustive()
    }
}

/// Checks the request against the message header, before any hashing or
/// signing is done.
pub fn validate_request<T: AsRef<SigningKey>>(
    request: &SignRequest<T>,
    headers: &HeaderFields,
) -> Result<(), SignerError> {
    if request.signing_key.as_ref().key_type() != request.algorithm.key_type() {
        return Err(SignerError::KeyTypeMismatch);
    }

    let signed_headers = request.header_selection.resolve(headers);
    validate_signed_headers(&signed_headers, true, request.permit_content_headers)?;

    if let Some(identity) = &request.identity {
        let local_part_ok = identity
            .local_part
            .as_deref()
            .map_or(true, |l| l.chars().all(tag_list::is_tval_char));
        if !local_part_ok || !identity.domain_part.eq_or_subdomain_of(&request.domain) {
            return Err(SignerError::InvalidIdentity);
        }
    }

    request.body_length.to_limit()?;

    if let Some(duration) = request.valid_duration {
        if duration.as_secs() == 0 {
            return Err(SignerError::ZeroExpirationDuration);
        }
    }

    let mut tags_seen = HashSet::new();
    if request.extra_tags.iter().any(|(name, value)| {
        !tags_seen.insert(name)
            || !tag_list::is_tag_name(name)
            || !tag_list::is_tag_value(value)
            || format::is_output_tag(name)
    }) {
        return Err(SignerError::InvalidExtraTags);
    }

    request.format.validate(DKIM_SIGNATURE_NAME)
}
