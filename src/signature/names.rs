//! Domain names, selectors, and user identifiers in signature tags.

use crate::tag_list;
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    hash::{Hash, Hasher},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ParseDomainError;

impl Display for ParseDomainError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "could not parse domain name")
    }
}

impl Error for ParseDomainError {}

// A validated name, kept as given. Equality ignores ASCII case.
#[derive(Clone)]
struct DnsName(Box<str>);

impl DnsName {
    // Validated names that still fail IDNA processing are used as-is.
    fn to_ascii(&self) -> String {
        idna::domain_to_ascii(&self.0).unwrap_or_else(|_| self.0.to_ascii_lowercase())
    }
}

impl PartialEq for DnsName {
    fn eq(&self, other: &Self) -> bool {
        self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Eq for DnsName {}

impl Hash for DnsName {
    fn hash<H: Hasher>(&self, state: &mut H) {
        for b in self.0.bytes() {
            state.write_u8(b.to_ascii_lowercase());
        }
    }
}

impl fmt::Debug for DnsName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &self.0)
    }
}

/// A domain name, as used in the *d=* tag and in the domain part of *i=*.
///
/// The string is validated and then kept as-is. Equality is case-insensitive;
/// IDNA equivalence is only taken into account by
/// [`DomainName::eq_or_subdomain_of`] and in DNS queries.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct DomainName(DnsName);

impl DomainName {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if is_domain(s) {
            Ok(Self(DnsName(s.into())))
        } else {
            Err(ParseDomainError)
        }
    }

    /// Whether this domain equals the given domain or is a subdomain of it,
    /// comparing A-labels.
    pub fn eq_or_subdomain_of(&self, other: &DomainName) -> bool {
        if self == other {
            return true;
        }

        let name = self.to_ascii();
        let parent = other.to_ascii();

        match name.len().checked_sub(parent.len()) {
            Some(n) if n > 0 => {
                name.as_bytes()[n - 1] == b'.'
                    && matches!(name.get(n..), Some(s) if s.eq_ignore_ascii_case(&parent))
            }
            _ => false,
        }
    }

    /// Returns the A-label form, as used in DNS queries.
    pub fn to_ascii(&self) -> String {
        self.0.to_ascii()
    }
}

impl Display for DomainName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0 .0)
    }
}

impl AsRef<str> for DomainName {
    fn as_ref(&self) -> &str {
        &self.0 .0
    }
}

/// A selector, the sequence of labels in the *s=* tag.
///
/// Labels are parsed leniently, so that selectors like `dkim_123` are
/// accepted. Equality is case-insensitive.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct Selector(DnsName);

impl Selector {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        if !s.split('.').all(is_label) {
            return Err(ParseDomainError);
        }

        // must convert in both directions
        if idna::domain_to_ascii(s).is_err() || idna::domain_to_unicode(s).1.is_err() {
            return Err(ParseDomainError);
        }

        Ok(Self(DnsName(s.into())))
    }

    /// Returns the A-label form, as used in DNS queries.
    pub fn to_ascii(&self) -> String {
        self.0.to_ascii()
    }
}

impl Display for Selector {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0 .0)
    }
}

impl AsRef<str> for Selector {
    fn as_ref(&self) -> &str {
        &self.0 .0
    }
}

const MAX_DOMAIN_LENGTH: usize = 253;

// At least two labels, and a top-level label that is not all digits.
fn is_domain(s: &str) -> bool {
    if !(1..=MAX_DOMAIN_LENGTH).contains(&s.len()) {
        return false;
    }

    let labels: Vec<_> = s.split('.').collect();

    match labels.split_last() {
        Some((tld, rest)) if !rest.is_empty() => {
            is_label(tld)
                && !tld.chars().all(|c| c.is_ascii_digit())
                && rest.iter().all(|l| is_label(l))
        }
        _ => false,
    }
}

// Labels are restricted to tag value characters, which excludes ‘;’.
fn is_label(s: &str) -> bool {
    (1..=63).contains(&s.len())
        && !s.starts_with('-')
        && !s.ends_with('-')
        && s.chars().all(tag_list::is_tval_char)
}

/// A user or agent identifier, the content of the *i=* tag of a DKIM
/// signature. The local part is optional.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Identity {
    pub local_part: Option<Box<str>>,
    pub domain_part: DomainName,
}

impl Identity {
    pub fn new(s: &str) -> Result<Self, ParseDomainError> {
        let (local_part, domain) = s.rsplit_once('@').ok_or(ParseDomainError)?;

        let local_part = match local_part {
            "" => None,
            l if is_local_part(l) => Some(l.into()),
            _ => return Err(ParseDomainError),
        };

        Ok(Self {
            local_part,
            domain_part: DomainName::new(domain)?,
        })
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if let Some(local_part) = &self.local_part {
            f.write_str(local_part)?;
        }
        write!(f, "@{}", self.domain_part)
    }
}

// RFC 5321, section 4.1.2, with the UTF-8 extension of RFC 6531.
fn is_local_part(s: &str) -> bool {
    if s.len() > 64 {
        return false;
    }

    match s.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
        Some(quoted) => is_quoted_content(quoted),
        None => {
            !s.starts_with('"')
                && s.split('.').all(|atom| !atom.is_empty() && atom.chars().all(is_atext))
        }
    }
}

fn is_quoted_content(s: &str) -> bool {
    let mut chars = s.chars();

    while let Some(c) = chars.next() {
        let valid = match c {
            '\\' => matches!(chars.next(), Some(c) if c == ' ' || c.is_ascii_graphic()),
            '"' => false,
            c => c == ' ' || c.is_ascii_graphic() || !c.is_ascii(),
        };
        if !valid {
            return false;
        }
    }

    true
}

fn is_atext(c: char) -> bool {
    c.is_ascii_alphanumeric() || "!#$%&'*+-/=?^_`{|}~".contains(c) || !c.is_ascii()
}
