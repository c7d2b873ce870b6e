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

//! Public key lookup.

use crate::{
    record::{DkimKeyRecord, DkimKeyRecordParseError},
    signature::{DomainName, Selector},
};
use std::{
    error::Error,
    fmt::{self, Display, Formatter},
    future::Future,
    io::{self, ErrorKind},
    pin::Pin,
    str,
};
use tracing::trace;

/// The only query method defined for DKIM, *dns/txt*.
pub const QUERY_METHOD_DNS_TXT: &str = "dns/txt";

/// An error that occurs when locating a public key.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum LocatorError {
    /// No key record exists for the domain and selector.
    NotFound,
    /// A key record exists, but it could not be used.
    InvalidKey(DkimKeyRecordParseError),
    /// The lookup did not complete in time.
    Timeout,
    /// The lookup failed for some other reason.
    Io,
}

impl Display for LocatorError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "no key record found"),
            Self::InvalidKey(e) => write!(f, "unusable key record: {e}"),
            Self::Timeout => write!(f, "key record lookup timed out"),
            Self::Io => write!(f, "key record lookup failed"),
        }
    }
}

impl Error for LocatorError {}

/// A capability to find the public key record for a signing domain and
/// selector.
pub trait PublicKeyLocator: Send + Sync {
    /// The future resolving to the located key record.
    type Query<'a>: Future<Output = Result<DkimKeyRecord, LocatorError>> + Send + 'a
    where
        Self: 'a;

    /// Locates the public key record for the given domain and selector, using
    /// the given query method.
    fn locate_public_key<'a>(
        &'a self,
        query_method: &'a str,
        domain: &'a DomainName,
        selector: &'a Selector,
    ) -> Self::Query<'a>;
}

/// A capability to look up TXT records in DNS.
pub trait LookupTxt: Send + Sync {
    /// The answer consisting of TXT records found.
    type Answer: IntoIterator<Item = io::Result<Vec<u8>>>;
    /// The future resolving to the query’s answer.
    type Query<'a>: Future<Output = io::Result<Self::Answer>> + Send + 'a
    where
        Self: 'a;

    /// Looks up the domain’s TXT records in DNS.
    ///
    /// The domain will be passed to this trait as a string in human-readable
    /// A-label (ASCII) format (eg `selector._domainkey.example.com.`).
    ///
    /// Implementations should report a non-existent domain with
    /// [`ErrorKind::NotFound`], and a timeout with [`ErrorKind::TimedOut`].
    fn lookup_txt(&self, domain: &str) -> Self::Query<'_>;
}

/// A public key locator that looks up key records in DNS TXT records.
#[derive(Clone, Debug)]
pub struct TxtLocator<T> {
    resolver: T,
}

impl<T> TxtLocator<T> {
    pub fn new(resolver: T) -> Self {
        Self { resolver }
    }
}

impl<T: LookupTxt> PublicKeyLocator for TxtLocator<T> {
    type Query<'a> = Pin<Box<dyn Future<Output = Result<DkimKeyRecord, LocatorError>> + Send + 'a>>
    where
        Self: 'a;

    fn locate_public_key<'a>(
        &'a self,
        query_method: &'a str,
        domain: &'a DomainName,
        selector: &'a Selector,
    ) -> Self::Query<'a> {
        Box::pin(async move {
            if !query_method.eq_ignore_ascii_case(QUERY_METHOD_DNS_TXT) {
                return Err(LocatorError::NotFound);
            }

            // Note the trailing dot: only absolute queries.
            let dname = format!("{}._domainkey.{}.", selector.to_ascii(), domain.to_ascii());

            trace!(%dname, "looking up key record");

            let txts = self.resolver.lookup_txt(&dname).await.map_err(|e| {
                trace!("could not look up key record: {e}");
                match e.kind() {
                    ErrorKind::NotFound => LocatorError::NotFound,
                    ErrorKind::TimedOut => LocatorError::Timeout,
                    _ => LocatorError::Io,
                }
            })?;

            select_key_record(txts)
        })
    }
}

// RFC 6376, section 3.6.2.2 expects a unique TXT record per selector, but
// section 6.1.2 allows cycling through several. The first usable one of at
// most three records is taken.
fn select_key_record(
    txts: impl IntoIterator<Item = io::Result<Vec<u8>>>,
) -> Result<DkimKeyRecord, LocatorError> {
    let mut last_error = None;

    for txt in txts.into_iter().take(3) {
        let result = match txt {
            Ok(bytes) => match str::from_utf8(&bytes) {
                Ok(s) => s.parse(),
                Err(_) => Err(DkimKeyRecordParseError::RecordSyntax),
            },
            Err(e) => {
                trace!("unreadable TXT record: {e}");
                Err(DkimKeyRecordParseError::RecordSyntax)
            }
        };

        match result {
            Ok(record) => return Ok(record),
            Err(e) => {
                trace!("unusable key record: {e}");
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(LocatorError::InvalidKey(e)),
        None => {
            trace!("no key record");
            Err(LocatorError::NotFound)
        }
    }
}
