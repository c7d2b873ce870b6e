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

//! A library implementing *DomainKeys Identified Mail* (DKIM, [RFC 6376]), the
//! *Authenticated Received Chain* (ARC, [RFC 8617]), and the
//! *Authentication-Results* header ([RFC 8601]).
//!
//! The high-level API signs messages with DKIM signatures (module `signer`),
//! verifies such signatures (module `verifier`), and seals and validates ARC
//! chains (module `arc`). Results are recorded in the
//! *Authentication-Results* model of module `authres`. The most relevant items
//! are re-exported at the top level.
//!
//! The low-level building blocks are available as well: canonicalization and
//! streaming body filters, hashing, cryptography, and the key record format.
//!
//! # Usage
//!
//! The types [`Signer`], [`Verifier`], [`ArcSealer`], and [`ArcVerifier`]
//! provide the entry points. The message header is passed as
//! [`HeaderFields`] to each operation; producers prepend their output to it.
//!
//! Verification is `async` because public keys are obtained through a
//! [`PublicKeyLocator`][crate::verifier::PublicKeyLocator], usually backed by
//! DNS. Signing is synchronous.
//!
//! SHA-1 signatures are disabled by default ([RFC 8301]) and can be enabled
//! per verifier through its [`AlgorithmSet`][crate::verifier::AlgorithmSet].
//!
//! [RFC 6376]: https://www.rfc-editor.org/rfc/rfc6376
//! [RFC 8301]: https://www.rfc-editor.org/rfc/rfc8301
//! [RFC 8601]: https://www.rfc-editor.org/rfc/rfc8601
//! [RFC 8617]: https://www.rfc-editor.org/rfc/rfc8617

pub mod arc;
pub mod authres;
pub mod canonicalize;
pub mod crypto;
pub mod header;
pub mod message_hash;
pub mod record;
pub mod signature;
pub mod signer;
mod tag_list;
mod util;
pub mod verifier;

pub use crate::{
    arc::{ArcSealOutcome, ArcSealRequest, ArcSealer, ArcSignerError, ArcValidationResult, ArcVerifier},
    authres::{AuthenticationResults, MethodResult},
    crypto::SigningKey,
    header::{FieldBody, FieldName, HeaderField, HeaderFields},
    signature::{DomainName, Selector, SignatureAlgorithm},
    signer::{SignRequest, Signer, SignerError, SigningResult},
    util::{decode_base64, encode_base64, Base64Error, CanonicalStr},
    verifier::{Config, VerificationResult, VerificationStatus, Verifier, VerifierError},
};
