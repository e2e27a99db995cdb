//! This library provides a Rust implementation of [Selective Disclosure for
//! JWTs (SD-JWT)] and of [SD-JWT-based Verifiable Credentials (SD-JWT VC)].
//!
//! [Selective Disclosure for JWTs (SD-JWT)]: <https://datatracker.ietf.org/doc/draft-ietf-oauth-selective-disclosure-jwt/>
//! [SD-JWT-based Verifiable Credentials (SD-JWT VC)]: <https://datatracker.ietf.org/doc/draft-ietf-oauth-sd-jwt-vc/>
//!
//! # Issuer Usage
//!
//! An issuer decides which claims are selectively disclosable with an
//! [`SdMap`], redacts the payload into an [`SdPayload`] and signs it:
//!
//! ```ignore
//! use sd_jwt::{DecoyMode, SdJwt, SdMap, SdPayload};
//!
//! let full_payload = json!({
//!     "sub": "1234",
//!     "given_name": "John",
//!     "address": { "street_address": "123 Main St", "country": "US" },
//!     "nationalities": ["US", "DE"]
//! });
//!
//! // Redact `given_name`, the street address and every nationality.
//! let sd_map = SdMap::from_paths(
//!     &["given_name", "address.street_address", "nationalities.*"],
//!     DecoyMode::Random,
//!     3,
//! );
//! let sd_payload = SdPayload::create(full_payload.as_object().unwrap(), &sd_map)?;
//!
//! // Any `Signer` works here, `P256Signer` is provided for ES256.
//! let sd_jwt = SdJwt::sign(sd_payload, &issuer_signer, Some("issuer-key-1")).await?;
//! let issued = sd_jwt.to_string();
//! ```
//!
//! # Holder Usage
//!
//! The holder chooses which disclosures to present, and binds the presentation
//! to a verifier request with a [`KeyBindingJwt`]:
//!
//! ```ignore
//! use sd_jwt::{SdJwt, SdMap};
//!
//! let sd_jwt = SdJwt::parse(&issued)?;
//! let selection = SdMap::selection_from_paths(&["address.street_address"]);
//!
//! let presentation = sd_jwt
//!     .present_with_key_binding(
//!         Some(&selection),
//!         "https://verifier.example.org",
//!         "1234567890",
//!         &holder_signer,
//!     )
//!     .await?;
//! ```
//!
//! # Verifier Usage
//!
//! ```ignore
//! use sd_jwt::{SdJwt, VerificationOptions};
//!
//! let options = VerificationOptions::new()
//!     .require_key_binding(true)
//!     .audience("https://verifier.example.org")
//!     .nonce("1234567890")
//!     .max_key_binding_age(Duration::from_secs(300));
//!
//! let verified = SdJwt::parse(&presentation)?
//!     .verify(&issuer_verifier, &options)
//!     .await?;
//! println!("{:#}", Json::Object(verified.full_payload));
//! ```
//!
//! Signing and signature verification are left to the [`Signer`] and
//! [`Verifier`] traits so that keys can live in an HSM, a wallet secure
//! enclave or a remote KMS.
//!
//! # Format Overview
//!
//! 1. *Disclosures*: every selectively disclosable claim becomes a
//!    [`Disclosure`], the base64url encoding of `[salt, key, value]` (or
//!    `[salt, value]` for array elements).
//! 2. *Redaction*: the claim is replaced by the digest of its disclosure, in
//!    the `_sd` array of the enclosing object or as a `{"...": digest}` array
//!    element. Decoy digests may be mixed in.
//! 3. *Issuance*: the redacted payload is signed and serialized as
//!    `<jwt>~<disclosure>~...~<disclosure>`.
//! 4. *Presentation*: the holder drops the disclosures it does not want to
//!    reveal and ends the list with `~`, optionally followed by a KB-JWT
//!    whose `sd_hash` covers everything before it.
//! 5. *Verification*: the verifier checks the issuer signature, rebuilds the
//!    payload from the presented disclosures and checks the KB-JWT.

pub mod config;
pub mod digest;
pub mod disclosure;
pub mod error;
pub mod jws;
pub mod key_binding;
pub mod sd_jwt;
pub mod sd_map;
pub mod sd_payload;
pub mod utils;
pub mod vc;

pub use config::Config;
pub use digest::SdAlg;
pub use disclosure::Disclosure;
pub use error::{Error, Result};
pub use jws::{P256Signer, P256Verifier, Signer, Verifier};
pub use key_binding::{KeyBindingClaims, KeyBindingJwt};
pub use sd_jwt::{SdJwt, VerificationOptions, VerifiedSdJwt};
pub use sd_map::{DecoyMode, SdField, SdMap};
pub use sd_payload::SdPayload;
pub use vc::{type_metadata::TypeMetadata, HolderBinding, SdJwtVc, SdJwtVcClaims};

/// Key of the array holding the digests of an object's disclosable claims.
pub const DIGESTS_KEY: &str = "_sd";
/// Key of the hash algorithm claim at the payload root.
pub const DIGEST_ALG_KEY: &str = "_sd_alg";
/// Key of the single-entry object replacing a disclosable array element.
pub const ARRAY_DIGEST_KEY: &str = "...";
/// Separator between the parts of a compact SD-JWT.
pub const SEPARATOR: char = '~';
