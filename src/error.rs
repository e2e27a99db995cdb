/// Errors raised while issuing, presenting, parsing or verifying SD-JWTs.
///
/// Cryptographic failures are reported without detail: neither key material
/// nor the underlying signature error ever ends up in the message.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The `~`-separated serialization, or the issuer-signed JWT inside it, is
    /// not well formed.
    #[error("malformed SD-JWT compact encoding: {0}")]
    MalformedCompactEncoding(String),

    /// A disclosure is not valid base64url, not a JSON array of 2 or 3
    /// elements, or uses a reserved claim name.
    ///
    /// `index` is the 1-based position of the disclosure segment when the
    /// error is raised while parsing a full serialization.
    #[error(
        "malformed disclosure{}: {reason}",
        .index.map(|i| format!(" #{i}")).unwrap_or_default()
    )]
    MalformedDisclosure {
        index: Option<usize>,
        reason: String,
    },

    /// The same disclosure was supplied more than once.
    #[error("disclosure with digest `{0}` was supplied more than once")]
    DuplicateDisclosure(String),

    /// The trailing KB-JWT is not a JWT or lacks a required claim.
    #[error("malformed key binding JWT: {0}")]
    MalformedKeyBindingJwt(String),

    /// `_sd_alg` names a hash function this crate does not support.
    #[error("unsupported selective disclosure digest algorithm `{0}`")]
    UnsupportedDigestAlgorithm(String),

    /// The issuer-signed JWT did not verify.
    #[error("issuer signature is invalid")]
    SignatureInvalid,

    /// The payload tree is not a valid SD-JWT payload.
    #[error("invalid SD-JWT payload: {0}")]
    InvalidPayload(String),

    /// A presented disclosure is not referenced by any digest in the payload.
    #[error("disclosure with digest `{0}` is not referenced by the payload")]
    DisclosureNotReferenced(String),

    /// Key binding is required but the presentation carries no KB-JWT.
    #[error("key binding JWT is required but missing")]
    MissingKeyBinding,

    /// Key binding is required but the payload does not carry a usable
    /// `cnf.jwk`.
    #[error("holder key is missing from the `cnf` claim")]
    MissingHolderKey,

    /// `sd_hash` does not match the presented SD-JWT.
    #[error("key binding JWT `sd_hash` does not match the presentation")]
    KeyBindingHashMismatch,

    /// The KB-JWT signature did not verify against the holder key.
    #[error("key binding JWT signature is invalid")]
    KeyBindingSignatureInvalid,

    #[error("key binding JWT audience mismatch (expected `{expected}`, found `{found}`)")]
    KeyBindingAudienceMismatch { expected: String, found: String },

    #[error("key binding JWT nonce mismatch")]
    KeyBindingNonceMismatch,

    /// The KB-JWT `iat` is missing, too old, or in the future.
    #[error("key binding JWT is expired or not yet valid")]
    KeyBindingExpired,

    /// The credential binds its holder in a way that cannot be verified here.
    #[error("unsupported holder binding: {0}")]
    UnsupportedHolderBinding(String),

    /// An SD-JWT VC claim is missing or malformed.
    #[error("invalid SD-JWT VC: {0}")]
    InvalidCredential(String),

    #[error("SD-JWT VC is not valid before {0}")]
    CredentialNotYetValid(i64),

    #[error("SD-JWT VC expired at {0}")]
    CredentialExpired(i64),

    /// SD-JWT VC type metadata is inconsistent.
    #[error("invalid type metadata: {0}")]
    TypeMetadata(String),

    /// A credential payload does not conform to its type metadata.
    #[error("credential does not conform to its type metadata: {}", .0.join("; "))]
    SchemaValidation(Vec<String>),

    /// The signing capability failed.
    #[error("signing failed")]
    Signing(#[source] anyhow::Error),

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn malformed_disclosure(reason: impl ToString) -> Self {
        Self::MalformedDisclosure {
            index: None,
            reason: reason.to_string(),
        }
    }

    pub(crate) fn invalid_payload(reason: impl ToString) -> Self {
        Self::InvalidPayload(reason.to_string())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
