use std::{fmt, time::Duration};

use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    digest::SdAlg,
    disclosure::Disclosure,
    error::{Error, Result},
    jws::{CompactJws, P256Verifier, Signer, Verifier},
    key_binding::{KeyBindingClaims, KeyBindingJwt},
    sd_map::SdMap,
    sd_payload::SdPayload,
    utils::unix_timestamp,
    SEPARATOR,
};

/// An issuer-signed JWT together with disclosures for its selectively
/// disclosable claims, and optionally a Key Binding JWT.
///
/// Issued SD-JWTs serialize as `<jwt>~<disclosure>~...~<disclosure>`,
/// presentations as `<jwt>~<disclosure>~...~[<kb-jwt>]`.
#[derive(Debug, Clone, PartialEq)]
pub struct SdJwt {
    jws: CompactJws,
    sd_payload: SdPayload,
    key_binding_jwt: Option<KeyBindingJwt>,
    is_presentation: bool,
}

/// What the verifier expects from a presentation.
#[derive(Debug, Clone, Default)]
pub struct VerificationOptions {
    /// Reject presentations without a valid KB-JWT.
    pub require_key_binding: bool,
    /// Expected KB-JWT `aud`, checked when set.
    pub audience: Option<String>,
    /// Expected KB-JWT `nonce`, checked when set.
    pub nonce: Option<String>,
    /// Maximum age of the KB-JWT `iat`, checked when set.
    pub max_key_binding_age: Option<Duration>,
    /// Tolerance applied to every time comparison.
    pub clock_skew: Duration,
    /// Verification time in seconds since the Unix epoch. Defaults to now.
    pub current_time: Option<i64>,
}

impl VerificationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require_key_binding(mut self, required: bool) -> Self {
        self.require_key_binding = required;
        self
    }

    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn nonce(mut self, nonce: impl Into<String>) -> Self {
        self.nonce = Some(nonce.into());
        self
    }

    pub fn max_key_binding_age(mut self, max_age: Duration) -> Self {
        self.max_key_binding_age = Some(max_age);
        self
    }

    pub fn clock_skew(mut self, skew: Duration) -> Self {
        self.clock_skew = skew;
        self
    }

    pub fn at_time(mut self, timestamp: i64) -> Self {
        self.current_time = Some(timestamp);
        self
    }

    pub(crate) fn now(&self) -> i64 {
        self.current_time.unwrap_or_else(unix_timestamp)
    }

    /// `clock_skew` in whole seconds, saturated to `i64::MAX`.
    pub(crate) fn clock_skew_secs(&self) -> i64 {
        saturating_secs(self.clock_skew)
    }
}

pub(crate) fn saturating_secs(duration: Duration) -> i64 {
    i64::try_from(duration.as_secs()).unwrap_or(i64::MAX)
}

/// Outcome of a successful verification.
#[derive(Debug, Clone, PartialEq)]
pub struct VerifiedSdJwt {
    /// The payload with every presented disclosure applied.
    pub full_payload: Map<String, Json>,
    /// Claims of the verified KB-JWT, `None` when key binding was skipped.
    pub key_binding: Option<KeyBindingClaims>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VerificationState {
    Parsed,
    SignatureVerified,
    PayloadReconstructed,
    KeyBindingVerified,
    KeyBindingSkipped,
    Accepted,
}

impl VerificationState {
    fn advance(self, next: Self) -> Self {
        debug!("SD-JWT verification: {self:?} -> {next:?}");
        next
    }
}

impl SdJwt {
    /// Parses a serialized SD-JWT or SD-JWT presentation.
    ///
    /// The last segment is taken as a KB-JWT when it is itself a JWT; a
    /// trailing `~` marks a presentation without key binding.
    pub fn parse(sd_jwt: &str) -> Result<Self> {
        let mut segments = sd_jwt.split(SEPARATOR);
        let jwt = segments.next().unwrap_or_default();
        let mut segments: Vec<&str> = segments.collect();

        let trailing_separator = segments.last() == Some(&"");
        if trailing_separator {
            segments.pop();
        }

        let key_binding_jwt = match segments.last() {
            Some(last) if !trailing_separator && last.split('.').count() == 3 => {
                let kb = KeyBindingJwt::parse(last)?;
                segments.pop();
                Some(kb)
            }
            _ => None,
        };

        if segments.iter().any(|s| s.is_empty()) {
            return Err(Error::MalformedCompactEncoding(
                "empty disclosure segment".into(),
            ));
        }

        let jws = CompactJws::parse(jwt)
            .map_err(|e| Error::MalformedCompactEncoding(format!("{e:#}")))?;
        let sd_payload = SdPayload::parse(jws.payload().clone(), &segments)?;

        debug!(
            "parsed SD-JWT with {} disclosures (key binding: {})",
            segments.len(),
            key_binding_jwt.is_some()
        );

        Ok(Self {
            jws,
            sd_payload,
            key_binding_jwt,
            is_presentation: trailing_separator,
        })
    }

    /// Whether `sd_jwt` parses as an SD-JWT.
    pub fn is_sd_jwt(sd_jwt: &str) -> bool {
        Self::parse(sd_jwt).is_ok()
    }

    /// Signs the undisclosed payload of `sd_payload` as the issuer.
    pub async fn sign(
        sd_payload: SdPayload,
        signer: &dyn Signer,
        key_id: Option<&str>,
    ) -> Result<Self> {
        let mut header = Map::new();
        if let Some(kid) = key_id {
            header.insert("kid".to_owned(), kid.into());
        }
        Self::sign_with_header(sd_payload, signer, header).await
    }

    /// Signs with additional JWT header parameters, e.g. `typ` or `x5c`.
    /// The `alg` header always comes from the signer.
    pub async fn sign_with_header(
        sd_payload: SdPayload,
        signer: &dyn Signer,
        header: Map<String, Json>,
    ) -> Result<Self> {
        let jws = CompactJws::sign(header, sd_payload.undisclosed_payload().clone(), signer).await?;
        debug!(
            "issued SD-JWT with {} disclosures",
            sd_payload.disclosures().len()
        );
        Ok(Self {
            jws,
            sd_payload,
            key_binding_jwt: None,
            is_presentation: false,
        })
    }

    /// The issuer-signed JWT.
    pub fn jwt(&self) -> &str {
        self.jws.as_str()
    }

    pub fn header(&self) -> &Map<String, Json> {
        self.jws.header()
    }

    pub fn alg(&self) -> Option<&str> {
        self.jws.alg()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.jws.header_str("kid")
    }

    pub fn typ(&self) -> Option<&str> {
        self.jws.header_str("typ")
    }

    /// The `x5c` certificate chain header, as base64 DER strings.
    pub fn x5c(&self) -> Option<Vec<&str>> {
        self.header()
            .get("x5c")
            .and_then(Json::as_array)
            .map(|chain| chain.iter().filter_map(Json::as_str).collect())
    }

    pub fn sd_payload(&self) -> &SdPayload {
        &self.sd_payload
    }

    pub fn undisclosed_payload(&self) -> &Map<String, Json> {
        self.sd_payload.undisclosed_payload()
    }

    pub fn disclosures(&self) -> &[Disclosure] {
        self.sd_payload.disclosures()
    }

    pub fn sd_alg(&self) -> SdAlg {
        self.sd_payload.sd_alg()
    }

    /// The payload with the available disclosures applied. Does not verify
    /// anything.
    pub fn full_payload(&self) -> Result<Map<String, Json>> {
        self.sd_payload.full_payload()
    }

    pub fn sd_map(&self) -> SdMap {
        self.sd_payload.sd_map()
    }

    pub fn key_binding_jwt(&self) -> Option<&KeyBindingJwt> {
        self.key_binding_jwt.as_ref()
    }

    pub fn is_presentation(&self) -> bool {
        self.is_presentation || self.key_binding_jwt.is_some()
    }

    /// The input of the KB-JWT `sd_hash`: `<jwt>~<disclosure>~...~`.
    pub fn presentation_prefix(&self) -> String {
        let mut prefix = self.jws.as_str().to_owned();
        for disclosure in self.disclosures() {
            prefix.push(SEPARATOR);
            prefix.push_str(disclosure.encoded());
        }
        prefix.push(SEPARATOR);
        prefix
    }

    /// A presentation revealing the claims selected by `selection`, or none
    /// at all. Any KB-JWT attached to `self` is dropped, since it would not
    /// match the new set of disclosures.
    pub fn present(&self, selection: Option<&SdMap>) -> Self {
        let sd_payload = match selection {
            Some(selection) => self.sd_payload.select(selection),
            None => self.sd_payload.select_all(false),
        };
        Self {
            jws: self.jws.clone(),
            sd_payload,
            key_binding_jwt: None,
            is_presentation: true,
        }
    }

    pub fn present_all(&self, disclose_all: bool) -> Self {
        Self {
            jws: self.jws.clone(),
            sd_payload: self.sd_payload.select_all(disclose_all),
            key_binding_jwt: None,
            is_presentation: true,
        }
    }

    /// A presentation revealing the claims at the given dotted paths, and
    /// whatever encloses them.
    pub fn present_paths<S: AsRef<str>>(&self, paths: &[S]) -> Self {
        self.present(Some(&SdMap::selection_from_paths(paths)))
    }

    /// A presentation bound to `audience` and `nonce` by a KB-JWT signed
    /// with the holder key.
    pub async fn present_with_key_binding(
        &self,
        selection: Option<&SdMap>,
        audience: impl Into<String>,
        nonce: impl Into<String>,
        holder: &dyn Signer,
    ) -> Result<Self> {
        let presentation = self.present(selection);
        let kb = KeyBindingJwt::sign(
            &presentation.presentation_prefix(),
            self.sd_alg(),
            audience,
            nonce,
            holder,
        )
        .await?;
        Ok(presentation.with_key_binding_jwt(kb))
    }

    /// Attaches a KB-JWT produced elsewhere.
    pub fn with_key_binding_jwt(mut self, kb: KeyBindingJwt) -> Self {
        self.key_binding_jwt = Some(kb);
        self
    }

    /// Verifies the presentation, taking the holder key from `cnf.jwk`.
    ///
    /// Acceptance is all or nothing: the issuer signature, every presented
    /// disclosure, and the KB-JWT (whenever present, or when required) must
    /// all check out.
    pub async fn verify(
        &self,
        issuer: &dyn Verifier,
        options: &VerificationOptions,
    ) -> Result<VerifiedSdJwt> {
        self.verify_inner(issuer, None, options).await
    }

    /// Like [`SdJwt::verify`], with the holder key supplied by the caller,
    /// e.g. after resolving a `cnf.kid`.
    pub async fn verify_with_holder_verifier(
        &self,
        issuer: &dyn Verifier,
        holder: &dyn Verifier,
        options: &VerificationOptions,
    ) -> Result<VerifiedSdJwt> {
        self.verify_inner(issuer, Some(holder), options).await
    }

    async fn verify_inner(
        &self,
        issuer: &dyn Verifier,
        holder: Option<&dyn Verifier>,
        options: &VerificationOptions,
    ) -> Result<VerifiedSdJwt> {
        let mut state = VerificationState::Parsed;

        if let Err(e) = self.jws.verify(issuer).await {
            warn!("issuer signature rejected: {e:#}");
            return Err(Error::SignatureInvalid);
        }
        state = state.advance(VerificationState::SignatureVerified);

        let full_payload = self.sd_payload.verify_disclosures()?;
        state = state.advance(VerificationState::PayloadReconstructed);

        let key_binding = match &self.key_binding_jwt {
            None if options.require_key_binding => {
                warn!("key binding required but no KB-JWT was presented");
                return Err(Error::MissingKeyBinding);
            }
            None => {
                state = state.advance(VerificationState::KeyBindingSkipped);
                None
            }
            Some(kb) => {
                let prefix = self.presentation_prefix();
                match holder {
                    Some(holder) => kb.verify(&prefix, self.sd_alg(), holder, options).await?,
                    None => {
                        let holder = holder_verifier(&full_payload)?;
                        kb.verify(&prefix, self.sd_alg(), &holder, options).await?
                    }
                }
                state = state.advance(VerificationState::KeyBindingVerified);
                Some(kb.claims().clone())
            }
        };

        state.advance(VerificationState::Accepted);

        Ok(VerifiedSdJwt {
            full_payload,
            key_binding,
        })
    }
}

/// The holder key in `cnf.jwk`.
pub(crate) fn holder_jwk(payload: &Map<String, Json>) -> Option<&Map<String, Json>> {
    payload.get("cnf")?.get("jwk")?.as_object()
}

fn holder_verifier(payload: &Map<String, Json>) -> Result<P256Verifier> {
    let jwk = holder_jwk(payload).ok_or(Error::MissingHolderKey)?;
    P256Verifier::from_jwk(jwk).map_err(|e| {
        warn!("unusable holder key: {e:#}");
        Error::KeyBindingSignatureInvalid
    })
}

impl fmt::Display for SdJwt {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.jws.as_str())?;
        for disclosure in self.disclosures() {
            write!(f, "{SEPARATOR}{disclosure}")?;
        }
        match &self.key_binding_jwt {
            Some(kb) => write!(f, "{SEPARATOR}{kb}"),
            None if self.is_presentation => write!(f, "{SEPARATOR}"),
            None => Ok(()),
        }
    }
}

impl std::str::FromStr for SdJwt {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
