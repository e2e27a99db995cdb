//! SD-JWT based Verifiable Credentials (SD-JWT VC).
//!
//! An SD-JWT VC is an SD-JWT whose always-visible payload carries the
//! credential's issuer (`iss`), type (`vct`), validity window (`nbf`, `exp`),
//! status and holder binding (`cnf`).

use std::ops::Deref;

use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    disclosure::Disclosure,
    error::{Error, Result},
    jws::{Signer, Verifier},
    sd_jwt::{holder_jwk, SdJwt, VerificationOptions, VerifiedSdJwt},
    sd_payload::SdPayload,
    DIGESTS_KEY,
};

pub mod type_metadata;

/// `typ` header of SD-JWT VCs.
pub const SD_JWT_VC_TYP: &str = "vc+sd-jwt";
/// `typ` header introduced by later SD-JWT VC drafts, accepted on
/// verification.
pub const DC_SD_JWT_TYP: &str = "dc+sd-jwt";

/// Top-level claims that must stay in the always-visible part of the payload.
pub const NON_DISCLOSABLE_CLAIMS: [&str; 6] = ["iss", "nbf", "exp", "cnf", "vct", "status"];

/// How the credential is bound to its holder, as found in `cnf`.
#[derive(Debug, Clone, PartialEq)]
pub enum HolderBinding {
    /// `cnf.kid`: a DID (URL) identifying the holder key.
    Did(String),
    /// `cnf.jwk`: the holder public key itself.
    Jwk(Map<String, Json>),
}

impl HolderBinding {
    fn to_cnf(&self) -> Json {
        let mut cnf = Map::new();
        match self {
            Self::Did(did) => cnf.insert("kid".to_owned(), did.clone().into()),
            Self::Jwk(jwk) => cnf.insert("jwk".to_owned(), Json::Object(jwk.clone())),
        };
        Json::Object(cnf)
    }
}

/// The always-visible claims an issuer adds to an SD-JWT VC.
#[derive(Debug, Clone, PartialEq)]
pub struct SdJwtVcClaims {
    pub issuer: String,
    pub vct: String,
    pub holder: HolderBinding,
    pub not_before: Option<i64>,
    pub expiration: Option<i64>,
    pub status: Option<Json>,
    pub subject: Option<String>,
}

impl SdJwtVcClaims {
    pub fn new(issuer: impl Into<String>, vct: impl Into<String>, holder: HolderBinding) -> Self {
        Self {
            issuer: issuer.into(),
            vct: vct.into(),
            holder,
            not_before: None,
            expiration: None,
            status: None,
            subject: None,
        }
    }

    pub fn not_before(mut self, nbf: i64) -> Self {
        self.not_before = Some(nbf);
        self
    }

    pub fn expiration(mut self, exp: i64) -> Self {
        self.expiration = Some(exp);
        self
    }

    pub fn status(mut self, status: Json) -> Self {
        self.status = Some(status);
        self
    }

    pub fn subject(mut self, sub: impl Into<String>) -> Self {
        self.subject = Some(sub.into());
        self
    }

    fn into_payload(self) -> Map<String, Json> {
        let mut payload = Map::new();
        payload.insert("iss".to_owned(), self.issuer.into());
        payload.insert("cnf".to_owned(), self.holder.to_cnf());
        payload.insert("vct".to_owned(), self.vct.into());
        if let Some(nbf) = self.not_before {
            payload.insert("nbf".to_owned(), nbf.into());
        }
        if let Some(exp) = self.expiration {
            payload.insert("exp".to_owned(), exp.into());
        }
        if let Some(status) = self.status {
            payload.insert("status".to_owned(), status);
        }
        if let Some(sub) = self.subject {
            payload.insert("sub".to_owned(), sub.into());
        }
        payload
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct SdJwtVc(SdJwt);

impl SdJwtVc {
    pub fn parse(sd_jwt_vc: &str) -> Result<Self> {
        SdJwt::parse(sd_jwt_vc).map(Self)
    }

    /// Whether `token` is an SD-JWT VC presentation, i.e. ends with `~` or a
    /// KB-JWT. Issued credentials serialize without the trailing `~`.
    pub fn is_sd_jwt_vc_presentation(token: &str) -> bool {
        Self::parse(token).is_ok_and(|vc| vc.is_presentation())
    }

    /// Issues an SD-JWT VC: `claims` are added to the always-visible part of
    /// `sd_payload` and the result is signed with `typ: vc+sd-jwt`.
    pub async fn sign(
        sd_payload: SdPayload,
        claims: SdJwtVcClaims,
        signer: &dyn Signer,
        key_id: Option<&str>,
    ) -> Result<Self> {
        Self::sign_with_header(sd_payload, claims, signer, key_id, Map::new()).await
    }

    /// Like [`SdJwtVc::sign`], with additional JWT header parameters.
    pub async fn sign_with_header(
        sd_payload: SdPayload,
        claims: SdJwtVcClaims,
        signer: &dyn Signer,
        key_id: Option<&str>,
        mut header: Map<String, Json>,
    ) -> Result<Self> {
        if claims.vct.is_empty() {
            return Err(Error::InvalidCredential("`vct` must not be empty".into()));
        }
        let sd_payload = sd_payload.with_claims(claims.into_payload())?;
        check_non_disclosable(&sd_payload)?;

        header.insert("typ".to_owned(), SD_JWT_VC_TYP.into());
        if let Some(kid) = key_id {
            header.insert("kid".to_owned(), kid.into());
        }

        SdJwt::sign_with_header(sd_payload, signer, header)
            .await
            .map(Self)
    }

    pub fn into_inner(self) -> SdJwt {
        self.0
    }

    fn claim(&self, name: &str) -> Option<&Json> {
        self.undisclosed_payload().get(name)
    }

    pub fn issuer(&self) -> Option<&str> {
        self.claim("iss").and_then(Json::as_str)
    }

    pub fn vct(&self) -> Option<&str> {
        self.claim("vct").and_then(Json::as_str)
    }

    pub fn not_before(&self) -> Option<i64> {
        self.claim("nbf").and_then(Json::as_i64)
    }

    pub fn expiration(&self) -> Option<i64> {
        self.claim("exp").and_then(Json::as_i64)
    }

    pub fn status(&self) -> Option<&Map<String, Json>> {
        self.claim("status").and_then(Json::as_object)
    }

    pub fn cnf(&self) -> Option<&Map<String, Json>> {
        self.claim("cnf").and_then(Json::as_object)
    }

    pub fn holder_did(&self) -> Option<&str> {
        self.cnf()?.get("kid")?.as_str()
    }

    pub fn holder_jwk(&self) -> Option<&Map<String, Json>> {
        holder_jwk(self.undisclosed_payload())
    }

    pub fn holder_binding(&self) -> Option<HolderBinding> {
        if let Some(did) = self.holder_did() {
            return Some(HolderBinding::Did(did.to_owned()));
        }
        self.holder_jwk().cloned().map(HolderBinding::Jwk)
    }

    /// Verifies the SD-JWT, then the credential itself.
    ///
    /// On top of [`SdJwt::verify`], this checks the `typ` header, rejects
    /// presented disclosures of [`NON_DISCLOSABLE_CLAIMS`], requires a
    /// non-empty always-visible `vct`, enforces `nbf` and `exp`, and requires
    /// key binding whenever the credential is bound to a holder key. A holder bound by
    /// DID can only be checked with a caller-resolved `holder` verifier.
    pub async fn verify_vc(
        &self,
        issuer: &dyn Verifier,
        holder: Option<&dyn Verifier>,
        options: &VerificationOptions,
    ) -> Result<VerifiedSdJwt> {
        match self.typ() {
            Some(SD_JWT_VC_TYP | DC_SD_JWT_TYP) => {}
            other => {
                return Err(Error::InvalidCredential(format!(
                    "unexpected `typ` header {other:?}"
                )))
            }
        }
        check_non_disclosable(self.sd_payload())?;
        match self.vct() {
            Some(vct) if !vct.is_empty() => {}
            _ => return Err(Error::InvalidCredential("missing `vct`".into())),
        }

        let mut options = options.clone();
        let binding = self.holder_binding();
        if binding.is_some() {
            options.require_key_binding = true;
        }

        let verified = match (holder, binding) {
            (Some(holder), _) => {
                self.0
                    .verify_with_holder_verifier(issuer, holder, &options)
                    .await?
            }
            (None, Some(HolderBinding::Did(did))) => {
                warn!("cannot verify key binding for holder DID without a resolved key");
                return Err(Error::UnsupportedHolderBinding(format!(
                    "holder DID `{did}` requires a resolved holder verifier"
                )));
            }
            (None, _) => self.0.verify(issuer, &options).await?,
        };

        let now = options.now();
        let skew = options.clock_skew_secs();
        if let Some(nbf) = self.not_before() {
            if now.saturating_add(skew) < nbf {
                return Err(Error::CredentialNotYetValid(nbf));
            }
        }
        if let Some(exp) = self.expiration() {
            if now.saturating_sub(skew) >= exp {
                return Err(Error::CredentialExpired(exp));
            }
        }

        debug!("accepted SD-JWT VC of type {:?}", self.vct());
        Ok(verified)
    }
}

/// Rejects disclosures hiding one of the [`NON_DISCLOSABLE_CLAIMS`] at the
/// top level of the payload.
fn check_non_disclosable(sd_payload: &SdPayload) -> Result<()> {
    let Some(Json::Array(digests)) = sd_payload.undisclosed_payload().get(DIGESTS_KEY) else {
        return Ok(());
    };
    let disclosures = sd_payload.digested_disclosures();
    for digest in digests.iter().filter_map(Json::as_str) {
        let key = disclosures.get(digest).copied().and_then(Disclosure::key);
        if let Some(key) = key.filter(|key| NON_DISCLOSABLE_CLAIMS.contains(key)) {
            warn!("SD-JWT VC discloses `{key}` selectively");
            return Err(Error::InvalidCredential(format!(
                "`{key}` must not be selectively disclosable"
            )));
        }
    }
    Ok(())
}

impl Deref for SdJwtVc {
    type Target = SdJwt;

    fn deref(&self) -> &SdJwt {
        &self.0
    }
}

impl From<SdJwt> for SdJwtVc {
    fn from(sd_jwt: SdJwt) -> Self {
        Self(sd_jwt)
    }
}

impl std::fmt::Display for SdJwtVc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Display::fmt(&self.0, f)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn claims_payload() {
        let payload = SdJwtVcClaims::new(
            "https://issuer.example",
            "https://credentials.example/identity_credential",
            HolderBinding::Did("did:key:z6Mk#z6Mk".into()),
        )
        .not_before(10)
        .expiration(20)
        .status(json!({ "status_list": { "idx": 0, "uri": "https://status.example/1" } }))
        .subject("alice")
        .into_payload();

        assert_eq!(
            Json::Object(payload),
            json!({
                "iss": "https://issuer.example",
                "cnf": { "kid": "did:key:z6Mk#z6Mk" },
                "vct": "https://credentials.example/identity_credential",
                "nbf": 10,
                "exp": 20,
                "status": { "status_list": { "idx": 0, "uri": "https://status.example/1" } },
                "sub": "alice"
            })
        );
    }

    #[test]
    fn jwk_binding() {
        let jwk = json!({ "kty": "EC", "crv": "P-256", "x": "x", "y": "y" })
            .as_object()
            .cloned()
            .unwrap();
        let payload =
            SdJwtVcClaims::new("iss", "vct", HolderBinding::Jwk(jwk.clone())).into_payload();

        assert_eq!(payload["cnf"], json!({ "jwk": jwk }));
        assert!(payload.get("nbf").is_none());
        assert!(payload.get("sub").is_none());
    }
}
