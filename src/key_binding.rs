use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    digest::SdAlg,
    error::{Error, Result},
    jws::{CompactJws, Signer, Verifier},
    sd_jwt::{saturating_secs, VerificationOptions},
    utils::unix_timestamp,
};

/// `typ` header of a Key Binding JWT.
pub const KB_JWT_TYP: &str = "kb+jwt";

/// Claims of a Key Binding JWT.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KeyBindingClaims {
    /// Issuance time. Required when issuing; only enforced on verification
    /// when a maximum age is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub iat: Option<i64>,
    pub aud: String,
    pub nonce: String,
    /// Digest of the presentation this KB-JWT is bound to, computed with the
    /// SD-JWT's `_sd_alg`.
    pub sd_hash: String,
    #[serde(flatten)]
    pub additional: Map<String, Json>,
}

/// Holder-signed JWT proving possession of the key the credential is bound
/// to, for one specific presentation.
#[derive(Debug, Clone, PartialEq)]
pub struct KeyBindingJwt {
    jws: CompactJws,
    claims: KeyBindingClaims,
}

impl KeyBindingJwt {
    /// Signs a KB-JWT over `presentation`, the SD-JWT serialized as
    /// `<jwt>~<disclosure>~...~` with the disclosures being presented.
    pub async fn sign(
        presentation: &str,
        sd_alg: SdAlg,
        audience: impl Into<String>,
        nonce: impl Into<String>,
        signer: &dyn Signer,
    ) -> Result<Self> {
        let claims = KeyBindingClaims {
            iat: Some(unix_timestamp()),
            aud: audience.into(),
            nonce: nonce.into(),
            sd_hash: sd_alg.digest(presentation),
            additional: Map::new(),
        };
        Self::sign_claims(claims, signer).await
    }

    pub async fn sign_claims(claims: KeyBindingClaims, signer: &dyn Signer) -> Result<Self> {
        let mut header = Map::new();
        header.insert("typ".to_owned(), KB_JWT_TYP.into());

        let Json::Object(payload) = serde_json::to_value(&claims)? else {
            return Err(Error::MalformedKeyBindingJwt(
                "claims do not serialize to a JSON object".into(),
            ));
        };

        let jws = CompactJws::sign(header, payload, signer).await?;
        Ok(Self { jws, claims })
    }

    pub fn parse(compact: &str) -> Result<Self> {
        let jws = CompactJws::parse(compact)
            .map_err(|e| Error::MalformedKeyBindingJwt(format!("{e:#}")))?;

        match jws.header_str("typ") {
            Some(KB_JWT_TYP) => {}
            other => {
                return Err(Error::MalformedKeyBindingJwt(format!(
                    "expected `typ` to be `{KB_JWT_TYP}`, found {other:?}"
                )))
            }
        }

        let claims = serde_json::from_value(Json::Object(jws.payload().clone()))
            .map_err(|e| Error::MalformedKeyBindingJwt(e.to_string()))?;

        Ok(Self { jws, claims })
    }

    pub fn claims(&self) -> &KeyBindingClaims {
        &self.claims
    }

    pub fn header(&self) -> &Map<String, Json> {
        self.jws.header()
    }

    pub fn audience(&self) -> &str {
        &self.claims.aud
    }

    pub fn nonce(&self) -> &str {
        &self.claims.nonce
    }

    pub fn issued_at(&self) -> Option<i64> {
        self.claims.iat
    }

    pub fn sd_hash(&self) -> &str {
        &self.claims.sd_hash
    }

    /// Verifies this KB-JWT for `presentation` (serialized as for
    /// [`KeyBindingJwt::sign`]).
    ///
    /// Checks run in order: `sd_hash`, signature against the holder key,
    /// then audience, nonce and freshness as far as `options` asks for them.
    pub async fn verify(
        &self,
        presentation: &str,
        sd_alg: SdAlg,
        holder: &dyn Verifier,
        options: &VerificationOptions,
    ) -> Result<()> {
        if sd_alg.digest(presentation) != self.claims.sd_hash {
            warn!("key binding JWT is bound to a different presentation");
            return Err(Error::KeyBindingHashMismatch);
        }

        if let Err(e) = self.jws.verify(holder).await {
            debug!("key binding JWT signature rejected: {e:#}");
            return Err(Error::KeyBindingSignatureInvalid);
        }

        if let Some(expected) = &options.audience {
            if *expected != self.claims.aud {
                return Err(Error::KeyBindingAudienceMismatch {
                    expected: expected.clone(),
                    found: self.claims.aud.clone(),
                });
            }
        }

        if let Some(expected) = &options.nonce {
            if *expected != self.claims.nonce {
                return Err(Error::KeyBindingNonceMismatch);
            }
        }

        if let Some(max_age) = options.max_key_binding_age {
            let now = options.now();
            let skew = options.clock_skew_secs();
            let max_age = saturating_secs(max_age).saturating_add(skew);
            let Some(iat) = self.claims.iat else {
                return Err(Error::KeyBindingExpired);
            };
            let in_future = iat > now.saturating_add(skew);
            // An age that does not fit in an i64 is too old for any bound.
            let too_old = now.checked_sub(iat).map_or(true, |age| age > max_age);
            if in_future || too_old {
                warn!("key binding JWT issued at {iat} is not fresh at {now}");
                return Err(Error::KeyBindingExpired);
            }
        }

        Ok(())
    }
}

impl std::fmt::Display for KeyBindingJwt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.jws.as_str())
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use base64::prelude::*;
    use p256::ecdsa::{SigningKey, VerifyingKey};
    use rand::rngs::OsRng;
    use serde_json::json;

    use super::*;
    use crate::jws::{P256Signer, P256Verifier};

    const PRESENTATION: &str = "eyJhbGciOiJFUzI1NiJ9.e30.c2ln~WyJzYWx0IiwgImEiLCAxXQ~";

    fn holder() -> (P256Signer, P256Verifier) {
        let key = SigningKey::random(&mut OsRng);
        let verifier = P256Verifier::from(VerifyingKey::from(&key));
        (P256Signer::new(key).unwrap(), verifier)
    }

    #[tokio::test]
    async fn sign_parse_verify() {
        let (signer, verifier) = holder();
        let kb = KeyBindingJwt::sign(
            PRESENTATION,
            SdAlg::Sha256,
            "https://verifier.example.org",
            "1234567890",
            &signer,
        )
        .await
        .unwrap();

        let parsed = KeyBindingJwt::parse(&kb.to_string()).unwrap();
        assert_eq!(parsed, kb);
        assert_eq!(parsed.header()["typ"], json!("kb+jwt"));
        assert_eq!(parsed.header()["alg"], json!("ES256"));
        assert_eq!(parsed.sd_hash(), SdAlg::Sha256.digest(PRESENTATION));

        let options = VerificationOptions::new()
            .audience("https://verifier.example.org")
            .nonce("1234567890")
            .max_key_binding_age(Duration::from_secs(60));
        parsed
            .verify(PRESENTATION, SdAlg::Sha256, &verifier, &options)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn verification_failures() {
        let (signer, verifier) = holder();
        let (_, other_verifier) = holder();
        let kb = KeyBindingJwt::sign_claims(
            KeyBindingClaims {
                iat: Some(1_000),
                aud: "aud".into(),
                nonce: "nonce".into(),
                sd_hash: SdAlg::Sha256.digest(PRESENTATION),
                additional: Map::new(),
            },
            &signer,
        )
        .await
        .unwrap();
        let lenient = VerificationOptions::new();

        assert!(matches!(
            kb.verify("other~", SdAlg::Sha256, &verifier, &lenient).await,
            Err(Error::KeyBindingHashMismatch)
        ));
        assert!(matches!(
            kb.verify(PRESENTATION, SdAlg::Sha384, &verifier, &lenient).await,
            Err(Error::KeyBindingHashMismatch)
        ));
        assert!(matches!(
            kb.verify(PRESENTATION, SdAlg::Sha256, &other_verifier, &lenient).await,
            Err(Error::KeyBindingSignatureInvalid)
        ));
        let audience = VerificationOptions::new().audience("x");
        assert!(matches!(
            kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &audience).await,
            Err(Error::KeyBindingAudienceMismatch { expected, found })
                if expected == "x" && found == "aud"
        ));
        let nonce = VerificationOptions::new().nonce("x");
        assert!(matches!(
            kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &nonce).await,
            Err(Error::KeyBindingNonceMismatch)
        ));

        let fresh = |now| {
            VerificationOptions::new()
                .max_key_binding_age(Duration::from_secs(300))
                .clock_skew(Duration::from_secs(30))
                .at_time(now)
        };
        for now in [1_000, 1_300, 1_330, 970] {
            kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &fresh(now))
                .await
                .unwrap();
        }
        for now in [1_331, 969] {
            assert!(matches!(
                kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &fresh(now)).await,
                Err(Error::KeyBindingExpired)
            ));
        }
    }

    #[tokio::test]
    async fn freshness_with_extreme_times() {
        async fn sign(iat: i64, signer: &P256Signer) -> KeyBindingJwt {
            let claims = KeyBindingClaims {
                iat: Some(iat),
                aud: "aud".into(),
                nonce: "nonce".into(),
                sd_hash: SdAlg::Sha256.digest(PRESENTATION),
                additional: Map::new(),
            };
            KeyBindingJwt::sign_claims(claims, signer).await.unwrap()
        }
        let (signer, verifier) = holder();
        let bounded = VerificationOptions::new()
            .max_key_binding_age(Duration::from_secs(300))
            .at_time(2_000);
        let unbounded = VerificationOptions::new()
            .max_key_binding_age(Duration::from_secs(u64::MAX))
            .clock_skew(Duration::from_secs(u64::MAX))
            .at_time(2_000);

        for iat in [i64::MIN, i64::MAX] {
            let kb = sign(iat, &signer).await;
            assert!(matches!(
                kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &bounded).await,
                Err(Error::KeyBindingExpired)
            ));
        }

        let kb = sign(1_000, &signer).await;
        kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &unbounded)
            .await
            .unwrap();
        let kb = sign(i64::MIN, &signer).await;
        assert!(matches!(
            kb.verify(PRESENTATION, SdAlg::Sha256, &verifier, &unbounded).await,
            Err(Error::KeyBindingExpired)
        ));
    }

    #[test]
    fn parse_failures() {
        let header = BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256","typ":"kb+jwt"}"#);
        let encode = |v: Json| BASE64_URL_SAFE_NO_PAD.encode(v.to_string());

        for payload in [
            json!({ "iat": 1, "aud": "a", "nonce": "n" }),
            json!({ "iat": 1, "aud": "a", "sd_hash": "h" }),
            json!({ "iat": 1, "nonce": "n", "sd_hash": "h" }),
        ] {
            let compact = format!("{header}.{}.c2ln", encode(payload));
            assert!(matches!(
                KeyBindingJwt::parse(&compact),
                Err(Error::MalformedKeyBindingJwt(_))
            ));
        }

        let claims = encode(json!({ "aud": "a", "nonce": "n", "sd_hash": "h" }));
        assert!(KeyBindingJwt::parse(&format!("{header}.{claims}.c2ln")).is_ok());
        assert!(matches!(
            KeyBindingJwt::parse(&format!("{header}.{claims}")),
            Err(Error::MalformedKeyBindingJwt(_))
        ));

        let jwt_header = BASE64_URL_SAFE_NO_PAD.encode(r#"{"alg":"ES256","typ":"JWT"}"#);
        assert!(matches!(
            KeyBindingJwt::parse(&format!("{jwt_header}.{claims}.c2ln")),
            Err(Error::MalformedKeyBindingJwt(_))
        ));
    }
}
