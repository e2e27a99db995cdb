use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::prelude::*;
use p256::ecdsa::{
    signature::{Signer as _, Verifier as _},
    Signature, SigningKey, VerifyingKey,
};
use serde_json::{Map, Value as Json};

use crate::error::Error;

/// Signing capability of an issuer or holder.
#[async_trait]
pub trait Signer: Send + Sync {
    /// The JWS algorithm that will be used to sign.
    fn alg(&self) -> &str;
    /// The public JWK of the signer, if it has one to share.
    fn jwk(&self) -> Option<&Map<String, Json>> {
        None
    }
    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Signature verification capability for issuer or holder keys.
#[async_trait]
pub trait Verifier: Send + Sync {
    /// Verify `signature` over `payload`, as produced with the JWS algorithm
    /// `alg` taken from the JWT header.
    async fn verify(&self, alg: &str, payload: &[u8], signature: &[u8]) -> Result<()>;
}

#[derive(Debug)]
pub struct P256Signer {
    key: SigningKey,
    jwk: Map<String, Json>,
}

impl P256Signer {
    pub fn new(key: SigningKey) -> Result<Self> {
        let pk: p256::PublicKey = key.verifying_key().into();
        let jwk = serde_json::from_str(&pk.to_jwk_string())?;
        Ok(Self { key, jwk })
    }
}

#[async_trait]
impl Signer for P256Signer {
    fn alg(&self) -> &str {
        "ES256"
    }

    fn jwk(&self) -> Option<&Map<String, Json>> {
        Some(&self.jwk)
    }

    async fn sign(&self, payload: &[u8]) -> Result<Vec<u8>> {
        let sig: Signature = self.key.sign(payload);
        Ok(sig.to_bytes().to_vec())
    }
}

#[derive(Debug, Clone)]
pub struct P256Verifier(VerifyingKey);

impl P256Verifier {
    /// Construct a [P256Verifier] from a public JWK, e.g. the `cnf.jwk` of a
    /// credential.
    pub fn from_jwk(jwk: &Map<String, Json>) -> Result<Self> {
        if jwk.get("kty").and_then(Json::as_str) != Some("EC")
            || jwk.get("crv").and_then(Json::as_str) != Some("P-256")
        {
            bail!("P256Verifier requires an EC P-256 JWK")
        }
        let pk = p256::PublicKey::from_jwk_str(&Json::Object(jwk.clone()).to_string())
            .context("JWK is not a valid P-256 public key")?;
        Ok(Self(VerifyingKey::from(pk)))
    }
}

impl From<VerifyingKey> for P256Verifier {
    fn from(key: VerifyingKey) -> Self {
        Self(key)
    }
}

#[async_trait]
impl Verifier for P256Verifier {
    async fn verify(&self, alg: &str, payload: &[u8], signature: &[u8]) -> Result<()> {
        if alg != "ES256" {
            bail!("P256Verifier cannot verify JWTs signed with '{alg}'")
        }
        let signature = Signature::from_slice(signature)?;
        self.0.verify(payload, &signature).map_err(anyhow::Error::from)
    }
}

/// A JWS in compact serialization, with its header and payload decoded.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct CompactJws {
    compact: String,
    header: Map<String, Json>,
    payload: Map<String, Json>,
    signature: Vec<u8>,
}

impl CompactJws {
    pub fn parse(compact: &str) -> Result<Self> {
        let mut parts = compact.split('.');
        let (Some(header), Some(payload), Some(signature), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            bail!("JWT must consist of 3 '.'-separated parts")
        };

        let header = BASE64_URL_SAFE_NO_PAD
            .decode(header)
            .context("JWT header is not valid base64url")?;
        let header: Map<String, Json> =
            serde_json::from_slice(&header).context("JWT header is not a JSON object")?;

        let payload = BASE64_URL_SAFE_NO_PAD
            .decode(payload)
            .context("JWT payload is not valid base64url")?;
        let payload: Map<String, Json> =
            serde_json::from_slice(&payload).context("JWT payload is not a JSON object")?;

        let signature = BASE64_URL_SAFE_NO_PAD
            .decode(signature)
            .context("JWT signature is not valid base64url")?;

        Ok(Self {
            compact: compact.to_owned(),
            header,
            payload,
            signature,
        })
    }

    /// Serializes and signs `header` and `payload`. The header's `alg` is
    /// always taken from the signer.
    pub async fn sign(
        mut header: Map<String, Json>,
        payload: Map<String, Json>,
        signer: &dyn Signer,
    ) -> Result<Self, Error> {
        header.insert("alg".to_owned(), signer.alg().into());

        let signing_input = format!(
            "{}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&header)?),
            BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&payload)?)
        );
        let signature = signer
            .sign(signing_input.as_bytes())
            .await
            .map_err(Error::Signing)?;
        let compact = format!(
            "{signing_input}.{}",
            BASE64_URL_SAFE_NO_PAD.encode(&signature)
        );

        Ok(Self {
            compact,
            header,
            payload,
            signature,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.compact
    }

    pub fn header(&self) -> &Map<String, Json> {
        &self.header
    }

    pub fn payload(&self) -> &Map<String, Json> {
        &self.payload
    }

    pub fn header_str(&self, name: &str) -> Option<&str> {
        self.header.get(name).and_then(Json::as_str)
    }

    pub fn alg(&self) -> Option<&str> {
        self.header_str("alg")
    }

    fn signing_input(&self) -> &str {
        self.compact
            .rsplit_once('.')
            .map_or(self.compact.as_str(), |(input, _)| input)
    }

    /// Checks the signature with `verifier`, refusing unsecured JWTs.
    pub async fn verify(&self, verifier: &dyn Verifier) -> Result<()> {
        let Some(alg) = self.alg() else {
            bail!("JWT header does not contain an `alg`")
        };
        if alg.eq_ignore_ascii_case("none") {
            bail!("unsecured JWTs are not accepted")
        }
        verifier
            .verify(alg, self.signing_input().as_bytes(), &self.signature)
            .await
    }
}
