use anyhow::Result;
use async_trait::async_trait;
use p256::ecdsa::{SigningKey, VerifyingKey};
use rand::rngs::OsRng;
use sd_jwt::{P256Signer, P256Verifier, Verifier};
use serde_json::{Map, Value as Json};

pub struct KeyPair {
    pub signer: P256Signer,
    pub verifier: P256Verifier,
}

impl KeyPair {
    pub fn random() -> Self {
        let key = SigningKey::random(&mut OsRng);
        let verifier = P256Verifier::from(VerifyingKey::from(&key));
        let signer = P256Signer::new(key).unwrap();
        Self { signer, verifier }
    }

    /// The public JWK, as placed in `cnf.jwk`.
    pub fn jwk(&self) -> Map<String, Json> {
        use sd_jwt::Signer;
        self.signer.jwk().cloned().unwrap()
    }
}

/// Accepts any signature, for vectors whose issuer key is not published.
pub struct AcceptAll;

#[async_trait]
impl Verifier for AcceptAll {
    async fn verify(&self, _alg: &str, _payload: &[u8], _signature: &[u8]) -> Result<()> {
        Ok(())
    }
}
