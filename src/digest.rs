use std::{fmt, str::FromStr};

use base64::prelude::*;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use sha2::{Digest, Sha256, Sha384, Sha512};

use crate::{error::Error, DIGEST_ALG_KEY};

const SHA_256: &str = "sha-256";
const SHA_384: &str = "sha-384";
const SHA_512: &str = "sha-512";

/// Number of random bytes in a disclosure salt (128 bits).
pub const SALT_LEN: usize = 16;

/// Hash function used to digest disclosures, as named by the `_sd_alg` claim
/// (IANA "Named Information Hash Algorithm" registry names).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum SdAlg {
    #[default]
    Sha256,
    Sha384,
    Sha512,
}

impl SdAlg {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sha256 => SHA_256,
            Self::Sha384 => SHA_384,
            Self::Sha512 => SHA_512,
        }
    }

    pub fn hash(&self, input: &[u8]) -> Vec<u8> {
        match self {
            Self::Sha256 => Sha256::digest(input).to_vec(),
            Self::Sha384 => Sha384::digest(input).to_vec(),
            Self::Sha512 => Sha512::digest(input).to_vec(),
        }
    }

    /// `base64url(hash(ascii(input)))`, unpadded.
    pub fn digest(&self, input: &str) -> String {
        BASE64_URL_SAFE_NO_PAD.encode(self.hash(input.as_bytes()))
    }

    /// Reads `_sd_alg` from a JWT payload, falling back to sha-256 when the
    /// claim is absent.
    pub fn from_payload(payload: &Map<String, Json>) -> Result<Self, Error> {
        match payload.get(DIGEST_ALG_KEY) {
            None => Ok(Self::default()),
            Some(Json::String(alg)) => alg.parse(),
            Some(other) => Err(Error::UnsupportedDigestAlgorithm(other.to_string())),
        }
    }

    /// A digest over fresh random bytes, indistinguishable from a real
    /// disclosure digest.
    pub fn decoy_digest(&self) -> String {
        self.digest(&generate_salt())
    }
}

impl fmt::Display for SdAlg {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SdAlg {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            SHA_256 => Ok(Self::Sha256),
            SHA_384 => Ok(Self::Sha384),
            SHA_512 => Ok(Self::Sha512),
            other => Err(Error::UnsupportedDigestAlgorithm(other.to_owned())),
        }
    }
}

impl TryFrom<String> for SdAlg {
    type Error = Error;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<SdAlg> for String {
    fn from(alg: SdAlg) -> String {
        alg.as_str().to_owned()
    }
}

/// 128 bits from the thread-local CSPRNG, base64url encoded.
pub fn generate_salt() -> String {
    let mut bytes = [0u8; SALT_LEN];
    rand::thread_rng().fill_bytes(&mut bytes);
    BASE64_URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn known_digest() {
        // IETF SD-JWT example disclosure:
        // ["_26bc4LT-ac6q2KI6cBW5es", "family_name", "Möbius"]
        let disclosure = "WyJfMjZiYzRMVC1hYzZxMktJNmNCVzVlcyIsICJmYW1pbHlfbmFtZSIsICJNw7ZiaXVzIl0";
        assert_eq!(
            SdAlg::Sha256.digest(disclosure),
            "X9yH0Ajrdm1Oij4tWso9UzzKJvPoDxwmuEcO3XAdRC0"
        );
    }

    #[test]
    fn digest_lengths() {
        assert_eq!(SdAlg::Sha256.digest("x").len(), 43);
        assert_eq!(SdAlg::Sha384.digest("x").len(), 64);
        assert_eq!(SdAlg::Sha512.digest("x").len(), 86);
    }

    #[test]
    fn algorithm_names() {
        for alg in [SdAlg::Sha256, SdAlg::Sha384, SdAlg::Sha512] {
            assert_eq!(alg.as_str().parse::<SdAlg>().unwrap(), alg);
        }
        assert!(matches!(
            "md5".parse::<SdAlg>(),
            Err(Error::UnsupportedDigestAlgorithm(alg)) if alg == "md5"
        ));
    }

    #[test]
    fn payload_algorithm() {
        let payload = |v: Json| v.as_object().cloned().unwrap();
        assert_eq!(
            SdAlg::from_payload(&payload(json!({}))).unwrap(),
            SdAlg::Sha256
        );
        assert_eq!(
            SdAlg::from_payload(&payload(json!({ "_sd_alg": "sha-512" }))).unwrap(),
            SdAlg::Sha512
        );
        assert!(matches!(
            SdAlg::from_payload(&payload(json!({ "_sd_alg": 256 }))),
            Err(Error::UnsupportedDigestAlgorithm(_))
        ));
        assert!(matches!(
            SdAlg::from_payload(&payload(json!({ "_sd_alg": "sha3-256" }))),
            Err(Error::UnsupportedDigestAlgorithm(_))
        ));
    }

    #[test]
    fn salts_are_random() {
        let a = generate_salt();
        let b = generate_salt();
        assert_eq!(a.len(), 22);
        assert_ne!(a, b);
    }
}
