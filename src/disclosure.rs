use std::fmt;

use base64::prelude::*;
use serde_json::Value as Json;

use crate::{
    digest::{generate_salt, SdAlg},
    error::{Error, Result},
    ARRAY_DIGEST_KEY, DIGESTS_KEY,
};

/// A single selectively disclosable claim or array element.
///
/// The encoded form is kept verbatim: digests are always computed over the
/// exact string that was issued or received, never over a re-serialization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disclosure {
    encoded: String,
    digest: String,
    alg: SdAlg,
    salt: String,
    key: Option<String>,
    value: Json,
}

impl Disclosure {
    /// Creates a disclosure with a fresh random salt.
    ///
    /// A `key` makes it an object property disclosure (`[salt, key, value]`),
    /// none makes it an array element disclosure (`[salt, value]`).
    pub fn new(key: Option<String>, value: Json, alg: SdAlg) -> Result<Self> {
        Self::create(generate_salt(), key, value, alg)
    }

    /// Creates a disclosure with the given salt, eagerly computing its
    /// encoding and digest.
    pub fn create(salt: String, key: Option<String>, value: Json, alg: SdAlg) -> Result<Self> {
        if salt.is_empty() {
            return Err(Error::malformed_disclosure("salt must not be empty"));
        }
        if let Some(key) = &key {
            check_claim_name(key)?;
        }

        let array = match &key {
            Some(key) => Json::Array(vec![salt.clone().into(), key.clone().into(), value.clone()]),
            None => Json::Array(vec![salt.clone().into(), value.clone()]),
        };
        let encoded = BASE64_URL_SAFE_NO_PAD.encode(serde_json::to_vec(&array)?);
        let digest = alg.digest(&encoded);

        Ok(Self {
            encoded,
            digest,
            alg,
            salt,
            key,
            value,
        })
    }

    /// Decodes a disclosure as found in an SD-JWT serialization.
    pub fn decode(encoded: &str, alg: SdAlg) -> Result<Self> {
        let bytes = BASE64_URL_SAFE_NO_PAD
            .decode(encoded)
            .map_err(|e| Error::malformed_disclosure(format!("not valid base64url: {e}")))?;
        let json: Json = serde_json::from_slice(&bytes)
            .map_err(|e| Error::malformed_disclosure(format!("not valid JSON: {e}")))?;
        let Json::Array(mut elements) = json else {
            return Err(Error::malformed_disclosure("not a JSON array"));
        };

        let (salt, key, value) = match elements.len() {
            2 => {
                let value = elements.remove(1);
                (elements.remove(0), None, value)
            }
            3 => {
                let value = elements.remove(2);
                let Json::String(key) = elements.remove(1) else {
                    return Err(Error::malformed_disclosure("claim name is not a string"));
                };
                check_claim_name(&key)?;
                (elements.remove(0), Some(key), value)
            }
            n => {
                return Err(Error::malformed_disclosure(format!(
                    "expected 2 or 3 elements, found {n}"
                )))
            }
        };

        let salt = match salt {
            Json::String(salt) if !salt.is_empty() => salt,
            _ => return Err(Error::malformed_disclosure("salt is not a non-empty string")),
        };

        Ok(Self {
            encoded: encoded.to_owned(),
            digest: alg.digest(encoded),
            alg,
            salt,
            key,
            value,
        })
    }

    /// The base64url form that appears between `~` separators.
    pub fn encoded(&self) -> &str {
        &self.encoded
    }

    pub fn digest(&self) -> &str {
        &self.digest
    }

    pub fn alg(&self) -> SdAlg {
        self.alg
    }

    pub fn salt(&self) -> &str {
        &self.salt
    }

    /// The claim name, absent for array element disclosures.
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    pub fn value(&self) -> &Json {
        &self.value
    }

    pub fn is_array_element(&self) -> bool {
        self.key.is_none()
    }
}

impl fmt::Display for Disclosure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.encoded)
    }
}

fn check_claim_name(key: &str) -> Result<()> {
    if key == DIGESTS_KEY || key == ARRAY_DIGEST_KEY {
        return Err(Error::malformed_disclosure(format!(
            "`{key}` cannot be used as a claim name"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decode_property_disclosure() {
        let disclosure = Disclosure::decode(
            "WyJfMjZiYzRMVC1hYzZxMktJNmNCVzVlcyIsICJmYW1pbHlfbmFtZSIsICJNw7ZiaXVzIl0",
            SdAlg::Sha256,
        )
        .unwrap();

        assert_eq!(disclosure.salt(), "_26bc4LT-ac6q2KI6cBW5es");
        assert_eq!(disclosure.key(), Some("family_name"));
        assert_eq!(disclosure.value(), &json!("Möbius"));
        assert_eq!(
            disclosure.digest(),
            "X9yH0Ajrdm1Oij4tWso9UzzKJvPoDxwmuEcO3XAdRC0"
        );
    }

    #[test]
    fn decode_array_element_disclosure() {
        // ["lklxF5jMYlGTPUovMNIvCA", "FR"]
        let disclosure =
            Disclosure::decode("WyJsa2x4RjVqTVlsR1RQVW92TU5JdkNBIiwgIkZSIl0", SdAlg::Sha256)
                .unwrap();

        assert!(disclosure.is_array_element());
        assert_eq!(disclosure.value(), &json!("FR"));
        assert_eq!(
            disclosure.digest(),
            "w0I8EKcdCtUPkGCNUrfwVp2xEgNjtoIDlOxc9-PlOhs"
        );
    }

    #[test]
    fn create_then_decode() {
        let created = Disclosure::create(
            "c2FsdA".into(),
            Some("sub".into()),
            json!("1234"),
            SdAlg::Sha256,
        )
        .unwrap();
        let decoded = Disclosure::decode(created.encoded(), SdAlg::Sha256).unwrap();

        assert_eq!(created, decoded);
        assert_eq!(created.digest(), SdAlg::Sha256.digest(created.encoded()));
    }

    #[test]
    fn random_salts() {
        let a = Disclosure::new(Some("sub".into()), json!("1234"), SdAlg::Sha256).unwrap();
        let b = Disclosure::new(Some("sub".into()), json!("1234"), SdAlg::Sha256).unwrap();
        assert_ne!(a.salt(), b.salt());
        assert_ne!(a.digest(), b.digest());
    }

    #[test]
    fn reject_malformed() {
        let encode = |v: Json| BASE64_URL_SAFE_NO_PAD.encode(v.to_string());

        for bad in [
            "not base64!".to_owned(),
            BASE64_URL_SAFE_NO_PAD.encode("not json"),
            encode(json!({ "salt": "abc" })),
            encode(json!(["abc"])),
            encode(json!(["abc", "a", "b", "c"])),
            encode(json!(["abc", 1, "value"])),
            encode(json!(["", "key", "value"])),
            encode(json!([42, "value"])),
            encode(json!(["abc", "_sd", "value"])),
            encode(json!(["abc", "...", "value"])),
        ] {
            assert!(
                matches!(
                    Disclosure::decode(&bad, SdAlg::Sha256),
                    Err(Error::MalformedDisclosure { index: None, .. })
                ),
                "{bad} should be rejected"
            );
        }
    }

    #[test]
    fn reject_reserved_claim_names_on_create() {
        assert!(Disclosure::new(Some("_sd".into()), json!(1), SdAlg::Sha256).is_err());
        assert!(Disclosure::create(String::new(), None, json!(1), SdAlg::Sha256).is_err());
    }
}
