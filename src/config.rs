use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value as Json};

use crate::{
    digest::SdAlg,
    error::Result,
    sd_jwt::VerificationOptions,
    sd_map::{DecoyMode, SdMap},
    sd_payload::SdPayload,
};

/// Issuance and verification defaults, loaded by the embedding service from
/// its own configuration source. Every field is optional.
#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Config {
    pub sd_alg: SdAlg,
    pub decoys: Decoys,
    pub key_binding: KeyBinding,
}

#[derive(Deserialize, Debug, Clone, Copy, Default, PartialEq, Eq)]
#[serde(default)]
pub struct Decoys {
    pub mode: DecoyMode,
    pub count: usize,
}

#[derive(Deserialize, Debug, Clone, Default, PartialEq, Eq)]
#[serde(default)]
pub struct KeyBinding {
    pub required: bool,
    pub max_age_secs: Option<u64>,
    pub clock_skew_secs: u64,
}

impl Config {
    pub fn verification_options(&self) -> VerificationOptions {
        VerificationOptions {
            require_key_binding: self.key_binding.required,
            max_key_binding_age: self.key_binding.max_age_secs.map(Duration::from_secs),
            clock_skew: Duration::from_secs(self.key_binding.clock_skew_secs),
            ..VerificationOptions::default()
        }
    }

    /// Gives the root level of `sd_map` the default decoy policy, unless it
    /// already has one.
    pub fn apply_decoys(&self, sd_map: SdMap) -> SdMap {
        if sd_map.decoy_mode == DecoyMode::None {
            sd_map.with_decoys(self.decoys.mode, self.decoys.count)
        } else {
            sd_map
        }
    }

    /// Redacts `full` with the configured digest algorithm and decoy policy.
    pub fn create_payload(&self, full: &Map<String, Json>, sd_map: &SdMap) -> Result<SdPayload> {
        SdPayload::create_with_alg(full, &self.apply_decoys(sd_map.clone()), self.sd_alg)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::{sd_map::SdField, DIGESTS_KEY, DIGEST_ALG_KEY};

    #[test]
    fn deserialize() {
        let config: Config = serde_json::from_value(json!({
            "sd_alg": "sha-384",
            "decoys": { "mode": "FIXED", "count": 4 },
            "key_binding": { "required": true, "max_age_secs": 300, "clock_skew_secs": 30 }
        }))
        .unwrap();

        assert_eq!(config.sd_alg, SdAlg::Sha384);
        assert_eq!(config.decoys.mode, DecoyMode::Fixed);
        assert_eq!(config.decoys.count, 4);

        let options = config.verification_options();
        assert!(options.require_key_binding);
        assert_eq!(options.max_key_binding_age, Some(Duration::from_secs(300)));
        assert_eq!(options.clock_skew, Duration::from_secs(30));
        assert!(options.audience.is_none());
    }

    #[test]
    fn defaults() {
        let config: Config = serde_json::from_value(json!({})).unwrap();
        assert_eq!(config, Config::default());
        assert_eq!(config.sd_alg, SdAlg::Sha256);
        assert!(!config.verification_options().require_key_binding);

        assert!(serde_json::from_value::<Config>(json!({ "sd_alg": "md5" })).is_err());
    }

    #[test]
    fn create_payload_with_defaults() {
        let config = Config {
            sd_alg: SdAlg::Sha512,
            decoys: Decoys {
                mode: DecoyMode::Fixed,
                count: 2,
            },
            ..Config::default()
        };
        let full = json!({ "a": 1, "b": 2 }).as_object().cloned().unwrap();
        let sd_map = SdMap::from_fields([("a", SdField::new(true))]);

        let payload = config.create_payload(&full, &sd_map).unwrap();

        assert_eq!(payload.undisclosed_payload()[DIGEST_ALG_KEY], json!("sha-512"));
        assert_eq!(payload.undisclosed_payload()[DIGESTS_KEY].as_array().unwrap().len(), 3);

        let own_policy = sd_map.with_decoys(DecoyMode::Fixed, 0);
        let payload = config.create_payload(&full, &own_policy).unwrap();
        assert_eq!(payload.undisclosed_payload()[DIGESTS_KEY].as_array().unwrap().len(), 1);
    }
}
