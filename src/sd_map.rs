use std::collections::{BTreeMap, HashMap};

use rand::Rng;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::{disclosure::Disclosure, sd_payload::array_digest, DIGESTS_KEY, DIGEST_ALG_KEY};

/// Key of an [`SdMap`] entry that applies to every element of an array
/// without an explicit index entry.
pub const ANY_ELEMENT: &str = "*";

/// How many decoy digests to add next to the real ones at a level.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DecoyMode {
    #[default]
    None,
    /// Exactly `decoys` decoys.
    Fixed,
    /// A uniformly drawn count in `[0, decoys]`, drawn anew on every issuance.
    Random,
}

/// Disclosure settings for a single claim.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SdField {
    /// Whether the claim itself is selectively disclosable.
    pub sd: bool,
    /// Settings for the members of an object value, or for the elements of
    /// an array value (keyed by decimal index or [`ANY_ELEMENT`]).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub children: Option<SdMap>,
}

impl SdField {
    pub fn new(sd: bool) -> Self {
        Self { sd, children: None }
    }

    pub fn with_children(sd: bool, children: SdMap) -> Self {
        Self {
            sd,
            children: Some(children),
        }
    }
}

/// A tree describing which claims of a payload are selectively disclosable,
/// mirroring the payload's shape.
///
/// Used both by issuers (what to redact) and by holders (what to reveal in a
/// presentation).
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SdMap {
    pub fields: BTreeMap<String, SdField>,
    #[serde(default)]
    pub decoy_mode: DecoyMode,
    #[serde(default)]
    pub decoys: usize,
}

impl SdMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_fields<K: Into<String>>(fields: impl IntoIterator<Item = (K, SdField)>) -> Self {
        Self {
            fields: fields.into_iter().map(|(k, f)| (k.into(), f)).collect(),
            ..Self::default()
        }
    }

    /// Applies a decoy policy to this level only.
    pub fn with_decoys(mut self, decoy_mode: DecoyMode, decoys: usize) -> Self {
        self.decoy_mode = decoy_mode;
        self.decoys = decoys;
        self
    }

    pub fn insert(&mut self, key: impl Into<String>, field: SdField) -> Option<SdField> {
        self.fields.insert(key.into(), field)
    }

    pub fn get(&self, key: &str) -> Option<&SdField> {
        self.fields.get(key)
    }

    /// The field governing the array element at `index`.
    pub fn element(&self, index: usize) -> Option<&SdField> {
        self.fields
            .get(&index.to_string())
            .or_else(|| self.fields.get(ANY_ELEMENT))
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Number of decoys to emit for this level, drawn fresh on every call in
    /// [`DecoyMode::Random`].
    pub fn decoy_count(&self) -> usize {
        match self.decoy_mode {
            DecoyMode::None => 0,
            DecoyMode::Fixed => self.decoys,
            DecoyMode::Random => rand::thread_rng().gen_range(0..=self.decoys),
        }
    }

    /// Builds a map from dotted claim paths.
    ///
    /// Every listed path is marked selectively disclosable. Intermediate
    /// segments that are not themselves listed stay always visible, so
    /// `["credentialSubject.firstName"]` redacts `firstName` inside a visible
    /// `credentialSubject`, while adding `"credentialSubject"` to the list also
    /// redacts the enclosing object. The decoy policy is applied at every
    /// generated level.
    pub fn from_paths<S: AsRef<str>>(paths: &[S], decoy_mode: DecoyMode, decoys: usize) -> Self {
        let mut map = Self::new().with_decoys(decoy_mode, decoys);
        for path in paths {
            map.add_path(path.as_ref(), true, decoy_mode, decoys);
        }
        map
    }

    /// Builds a presentation selection from dotted claim paths.
    ///
    /// Unlike [`SdMap::from_paths`], every prefix of a listed path is marked
    /// disclosed too: a nested disclosure can only be verified if the
    /// disclosure that contains its digest is revealed as well.
    pub fn selection_from_paths<S: AsRef<str>>(paths: &[S]) -> Self {
        let mut map = Self::new();
        for path in paths {
            map.add_path(path.as_ref(), false, DecoyMode::None, 0);
        }
        map
    }

    fn add_path(&mut self, path: &str, leaf_only: bool, decoy_mode: DecoyMode, decoys: usize) {
        let mut level = self;
        let mut segments = path.split('.').peekable();
        while let Some(segment) = segments.next() {
            let last = segments.peek().is_none();
            let field = level.fields.entry(segment.to_owned()).or_default();
            if last || !leaf_only {
                field.sd = true;
            }
            if last {
                break;
            }
            level = field
                .children
                .get_or_insert_with(|| Self::new().with_decoys(decoy_mode, decoys));
        }
    }

    /// Derives a map by comparing a full payload with its undisclosed form:
    /// claims missing from the undisclosed payload are selectively disclosable.
    pub fn from_payloads(
        full: &Map<String, Json>,
        undisclosed: &Map<String, Json>,
        decoy_mode: DecoyMode,
        decoys: usize,
    ) -> Self {
        let fields = full
            .iter()
            .map(|(key, value)| {
                let children = match (value, undisclosed.get(key)) {
                    (Json::Object(full), Some(Json::Object(undisclosed))) => {
                        Some(Self::from_payloads(full, undisclosed, decoy_mode, decoys))
                    }
                    (Json::Object(full), None) => {
                        Some(Self::from_payloads(full, full, decoy_mode, decoys))
                    }
                    _ => None,
                }
                .filter(|children| children.fields.values().any(|f| f.sd || f.children.is_some()));
                let field = SdField {
                    sd: !undisclosed.contains_key(key),
                    children,
                };
                (key.clone(), field)
            })
            .collect();

        Self {
            fields,
            decoy_mode,
            decoys,
        }
    }

    /// Recovers the map of an issued payload from its undisclosed form and
    /// the disclosures available for it.
    ///
    /// Only what the disclosures reveal can be recovered: claims whose
    /// disclosure is withheld are absent from the result.
    pub fn regenerate(undisclosed: &Map<String, Json>, disclosures: &[Disclosure]) -> Self {
        let lookup: HashMap<&str, &Disclosure> =
            disclosures.iter().map(|d| (d.digest(), d)).collect();
        Self::regenerate_object(undisclosed, &lookup)
    }

    fn regenerate_object(object: &Map<String, Json>, lookup: &HashMap<&str, &Disclosure>) -> Self {
        let mut map = Self::new();

        for (key, value) in object {
            if key == DIGESTS_KEY || key == DIGEST_ALG_KEY {
                continue;
            }
            let children = Self::regenerate_value(value, lookup);
            map.insert(key.clone(), SdField { sd: false, children });
        }

        let digests = object
            .get(DIGESTS_KEY)
            .and_then(Json::as_array)
            .into_iter()
            .flatten()
            .filter_map(Json::as_str);
        for digest in digests {
            let Some(disclosure) = lookup.get(digest) else {
                continue;
            };
            let Some(key) = disclosure.key() else {
                continue;
            };
            let children = Self::regenerate_value(disclosure.value(), lookup);
            map.insert(key, SdField { sd: true, children });
        }

        map
    }

    fn regenerate_value(value: &Json, lookup: &HashMap<&str, &Disclosure>) -> Option<Self> {
        let children = match value {
            Json::Object(object) => Self::regenerate_object(object, lookup),
            Json::Array(elements) => {
                let mut map = Self::new();
                for (index, element) in elements.iter().enumerate() {
                    match array_digest(element) {
                        Some(digest) => {
                            if let Some(disclosure) = lookup.get(digest) {
                                let children = Self::regenerate_value(disclosure.value(), lookup);
                                map.insert(index.to_string(), SdField { sd: true, children });
                            }
                        }
                        None => {
                            if let Some(children) = Self::regenerate_value(element, lookup) {
                                map.insert(
                                    index.to_string(),
                                    SdField::with_children(false, children),
                                );
                            }
                        }
                    }
                }
                map
            }
            _ => return None,
        };

        children
            .fields
            .values()
            .any(|f| f.sd || f.children.is_some())
            .then_some(children)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::digest::SdAlg;

    #[test]
    fn paths_with_parent() {
        let map = SdMap::from_paths(
            &["credentialSubject", "credentialSubject.firstName"],
            DecoyMode::None,
            0,
        );

        let subject = map.get("credentialSubject").unwrap();
        assert!(subject.sd);
        let children = subject.children.as_ref().unwrap();
        assert!(children.get("firstName").unwrap().sd);
        assert_eq!(children.fields.len(), 1);
    }

    #[test]
    fn paths_without_parent() {
        let map = SdMap::from_paths(&["credentialSubject.firstName"], DecoyMode::Fixed, 3);

        let subject = map.get("credentialSubject").unwrap();
        assert!(!subject.sd);
        let children = subject.children.as_ref().unwrap();
        assert!(children.get("firstName").unwrap().sd);
        assert_eq!(children.decoy_mode, DecoyMode::Fixed);
        assert_eq!(children.decoys, 3);
        assert_eq!(map.decoys, 3);
    }

    #[test]
    fn selection_marks_prefixes() {
        let map = SdMap::selection_from_paths(&["credentialSubject.firstName"]);
        let subject = map.get("credentialSubject").unwrap();
        assert!(subject.sd);
        assert!(subject.children.as_ref().unwrap().get("firstName").unwrap().sd);
    }

    #[test]
    fn element_wildcard() {
        let map = SdMap::from_fields([
            ("1", SdField::new(false)),
            (ANY_ELEMENT, SdField::new(true)),
        ]);
        assert!(map.element(0).unwrap().sd);
        assert!(!map.element(1).unwrap().sd);
        assert!(map.element(7).unwrap().sd);
        assert!(SdMap::new().element(0).is_none());
    }

    #[test]
    fn decoy_counts() {
        assert_eq!(SdMap::new().with_decoys(DecoyMode::None, 5).decoy_count(), 0);
        assert_eq!(SdMap::new().with_decoys(DecoyMode::Fixed, 5).decoy_count(), 5);
        let random = SdMap::new().with_decoys(DecoyMode::Random, 5);
        for _ in 0..100 {
            assert!(random.decoy_count() <= 5);
        }
    }

    #[test]
    fn json_form() {
        let map = SdMap::from_paths(&["address.street", "sub"], DecoyMode::Random, 2);
        let json = serde_json::to_value(&map).unwrap();

        assert_eq!(
            json,
            json!({
                "fields": {
                    "address": {
                        "sd": false,
                        "children": {
                            "fields": { "street": { "sd": true } },
                            "decoyMode": "RANDOM",
                            "decoys": 2
                        }
                    },
                    "sub": { "sd": true }
                },
                "decoyMode": "RANDOM",
                "decoys": 2
            })
        );
        assert_eq!(serde_json::from_value::<SdMap>(json).unwrap(), map);

        let minimal: SdMap =
            serde_json::from_value(json!({ "fields": { "sub": { "sd": true } } })).unwrap();
        assert_eq!(minimal.decoy_mode, DecoyMode::None);
        assert_eq!(minimal.decoys, 0);
    }

    #[test]
    fn diff_payloads() {
        let full = json!({
            "sub": "1234",
            "name": "Alice",
            "address": { "street": "Main St", "city": "Springfield" }
        });
        let undisclosed = json!({
            "name": "Alice",
            "address": { "city": "Springfield" }
        });
        let map = SdMap::from_payloads(
            full.as_object().unwrap(),
            undisclosed.as_object().unwrap(),
            DecoyMode::None,
            0,
        );

        assert!(map.get("sub").unwrap().sd);
        assert!(!map.get("name").unwrap().sd);
        let address = map.get("address").unwrap();
        assert!(!address.sd);
        let children = address.children.as_ref().unwrap();
        assert!(children.get("street").unwrap().sd);
        assert!(!children.get("city").unwrap().sd);
    }

    #[test]
    fn regenerate_from_disclosures() {
        let street =
            Disclosure::new(Some("street".into()), json!("Main St"), SdAlg::Sha256).unwrap();
        let address = Disclosure::new(
            Some("address".into()),
            json!({ "_sd": [street.digest()], "city": "Springfield" }),
            SdAlg::Sha256,
        )
        .unwrap();
        let undisclosed = json!({
            "_sd": [address.digest(), SdAlg::Sha256.decoy_digest()],
            "_sd_alg": "sha-256",
            "name": "Alice"
        });

        let map = SdMap::regenerate(
            undisclosed.as_object().unwrap(),
            &[street.clone(), address.clone()],
        );

        assert!(!map.get("name").unwrap().sd);
        let field = map.get("address").unwrap();
        assert!(field.sd);
        assert!(field.children.as_ref().unwrap().get("street").unwrap().sd);
        assert!(map.get("_sd_alg").is_none());

        let partial = SdMap::regenerate(undisclosed.as_object().unwrap(), &[street]);
        assert!(partial.get("address").is_none());
    }
}
