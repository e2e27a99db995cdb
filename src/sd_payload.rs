use std::collections::{HashMap, HashSet};

use serde_json::{Map, Value as Json};
use tracing::{debug, warn};

use crate::{
    digest::SdAlg,
    disclosure::Disclosure,
    error::{Error, Result},
    sd_map::SdMap,
    ARRAY_DIGEST_KEY, DIGESTS_KEY, DIGEST_ALG_KEY,
};

/// The claims of an SD-JWT: the undisclosed payload that the issuer signs,
/// and the disclosures that reveal its hidden parts.
///
/// Reconstructing the full payload from the undisclosed payload and all the
/// issued disclosures gives back exactly the payload the issuer started from.
#[derive(Debug, Clone, PartialEq)]
pub struct SdPayload {
    undisclosed: Map<String, Json>,
    disclosures: Vec<Disclosure>,
    sd_alg: SdAlg,
}

impl SdPayload {
    /// Redacts `full` according to `sd_map`, digesting with sha-256.
    pub fn create(full: &Map<String, Json>, sd_map: &SdMap) -> Result<Self> {
        Self::create_with_alg(full, sd_map, SdAlg::default())
    }

    /// Redacts `full` according to `sd_map`.
    ///
    /// Every claim marked `sd` is replaced by the digest of a new disclosure.
    /// Nested objects and arrays are redacted before their parent, so a
    /// selectively disclosable object carries its own redacted form as the
    /// disclosed value. Each level that produced digests gets its decoys and
    /// a sorted `_sd` array; `_sd_alg` is set on the root.
    pub fn create_with_alg(
        full: &Map<String, Json>,
        sd_map: &SdMap,
        sd_alg: SdAlg,
    ) -> Result<Self> {
        let mut redactor = Redactor {
            sd_alg,
            disclosures: Vec::new(),
        };
        let mut undisclosed = redactor.object(full, Some(sd_map))?;
        undisclosed.insert(DIGEST_ALG_KEY.to_owned(), sd_alg.as_str().into());

        debug!(
            "redacted payload into {} disclosures using {sd_alg}",
            redactor.disclosures.len()
        );

        Ok(Self {
            undisclosed,
            disclosures: redactor.disclosures,
            sd_alg,
        })
    }

    /// Assembles a payload from an undisclosed payload and decoded
    /// disclosures, as a holder or verifier receives them.
    pub fn from_parts(
        undisclosed: Map<String, Json>,
        disclosures: Vec<Disclosure>,
    ) -> Result<Self> {
        let sd_alg = SdAlg::from_payload(&undisclosed)?;
        let disclosures = disclosures
            .into_iter()
            .map(|d| {
                if d.alg() == sd_alg {
                    Ok(d)
                } else {
                    Disclosure::decode(d.encoded(), sd_alg)
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let mut digests = HashSet::new();
        for disclosure in &disclosures {
            if !digests.insert(disclosure.digest()) {
                return Err(Error::DuplicateDisclosure(disclosure.digest().to_owned()));
            }
        }

        Ok(Self {
            undisclosed,
            disclosures,
            sd_alg,
        })
    }

    /// Like [`SdPayload::from_parts`], decoding disclosures from their
    /// serialized form. Decoding errors report the 1-based position of the
    /// offending disclosure.
    pub fn parse<S: AsRef<str>>(undisclosed: Map<String, Json>, disclosures: &[S]) -> Result<Self> {
        let sd_alg = SdAlg::from_payload(&undisclosed)?;
        let disclosures = disclosures
            .iter()
            .enumerate()
            .map(|(i, encoded)| {
                Disclosure::decode(encoded.as_ref(), sd_alg).map_err(|e| match e {
                    Error::MalformedDisclosure { reason, .. } => Error::MalformedDisclosure {
                        index: Some(i + 1),
                        reason,
                    },
                    other => other,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Self::from_parts(undisclosed, disclosures)
    }

    /// The payload as signed by the issuer, with digests in place of the
    /// selectively disclosable claims.
    pub fn undisclosed_payload(&self) -> &Map<String, Json> {
        &self.undisclosed
    }

    pub fn disclosures(&self) -> &[Disclosure] {
        &self.disclosures
    }

    pub fn sd_alg(&self) -> SdAlg {
        self.sd_alg
    }

    /// Disclosures indexed by their digest.
    pub fn digested_disclosures(&self) -> HashMap<&str, &Disclosure> {
        self.disclosures.iter().map(|d| (d.digest(), d)).collect()
    }

    /// The payload with every available disclosure substituted back in.
    ///
    /// Digests without a matching disclosure (withheld claims and decoys) are
    /// dropped silently, as are disclosures the payload does not reference.
    pub fn full_payload(&self) -> Result<Map<String, Json>> {
        self.reconstruct().map(|(payload, _)| payload)
    }

    /// Reconstructs the full payload, rejecting any disclosure that no digest
    /// in the payload tree references.
    pub fn verify_disclosures(&self) -> Result<Map<String, Json>> {
        let (payload, referenced) = self.reconstruct()?;

        if let Some(unreferenced) = self
            .disclosures
            .iter()
            .find(|d| !referenced.contains(d.digest()))
        {
            warn!(
                "disclosure `{}` is not referenced by the payload",
                unreferenced.digest()
            );
            return Err(Error::DisclosureNotReferenced(
                unreferenced.digest().to_owned(),
            ));
        }

        Ok(payload)
    }

    fn reconstruct(&self) -> Result<(Map<String, Json>, HashSet<&str>)> {
        let mut discloser = Discloser {
            lookup: self.digested_disclosures(),
            seen: HashSet::new(),
            referenced: HashSet::new(),
        };
        let payload = discloser.object(&self.undisclosed)?;
        Ok((payload, discloser.referenced))
    }

    /// Keeps only the disclosures selected by `selection`.
    ///
    /// A disclosure is kept when its claim (or array element) is marked `sd`
    /// in the selection and it is reachable: its digest sits in the
    /// undisclosed payload, or inside the value of another kept disclosure.
    pub fn select(&self, selection: &SdMap) -> Self {
        let lookup = self.digested_disclosures();
        let mut selected = HashSet::new();
        select_object(&self.undisclosed, selection, &lookup, &mut selected);

        Self {
            undisclosed: self.undisclosed.clone(),
            disclosures: self
                .disclosures
                .iter()
                .filter(|d| selected.contains(d.digest()))
                .cloned()
                .collect(),
            sd_alg: self.sd_alg,
        }
    }

    /// Keeps every disclosure, or none.
    pub fn select_all(&self, disclose_all: bool) -> Self {
        Self {
            undisclosed: self.undisclosed.clone(),
            disclosures: if disclose_all {
                self.disclosures.clone()
            } else {
                Vec::new()
            },
            sd_alg: self.sd_alg,
        }
    }

    /// The selective disclosure structure that the available disclosures
    /// reveal.
    pub fn sd_map(&self) -> SdMap {
        SdMap::regenerate(&self.undisclosed, &self.disclosures)
    }

    /// Adds always-visible claims to the root of the undisclosed payload.
    pub fn with_claims(mut self, claims: Map<String, Json>) -> Result<Self> {
        let root_disclosed: HashSet<&str> = {
            let lookup = self.digested_disclosures();
            self.undisclosed
                .get(DIGESTS_KEY)
                .and_then(Json::as_array)
                .into_iter()
                .flatten()
                .filter_map(Json::as_str)
                .filter_map(|digest| lookup.get(digest).copied().and_then(Disclosure::key))
                .collect()
        };

        for key in claims.keys() {
            if is_reserved(key) {
                return Err(Error::invalid_payload(format!(
                    "`{key}` is a reserved claim name"
                )));
            }
            if root_disclosed.contains(key.as_str()) {
                return Err(Error::invalid_payload(format!(
                    "claim `{key}` is already selectively disclosable"
                )));
            }
        }

        self.undisclosed.extend(claims);
        Ok(self)
    }
}

/// The digest held by an array element of the form `{"...": digest}`.
pub(crate) fn array_digest(value: &Json) -> Option<&str> {
    match value {
        Json::Object(object) if object.len() == 1 => object.get(ARRAY_DIGEST_KEY)?.as_str(),
        _ => None,
    }
}

fn array_digest_element(digest: String) -> Json {
    let mut object = Map::new();
    object.insert(ARRAY_DIGEST_KEY.to_owned(), Json::String(digest));
    Json::Object(object)
}

fn is_reserved(key: &str) -> bool {
    key == DIGESTS_KEY || key == DIGEST_ALG_KEY || key == ARRAY_DIGEST_KEY
}

struct Redactor {
    sd_alg: SdAlg,
    disclosures: Vec<Disclosure>,
}

impl Redactor {
    fn object(
        &mut self,
        object: &Map<String, Json>,
        sd_map: Option<&SdMap>,
    ) -> Result<Map<String, Json>> {
        let mut redacted = Map::new();
        let mut digests = Vec::new();

        for (key, value) in object {
            if is_reserved(key) {
                return Err(Error::invalid_payload(format!(
                    "`{key}` is a reserved claim name"
                )));
            }

            let field = sd_map.and_then(|m| m.get(key));
            let value = self.value(value, field.and_then(|f| f.children.as_ref()))?;

            if field.is_some_and(|f| f.sd) {
                let disclosure = Disclosure::new(Some(key.clone()), value, self.sd_alg)?;
                digests.push(disclosure.digest().to_owned());
                self.disclosures.push(disclosure);
            } else {
                redacted.insert(key.clone(), value);
            }
        }

        if !digests.is_empty() {
            let decoys = sd_map.map_or(0, SdMap::decoy_count);
            debug!("adding {decoys} decoy digests to `_sd`");
            digests.extend((0..decoys).map(|_| self.sd_alg.decoy_digest()));
            digests.sort_unstable();
            redacted.insert(
                DIGESTS_KEY.to_owned(),
                digests.into_iter().map(Json::String).collect(),
            );
        }

        Ok(redacted)
    }

    fn array(&mut self, elements: &[Json], sd_map: Option<&SdMap>) -> Result<Vec<Json>> {
        let mut redacted = Vec::with_capacity(elements.len());
        let mut disclosed_any = false;

        for (index, element) in elements.iter().enumerate() {
            let field = sd_map.and_then(|m| m.element(index));
            let value = self.value(element, field.and_then(|f| f.children.as_ref()))?;

            if field.is_some_and(|f| f.sd) {
                let disclosure = Disclosure::new(None, value, self.sd_alg)?;
                redacted.push(array_digest_element(disclosure.digest().to_owned()));
                self.disclosures.push(disclosure);
                disclosed_any = true;
            } else {
                redacted.push(value);
            }
        }

        // Appended, so that marker positions keep matching element indices.
        if disclosed_any {
            let decoys = sd_map.map_or(0, SdMap::decoy_count);
            debug!("adding {decoys} decoy array elements");
            redacted.extend((0..decoys).map(|_| array_digest_element(self.sd_alg.decoy_digest())));
        }

        Ok(redacted)
    }

    fn value(&mut self, value: &Json, sd_map: Option<&SdMap>) -> Result<Json> {
        Ok(match value {
            Json::Object(object) => Json::Object(self.object(object, sd_map)?),
            Json::Array(elements) => Json::Array(self.array(elements, sd_map)?),
            other => other.clone(),
        })
    }
}

struct Discloser<'a> {
    lookup: HashMap<&'a str, &'a Disclosure>,
    seen: HashSet<&'a str>,
    referenced: HashSet<&'a str>,
}

impl<'a> Discloser<'a> {
    fn object(&mut self, object: &'a Map<String, Json>) -> Result<Map<String, Json>> {
        let mut disclosed = Map::new();

        for (key, value) in object {
            if key == DIGESTS_KEY || key == DIGEST_ALG_KEY {
                continue;
            }
            disclosed.insert(key.clone(), self.value(value)?);
        }

        let digests = match object.get(DIGESTS_KEY) {
            None => return Ok(disclosed),
            Some(Json::Array(digests)) => digests,
            Some(_) => return Err(Error::invalid_payload("`_sd` must be an array")),
        };

        for digest in digests {
            let Json::String(digest) = digest else {
                return Err(Error::invalid_payload("`_sd` must only contain strings"));
            };
            let Some(disclosure) = self.reference(digest)? else {
                continue;
            };
            let Some(key) = disclosure.key() else {
                return Err(Error::malformed_disclosure(format!(
                    "array element disclosure `{digest}` is referenced from `_sd`"
                )));
            };
            if disclosed.contains_key(key) {
                return Err(Error::invalid_payload(format!(
                    "claim `{key}` is disclosed more than once"
                )));
            }
            let value = self.value(disclosure.value())?;
            disclosed.insert(key.to_owned(), value);
        }

        Ok(disclosed)
    }

    fn array(&mut self, elements: &'a [Json]) -> Result<Vec<Json>> {
        let mut disclosed = Vec::with_capacity(elements.len());

        for element in elements {
            let Some(digest) = array_digest(element) else {
                disclosed.push(self.value(element)?);
                continue;
            };
            let Some(disclosure) = self.reference(digest)? else {
                continue;
            };
            if !disclosure.is_array_element() {
                return Err(Error::malformed_disclosure(format!(
                    "object property disclosure `{digest}` is referenced from an array"
                )));
            }
            disclosed.push(self.value(disclosure.value())?);
        }

        Ok(disclosed)
    }

    fn value(&mut self, value: &'a Json) -> Result<Json> {
        Ok(match value {
            Json::Object(object) => Json::Object(self.object(object)?),
            Json::Array(elements) => Json::Array(self.array(elements)?),
            other => other.clone(),
        })
    }

    fn reference(&mut self, digest: &'a str) -> Result<Option<&'a Disclosure>> {
        if !self.seen.insert(digest) {
            return Err(Error::invalid_payload(format!(
                "digest `{digest}` appears more than once"
            )));
        }
        let disclosure = self.lookup.get(digest).copied();
        if disclosure.is_some() {
            self.referenced.insert(digest);
        }
        Ok(disclosure)
    }
}

fn select_object<'a>(
    object: &'a Map<String, Json>,
    selection: &SdMap,
    lookup: &HashMap<&'a str, &'a Disclosure>,
    selected: &mut HashSet<&'a str>,
) {
    let digests = object
        .get(DIGESTS_KEY)
        .and_then(Json::as_array)
        .into_iter()
        .flatten()
        .filter_map(Json::as_str);
    for digest in digests {
        let Some(disclosure) = lookup.get(digest).copied() else {
            continue;
        };
        let Some(field) = disclosure.key().and_then(|key| selection.get(key)) else {
            continue;
        };
        if field.sd {
            selected.insert(digest);
            if let Some(children) = &field.children {
                select_value(disclosure.value(), children, lookup, selected);
            }
        }
    }

    for (key, value) in object {
        if let Some(children) = selection.get(key).and_then(|f| f.children.as_ref()) {
            select_value(value, children, lookup, selected);
        }
    }
}

fn select_value<'a>(
    value: &'a Json,
    selection: &SdMap,
    lookup: &HashMap<&'a str, &'a Disclosure>,
    selected: &mut HashSet<&'a str>,
) {
    match value {
        Json::Object(object) => select_object(object, selection, lookup, selected),
        Json::Array(elements) => {
            for (index, element) in elements.iter().enumerate() {
                let Some(field) = selection.element(index) else {
                    continue;
                };
                match array_digest(element) {
                    Some(digest) => {
                        let Some(disclosure) = lookup.get(digest).copied() else {
                            continue;
                        };
                        if field.sd {
                            selected.insert(digest);
                            if let Some(children) = &field.children {
                                select_value(disclosure.value(), children, lookup, selected);
                            }
                        }
                    }
                    None => {
                        if let Some(children) = &field.children {
                            select_value(element, children, lookup, selected);
                        }
                    }
                }
            }
        }
        _ => {}
    }
}
