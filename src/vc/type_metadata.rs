//! SD-JWT VC Type Metadata, describing what a credential type (`vct`) looks
//! like and how it should be displayed.
//!
//! Two revisions are supported. Documents carrying a `vct` are read as the
//! draft 13 form, anything else as the draft 04 form.

use jsonschema::JSONSchema;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value as Json};

use crate::{
    error::{Error, Result},
    sd_map::{SdMap, ANY_ELEMENT},
};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TypeMetadata {
    Draft04(TypeMetadataDraft04),
    Draft13(TypeMetadataDraft13),
}

impl<'de> Deserialize<'de> for TypeMetadata {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::de::Error as _;

        let object = Map::<String, Json>::deserialize(deserializer)?;
        let is_draft13 = object.contains_key("vct");
        let object = Json::Object(object);
        let metadata = if is_draft13 {
            serde_json::from_value(object).map(Self::Draft13)
        } else {
            serde_json::from_value(object).map(Self::Draft04)
        };
        let metadata = metadata.map_err(D::Error::custom)?;

        metadata.validate().map_err(D::Error::custom)?;
        Ok(metadata)
    }
}

impl TypeMetadata {
    pub fn name(&self) -> Option<&str> {
        match self {
            Self::Draft04(m) => m.name.as_deref(),
            Self::Draft13(m) => m.name.as_deref(),
        }
    }

    pub fn description(&self) -> Option<&str> {
        match self {
            Self::Draft04(m) => m.description.as_deref(),
            Self::Draft13(m) => m.description.as_deref(),
        }
    }

    /// The `vct` this type metadata extends, if any.
    pub fn extends(&self) -> Option<&str> {
        match self {
            Self::Draft04(m) => m.extends.as_deref(),
            Self::Draft13(m) => m.extends.as_deref(),
        }
    }

    pub fn extends_integrity(&self) -> Option<&str> {
        match self {
            Self::Draft04(m) => m.extends_integrity.as_deref(),
            Self::Draft13(m) => m.extends_integrity.as_deref(),
        }
    }

    /// Parameters not defined by the type metadata drafts.
    pub fn custom_parameters(&self) -> &Map<String, Json> {
        match self {
            Self::Draft04(m) => &m.custom_parameters,
            Self::Draft13(m) => &m.custom_parameters,
        }
    }

    pub fn validate(&self) -> Result<()> {
        match self {
            Self::Draft04(m) => m.validate(),
            Self::Draft13(_) => Ok(()),
        }
    }

    /// Checks a (reconstructed) credential payload against the embedded JSON
    /// schema, if any, and against the claims declared mandatory.
    pub fn validate_payload(&self, payload: &Map<String, Json>) -> Result<()> {
        match self {
            Self::Draft04(m) => m.validate_payload(payload),
            Self::Draft13(m) => m.check_mandatory_claims(payload),
        }
    }

    /// Checks an issuance plan against the `sd` rules of the declared claims.
    pub fn check_disclosability(&self, sd_map: &SdMap) -> Result<()> {
        match self {
            Self::Draft04(_) => Ok(()),
            Self::Draft13(m) => m.check_disclosability(sd_map),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TypeMetadataDraft04 {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(
        rename = "extends#integrity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub extends_integrity: Option<String>,
    /// An embedded JSON schema for the credential payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<Json>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_uri: Option<String>,
    #[serde(
        rename = "schema_uri#integrity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub schema_uri_integrity: Option<String>,
    #[serde(flatten)]
    pub custom_parameters: Map<String, Json>,
}

impl TypeMetadataDraft04 {
    /// `schema` and `schema_uri` are mutually exclusive, and an integrity
    /// value needs a `schema_uri` to apply to.
    pub fn validate(&self) -> Result<()> {
        if self.schema.is_some() && self.schema_uri.is_some() {
            return Err(Error::TypeMetadata(
                "`schema` and `schema_uri` cannot both be present".into(),
            ));
        }
        if self.schema_uri_integrity.is_some() && self.schema_uri.is_none() {
            return Err(Error::TypeMetadata(
                "`schema_uri#integrity` requires `schema_uri`".into(),
            ));
        }
        Ok(())
    }

    pub fn validate_payload(&self, payload: &Map<String, Json>) -> Result<()> {
        let Some(schema) = &self.schema else {
            return Ok(());
        };

        let schema = JSONSchema::compile(schema)
            .map_err(|e| Error::TypeMetadata(format!("invalid schema: {e}")))?;

        let payload = Json::Object(payload.clone());
        if let Err(errors) = schema.validate(&payload) {
            let errors: Vec<String> = errors
                .map(|error| {
                    tracing::debug!("credential did not pass schema validation: {error}");
                    error.to_string()
                })
                .collect();
            return Err(Error::SchemaValidation(errors));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TypeMetadataDraft13 {
    pub vct: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extends: Option<String>,
    #[serde(
        rename = "extends#integrity",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub extends_integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<Vec<DisplayMetadata>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub claims: Option<Vec<ClaimMetadata>>,
    #[serde(flatten)]
    pub custom_parameters: Map<String, Json>,
}

impl TypeMetadataDraft13 {
    fn claims(&self) -> impl Iterator<Item = &ClaimMetadata> {
        self.claims.iter().flatten()
    }

    pub fn check_mandatory_claims(&self, payload: &Map<String, Json>) -> Result<()> {
        let missing: Vec<String> = self
            .claims()
            .filter(|claim| claim.mandatory && !claim.is_present(payload))
            .map(|claim| format!("mandatory claim {} is missing", claim.path_string()))
            .collect();

        if missing.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaValidation(missing))
        }
    }

    pub fn check_disclosability(&self, sd_map: &SdMap) -> Result<()> {
        let violations: Vec<String> = self
            .claims()
            .filter_map(|claim| {
                let sd = claim.sd_flag(sd_map);
                match (claim.sd, sd) {
                    (ClaimSd::Always, Some(false) | None) => Some(format!(
                        "claim {} must be selectively disclosable",
                        claim.path_string()
                    )),
                    (ClaimSd::Never, Some(true)) => Some(format!(
                        "claim {} must not be selectively disclosable",
                        claim.path_string()
                    )),
                    _ => None,
                }
            })
            .collect();

        if violations.is_empty() {
            Ok(())
        } else {
            Err(Error::SchemaValidation(violations))
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplayMetadata {
    pub locale: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rendering: Option<RenderingMetadata>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RenderingMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub simple: Option<SimpleRendering>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_templates: Option<Vec<SvgTemplate>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimpleRendering {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logo: Option<Logo>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_image: Option<BackgroundImage>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub background_color: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text_color: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Logo {
    pub uri: String,
    #[serde(rename = "uri#integrity", default, skip_serializing_if = "Option::is_none")]
    pub uri_integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub alt_text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundImage {
    pub uri: String,
    #[serde(rename = "uri#integrity", default, skip_serializing_if = "Option::is_none")]
    pub uri_integrity: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvgTemplate {
    pub uri: String,
    #[serde(rename = "uri#integrity", default, skip_serializing_if = "Option::is_none")]
    pub uri_integrity: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub properties: Option<SvgTemplateProperties>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SvgTemplateProperties {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub orientation: Option<Orientation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub color_scheme: Option<ColorScheme>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub contrast: Option<Contrast>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Orientation {
    Portrait,
    Landscape,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorScheme {
    Light,
    Dark,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Contrast {
    Normal,
    High,
}

/// Selective disclosure rule for a claim.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClaimSd {
    Always,
    #[default]
    Allowed,
    Never,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimMetadata {
    /// Path to the claim; `null` selects every element of an array.
    pub path: Vec<Option<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display: Option<Vec<ClaimDisplay>>,
    #[serde(default)]
    pub mandatory: bool,
    #[serde(default)]
    pub sd: ClaimSd,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub svg_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimDisplay {
    pub locale: String,
    pub label: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl ClaimMetadata {
    fn path_string(&self) -> String {
        let segments: Vec<&str> = self
            .path
            .iter()
            .map(|s| s.as_deref().unwrap_or(ANY_ELEMENT))
            .collect();
        format!("`{}`", segments.join("."))
    }

    fn is_present(&self, payload: &Map<String, Json>) -> bool {
        fn present(value: &Json, path: &[Option<String>]) -> bool {
            let Some((segment, rest)) = path.split_first() else {
                return true;
            };
            match (value, segment) {
                (Json::Object(object), Some(key)) => {
                    object.get(key).is_some_and(|v| present(v, rest))
                }
                (Json::Array(elements), None) => {
                    !elements.is_empty() && elements.iter().all(|v| present(v, rest))
                }
                (Json::Array(elements), Some(index)) => index
                    .parse::<usize>()
                    .ok()
                    .and_then(|i| elements.get(i))
                    .is_some_and(|v| present(v, rest)),
                _ => false,
            }
        }

        present(&Json::Object(payload.clone()), &self.path)
    }

    /// The `sd` flag an [`SdMap`] gives to this claim, if it mentions it.
    fn sd_flag(&self, sd_map: &SdMap) -> Option<bool> {
        let (last, parents) = self.path.split_last()?;
        let mut level = sd_map;
        for segment in parents {
            let key = segment.as_deref().unwrap_or(ANY_ELEMENT);
            level = level.get(key)?.children.as_ref()?;
        }
        level
            .get(last.as_deref().unwrap_or(ANY_ELEMENT))
            .map(|field| field.sd)
    }
}
