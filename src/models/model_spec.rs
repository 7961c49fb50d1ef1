//! Model spec parsing: `repository/model@version`.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SpecError {
    #[error("Invalid model spec '{spec}': expected exactly one '@', found {found}")]
    AtCount { spec: String, found: usize },

    #[error("Invalid model spec '{spec}': empty {part}")]
    EmptyPart { spec: String, part: &'static str },
}

/// Broad model family used for skip decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelCategory {
    Nlp,
    Vision,
    Multimodal,
}

impl ModelCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Nlp => "nlp",
            Self::Vision => "vision",
            Self::Multimodal => "multimodal",
        }
    }
}

impl fmt::Display for ModelCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const VISION_MARKERS: &[&str] = &["resnet", "vgg"];
const MULTIMODAL_MARKERS: &[&str] = &["clip"];

/// Parsed `repository/model@version` identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ModelSpec {
    repository_model: String,
    version: String,
}

impl ModelSpec {
    /// Parse a spec string. Requires exactly one `@` with non-empty sides.
    pub fn parse(spec: &str) -> Result<Self, SpecError> {
        let found = spec.matches('@').count();
        if found != 1 {
            return Err(SpecError::AtCount {
                spec: spec.to_string(),
                found,
            });
        }
        let (repository_model, version) = spec.split_once('@').ok_or(SpecError::AtCount {
            spec: spec.to_string(),
            found,
        })?;
        if repository_model.is_empty() {
            return Err(SpecError::EmptyPart {
                spec: spec.to_string(),
                part: "repository/model",
            });
        }
        if version.is_empty() {
            return Err(SpecError::EmptyPart {
                spec: spec.to_string(),
                part: "version",
            });
        }
        Ok(Self {
            repository_model: repository_model.to_string(),
            version: version.to_string(),
        })
    }

    pub fn repository_model(&self) -> &str {
        &self.repository_model
    }

    pub fn version(&self) -> &str {
        &self.version
    }

    /// Last path segment of the repository part (`hf/bert-base` -> `bert-base`).
    pub fn model_name(&self) -> &str {
        self.repository_model
            .rsplit('/')
            .next()
            .unwrap_or(&self.repository_model)
    }

    /// Cache slug: `/` and `@` replaced by `-`.
    pub fn flattened(&self) -> String {
        self.to_string().replace(['/', '@'], "-")
    }

    pub fn category(&self) -> ModelCategory {
        let lower = self.repository_model.to_ascii_lowercase();
        if VISION_MARKERS.iter().any(|m| lower.contains(m)) {
            ModelCategory::Vision
        } else if MULTIMODAL_MARKERS.iter().any(|m| lower.contains(m)) {
            ModelCategory::Multimodal
        } else {
            ModelCategory::Nlp
        }
    }
}

impl fmt::Display for ModelSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.repository_model, self.version)
    }
}

impl FromStr for ModelSpec {
    type Err = SpecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for ModelSpec {
    type Error = SpecError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<ModelSpec> for String {
    fn from(spec: ModelSpec) -> Self {
        spec.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_valid_spec() {
        let spec = ModelSpec::parse("hf/distilgpt2@latest").unwrap();
        assert_eq!(spec.repository_model(), "hf/distilgpt2");
        assert_eq!(spec.version(), "latest");
        assert_eq!(spec.model_name(), "distilgpt2");
        assert_eq!(spec.to_string(), "hf/distilgpt2@latest");
    }

    #[test]
    fn test_parse_rejects_missing_or_repeated_at() {
        assert_eq!(
            ModelSpec::parse("hf/distilgpt2"),
            Err(SpecError::AtCount { spec: "hf/distilgpt2".into(), found: 0 })
        );
        assert!(matches!(
            ModelSpec::parse("hf/a@b@c"),
            Err(SpecError::AtCount { found: 2, .. })
        ));
    }

    #[test]
    fn test_parse_rejects_empty_parts() {
        assert!(matches!(ModelSpec::parse("@latest"), Err(SpecError::EmptyPart { .. })));
        assert!(matches!(ModelSpec::parse("hf/x@"), Err(SpecError::EmptyPart { .. })));
    }

    #[test]
    fn test_flattened_slug() {
        let spec: ModelSpec = "hf/bert-base-uncased@latest".parse().unwrap();
        assert_eq!(spec.flattened(), "hf-bert-base-uncased-latest");
    }

    #[test]
    fn test_category_markers() {
        let cat = |s: &str| ModelSpec::parse(s).unwrap().category();
        assert_eq!(cat("hf/microsoft/resnet-50@latest"), ModelCategory::Vision);
        assert_eq!(cat("hf/timm/vgg16@latest"), ModelCategory::Vision);
        assert_eq!(cat("hf/openai/clip-vit-base-patch32@latest"), ModelCategory::Multimodal);
        assert_eq!(cat("hf/distilgpt2@latest"), ModelCategory::Nlp);
        assert_eq!(ModelCategory::Vision.to_string(), "vision");
    }

    #[test]
    fn test_serde_as_string() {
        let spec = ModelSpec::parse("hf/t5-small@latest").unwrap();
        let json = serde_json::to_string(&spec).unwrap();
        assert_eq!(json, "\"hf/t5-small@latest\"");
        let back: ModelSpec = serde_json::from_str(&json).unwrap();
        assert_eq!(back, spec);
        assert!(serde_json::from_str::<ModelSpec>("\"nope\"").is_err());
    }
}
