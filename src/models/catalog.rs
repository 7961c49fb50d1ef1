//! Models exercised by a validation run.

use serde::Serialize;

use super::{ModelCategory, ModelSpec, SpecError};

/// Number of graph inputs a model expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum InputArity {
    Single,
    Multi,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TestModel {
    pub spec: ModelSpec,
    /// Short id used when registering with the core server.
    pub name: String,
    pub arity: InputArity,
    pub category: ModelCategory,
}

impl TestModel {
    fn new(spec: &str, name: &str, arity: InputArity) -> Result<Self, SpecError> {
        let spec = ModelSpec::parse(spec)?;
        let category = spec.category();
        Ok(Self {
            spec,
            name: name.to_string(),
            arity,
            category,
        })
    }
}

/// Which models a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CatalogScope {
    /// A single small model for smoke runs.
    Minimal,
    /// The NLP models that must always pass.
    #[default]
    Essential,
    /// Everything, including vision and multimodal models.
    All,
}

impl CatalogScope {
    pub fn from_flags(minimal: bool, all_models: bool) -> Self {
        if minimal {
            Self::Minimal
        } else if all_models {
            Self::All
        } else {
            Self::Essential
        }
    }
}

const MINIMAL: &[(&str, &str, InputArity)] = &[("hf/distilgpt2@latest", "gpt2", InputArity::Single)];

const ESSENTIAL: &[(&str, &str, InputArity)] = &[
    ("hf/distilgpt2@latest", "gpt2", InputArity::Single),
    ("hf/bert-base-uncased@latest", "bert", InputArity::Multi),
];

const EXTENDED: &[(&str, &str, InputArity)] = &[
    ("hf/roberta-base@latest", "roberta", InputArity::Multi),
    ("hf/t5-small@latest", "t5", InputArity::Multi),
    ("hf/microsoft/resnet-50@latest", "resnet", InputArity::Single),
    ("hf/timm/vgg16@latest", "vgg", InputArity::Single),
    ("hf/openai/clip-vit-base-patch32@latest", "clip", InputArity::Multi),
];

/// Test models for `scope`, in run order.
pub fn test_models(scope: CatalogScope) -> Result<Vec<TestModel>, SpecError> {
    let entries: Vec<&(&str, &str, InputArity)> = match scope {
        CatalogScope::Minimal => MINIMAL.iter().collect(),
        CatalogScope::Essential => ESSENTIAL.iter().collect(),
        CatalogScope::All => ESSENTIAL.iter().chain(EXTENDED.iter()).collect(),
    };
    entries
        .into_iter()
        .map(|(spec, name, arity)| TestModel::new(spec, name, *arity))
        .collect()
}
