//! Locates an installed model's ONNX file.
//!
//! Strategies, first hit wins:
//! 1. `{cache_root}/{repository_model}/{version}/model.onnx`
//! 2. `{cache_root}/{flattened}/model.onnx`
//! 3. the install tool's `list` output
//!
//! The resolver never installs anything.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use super::ModelSpec;
use crate::process::{CommandSpec, ProcessRunner};

pub const MODEL_FILE: &str = "model.onnx";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ResolveStrategy {
    Conventional,
    FlattenedSlug,
    QueriedFromTool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPath {
    pub path: PathBuf,
    pub strategy: ResolveStrategy,
}

#[derive(Error, Debug, Clone)]
pub enum ResolveError {
    #[error("Model {spec} not found ({} paths tried, tool queried: {queried})", .tried.len())]
    NotFound {
        spec: String,
        tried: Vec<PathBuf>,
        queried: bool,
    },
}

impl ResolveError {
    pub fn tried(&self) -> &[PathBuf] {
        match self {
            Self::NotFound { tried, .. } => tried,
        }
    }
}

/// Extract absolute `.onnx` paths from `list` output lines mentioning `spec`.
pub fn listed_paths(output: &str, spec: &str) -> Vec<PathBuf> {
    output
        .lines()
        .filter(|line| line.contains(spec))
        .flat_map(|line| line.split_whitespace())
        .map(|token| token.trim_matches(|c: char| matches!(c, '"' | '\'' | ',' | '(' | ')' | '[' | ']')))
        .filter(|token| token.ends_with(".onnx") && Path::new(token).is_absolute())
        .map(PathBuf::from)
        .collect()
}

fn absolute(path: PathBuf) -> PathBuf {
    std::path::absolute(&path).unwrap_or(path)
}

pub struct PathResolver {
    cache_root: PathBuf,
    tool: PathBuf,
    runner: Arc<dyn ProcessRunner>,
}

impl PathResolver {
    pub fn new(cache_root: PathBuf, tool: PathBuf, runner: Arc<dyn ProcessRunner>) -> Self {
        Self {
            cache_root,
            tool,
            runner,
        }
    }

    pub fn cache_root(&self) -> &Path {
        &self.cache_root
    }

    /// Filesystem candidates in strategy order.
    pub fn candidate_paths(&self, spec: &ModelSpec) -> [PathBuf; 2] {
        [
            self.cache_root
                .join(spec.repository_model())
                .join(spec.version())
                .join(MODEL_FILE),
            self.cache_root.join(spec.flattened()).join(MODEL_FILE),
        ]
    }

    /// Strategies 1 and 2 only; no subprocess.
    pub fn resolve_local(&self, spec: &ModelSpec) -> Result<ResolvedPath, ResolveError> {
        let [conventional, flattened] = self.candidate_paths(spec);
        if conventional.is_file() {
            return Ok(ResolvedPath {
                path: absolute(conventional),
                strategy: ResolveStrategy::Conventional,
            });
        }
        if flattened.is_file() {
            return Ok(ResolvedPath {
                path: absolute(flattened),
                strategy: ResolveStrategy::FlattenedSlug,
            });
        }
        Err(ResolveError::NotFound {
            spec: spec.to_string(),
            tried: vec![conventional, flattened],
            queried: false,
        })
    }

    pub async fn resolve(&self, spec: &ModelSpec) -> Result<ResolvedPath, ResolveError> {
        let tried = match self.resolve_local(spec) {
            Ok(found) => return Ok(found),
            Err(ResolveError::NotFound { tried, .. }) => tried,
        };

        let spec_str = spec.to_string();
        let cmd = CommandSpec::new(&self.tool).arg("list");
        let mut tried = tried;
        match self.runner.run(&cmd).await {
            Ok(output) if output.success() => {
                for candidate in listed_paths(&output.stdout, &spec_str) {
                    if candidate.is_file() {
                        tracing::debug!(spec = %spec_str, path = %candidate.display(), "resolved via list");
                        return Ok(ResolvedPath {
                            path: candidate,
                            strategy: ResolveStrategy::QueriedFromTool,
                        });
                    }
                    tried.push(candidate);
                }
            }
            Ok(output) => {
                tracing::debug!(spec = %spec_str, exit = %output.exit, "list query failed");
            }
            Err(e) => {
                tracing::debug!(spec = %spec_str, error = %e, "list query could not run");
            }
        }

        Err(ResolveError::NotFound {
            spec: spec_str,
            tried,
            queried: true,
        })
    }
}
