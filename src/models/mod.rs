//! Model handling for the harness.
//!
//! Spec parsing, cache path resolution and installation through the
//! external install tool.

pub mod catalog;
pub mod detector;
pub mod diagnostics;
pub mod preflight;
pub mod resolver;

mod cache_lock;
mod installer;
mod model_spec;

pub use cache_lock::CacheLocks;
pub use catalog::{test_models, CatalogScope, InputArity, TestModel};
pub use detector::{detector_from_pattern, FailureDetector, KeywordDetector, PatternDetector};
pub use installer::{InstallError, InstallOutcome, InstallerConfig, ModelInstaller, SkipReason};
pub use model_spec::{ModelCategory, ModelSpec, SpecError};
pub use resolver::{PathResolver, ResolveError, ResolveStrategy, ResolvedPath};
