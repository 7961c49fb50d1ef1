// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! Model CLI subcommands: models, install, resolve.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use super::{EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};
use crate::config::HarnessConfig;
use crate::models::{test_models, CatalogScope, InstallOutcome, ModelSpec, PathResolver, TestModel};
use crate::process::TokioProcessRunner;
use crate::runner::TestRunner;

/// Print the models a run would cover.
pub fn run_list(config: &HarnessConfig) -> i32 {
    match test_models(CatalogScope::from_flags(config.minimal, config.test_all_models)) {
        Ok(models) => {
            print_models(&models);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

pub fn print_models(models: &[TestModel]) {
    if models.is_empty() {
        println!("No models in scope.");
        return;
    }

    println!("{:<10} {:<42} {:<12} {:<8}", "NAME", "SPEC", "CATEGORY", "INPUTS");
    println!("{}", "-".repeat(75));
    for m in models {
        let arity = serde_json::to_value(m.arity)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!(
            "{:<10} {:<42} {:<12} {:<8}",
            truncate(&m.name, 9),
            truncate(&m.spec.to_string(), 41),
            m.category.as_str(),
            arity,
        );
    }
    println!("{}", "-".repeat(75));
    println!("{} model(s)", models.len());
}

/// Install one model. Returns 0 when the model is usable afterwards.
pub async fn run_install(config: HarnessConfig, spec: &str, cancel: &CancellationToken) -> i32 {
    let installer = match TestRunner::from_config(config).and_then(|r| r.installer()) {
        Ok(installer) => installer,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };

    match installer.install(spec, cancel).await {
        InstallOutcome::AlreadyInstalled(found) => {
            println!("{} already installed at {}", spec, found.path.display());
            EXIT_OK
        }
        InstallOutcome::Installed { path, duration_ms } => {
            println!("{} installed at {} ({}ms)", spec, path.display(), duration_ms);
            EXIT_OK
        }
        InstallOutcome::Skipped(reason) => {
            println!("{} skipped: {} models need --all-models", spec, reason);
            EXIT_OK
        }
        InstallOutcome::Failed(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Print the cache path of an installed model.
pub async fn run_resolve(config: &HarnessConfig, spec: &str) -> i32 {
    let spec = match ModelSpec::parse(spec) {
        Ok(spec) => spec,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_FAILURE;
        }
    };
    let resolver = PathResolver::new(
        config.cache_root.clone(),
        config.tool_path.clone(),
        Arc::new(TokioProcessRunner::new()),
    );
    match resolver.resolve(&spec).await {
        Ok(found) => {
            println!("{}", found.path.display());
            tracing::debug!(strategy = ?found.strategy, "resolved");
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            for path in e.tried() {
                eprintln!("  tried {}", path.display());
            }
            EXIT_FAILURE
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    if s.len() <= max {
        s
    } else {
        &s[..max]
    }
}
