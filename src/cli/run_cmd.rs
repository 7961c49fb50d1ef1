// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! Run CLI subcommands: the full validation and release fetching.

use tokio_util::sync::CancellationToken;

use super::{EXIT_CONFIG, EXIT_FAILURE, EXIT_OK};
use crate::config::HarnessConfig;
use crate::results::RunResults;
use crate::runner::{RunError, TestRunner};

/// Full validation run. Returns 0 only when every inference passed.
pub async fn run_validation(config: HarnessConfig, cancel: &CancellationToken) -> i32 {
    if let Err(e) = config.validate() {
        eprintln!("ERROR: {}", e);
        return EXIT_CONFIG;
    }
    let runner = match TestRunner::from_config(config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };

    match runner.run(cancel).await {
        Ok(results) => {
            print_summary(&results, &runner.config().results_path().display().to_string());
            if results.success_rate >= 100.0 {
                EXIT_OK
            } else {
                EXIT_FAILURE
            }
        }
        Err(RunError::Cancelled) => {
            eprintln!("Run cancelled.");
            EXIT_FAILURE
        }
        Err(e) => {
            eprintln!("E2E test failed: {}", e);
            EXIT_FAILURE
        }
    }
}

/// Fetch and normalize a core release into the output directory.
pub async fn run_fetch(config: HarnessConfig, version: &str) -> i32 {
    let runner = match TestRunner::from_config(config) {
        Ok(runner) => runner,
        Err(e) => {
            eprintln!("Error: {}", e);
            return EXIT_CONFIG;
        }
    };
    match runner.fetcher().fetch(version, &runner.config().output_dir).await {
        Ok(release) => {
            println!("binary: {}", release.binary_path.display());
            println!("sha256: {}", release.sha256);
            if let Some(found) = &release.discovered {
                println!("found:  {} ({:?})", found.path.display(), found.method);
            }
            println!("took:   {}ms", release.duration_ms);
            EXIT_OK
        }
        Err(e) => {
            eprintln!("Error: {}", e);
            EXIT_FAILURE
        }
    }
}

pub fn print_summary(results: &RunResults, results_path: &str) {
    let m = &results.metrics;
    println!();
    println!("Test Summary");
    println!("{}", "-".repeat(60));
    println!("Test completed in {:.1}s", results.duration_ms as f64 / 1000.0);
    println!();
    println!("Release Versions:");
    println!("  - Axon: {}", results.axon_version);
    println!("  - Core: {}", results.core_version);
    println!();
    println!("Installation:");
    println!("  - Axon bootstrap: {}ms", m.tool_bootstrap_ms);
    println!("  - Core download: {}ms", m.core_download_ms);
    println!("  - Core startup: {}ms", m.core_startup_ms);
    println!("  - Models installed: {}", m.models_installed);
    println!();
    println!("Inference:");
    println!("  - Total tests: {}", m.total_inferences);
    println!("  - Successful: {}", m.successful_inferences);
    println!("  - Success rate: {:.1}%", results.success_rate);
    println!();
    println!("Results: {}", results_path);
    println!();
    if results.success_rate >= 100.0 {
        println!("ALL TESTS PASSED");
    } else {
        println!("SOME TESTS FAILED");
    }
}
