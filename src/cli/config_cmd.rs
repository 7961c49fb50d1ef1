// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! Config CLI subcommands: show, defaults, validate.

use std::path::Path;

use super::{EXIT_CONFIG, EXIT_OK};
use crate::config::{EffectiveConfig, HarnessConfig};

/// Print effective config as key-value pairs to stdout.
pub fn run_show(config: &HarnessConfig) {
    print_config(&config.effective_config());
}

/// Print default config values (no file or env overrides) to stdout.
pub fn run_defaults(home: &Path) {
    print_config(&HarnessConfig::defaults(home).effective_config());
}

/// Returns 0 if valid, 2 otherwise.
pub fn run_validate(config: &HarnessConfig) -> i32 {
    let mut warnings = 0;
    if let Err(e) = config.validate() {
        eprintln!("ERROR: {}", e);
        return EXIT_CONFIG;
    }

    if config.health_attempts < 5 {
        eprintln!(
            "WARNING: MLOS_TEST_HEALTH_ATTEMPTS ({}) leaves little time for server startup",
            config.health_attempts
        );
        warnings += 1;
    }
    if !config.tool_path.is_file() {
        eprintln!(
            "WARNING: install tool not found at {}; it will be bootstrapped on first run",
            config.tool_path.display()
        );
        warnings += 1;
    }

    if warnings == 0 {
        println!("Configuration is valid.");
    } else {
        println!("Configuration is valid ({} warning(s)).", warnings);
    }
    EXIT_OK
}

fn print_config(cfg: &EffectiveConfig) {
    println!("MLOS_TEST_AXON_VERSION={}", cfg.axon_version);
    println!("MLOS_TEST_CORE_VERSION={}", cfg.core_version);
    println!("MLOS_TEST_OUTPUT_DIR={}", cfg.output_dir);
    println!("MLOS_TEST_PORT={}", cfg.port);
    println!("MLOS_TEST_CACHE_ROOT={}", cfg.cache_root);
    println!("MLOS_TEST_TOOL_PATH={}", cfg.tool_path);
    println!("MLOS_TEST_ALL_MODELS={}", cfg.test_all_models);
    println!("MLOS_TEST_MINIMAL={}", cfg.minimal);
    println!("MLOS_TEST_SKIP_INSTALL={}", cfg.skip_install);
    println!("MLOS_TEST_HEARTBEAT_SECS={}", cfg.heartbeat_secs);
    println!("MLOS_TEST_HEALTH_ATTEMPTS={}", cfg.health_attempts);
    println!("MLOS_TEST_HEALTH_INTERVAL_MS={}", cfg.health_interval_ms);
    println!("MLOS_TEST_RESOURCE_WINDOW_MS={}", cfg.resource_window_ms);
    println!("MLOS_TEST_GITHUB_REPO={}", cfg.github_repo);
    println!("MLOS_TEST_STDERR_PATTERN={}", cfg.stderr_pattern.as_deref().unwrap_or(""));
    println!("MLOS_TEST_PLATFORM={}", cfg.platform);
    println!("MLOS_TEST_PREFLIGHT={}", cfg.preflight);
    println!("GITHUB_TOKEN={}", if cfg.github_token_set { "<set>" } else { "" });
    if let Some(file) = &cfg.source_file {
        println!("# loaded from {}", file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_passes_with_defaults() {
        let cfg = HarnessConfig::defaults(Path::new("/nonexistent-home"));
        assert_eq!(run_validate(&cfg), EXIT_OK);
    }

    #[test]
    fn test_validate_fails_on_empty_version() {
        let mut cfg = HarnessConfig::defaults(Path::new("/nonexistent-home"));
        cfg.core_version = String::new();
        assert_eq!(run_validate(&cfg), EXIT_CONFIG);
    }

    #[test]
    fn test_validate_fails_on_bad_repo() {
        let mut cfg = HarnessConfig::defaults(Path::new("/nonexistent-home"));
        cfg.github_repo = "core".into();
        assert_eq!(run_validate(&cfg), EXIT_CONFIG);
    }
}
