// Copyright 2024-2026 MLOS System Test Contributors
// SPDX-License-Identifier: Apache-2.0

//! CLI support for the harness binary.
//!
//! ## Usage
//!
//! ```bash
//! mlos-system-test                         # full validation run
//! mlos-system-test install hf/gpt2@latest  # install one model
//! mlos-system-test resolve hf/gpt2@latest  # print its cache path
//! mlos-system-test fetch v2.3.0-alpha      # fetch a core release
//! mlos-system-test config show             # effective configuration
//! ```
//!
//! Subcommands return process exit codes: 0 success, 1 failure,
//! 2 configuration error.

pub mod config_cmd;
pub mod models_cmd;
pub mod run_cmd;

use std::path::PathBuf;

use crate::config::HarnessConfig;
use crate::telemetry::{LogError, LogFormat};

pub const EXIT_OK: i32 = 0;
pub const EXIT_FAILURE: i32 = 1;
pub const EXIT_CONFIG: i32 = 2;

/// Flags accepted before or after any command.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GlobalOptions {
    pub config_file: Option<PathBuf>,
    pub log_format: LogFormat,
    pub log_file: Option<PathBuf>,
    pub verbose: bool,
}

/// Split global flags out of `args` (program name excluded). The remaining
/// arguments keep their order.
pub fn parse_global(args: &[String]) -> Result<(GlobalOptions, Vec<String>), String> {
    let mut opts = GlobalOptions::default();
    let mut rest = Vec::new();
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--config" => {
                opts.config_file = Some(PathBuf::from(value_of(args, i, "--config")?));
                i += 2;
            }
            "--log-format" => {
                opts.log_format = value_of(args, i, "--log-format")?
                    .parse()
                    .map_err(|e: LogError| e.to_string())?;
                i += 2;
            }
            "--log-file" => {
                opts.log_file = Some(PathBuf::from(value_of(args, i, "--log-file")?));
                i += 2;
            }
            "-v" | "--verbose" => {
                opts.verbose = true;
                i += 1;
            }
            _ => {
                rest.push(args[i].clone());
                i += 1;
            }
        }
    }
    Ok((opts, rest))
}

/// Apply `run`-style flags to a loaded configuration.
pub fn apply_run_flags(config: &mut HarnessConfig, args: &[String]) -> Result<(), String> {
    let mut i = 0;
    while i < args.len() {
        let flag = args[i].as_str();
        match flag {
            "--all-models" => config.test_all_models = true,
            "--minimal" => config.minimal = true,
            "--skip-install" => config.skip_install = true,
            "--no-preflight" => config.preflight = false,
            "--axon-version" | "--core-version" | "--output" | "--port" | "--cache-root" | "--tool" => {
                let value = value_of(args, i, flag)?;
                match flag {
                    "--axon-version" => config.axon_version = value.to_string(),
                    "--core-version" => config.core_version = value.to_string(),
                    "--output" => config.output_dir = PathBuf::from(value),
                    "--cache-root" => config.cache_root = PathBuf::from(value),
                    "--tool" => config.tool_path = PathBuf::from(value),
                    _ => {
                        config.port = value
                            .parse()
                            .map_err(|_| format!("Invalid value for --port: {}", value))?
                    }
                }
                i += 1;
            }
            other => return Err(format!("Unknown argument: {}", other)),
        }
        i += 1;
    }
    Ok(())
}

fn value_of<'a>(args: &'a [String], i: usize, flag: &str) -> Result<&'a str, String> {
    args.get(i + 1)
        .map(String::as_str)
        .ok_or_else(|| format!("Missing value for {}", flag))
}
