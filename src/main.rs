//! mlos-system-test entry point.
//!
//! ## CLI Subcommands
//!
//! - `mlos-system-test` or `mlos-system-test run` - Full validation run (default)
//! - `mlos-system-test install <SPEC>` - Install one model
//! - `mlos-system-test resolve <SPEC>` - Print a model's cache path
//! - `mlos-system-test fetch <VERSION>` - Fetch a core release
//! - `mlos-system-test models` - List models in scope
//! - `mlos-system-test config show|defaults|validate`

use std::process::ExitCode;

use tokio_util::sync::CancellationToken;

use mlos_system_test::cli::{self, config_cmd, models_cmd, run_cmd, GlobalOptions};
use mlos_system_test::config::{self as harness_config, HarnessConfig};
use mlos_system_test::telemetry::{init_logging, LogConfig};

#[tokio::main]
async fn main() -> ExitCode {
    let raw: Vec<String> = std::env::args().skip(1).collect();
    let (global, args) = match cli::parse_global(&raw) {
        Ok(parsed) => parsed,
        Err(e) => {
            eprintln!("{}", e);
            print_usage();
            return exit(cli::EXIT_CONFIG);
        }
    };
    let command = args.first().map(|s| s.as_str()).unwrap_or("run");

    match command {
        "help" | "--help" | "-h" => {
            if let Some(subcommand) = args.get(1) {
                print_command_help(subcommand);
            } else {
                print_usage();
            }
            return ExitCode::SUCCESS;
        }
        "version" | "--version" | "-V" => {
            println!("mlos-system-test {}", env!("CARGO_PKG_VERSION"));
            return ExitCode::SUCCESS;
        }
        _ => {}
    }

    let mut config = match harness_config::load(global.config_file.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Configuration error: {}", e);
            return exit(cli::EXIT_CONFIG);
        }
    };

    // Bare flags imply `run`.
    let is_run = command == "run" || command.starts_with("--");
    if is_run {
        let flags = match args.first().map(String::as_str) {
            Some("run") => &args[1..],
            _ => &args[..],
        };
        if let Err(e) = cli::apply_run_flags(&mut config, flags) {
            eprintln!("{}", e);
            print_command_help("run");
            return exit(cli::EXIT_CONFIG);
        }
    }

    if let Err(e) = init_logging(&log_config(&global, is_run, &config)) {
        eprintln!("Logging setup failed: {}", e);
        return exit(cli::EXIT_CONFIG);
    }

    let code = match command {
        _ if is_run => {
            let cancel = cancel_on_ctrl_c();
            run_cmd::run_validation(config, &cancel).await
        }
        "install" => match args.get(1) {
            Some(spec) => {
                if let Err(e) = cli::apply_run_flags(&mut config, &args[2..]) {
                    eprintln!("{}", e);
                    return exit(cli::EXIT_CONFIG);
                }
                let cancel = cancel_on_ctrl_c();
                models_cmd::run_install(config, spec, &cancel).await
            }
            None => {
                print_command_help("install");
                cli::EXIT_CONFIG
            }
        },
        "resolve" => match args.get(1) {
            Some(spec) => models_cmd::run_resolve(&config, spec).await,
            None => {
                print_command_help("resolve");
                cli::EXIT_CONFIG
            }
        },
        "fetch" => match args.get(1) {
            Some(version) => run_cmd::run_fetch(config, version).await,
            None => {
                print_command_help("fetch");
                cli::EXIT_CONFIG
            }
        },
        "models" => {
            if let Err(e) = cli::apply_run_flags(&mut config, &args[1..]) {
                eprintln!("{}", e);
                return exit(cli::EXIT_CONFIG);
            }
            models_cmd::run_list(&config)
        }
        "config" => {
            let subcommand = args.get(1).map(|s| s.as_str()).unwrap_or("show");
            match subcommand {
                "show" => {
                    config_cmd::run_show(&config);
                    cli::EXIT_OK
                }
                "defaults" => {
                    config_cmd::run_defaults(&config.home_dir);
                    cli::EXIT_OK
                }
                "validate" => config_cmd::run_validate(&config),
                _ => {
                    eprintln!("Unknown config subcommand: {}", subcommand);
                    print_command_help("config");
                    cli::EXIT_FAILURE
                }
            }
        }
        _ => {
            eprintln!("Unknown command: {}", command);
            print_usage();
            cli::EXIT_FAILURE
        }
    };
    exit(code)
}

fn exit(code: i32) -> ExitCode {
    ExitCode::from(code.clamp(0, 255) as u8)
}

/// Runs also mirror their log into the output directory.
fn log_config(global: &GlobalOptions, is_run: bool, config: &HarnessConfig) -> LogConfig {
    let file = global
        .log_file
        .clone()
        .or_else(|| is_run.then(|| config.output_dir.join("test.log")));
    LogConfig::for_cli(global.log_format, global.verbose, file)
}

/// Cancelled on the first Ctrl-C; a second one kills the process.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let child = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupt received, stopping...");
            child.cancel();
            if tokio::signal::ctrl_c().await.is_ok() {
                std::process::exit(130);
            }
        }
    });
    token
}

fn print_usage() {
    let version = env!("CARGO_PKG_VERSION");
    eprintln!(
        "mlos-system-test - MLOS release validation harness v{}

USAGE:
    mlos-system-test [COMMAND] [OPTIONS]

COMMANDS:
    run           Fetch, install, start and exercise a release (default)
    install       Install one model with the install tool
    resolve       Print the cache path of an installed model
    fetch         Download and unpack a core release
    models        List the models a run covers
    config        Inspect configuration (show, defaults, validate)
    version       Show version information
    help          Show this help message

GLOBAL OPTIONS:
    --config FILE        TOML configuration file
    --log-format FORMAT  pretty (default) or json
    --log-file PATH      Mirror logs as JSON lines into PATH
    -v, --verbose        Debug logging

EXAMPLES:
    mlos-system-test                                  # Full run with defaults
    mlos-system-test run --minimal                    # CI smoke run
    mlos-system-test run --core-version v2.3.0-alpha --all-models
    mlos-system-test install hf/distilgpt2@latest
    mlos-system-test resolve hf/bert-base-uncased@latest
    mlos-system-test config validate

ENVIRONMENT:
    MLOS_TEST_*   Configuration overrides (see 'config show')
    GITHUB_TOKEN  Token for release API downloads (GH_TOKEN also read)
    RUST_LOG      Log filter (debug, info, warn, error)

EXIT CODES:
    0  Success
    1  Failure (including any failed inference)
    2  Configuration error
",
        version
    );
}

/// Print detailed help for a specific command.
fn print_command_help(command: &str) {
    match command {
        "run" => {
            eprintln!(
                "mlos-system-test run - Full validation run

USAGE:
    mlos-system-test run [OPTIONS]

OPTIONS:
    --axon-version VER  Install tool release (default: v3.0.0)
    --core-version VER  Core server release (default: v2.3.0-alpha)
    --output DIR        Output directory (default: e2e-results-<unix time>)
    --port PORT         Core server HTTP port (default: 18080)
    --cache-root DIR    Model cache root
    --tool PATH         Install tool binary
    --all-models        Include vision and multimodal models
    --minimal           Only one small model
    --skip-install      Reuse a release fetched earlier
    --no-preflight      Skip Docker checks before installs

DESCRIPTION:
    Downloads the core release, bootstraps the install tool, installs the
    test models, starts the server, registers every model and runs a small
    and a large inference against each NLP model. Results are written to
    <output>/metrics.json. Ctrl-C stops the server and aborts the run.
"
            );
        }
        "install" => {
            eprintln!(
                "mlos-system-test install - Install one model

USAGE:
    mlos-system-test install <REPO/MODEL@VERSION> [--all-models] [--no-preflight]

DESCRIPTION:
    Installs the model unless it is already in the cache. Vision and
    multimodal models are skipped unless --all-models is given.

EXAMPLES:
    mlos-system-test install hf/distilgpt2@latest
"
            );
        }
        "resolve" => {
            eprintln!(
                "mlos-system-test resolve - Locate an installed model

USAGE:
    mlos-system-test resolve <REPO/MODEL@VERSION>

DESCRIPTION:
    Prints the model.onnx path. Tries the conventional cache layout, the
    flattened layout, then the install tool's 'list' output.
"
            );
        }
        "fetch" => {
            eprintln!(
                "mlos-system-test fetch - Fetch a core release

USAGE:
    mlos-system-test fetch <VERSION>

DESCRIPTION:
    Downloads the platform archive, unpacks it under
    <output>/mlos-core/<VERSION> and normalizes the server binary to
    build/mlos-server.
"
            );
        }
        "config" => {
            eprintln!(
                "mlos-system-test config - Inspect configuration

USAGE:
    mlos-system-test config <SUBCOMMAND>

SUBCOMMANDS:
    show           Show effective configuration
    defaults       Show built-in defaults
    validate       Validate configuration (exit 2 when invalid)
"
            );
        }
        _ => {
            eprintln!(
                "No detailed help available for '{}'. Use 'mlos-system-test help' for general usage.",
                command
            );
        }
    }
}
