//! Integration tests for model installation.
//!
//! Every test drives the installer against a scripted install tool and a
//! temporary cache directory; nothing real is launched.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use mlos_system_test::models::{
    CacheLocks, InstallError, InstallOutcome, InstallerConfig, KeywordDetector, ModelCategory, ModelInstaller, ResolveStrategy,
    SkipReason,
};
use mlos_system_test::process::{CommandSpec, ScriptedResponse, ScriptedRunner};
use mlos_system_test::telemetry::RecordingSink;

const TOOL: &str = "/opt/axon/bin/axon";

fn installer(runner: &Arc<ScriptedRunner>, sink: &Arc<RecordingSink>, cache: &Path) -> ModelInstaller {
    let config = InstallerConfig {
        heartbeat: Duration::from_secs(3),
        ..InstallerConfig::new(PathBuf::from(TOOL), cache.to_path_buf())
    };
    ModelInstaller::new(
        runner.clone(),
        Arc::new(KeywordDetector::standard().unwrap()),
        sink.clone(),
        config,
    )
}

fn write_model(path: &Path) {
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, b"onnx").unwrap();
}

/// Side effect that places the model where the real tool would.
fn writes_conventional(cache: &Path) -> impl Fn(&CommandSpec) + Send + Sync + 'static {
    let cache = cache.to_path_buf();
    move |cmd: &CommandSpec| {
        let spec = cmd.args.get(1).cloned().unwrap_or_default();
        let (repo_model, version) = spec.split_once('@').unwrap();
        write_model(&cache.join(repo_model).join(version).join("model.onnx"));
    }
}

// === Skip and short-circuit paths ===

#[tokio::test]
async fn test_already_installed_runs_no_install() {
    let cache = tempfile::tempdir().unwrap();
    write_model(&cache.path().join("hf/distilgpt2/latest/model.onnx"));

    let runner = Arc::new(ScriptedRunner::new());
    let sink = Arc::new(RecordingSink::new());
    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/distilgpt2@latest", &CancellationToken::new())
        .await;

    match outcome {
        InstallOutcome::AlreadyInstalled(found) => {
            assert_eq!(found.strategy, ResolveStrategy::Conventional);
            assert!(found.path.ends_with("hf/distilgpt2/latest/model.onnx"));
        }
        other => panic!("expected AlreadyInstalled, got {:?}", other),
    }
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_vision_model_is_skipped_without_subprocess() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/microsoft/resnet-50@latest", &CancellationToken::new())
        .await;

    assert!(matches!(
        outcome,
        InstallOutcome::Skipped(SkipReason::Category(ModelCategory::Vision))
    ));
    assert_eq!(runner.call_count(), 0);
}

#[tokio::test]
async fn test_invalid_spec_fails_before_any_call() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let sink = Arc::new(RecordingSink::new());
    let installer = installer(&runner, &sink, cache.path());

    for bad in ["hf/gpt2", "hf/gpt2@a@b", "@latest", "hf/gpt2@"] {
        let outcome = installer.install(bad, &CancellationToken::new()).await;
        assert!(
            matches!(outcome, InstallOutcome::Failed(InstallError::Parse(_))),
            "{} should not parse",
            bad
        );
    }
    assert_eq!(runner.call_count(), 0);
}

// === Repeat installs ===

#[tokio::test]
async fn test_reinstall_after_install_is_a_no_op() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success().with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());
    let installer = installer(&runner, &sink, cache.path());
    let cancel = CancellationToken::new();

    let first = installer.install("hf/distilgpt2@latest", &cancel).await;
    let second = installer.install("hf/distilgpt2@latest", &cancel).await;

    assert!(matches!(first, InstallOutcome::Installed { .. }), "{:?}", first);
    match second {
        InstallOutcome::AlreadyInstalled(found) => assert_eq!(Some(found.path.as_path()), first.path()),
        other => panic!("expected AlreadyInstalled, got {:?}", other),
    }
    assert_eq!(runner.calls_with_first_arg("install").len(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_shared_locks_serialize_concurrent_installs() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success()
            .delay(Duration::from_secs(5))
            .with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());
    let locks = CacheLocks::new();
    let a = installer(&runner, &sink, cache.path()).with_locks(locks.clone());
    let b = installer(&runner, &sink, cache.path()).with_locks(locks.clone());
    let cancel = CancellationToken::new();

    let (first, second) = tokio::join!(
        a.install("hf/distilgpt2@latest", &cancel),
        b.install("hf/distilgpt2@latest", &cancel)
    );

    assert!(matches!(first, InstallOutcome::Installed { .. }), "{:?}", first);
    assert!(matches!(second, InstallOutcome::AlreadyInstalled(_)), "{:?}", second);
    assert_eq!(runner.calls_with_first_arg("install").len(), 1);
    assert_eq!(locks.tracked_keys(), 1);
}

// === Tool results ===

#[tokio::test]
async fn test_successful_install_is_verified() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success()
            .stdout("Downloading model...\nConverting to ONNX\nsome noise\n")
            .with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/distilgpt2@latest", &CancellationToken::new())
        .await;

    match &outcome {
        InstallOutcome::Installed { path, .. } => assert!(path.ends_with("model.onnx")),
        other => panic!("expected Installed, got {:?}", other),
    }
    let installs = runner.calls_with_first_arg("install");
    assert_eq!(installs.len(), 1);
    assert_eq!(installs[0].args, vec!["install", "hf/distilgpt2@latest"]);
    assert!(sink.has_line_containing("Downloading model"));
    assert!(!sink.has_line_containing("some noise"));
}

#[tokio::test]
async fn test_flattened_layout_counts_as_installed() {
    let cache = tempfile::tempdir().unwrap();
    let target = cache.path().join("hf-bert-base-uncased-latest/model.onnx");
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success().with_effect(move |_| write_model(&target)),
    ));
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/bert-base-uncased@latest", &CancellationToken::new())
        .await;

    assert!(outcome.is_available(), "{:?}", outcome);
    assert!(outcome
        .path()
        .unwrap()
        .ends_with("hf-bert-base-uncased-latest/model.onnx"));
}

#[tokio::test]
async fn test_stderr_error_marker_fails_despite_exit_zero() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success()
            .stderr("conversion error: unsupported opset")
            .with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/gpt2@latest", &CancellationToken::new())
        .await;

    match outcome {
        InstallOutcome::Failed(InstallError::ReportedErrors { marker, .. }) => assert_eq!(marker, "error"),
        other => panic!("expected ReportedErrors, got {:?}", other),
    }
}

#[tokio::test]
async fn test_capitalised_error_is_not_a_failure() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success()
            .stderr("Error handling enabled")
            .with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/gpt2@latest", &CancellationToken::new())
        .await;

    assert_eq!(outcome.label(), "installed");
}

#[tokio::test]
async fn test_nonzero_exit_reports_cache_listing() {
    let cache = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(cache.path().join("hf/distilgpt2/latest")).unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::exit(3).stderr("network unreachable"),
    ));
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/distilgpt2@latest", &CancellationToken::new())
        .await;

    match outcome {
        InstallOutcome::Failed(InstallError::ToolFailed { exit, stderr, cache: listing, .. }) => {
            assert_eq!(exit.code, Some(3));
            assert_eq!(stderr, "network unreachable");
            assert_eq!(listing.total_entries, 1);
            assert_eq!(listing.entries[0].name, "hf");
            assert_eq!(listing.total_files, 0);
        }
        other => panic!("expected ToolFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_missing_file_after_success_fails_verification() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(
        ScriptedRunner::new()
            .on("axon", Some("install"), ScriptedResponse::success())
            .on("axon", Some("list"), ScriptedResponse::success().stdout("nothing installed")),
    );
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/t5-small@latest", &CancellationToken::new())
        .await;

    match outcome {
        InstallOutcome::Failed(InstallError::VerificationFailed { source, .. }) => {
            assert_eq!(source.tried().len(), 2);
        }
        other => panic!("expected VerificationFailed, got {:?}", other),
    }
}

#[tokio::test]
async fn test_launch_failure() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new());
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/gpt2@latest", &CancellationToken::new())
        .await;

    assert!(matches!(outcome, InstallOutcome::Failed(InstallError::Launch { .. })));
}

// === Heartbeat and cancellation ===

#[tokio::test(start_paused = true)]
async fn test_heartbeat_ticks_while_tool_runs() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success()
            .delay(Duration::from_secs(10))
            .with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/distilgpt2@latest", &CancellationToken::new())
        .await;

    assert!(outcome.is_available());
    let ticks = sink.ticks();
    assert_eq!(ticks.len(), 3);
    assert_eq!(ticks.iter().map(|t| t.sequence).collect::<Vec<_>>(), vec![1, 2, 3]);
    assert!(ticks.iter().all(|t| t.subject == "hf/distilgpt2@latest"));
    assert!(ticks[2].elapsed >= Duration::from_secs(9));
}

#[tokio::test(start_paused = true)]
async fn test_cancel_stops_waiting_for_tool() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success().delay(Duration::from_secs(600)),
    ));
    let sink = Arc::new(RecordingSink::new());
    let cancel = CancellationToken::new();

    let trigger = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(5)).await;
        trigger.cancel();
    });

    let outcome = installer(&runner, &sink, cache.path())
        .install("hf/gpt2@latest", &cancel)
        .await;

    assert!(matches!(outcome, InstallOutcome::Failed(InstallError::Cancelled { .. })));
    assert!(sink.ticks().len() < 3);
}

#[tokio::test]
async fn test_all_models_flag_installs_vision() {
    let cache = tempfile::tempdir().unwrap();
    let runner = Arc::new(ScriptedRunner::new().on(
        "axon",
        Some("install"),
        ScriptedResponse::success().with_effect(writes_conventional(cache.path())),
    ));
    let sink = Arc::new(RecordingSink::new());
    let config = InstallerConfig {
        test_all_models: true,
        ..InstallerConfig::new(PathBuf::from(TOOL), cache.path().to_path_buf())
    };
    let installer = ModelInstaller::new(
        runner.clone(),
        Arc::new(KeywordDetector::standard().unwrap()),
        sink.clone(),
        config,
    );

    let outcome = installer
        .install("hf/microsoft/resnet-50@latest", &CancellationToken::new())
        .await;

    assert_eq!(outcome.label(), "installed");
    assert_eq!(runner.calls_with_first_arg("install").len(), 1);
}
