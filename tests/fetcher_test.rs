//! Integration tests for release fetching.
//!
//! The download CLI is scripted: its side effect drops a generated archive
//! into the `--dir` it was given, the way `gh release download` would.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use flate2::write::GzEncoder;
use flate2::Compression;

use mlos_system_test::process::{CommandSpec, ScriptedResponse, ScriptedRunner};
use mlos_system_test::release::{DiscoveryMethod, FetchConfig, FetchError, Platform, ReleaseFetcher};

const VERSION: &str = "v2.3.0-alpha";

/// Build a gzipped tarball from `(path, contents)` pairs.
fn tar_gz(files: &[(&str, &[u8])]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::fast()));
    for (path, data) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o755);
        header.set_cksum();
        builder.append_data(&mut header, path, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

/// Scripted `gh release download`. Like the real tool, it will not
/// overwrite an existing file unless `--clobber` is passed.
fn gh_serving(archive: Vec<u8>) -> ScriptedRunner {
    ScriptedRunner::new().on(
        "gh",
        Some("release"),
        ScriptedResponse::success()
            .refuse_when(|cmd: &CommandSpec| {
                let dir = PathBuf::from(cmd.flag_value("--dir")?);
                let target = dir.join(cmd.flag_value("--pattern")?);
                let clobber = cmd.args.iter().any(|a| a == "--clobber");
                (target.exists() && !clobber)
                    .then(|| format!("{} already exists (use `--clobber` to overwrite)", target.display()))
            })
            .with_effect(move |cmd: &CommandSpec| {
                let dir = PathBuf::from(cmd.flag_value("--dir").unwrap());
                let name = cmd.flag_value("--pattern").unwrap();
                std::fs::write(dir.join(name), &archive).unwrap();
            }),
    )
}

fn fetcher(runner: ScriptedRunner) -> (ReleaseFetcher, Arc<ScriptedRunner>) {
    let runner = Arc::new(runner);
    let config = FetchConfig {
        platform: Platform::new("linux", "amd64"),
        ..Default::default()
    };
    (ReleaseFetcher::new(runner.clone(), config), runner)
}

fn read(path: &Path) -> Vec<u8> {
    std::fs::read(path).unwrap()
}

// === Archive layouts ===

#[tokio::test]
async fn test_nested_bin_layout_is_normalized() {
    let out = tempfile::tempdir().unwrap();
    let archive = tar_gz(&[
        ("mlos-core-2.3.0/bin/mlos-server", b"#!/bin/sh\necho core\n"),
        ("mlos-core-2.3.0/README.md", b"readme"),
    ]);
    let (fetcher, runner) = fetcher(gh_serving(archive));

    let release = fetcher.fetch(VERSION, out.path()).await.unwrap();

    let root = out.path().join("mlos-core").join(VERSION).join("mlos-core-2.3.0");
    assert_eq!(release.root, root);
    assert_eq!(release.layout.single_nested_dir.as_deref(), Some("mlos-core-2.3.0"));
    assert_eq!(release.binary_path, root.join("build/mlos-server"));
    assert_eq!(read(&release.binary_path), b"#!/bin/sh\necho core\n");
    assert_eq!(release.discovered.unwrap().method, DiscoveryMethod::CommonPath);
    assert_eq!(release.sha256.len(), 64);

    let call = &runner.calls()[0];
    assert_eq!(call.args[..3], ["release", "download", VERSION]);
    assert_eq!(call.flag_value("--repo"), Some("mlOS-foundation/core"));
    assert_eq!(
        call.flag_value("--pattern"),
        Some("mlos-core_v2.3.0-alpha_linux-amd64.tar.gz")
    );
}

#[tokio::test]
async fn test_versioned_build_dir_is_a_common_path() {
    let out = tempfile::tempdir().unwrap();
    let archive = tar_gz(&[
        ("mlos-core-3.1.6/build/mlos-server", b"core 3.1.6"),
        ("mlos-core-3.1.6/build/onnxruntime/lib/libonnxruntime.so", b"ort"),
    ]);
    let (fetcher, _) = fetcher(gh_serving(archive));

    let release = fetcher.fetch(VERSION, out.path()).await.unwrap();

    let root = out.path().join("mlos-core").join(VERSION).join("mlos-core-3.1.6");
    assert_eq!(release.root, root);
    let discovered = release.discovered.unwrap();
    assert_eq!(discovered.method, DiscoveryMethod::CommonPath);
    assert_eq!(discovered.path, root.join("build/mlos-server"));
    assert_eq!(release.binary_path, root.join("build/mlos-server"));
    assert_eq!(read(&release.binary_path), b"core 3.1.6");
}

#[cfg(unix)]
#[tokio::test]
async fn test_normalized_binary_is_executable() {
    use std::os::unix::fs::PermissionsExt;

    let out = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher(gh_serving(tar_gz(&[("bin/mlos-server", b"bin")])));

    let release = fetcher.fetch(VERSION, out.path()).await.unwrap();
    let mode = std::fs::metadata(&release.binary_path).unwrap().permissions().mode();
    assert_ne!(mode & 0o111, 0);
}

#[tokio::test]
async fn test_flat_layout_uses_extract_dir() {
    let out = tempfile::tempdir().unwrap();
    let archive = tar_gz(&[
        ("build/mlos-server", b"core"),
        ("lib/libextra.so", b"lib"),
    ]);
    let (fetcher, _) = fetcher(gh_serving(archive));

    let release = fetcher.fetch(VERSION, out.path()).await.unwrap();

    // Two top-level directories: no descent.
    assert_eq!(release.layout.single_nested_dir, None);
    assert_eq!(release.root, out.path().join("mlos-core").join(VERSION));
    assert_eq!(release.binary_path, release.root.join("build/mlos-server"));
}

#[tokio::test]
async fn test_alternate_name_found_by_recursive_search() {
    let out = tempfile::tempdir().unwrap();
    let archive = tar_gz(&[("pkg/dist/x86/mlos_core", b"alt")]);
    let (fetcher, _) = fetcher(gh_serving(archive));

    let release = fetcher.fetch(VERSION, out.path()).await.unwrap();

    assert_eq!(release.discovered.as_ref().unwrap().method, DiscoveryMethod::RecursiveSearch);
    assert!(release.binary_path.ends_with("pkg/build/mlos-server"));
    assert_eq!(read(&release.binary_path), b"alt");
}

#[tokio::test]
async fn test_missing_binary_is_an_error() {
    let out = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher(gh_serving(tar_gz(&[("core/docs/index.html", b"<html>")])));

    let err = fetcher.fetch(VERSION, out.path()).await.unwrap_err();
    match err {
        FetchError::BinaryNotFound { searched_root } => assert!(searched_root.ends_with("core")),
        other => panic!("expected BinaryNotFound, got {:?}", other),
    }
}

// === Download failures ===

#[tokio::test]
async fn test_download_failure_carries_stderr() {
    let out = tempfile::tempdir().unwrap();
    let runner = ScriptedRunner::new().on(
        "gh",
        Some("release"),
        ScriptedResponse::exit(1).stderr("release not found"),
    );
    let (fetcher, _) = fetcher(runner);

    let err = fetcher.fetch("v0.0.0", out.path()).await.unwrap_err();
    match err {
        FetchError::Download { archive, reason } => {
            assert_eq!(archive, "mlos-core_v0.0.0_linux-amd64.tar.gz");
            assert!(reason.contains("release not found"));
        }
        other => panic!("expected Download, got {:?}", other),
    }
}

#[tokio::test]
async fn test_success_without_archive_is_a_download_error() {
    let out = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher(ScriptedRunner::new().on("gh", None, ScriptedResponse::success()));

    let err = fetcher.fetch(VERSION, out.path()).await.unwrap_err();
    assert!(matches!(err, FetchError::Download { .. }));
}

#[tokio::test]
async fn test_missing_download_tool() {
    let out = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher(ScriptedRunner::new());

    let err = fetcher.fetch(VERSION, out.path()).await.unwrap_err();
    assert!(matches!(err, FetchError::Download { .. }));
}

// === Reuse ===

#[tokio::test]
async fn test_locate_reopens_previous_fetch() {
    let out = tempfile::tempdir().unwrap();
    let (fetcher, runner) = fetcher(gh_serving(tar_gz(&[("core/bin/mlos-server", b"core")])));

    let fetched = fetcher.fetch(VERSION, out.path()).await.unwrap();
    let located = fetcher.locate(VERSION, out.path()).unwrap();

    assert_eq!(located.binary_path, fetched.binary_path);
    assert_eq!(located.sha256, fetched.sha256);
    assert!(located.discovered.is_none());
    assert_eq!(runner.call_count(), 1);
}

#[tokio::test]
async fn test_locate_without_fetch_fails() {
    let out = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher(ScriptedRunner::new());
    assert!(matches!(
        fetcher.locate(VERSION, out.path()),
        Err(FetchError::BinaryNotFound { .. })
    ));
}

#[tokio::test]
async fn test_refetch_replaces_previous_extraction() {
    let out = tempfile::tempdir().unwrap();
    let (first, _) = fetcher(gh_serving(tar_gz(&[("core/bin/mlos-server", b"old")])));
    first.fetch(VERSION, out.path()).await.unwrap();

    let (second, runner) = fetcher(gh_serving(tar_gz(&[("core/bin/mlos-server", b"new")])));
    let release = second.fetch(VERSION, out.path()).await.unwrap();
    assert_eq!(read(&release.binary_path), b"new");
    assert!(runner.calls()[0].args.iter().any(|a| a == "--clobber"));
}

#[tokio::test]
async fn test_partial_archive_from_earlier_attempt_is_replaced() {
    let out = tempfile::tempdir().unwrap();
    let (fetcher, _) = fetcher(gh_serving(tar_gz(&[("core/bin/mlos-server", b"core")])));
    let download_dir = out.path().join("mlos-core");
    std::fs::create_dir_all(&download_dir).unwrap();
    std::fs::write(download_dir.join(fetcher.archive_name(VERSION)), b"\x1f\x8b truncated").unwrap();

    let release = fetcher.fetch(VERSION, out.path()).await.unwrap();
    assert_eq!(read(&release.binary_path), b"core");
}
