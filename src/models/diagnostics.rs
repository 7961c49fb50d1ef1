//! Cache inspection attached to install failures.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

use super::ModelSpec;

const MAX_ENTRIES_SHOWN: usize = 10;
const MAX_FILES_SHOWN: usize = 15;
const MAX_FILES_WALKED: usize = 10_000;

/// Weight files left behind when ONNX conversion did not happen.
pub const PYTORCH_ARTIFACTS: &[&str] = &["pytorch_model.bin", "model.safetensors", "model.pt"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheEntry {
    pub name: String,
    pub is_dir: bool,
}

/// Snapshot of the model cache for failure reports.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CacheListing {
    pub root: PathBuf,
    /// First top-level entries, sorted.
    pub entries: Vec<CacheEntry>,
    pub total_entries: usize,
    /// First files (relative to root), sorted.
    pub files: Vec<String>,
    pub total_files: usize,
    pub onnx_files: Vec<String>,
    /// PyTorch weights found in the spec's conventional directory.
    pub pytorch_artifacts: Vec<String>,
    pub read_error: Option<String>,
}

impl CacheListing {
    /// Human-readable lines for progress output.
    pub fn summary_lines(&self) -> Vec<String> {
        let mut lines = Vec::new();
        if let Some(err) = &self.read_error {
            lines.push(format!("cannot read cache {}: {}", self.root.display(), err));
            return lines;
        }
        lines.push(format!(
            "cache {} contains {} entries",
            self.root.display(),
            self.total_entries
        ));
        for entry in &self.entries {
            lines.push(format!("  - {} (dir: {})", entry.name, entry.is_dir));
        }
        if self.total_entries > self.entries.len() {
            lines.push(format!("  ... and {} more", self.total_entries - self.entries.len()));
        }
        if self.total_files == 0 {
            lines.push("no files found in cache".to_string());
        } else {
            lines.push(format!("{} files in cache", self.total_files));
            for file in &self.files {
                lines.push(format!("  - {}", file));
            }
            if self.total_files > self.files.len() {
                lines.push(format!("  ... and {} more files", self.total_files - self.files.len()));
            }
        }
        if self.onnx_files.is_empty() {
            lines.push("no .onnx files in cache; model may be in PyTorch format".to_string());
        } else {
            lines.push(format!(".onnx files: {}", self.onnx_files.join(", ")));
        }
        if !self.pytorch_artifacts.is_empty() {
            lines.push(format!(
                "PyTorch weights present ({}); ONNX conversion did not run",
                self.pytorch_artifacts.join(", ")
            ));
        }
        lines
    }
}

fn walk_files(root: &Path, dir: &Path, out: &mut Vec<String>) {
    if out.len() >= MAX_FILES_WALKED {
        return;
    }
    let Ok(read) = fs::read_dir(dir) else {
        return;
    };
    let mut paths: Vec<PathBuf> = read.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            walk_files(root, &path, out);
        } else if let Ok(rel) = path.strip_prefix(root) {
            out.push(rel.to_string_lossy().into_owned());
        }
        if out.len() >= MAX_FILES_WALKED {
            return;
        }
    }
}

/// PyTorch weight files present directly in `dir`.
pub fn pytorch_artifacts(dir: &Path) -> Vec<String> {
    PYTORCH_ARTIFACTS
        .iter()
        .filter(|name| dir.join(name).is_file())
        .map(|name| name.to_string())
        .collect()
}

/// Inspect the cache root, optionally focusing on one spec's directory.
pub fn inspect_cache(root: &Path, spec: Option<&ModelSpec>) -> CacheListing {
    let mut listing = CacheListing {
        root: root.to_path_buf(),
        ..Default::default()
    };

    match fs::read_dir(root) {
        Ok(read) => {
            let mut entries: Vec<CacheEntry> = read
                .flatten()
                .map(|e| CacheEntry {
                    name: e.file_name().to_string_lossy().into_owned(),
                    is_dir: e.path().is_dir(),
                })
                .collect();
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            listing.total_entries = entries.len();
            entries.truncate(MAX_ENTRIES_SHOWN);
            listing.entries = entries;
        }
        Err(e) => {
            listing.read_error = Some(e.to_string());
            return listing;
        }
    }

    let mut files = Vec::new();
    walk_files(root, root, &mut files);
    listing.total_files = files.len();
    listing.onnx_files = files.iter().filter(|f| f.ends_with(".onnx")).cloned().collect();
    files.truncate(MAX_FILES_SHOWN);
    listing.files = files;

    if let Some(spec) = spec {
        let dir = root.join(spec.repository_model()).join(spec.version());
        listing.pytorch_artifacts = pytorch_artifacts(&dir);
    }
    listing
}

/// Hints derived from install-tool output.
pub fn output_hints(stdout: &str, stderr: &str) -> Vec<&'static str> {
    let combined = format!("{}\n{}", stdout, stderr);
    let mut hints = Vec::new();
    if combined.contains("ONNX conversion failed") {
        hints.push("ONNX conversion failed during installation");
        if combined.contains("ModuleNotFoundError") {
            hints.push("converter image may be broken or not loaded");
        }
        if combined.contains("execution_format: pytorch") {
            hints.push("installer fell back to PyTorch format, which the core server cannot load");
        }
    }
    hints
}
