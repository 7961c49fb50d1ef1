//! Locating the server binary inside an extracted release.

use std::fs;
use std::path::{Path, PathBuf};

use serde::Serialize;

/// Subdirectories probed before falling back to a full search.
const COMMON_DIRS: &[&str] = &["", "bin", "build"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    CommonPath,
    RecursiveSearch,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredBinary {
    pub path: PathBuf,
    pub method: DiscoveryMethod,
}

/// Probe `{root}/{name}`, `{root}/bin/{name}`, `{root}/build/{name}` for each
/// name in order, then search recursively. First match wins.
pub fn find_server_binary(root: &Path, names: &[String]) -> Option<DiscoveredBinary> {
    for name in names {
        for dir in COMMON_DIRS {
            let candidate = if dir.is_empty() {
                root.join(name)
            } else {
                root.join(dir).join(name)
            };
            if candidate.is_file() {
                return Some(DiscoveredBinary {
                    path: candidate,
                    method: DiscoveryMethod::CommonPath,
                });
            }
        }
    }

    find_first_matching(root, &|path: &Path| {
        path.file_name()
            .and_then(|n| n.to_str())
            .is_some_and(|n| names.iter().any(|name| name == n))
    })
    .map(|path| DiscoveredBinary {
        path,
        method: DiscoveryMethod::RecursiveSearch,
    })
}

/// Depth-first search in sorted name order for a regular file.
pub fn find_first_matching(dir: &Path, predicate: &dyn Fn(&Path) -> bool) -> Option<PathBuf> {
    let mut paths: Vec<PathBuf> = fs::read_dir(dir).ok()?.flatten().map(|e| e.path()).collect();
    paths.sort();
    for path in paths {
        if path.is_dir() {
            if let Some(found) = find_first_matching(&path, predicate) {
                return Some(found);
            }
        } else if path.is_file() && predicate(&path) {
            return Some(path);
        }
    }
    None
}
