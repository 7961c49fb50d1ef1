//! Archive extraction and top-level layout resolution.

use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Path, PathBuf};

use flate2::read::GzDecoder;
use serde::Serialize;
use tar::Archive;

/// Where an extracted release actually starts.
///
/// Archives either contain a single wrapper directory (`mlos-core-3.1.6/`)
/// or their files directly. Exactly one top-level directory means the root
/// is that directory; zero or several mean the extraction directory itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ArchiveLayout {
    pub extract_dir: PathBuf,
    pub single_nested_dir: Option<String>,
}

impl ArchiveLayout {
    pub fn resolve(extract_dir: &Path) -> io::Result<Self> {
        let mut dirs = Vec::new();
        for entry in fs::read_dir(extract_dir)? {
            let entry = entry?;
            if entry.file_type()?.is_dir() {
                dirs.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        let single_nested_dir = if dirs.len() == 1 { dirs.pop() } else { None };
        Ok(Self {
            extract_dir: extract_dir.to_path_buf(),
            single_nested_dir,
        })
    }

    pub fn root(&self) -> PathBuf {
        match &self.single_nested_dir {
            Some(dir) => self.extract_dir.join(dir),
            None => self.extract_dir.clone(),
        }
    }
}

/// Unpack a `.tar.gz` into `dest`, returning the number of entries written.
///
/// Entries that would escape `dest` are skipped.
pub fn extract_tar_gz(archive_path: &Path, dest: &Path) -> io::Result<usize> {
    fs::create_dir_all(dest)?;
    let file = File::open(archive_path)?;
    extract_tar(GzDecoder::new(file), dest)
}

fn extract_tar<R: Read>(reader: R, dest: &Path) -> io::Result<usize> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    let mut written = 0;
    for entry in archive.entries()? {
        let mut entry = entry?;
        if entry.unpack_in(dest)? {
            written += 1;
        } else {
            tracing::warn!(path = ?entry.path().ok(), "skipping archive entry outside destination");
        }
    }
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_dir_is_descended() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("mlos-core-3.1.6")).unwrap();
        fs::write(dir.path().join("README"), b"x").unwrap();
        let layout = ArchiveLayout::resolve(dir.path()).unwrap();
        assert_eq!(layout.single_nested_dir.as_deref(), Some("mlos-core-3.1.6"));
        assert_eq!(layout.root(), dir.path().join("mlos-core-3.1.6"));
    }

    #[test]
    fn test_multiple_dirs_use_extract_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("bin")).unwrap();
        fs::create_dir(dir.path().join("lib")).unwrap();
        let layout = ArchiveLayout::resolve(dir.path()).unwrap();
        assert_eq!(layout.single_nested_dir, None);
        assert_eq!(layout.root(), dir.path());
    }

    #[test]
    fn test_no_dirs_use_extract_root() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("mlos_core"), b"x").unwrap();
        let layout = ArchiveLayout::resolve(dir.path()).unwrap();
        assert_eq!(layout.root(), dir.path());
    }

    #[test]
    fn test_extract_rejects_corrupt_archive() {
        let dir = tempfile::tempdir().unwrap();
        let bogus = dir.path().join("bogus.tar.gz");
        fs::write(&bogus, b"definitely not gzip").unwrap();
        assert!(extract_tar_gz(&bogus, &dir.path().join("out")).is_err());
    }
}
