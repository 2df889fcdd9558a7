//! Persisted dump version marker.
//!
//! A single plain-text file holding the registry's last dump timestamp
//! (epoch milliseconds). A missing file means the dump was never fetched.

use anyhow::{Context, Result};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct Marker {
    path: PathBuf,
}

impl Marker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the last seen version.
    ///
    /// Absent or unparseable content yields `None`, which only costs one
    /// redundant fetch.
    pub fn load(&self) -> Result<Option<i64>> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read marker {:?}", self.path))
            }
        };

        match content.trim().parse::<i64>() {
            Ok(version) => Ok(Some(version)),
            Err(_) => {
                warn!("Ignoring malformed marker {:?}: {:?}", self.path, content.trim());
                Ok(None)
            }
        }
    }

    /// Save a version atomically (tempfile + rename).
    pub fn save(&self, version: i64) -> Result<()> {
        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create marker directory {:?}", parent))?;

        let mut temp_file =
            NamedTempFile::new_in(parent).context("Failed to create temporary marker file")?;
        writeln!(temp_file, "{}", version)?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(&self.path)
            .with_context(|| format!("Failed to persist marker {:?}", self.path))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_marker_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let marker = Marker::new(dir.path().join("lastrkndump"));
        assert_eq!(marker.load().unwrap(), None);
    }

    #[test]
    fn test_save_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let marker = Marker::new(dir.path().join("state/lastrkndump"));
        marker.save(1_700_000_000_123).unwrap();
        assert_eq!(marker.load().unwrap(), Some(1_700_000_000_123));

        marker.save(1_700_000_000_456).unwrap();
        assert_eq!(marker.load().unwrap(), Some(1_700_000_000_456));
        assert_eq!(
            fs::read_to_string(marker.path()).unwrap(),
            "1700000000456\n"
        );
    }

    #[test]
    fn test_malformed_marker_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lastrkndump");
        fs::write(&path, "yesterday").unwrap();
        assert_eq!(Marker::new(path).load().unwrap(), None);
    }

    #[test]
    fn test_marker_is_directory_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Marker::new(dir.path()).load().is_err());
    }
}
