//! Deduplicated string set used for every published blocklist.
//!
//! Membership is the only operation; iteration and serialization are always
//! in sorted order so two runs over the same input produce identical files.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CanonicalSet {
    items: BTreeSet<String>,
}

impl CanonicalSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a value. Empty strings are ignored.
    pub fn add(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !value.is_empty() {
            self.items.insert(value);
        }
    }

    pub fn contains(&self, value: &str) -> bool {
        self.items.contains(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Add every member of `other` to this set.
    pub fn union_with(&mut self, other: &CanonicalSet) {
        self.items.extend(other.items.iter().cloned());
    }

    /// Members in sorted order.
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.items.iter().map(String::as_str)
    }

    pub fn is_subset(&self, other: &CanonicalSet) -> bool {
        self.items.is_subset(&other.items)
    }

    /// Sorted, newline-terminated text form.
    pub fn to_text(&self) -> String {
        let mut out = String::with_capacity(self.items.iter().map(|s| s.len() + 1).sum());
        for item in &self.items {
            out.push_str(item);
            out.push('\n');
        }
        out
    }

    /// Write the set to `path`, replacing any previous content atomically.
    ///
    /// The content goes to a temporary file in the same directory first and
    /// is renamed into place, so readers never see a partial list.
    pub fn write_file(&self, path: &Path) -> Result<()> {
        let parent = match path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut temp_file = NamedTempFile::new_in(parent)
            .with_context(|| format!("Failed to create temporary file in {:?}", parent))?;

        temp_file.write_all(self.to_text().as_bytes())?;
        temp_file.as_file().sync_all()?;

        temp_file
            .persist(path)
            .with_context(|| format!("Failed to persist {:?}", path))?;

        Ok(())
    }
}

impl<S: Into<String>> FromIterator<S> for CanonicalSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        let mut set = CanonicalSet::new();
        for item in iter {
            set.add(item);
        }
        set
    }
}

impl<S: Into<String>> Extend<S> for CanonicalSet {
    fn extend<I: IntoIterator<Item = S>>(&mut self, iter: I) {
        for item in iter {
            self.add(item);
        }
    }
}
