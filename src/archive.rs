//! Extraction of the registry document from its zip container.
//!
//! The registry ships `dump.xml` next to a detached signature; only the
//! XML member is of interest.

use anyhow::{bail, Context, Result};
use std::io::{Cursor, Read};
use tracing::info;
use zip::ZipArchive;

use crate::utils::format_bytes;

/// Hand the first `*.xml` member of a zip archive to `read` as a stream.
///
/// The member is inflated as `read` consumes it.
pub fn read_xml<T, F>(archive: &[u8], read: F) -> Result<T>
where
    F: FnOnce(&mut dyn Read) -> Result<T>,
{
    let mut zip = ZipArchive::new(Cursor::new(archive)).context("Failed to open zip archive")?;

    let index = (0..zip.len()).find(|&i| {
        zip.name_for_index(i)
            .is_some_and(|name| !name.ends_with('/') && name.to_ascii_lowercase().ends_with(".xml"))
    });
    let Some(index) = index else {
        bail!("Archive contains no .xml document");
    };

    let mut member = zip
        .by_index(index)
        .with_context(|| format!("Failed to read zip member #{}", index))?;
    let name = member.name().to_string();
    info!("Found {} ({})", name, format_bytes(member.size()));

    read(&mut member).with_context(|| format!("Failed to read {}", name))
}
