//! Classify command implementation.

use anyhow::{Context, Result};
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::archive;
use crate::classifier::Classifier;
use crate::config::Config;
use crate::daemon::{classify_document, Feed};
use crate::utils::format_count;

const ZIP_MAGIC: &[u8] = b"PK\x03\x04";

/// Classify a local document and publish its lists.
pub fn run(file: &Path, output: Option<PathBuf>, social: bool, config_path: Option<&Path>) -> Result<()> {
    let config = Config::discover(config_path)?;
    let output = output.unwrap_or(config.output_dir);
    let feed = if social { Feed::Social } else { Feed::Dump };

    let mut reader = BufReader::new(
        File::open(file).with_context(|| format!("Failed to open {:?}", file))?,
    );
    let is_zip = reader
        .fill_buf()
        .with_context(|| format!("Failed to read {:?}", file))?
        .starts_with(ZIP_MAGIC);

    let mut classifier = Classifier::new(config.blocked_ip_policy);
    let stats = if is_zip {
        let mut raw = Vec::new();
        reader
            .read_to_end(&mut raw)
            .with_context(|| format!("Failed to read {:?}", file))?;
        archive::read_xml(&raw, |member| {
            Ok(classify_document(feed, member, &mut classifier)?)
        })?
    } else {
        classify_document(feed, reader, &mut classifier)
            .with_context(|| format!("Failed to decode {:?}", file))?
    };
    info!(
        "[{}] Classified {} entries from {:?}",
        feed,
        format_count(stats.entries),
        file
    );

    match feed {
        Feed::Dump => classifier.publish(&output)?,
        Feed::Social => classifier.publish_social(&output)?,
    }

    println!(
        "{} entries classified, lists written to {}",
        format_count(stats.entries),
        output.display()
    );
    if stats.tolerated > 0 {
        println!("{} malformed fragments skipped", stats.tolerated);
    }
    Ok(())
}
