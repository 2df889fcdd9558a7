//! Run command implementation.

use anyhow::{Context, Result};
use std::path::Path;
use std::sync::Arc;
use tracing::info;

use crate::config::Config;
use crate::daemon::App;
use crate::fetcher::SoapFetcher;

/// Run the daemon until shutdown, or once with `--cron`.
pub async fn run(cron: bool, config_path: Option<&Path>) -> Result<()> {
    let mut config = Config::discover(config_path)?;
    if cron {
        config.cron = true;
    }
    config.validate().context("Invalid configuration")?;

    info!(
        "Starting rkndaemon {} (dump: {}, social: {}, resolver: {}, one-shot: {})",
        env!("CARGO_PKG_VERSION"),
        config.use_dump,
        config.use_soc,
        config.use_resolver,
        config.cron
    );

    let fetcher = SoapFetcher::new(&config)?;
    App::new(config, Arc::new(fetcher))?.run().await
}
