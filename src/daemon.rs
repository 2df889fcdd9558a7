//! Feed orchestration.
//!
//! Two feeds run side by side, each in its own task:
//!
//! - **dump**: polls the dump version every `dump_interval` minutes and
//!   processes the dump only when the version changed.
//! - **social**: fetches the social resources register every
//!   `social_interval` minutes unconditionally.
//!
//! One cycle is fetch, classify, publish, optionally resolve, then the post
//! hook. A cycle always runs to the end once started; shutdown requests are
//! honored between cycles. Transient failures are retried after a fixed
//! backoff. Filesystem failures abort the cycle, and the whole run in
//! one-shot mode.

use anyhow::{Context, Result};
use chrono::DateTime;
use std::fmt;
use std::io::Read;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

use crate::archive;
use crate::classifier::Classifier;
use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
use crate::config::Config;
use crate::decoder::{self, DecodeStats};
use crate::error::{CycleError, DecodeError};
use crate::fetcher::Fetcher;
use crate::hook;
use crate::http;
use crate::lock::LockGuard;
use crate::marker::Marker;
use crate::resolver::{self, ResolveStats, Resolver};
use crate::signal::{
    is_shutdown_requested, request_shutdown, sleep_unless_shutdown, wait_for_shutdown,
};
use crate::utils::format_count;
use crate::validation::{validate_dns_server, validate_listen_addr};

/// Pause after a transient failure before retrying the same step.
pub const RETRY_BACKOFF: Duration = Duration::from_secs(30);

/// Builds a fresh resolver for every cycle.
pub type ResolverFactory = Arc<dyn Fn() -> Resolver + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Feed {
    Dump,
    Social,
}

impl Feed {
    pub fn name(self) -> &'static str {
        match self {
            Feed::Dump => "dump",
            Feed::Social => "social",
        }
    }
}

impl fmt::Display for Feed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Result of one completed cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CycleOutcome {
    /// The dump version did not change; nothing was fetched.
    Unchanged { version: i64 },
    /// Lists were published.
    Published {
        /// Dump version processed; `None` for the social feed.
        version: Option<i64>,
        decode: DecodeStats,
        resolve: Option<ResolveStats>,
    },
}

/// Stream a registry document and classify every entry of `feed`.
pub fn classify_document<R: Read>(
    feed: Feed,
    source: R,
    classifier: &mut Classifier,
) -> Result<DecodeStats, DecodeError> {
    match feed {
        Feed::Dump => decoder::read_dump(source, |entry| classifier.classify_entry(&entry)),
        Feed::Social => decoder::read_social(source, |entry| classifier.classify_social(&entry)),
    }
}

fn version_time(version: i64) -> String {
    DateTime::from_timestamp_millis(version)
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| "invalid timestamp".to_string())
}

/// The orchestrator.
pub struct App {
    config: Arc<Config>,
    fetcher: Arc<dyn Fetcher>,
    executor: Arc<dyn CommandExecutor>,
    resolver_factory: ResolverFactory,
    marker: Marker,
    backoff: Duration,
}

impl App {
    pub fn new(config: Config, fetcher: Arc<dyn Fetcher>) -> Result<Self> {
        let servers = config
            .dns_servers
            .iter()
            .map(|s| validate_dns_server(s))
            .collect::<Result<Vec<SocketAddr>>>()?;
        let resolver_factory: ResolverFactory =
            Arc::new(move || Resolver::with_servers(&servers));

        Ok(Self {
            marker: Marker::new(config.marker_file.clone()),
            config: Arc::new(config),
            fetcher,
            executor: Arc::new(RealCommandExecutor::new()),
            resolver_factory,
            backoff: RETRY_BACKOFF,
        })
    }

    pub fn with_executor(mut self, executor: Arc<dyn CommandExecutor>) -> Self {
        self.executor = executor;
        self
    }

    pub fn with_resolver_factory(mut self, factory: ResolverFactory) -> Self {
        self.resolver_factory = factory;
        self
    }

    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Run every enabled feed and the file server until done.
    ///
    /// In one-shot mode this returns after each feed completed one cycle;
    /// otherwise it returns once a shutdown was requested.
    pub async fn run(self) -> Result<()> {
        let app = Arc::new(self);
        let config = Arc::clone(&app.config);

        if !config.use_dump && !config.use_soc && (config.listen.is_none() || config.cron) {
            warn!("Both feeds are disabled, nothing to do");
        }

        let _lock = if config.use_dump {
            Some(LockGuard::acquire(app.marker.path())?)
        } else {
            None
        };

        let server = match (&config.listen, config.cron) {
            (Some(listen), false) => {
                let addr = validate_listen_addr(listen)?;
                let listener = http::bind(addr).await?;
                let dir = config.output_dir.clone();
                let token = config.http_token.clone();
                Some(tokio::spawn(async move {
                    let served = http::serve(listener, &dir, token).await;
                    if let Err(e) = &served {
                        error!("HTTP server stopped: {:#}", e);
                    }
                    served
                }))
            }
            _ => None,
        };

        let dump = config.use_dump.then(|| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.run_dump_feed().await })
        });
        let social = config.use_soc.then(|| {
            let app = Arc::clone(&app);
            tokio::spawn(async move { app.run_social_feed().await })
        });

        let mut result = Ok(());
        for (feed, handle) in [(Feed::Dump, dump), (Feed::Social, social)] {
            let Some(handle) = handle else {
                continue;
            };
            let outcome = handle
                .await
                .with_context(|| format!("[{}] feed task panicked", feed))
                .and_then(|r| r);
            if let Err(e) = outcome {
                error!("[{}] feed stopped: {:#}", feed, e);
                request_shutdown();
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        if let Some(mut server) = server {
            let finished = if !config.use_dump && !config.use_soc {
                info!("No feed enabled, serving files until shutdown");
                tokio::select! {
                    _ = wait_for_shutdown() => None,
                    served = &mut server => Some(served),
                }
            } else {
                None
            };
            // Feeds only stop early on a fatal error or a shutdown request.
            request_shutdown();
            let served = match finished {
                Some(served) => served,
                None => server.await,
            };
            let served = served.context("HTTP server task panicked").and_then(|r| r);
            if let Err(e) = served {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }

        result
    }

    /// Dump feed loop.
    pub async fn run_dump_feed(&self) -> Result<()> {
        let feed = Feed::Dump;
        let mut last_seen = self
            .marker
            .load()
            .with_context(|| format!("[{}] cannot load dump marker", feed))?;
        match last_seen {
            Some(version) => info!("[{}] Loaded dump version {} ({})", feed, version, version_time(version)),
            None => info!("[{}] No previous dump version recorded", feed),
        }

        let interval = minutes(self.config.dump_interval);
        let mut pause = last_seen.is_some();

        loop {
            if is_shutdown_requested() {
                break;
            }
            if pause && !self.config.cron && !sleep_unless_shutdown(interval).await {
                break;
            }

            match self.dump_cycle(last_seen).await {
                Ok(CycleOutcome::Unchanged { .. }) => pause = true,
                Ok(CycleOutcome::Published { version, .. }) => {
                    last_seen = version.or(last_seen);
                    if self.config.cron {
                        info!("[{}] One-shot run complete", feed);
                        break;
                    }
                    pause = true;
                }
                Err(CycleError::Transient(e)) => {
                    warn!("[{}] {:#}; retrying in {:?}", feed, e, self.backoff);
                    if !sleep_unless_shutdown(self.backoff).await {
                        break;
                    }
                    pause = false;
                }
                Err(CycleError::FileSystem(e)) => {
                    if self.config.cron {
                        return Err(e.context(format!("[{}] cycle failed", feed)));
                    }
                    error!("[{}] cycle aborted: {:#}", feed, e);
                    pause = true;
                }
            }
        }
        Ok(())
    }

    /// Social feed loop.
    pub async fn run_social_feed(&self) -> Result<()> {
        let feed = Feed::Social;
        let interval = minutes(self.config.social_interval);

        loop {
            if is_shutdown_requested() {
                break;
            }

            let pause = match self.social_cycle().await {
                Ok(_) => {
                    if self.config.cron {
                        info!("[{}] One-shot run complete", feed);
                        break;
                    }
                    interval
                }
                Err(CycleError::Transient(e)) => {
                    warn!("[{}] {:#}; retrying in {:?}", feed, e, self.backoff);
                    self.backoff
                }
                Err(CycleError::FileSystem(e)) => {
                    if self.config.cron {
                        return Err(e.context(format!("[{}] cycle failed", feed)));
                    }
                    error!("[{}] cycle aborted: {:#}", feed, e);
                    interval
                }
            };

            if !sleep_unless_shutdown(pause).await {
                break;
            }
        }
        Ok(())
    }

    /// One dump cycle against the previously seen version.
    pub async fn dump_cycle(&self, last_seen: Option<i64>) -> Result<CycleOutcome, CycleError> {
        let feed = Feed::Dump;
        let version = self
            .fetcher
            .last_dump_version()
            .await
            .map_err(|e| CycleError::Transient(e.context("getting dump version")))?;
        info!("[{}] Registry dump version {} ({})", feed, version, version_time(version));

        if last_seen == Some(version) && !self.config.cron {
            info!("[{}] Dump unchanged, skipping", feed);
            return Ok(CycleOutcome::Unchanged { version });
        }

        // Marker goes first: a crash mid-cycle must reprocess this version.
        self.marker
            .save(version)
            .map_err(|e| CycleError::FileSystem(e.context("saving dump marker")))?;

        let archive = self
            .fetcher
            .fetch_dump()
            .await
            .map_err(|e| CycleError::Transient(e.context("downloading dump")))?;
        let (classifier, decode) = self.classify(feed, archive).await?;

        classifier
            .publish(&self.config.output_dir)
            .map_err(CycleError::FileSystem)?;

        let resolve = if self.config.use_resolver {
            Some(self.resolve(&classifier).await?)
        } else {
            None
        };

        if let Some(script) = &self.config.post_script {
            self.run_hook(feed, script).await;
        }

        Ok(CycleOutcome::Published {
            version: Some(version),
            decode,
            resolve,
        })
    }

    /// One social cycle.
    pub async fn social_cycle(&self) -> Result<CycleOutcome, CycleError> {
        let feed = Feed::Social;
        let archive = self
            .fetcher
            .fetch_social()
            .await
            .map_err(|e| CycleError::Transient(e.context("downloading social register")))?;
        let (classifier, decode) = self.classify(feed, archive).await?;

        classifier
            .publish_social(&self.config.output_dir)
            .map_err(CycleError::FileSystem)?;

        if let Some(script) = &self.config.social_script {
            self.run_hook(feed, script).await;
        }

        Ok(CycleOutcome::Published {
            version: None,
            decode,
            resolve: None,
        })
    }

    /// Extract, decode and classify off the async runtime.
    async fn classify(
        &self,
        feed: Feed,
        archive: Vec<u8>,
    ) -> Result<(Classifier, DecodeStats), CycleError> {
        let policy = self.config.blocked_ip_policy;
        let task = tokio::task::spawn_blocking(move || -> Result<(Classifier, DecodeStats)> {
            let mut classifier = Classifier::new(policy);
            let stats = archive::read_xml(&archive, |member| {
                Ok(classify_document(feed, member, &mut classifier)?)
            })?;
            Ok((classifier, stats))
        });

        let (classifier, stats) = task
            .await
            .map_err(|e| CycleError::Transient(anyhow::anyhow!("classifier task failed: {}", e)))?
            .map_err(|e| CycleError::Transient(e.context(format!("decoding {} payload", feed))))?;

        info!(
            "[{}] Classified {} entries ({} malformed fragments skipped)",
            feed,
            format_count(stats.entries),
            stats.tolerated
        );
        Ok((classifier, stats))
    }

    /// Resolve every distinct URL host with a fresh resolver.
    async fn resolve(&self, classifier: &Classifier) -> Result<ResolveStats, CycleError> {
        let hosts = resolver::distinct_hosts(classifier.urls.iter());
        info!(
            "[{}] Resolving {} distinct hosts from {} URLs on {} workers",
            Feed::Dump,
            format_count(hosts.len()),
            format_count(classifier.urls.len()),
            self.config.worker_count
        );

        let mut resolver = (self.resolver_factory)();
        resolver
            .start(self.config.worker_count, self.config.resolver_file.clone())
            .map_err(CycleError::FileSystem)?;
        for host in hosts {
            resolver.enqueue(host).await.map_err(CycleError::Transient)?;
        }
        resolver.shutdown().await.map_err(CycleError::FileSystem)
    }

    async fn run_hook(&self, feed: Feed, script: &str) {
        let executor = Arc::clone(&self.executor);
        let script = script.to_string();
        let result =
            tokio::task::spawn_blocking(move || hook::run_hook(executor.as_ref(), feed.name(), &script))
                .await;
        match result {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => warn!("[{}] post hook failed: {:#}", feed, e),
            Err(e) => warn!("[{}] post hook task failed: {}", feed, e),
        }
    }
}

fn minutes(n: u64) -> Duration {
    Duration::from_secs(n.saturating_mul(60))
}
