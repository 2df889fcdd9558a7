//! Concurrent hostname resolver.
//!
//! A fixed pool of workers drains a bounded hostname queue. Every worker
//! queries all lookup sources, merges their IPv4 answers and hands them to
//! a single writer task. The writer accumulates one [`CanonicalSet`] and
//! writes the output file once, after every worker has finished.
//!
//! ```text
//!   enqueue() ──► [bounded queue] ──► worker 1..N ──► [results] ──► writer ──► resolved.txt
//!                                      │
//!                                      └─ upstream DNS ∪ system resolver
//! ```

mod lookup;

pub use lookup::{
    HostLookup, LookupError, LookupFailure, SystemLookup, UpstreamLookup, UPSTREAM_ATTEMPTS,
};

#[cfg(test)]
pub use lookup::MockHostLookup;

use anyhow::{bail, Context, Result};
use std::collections::BTreeSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::classifier::ensure_output_dir;
use crate::set::CanonicalSet;
use crate::uri;
use crate::utils::format_count;
use crate::validation::is_global_unicast;

/// Capacity of the hostname queue; `enqueue` waits once it is full.
pub const QUEUE_CAPACITY: usize = 1000;

/// Interval between progress log lines.
pub const PROGRESS_INTERVAL: Duration = Duration::from_secs(10);

/// Summary of one finished resolution run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResolveStats {
    /// Jobs taken off the queue, including skipped empty names.
    pub jobs: usize,
    /// Distinct addresses written.
    pub addresses: usize,
}

#[derive(Debug, Default)]
struct Progress {
    enqueued: AtomicUsize,
    done: AtomicUsize,
}

struct Running {
    sender: mpsc::Sender<String>,
    workers: Vec<JoinHandle<()>>,
    writer: JoinHandle<Result<usize>>,
    reporter: JoinHandle<()>,
}

/// One resolution run: `start`, any number of `enqueue`, then `shutdown`.
///
/// A resolver is not reused across cycles; build a fresh one each time.
pub struct Resolver {
    lookups: Arc<Vec<Arc<dyn HostLookup>>>,
    progress: Arc<Progress>,
    running: Option<Running>,
}

impl Resolver {
    pub fn new(lookups: Vec<Arc<dyn HostLookup>>) -> Self {
        Self {
            lookups: Arc::new(lookups),
            progress: Arc::new(Progress::default()),
            running: None,
        }
    }

    /// Resolver querying the given DNS servers and the system resolver.
    pub fn with_servers(servers: &[SocketAddr]) -> Self {
        Self::new(vec![
            Arc::new(UpstreamLookup::new(servers)),
            Arc::new(SystemLookup),
        ])
    }

    /// Spawn `worker_count` workers plus the writer for `output`.
    pub fn start(&mut self, worker_count: usize, output: PathBuf) -> Result<()> {
        if self.running.is_some() {
            bail!("Resolver already started");
        }
        let worker_count = worker_count.max(1);

        let (sender, receiver) = mpsc::channel::<String>(QUEUE_CAPACITY);
        let receiver = Arc::new(Mutex::new(receiver));
        // Capacity 1 keeps workers in lock step with the writer.
        let (results_tx, results_rx) = mpsc::channel::<Vec<Ipv4Addr>>(1);

        let workers = (0..worker_count)
            .map(|id| {
                tokio::spawn(worker_loop(
                    id,
                    Arc::clone(&receiver),
                    results_tx.clone(),
                    Arc::clone(&self.lookups),
                    Arc::clone(&self.progress),
                ))
            })
            .collect();
        drop(results_tx);

        let writer = tokio::spawn(writer_loop(results_rx, output));
        let reporter = tokio::spawn(report_progress(Arc::clone(&self.progress)));

        info!("Resolver started with {} workers", worker_count);
        self.running = Some(Running {
            sender,
            workers,
            writer,
            reporter,
        });
        Ok(())
    }

    /// Queue one hostname. Waits while the queue is full.
    pub async fn enqueue(&self, host: impl Into<String>) -> Result<()> {
        let Some(running) = &self.running else {
            bail!("Resolver is not running");
        };
        running
            .sender
            .send(host.into())
            .await
            .context("Resolver queue is closed")?;
        self.progress.enqueued.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    /// Close the queue, wait for the workers to drain it and for the writer
    /// to persist the result.
    pub async fn shutdown(mut self) -> Result<ResolveStats> {
        let Some(running) = self.running.take() else {
            bail!("Resolver was never started");
        };

        drop(running.sender);
        for worker in running.workers {
            if let Err(e) = worker.await {
                warn!("Resolver worker panicked: {}", e);
            }
        }
        running.reporter.abort();

        let addresses = running
            .writer
            .await
            .context("Resolver writer panicked")??;

        Ok(ResolveStats {
            jobs: self.progress.done.load(Ordering::Relaxed),
            addresses,
        })
    }
}

/// Distinct lowercase hosts of `urls`, ready for `enqueue`.
pub fn distinct_hosts<'a>(urls: impl IntoIterator<Item = &'a str>) -> BTreeSet<String> {
    urls.into_iter().filter_map(uri::url_host).collect()
}

async fn worker_loop(
    id: usize,
    queue: Arc<Mutex<mpsc::Receiver<String>>>,
    results: mpsc::Sender<Vec<Ipv4Addr>>,
    lookups: Arc<Vec<Arc<dyn HostLookup>>>,
    progress: Arc<Progress>,
) {
    loop {
        let next = queue.lock().await.recv().await;
        let Some(host) = next else {
            break;
        };

        let addrs = resolve_host(&lookups, host.trim()).await;
        progress.done.fetch_add(1, Ordering::Relaxed);

        if !addrs.is_empty() && results.send(addrs).await.is_err() {
            warn!("Resolver worker {}: writer is gone, stopping", id);
            break;
        }
    }
    debug!("Resolver worker {} finished", id);
}

/// Union of every source's IPv4 answers for `host`.
async fn resolve_host(lookups: &[Arc<dyn HostLookup>], host: &str) -> Vec<Ipv4Addr> {
    if host.is_empty() {
        return Vec::new();
    }

    let answers =
        futures::future::join_all(lookups.iter().map(|source| source.lookup_ipv4(host))).await;

    let mut merged = BTreeSet::new();
    for (source, answer) in lookups.iter().zip(answers) {
        match answer {
            Ok(addrs) => merged.extend(addrs),
            Err(e) if e.kind.is_expected() => {}
            Err(e) => warn!("{} lookup of {} failed: {}", source.name(), host, e),
        }
    }
    merged.into_iter().collect()
}

async fn writer_loop(mut results: mpsc::Receiver<Vec<Ipv4Addr>>, output: PathBuf) -> Result<usize> {
    let mut resolved = CanonicalSet::new();
    while let Some(addrs) = results.recv().await {
        for addr in addrs {
            if is_global_unicast(&IpAddr::V4(addr)) {
                resolved.add(addr.to_string());
            }
        }
    }

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        ensure_output_dir(parent)?;
    }
    resolved
        .write_file(&output)
        .with_context(|| format!("Failed to write resolved addresses to {:?}", output))?;
    info!(
        "Resolver wrote {} addresses to {:?}",
        format_count(resolved.len()),
        output
    );
    Ok(resolved.len())
}

async fn report_progress(progress: Arc<Progress>) {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(PROGRESS_INTERVAL);
    ticker.tick().await;
    loop {
        ticker.tick().await;
        let done = progress.done.load(Ordering::Relaxed);
        let enqueued = progress.enqueued.load(Ordering::Relaxed);
        let elapsed = started.elapsed().as_secs_f64().max(1.0);
        let percent = if enqueued == 0 {
            0.0
        } else {
            done as f64 * 100.0 / enqueued as f64
        };
        info!(
            "Resolving: {}/{} hosts ({:.1}%), {:.0} hosts/s",
            format_count(done),
            format_count(enqueued),
            percent,
            done as f64 / elapsed
        );
    }
}
