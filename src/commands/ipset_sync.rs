//! ipset-sync command implementation.
//!
//! Reconciles a kernel ipset with a published address list: addresses
//! missing from the set are added, and addresses no longer listed are
//! deleted unless clearing is disabled.

use anyhow::{Context, Result};
use std::collections::BTreeSet;
use std::env;
use std::net::{IpAddr, Ipv4Addr};
use std::path::Path;
use tracing::{debug, info};

use crate::cmd_abstraction::{CommandExecutor, RealCommandExecutor};
use crate::error::RknError;
use crate::utils::format_count;
use crate::validation::is_global_unicast;

const IPSET: &str = "ipset";

/// Longest set name the kernel accepts.
const MAX_SET_NAME: usize = 31;

/// Counts from one reconciliation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SyncReport {
    pub from_file: usize,
    pub before: usize,
    pub added: usize,
    pub deleted: usize,
    pub after: usize,
}

/// Run the ipset-sync command.
pub fn run(file: &Path, set: &str, no_clear: bool) -> Result<()> {
    let clear = !(no_clear || noclear_env(env::var("NOCLEAR").ok().as_deref()));
    let report = sync(&RealCommandExecutor::new(), file, set, clear)?;

    println!("loaded from file: {}", format_count(report.from_file));
    println!("ipset {} before: {}", set, format_count(report.before));
    println!(
        "added: {}, deleted: {}",
        format_count(report.added),
        format_count(report.deleted)
    );
    println!("ipset {} after: {}", set, format_count(report.after));
    Ok(())
}

/// `NOCLEAR=1` or `NOCLEAR=true` keeps stale addresses in the set.
fn noclear_env(value: Option<&str>) -> bool {
    value.is_some_and(|v| v == "1" || v.eq_ignore_ascii_case("true"))
}

fn validate_set_name(set: &str) -> Result<(), RknError> {
    let valid = !set.is_empty()
        && set.len() <= MAX_SET_NAME
        && set
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.'));
    if valid {
        Ok(())
    } else {
        Err(RknError::Config(format!("Invalid ipset name: {:?}", set)))
    }
}

/// Global unicast IPv4 addresses, one per line; anything else is ignored.
pub fn parse_address_list(text: &str) -> BTreeSet<Ipv4Addr> {
    text.lines()
        .filter_map(|line| line.trim().parse::<Ipv4Addr>().ok())
        .filter(|ip| is_global_unicast(&IpAddr::V4(*ip)))
        .collect()
}

/// Members of an `ipset -L` listing.
///
/// Member lines may carry extra columns (`1.2.3.4 timeout 600`); only the
/// leading address counts.
pub fn parse_ipset_members(listing: &str) -> BTreeSet<Ipv4Addr> {
    listing
        .lines()
        .skip_while(|line| !line.starts_with("Members:"))
        .skip(1)
        .filter_map(|line| line.split_whitespace().next())
        .filter_map(|token| token.parse::<Ipv4Addr>().ok())
        .collect()
}

fn list_members(executor: &dyn CommandExecutor, set: &str) -> Result<BTreeSet<Ipv4Addr>> {
    let output = executor.execute(IPSET, &["-L".to_string(), set.to_string()])?;
    if !output.success {
        anyhow::bail!("Cannot list ipset {}: {}", set, output.combined());
    }
    Ok(parse_ipset_members(&output.stdout))
}

/// Restore script turning `current` into `wanted`.
pub fn restore_script(
    set: &str,
    wanted: &BTreeSet<Ipv4Addr>,
    current: &BTreeSet<Ipv4Addr>,
    clear: bool,
) -> (String, usize, usize) {
    let mut script = String::new();
    let mut added = 0;
    for ip in wanted.difference(current) {
        script.push_str(&format!("add {} {}\n", set, ip));
        added += 1;
    }
    let mut deleted = 0;
    if clear {
        for ip in current.difference(wanted) {
            script.push_str(&format!("del {} {}\n", set, ip));
            deleted += 1;
        }
    }
    (script, added, deleted)
}

/// Reconcile `set` with the addresses in `file`.
pub fn sync(
    executor: &dyn CommandExecutor,
    file: &Path,
    set: &str,
    clear: bool,
) -> Result<SyncReport> {
    validate_set_name(set)?;

    let text = std::fs::read_to_string(file)
        .with_context(|| format!("Failed to read address list {:?}", file))?;
    let wanted = parse_address_list(&text);
    let current = list_members(executor, set)?;
    info!(
        "Loaded {} addresses from {:?}, ipset {} holds {}",
        format_count(wanted.len()),
        file,
        set,
        format_count(current.len())
    );

    let (script, added, deleted) = restore_script(set, &wanted, &current, clear);
    if script.is_empty() {
        debug!("ipset {} already up to date", set);
    } else {
        let output = executor.execute_with_stdin(
            IPSET,
            &["-exist".to_string(), "restore".to_string()],
            &script,
        )?;
        if !output.success {
            anyhow::bail!("ipset restore failed: {}", output.combined());
        }
    }

    let after = list_members(executor, set)?.len();
    Ok(SyncReport {
        from_file: wanted.len(),
        before: current.len(),
        added,
        deleted,
        after,
    })
}
