//! Configuration management for rkndaemon.
//!
//! Settings come from a YAML file (first existing of `--config`,
//! `./rkndaemon.yaml`, `/etc/rkndaemon/config.yaml`) overlaid with `RKN_*`
//! environment variables. A missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use url::Url;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::classifier::BlockedIpPolicy;
use crate::error::RknError;
use crate::validation::{is_safe_hook_path, validate_dns_server, validate_listen_addr};

/// Config file locations tried when `--config` is not given.
pub const CONFIG_SEARCH_PATHS: &[&str] = &["rkndaemon.yaml", "/etc/rkndaemon/config.yaml"];

/// Prefix of every environment override.
pub const ENV_PREFIX: &str = "RKN_";

/// Secure string type that zeroizes memory on drop
/// Used for credentials and the HTTP token
#[derive(Clone, Default, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
#[serde(transparent)]
pub struct SecureString(String);

impl SecureString {
    pub fn new(s: String) -> Self {
        Self(s)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl std::fmt::Debug for SecureString {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[REDACTED]")
    }
}

impl From<String> for SecureString {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for SecureString {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Registry SOAP endpoint
    pub url: String,

    /// Registry operator login
    pub user: SecureString,

    /// Registry operator password
    pub pass: SecureString,

    /// Recursive DNS servers used by the resolver (`ip` or `ip:port`)
    pub dns_servers: Vec<String>,

    /// Number of concurrent resolver workers
    pub worker_count: usize,

    /// Where resolved IPv4 addresses are written
    pub resolver_file: PathBuf,

    /// Social feed poll interval, minutes
    pub social_interval: u64,

    /// Dump version poll interval, minutes
    pub dump_interval: u64,

    /// Hook run after each dump publish
    pub post_script: Option<String>,

    /// Hook run after each social publish
    pub social_script: Option<String>,

    pub use_dump: bool,
    pub use_soc: bool,
    pub use_resolver: bool,

    /// One-shot mode: run every enabled feed once and exit
    pub cron: bool,

    /// Address of the authenticated file server, disabled when unset
    pub listen: Option<String>,

    /// Value expected in the `X-Auth-Token` header
    pub http_token: SecureString,

    /// Directory receiving the published lists
    pub output_dir: PathBuf,

    /// Dump version marker file
    pub marker_file: PathBuf,

    /// Whether IPs of domain entries always count as blocked
    pub blocked_ip_policy: BlockedIpPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            url: "https://vigruzki2.rkn.gov.ru/services/OperatorRequest2/".to_string(),
            user: SecureString::default(),
            pass: SecureString::default(),
            dns_servers: vec!["8.8.8.8".to_string(), "1.1.1.1".to_string()],
            worker_count: 64,
            resolver_file: PathBuf::from("output/resolved.txt"),
            social_interval: 60,
            dump_interval: 5,
            post_script: None,
            social_script: None,
            use_dump: true,
            use_soc: true,
            use_resolver: false,
            cron: false,
            listen: None,
            http_token: SecureString::default(),
            output_dir: PathBuf::from("output"),
            marker_file: PathBuf::from("/tmp/lastrkndump"),
            blocked_ip_policy: BlockedIpPolicy::Always,
        }
    }
}

impl Config {
    /// Load configuration from a YAML file without overlay or validation.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;
        let config: Config = serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {:?}", path.as_ref()))?;
        Ok(config)
    }

    /// Resolve the effective configuration: file, then environment, then validation.
    ///
    /// An explicit path must exist; the search paths are optional.
    pub fn resolve(explicit: Option<&Path>) -> Result<Self> {
        let config = Self::discover(explicit)?;
        config.validate()?;
        Ok(config)
    }

    /// File plus environment overlay, without validation.
    ///
    /// Offline commands use this since they need no registry credentials.
    pub fn discover(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::load(path)?,
            None => match CONFIG_SEARCH_PATHS.iter().map(Path::new).find(|p| p.is_file()) {
                Some(path) => {
                    debug!("Using config file {:?}", path);
                    Self::load(path)?
                }
                None => {
                    debug!("No config file found, using defaults");
                    Self::default()
                }
            },
        };

        config.apply_env()?;
        Ok(config)
    }

    /// Overlay `RKN_*` variables from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_overrides(|key| env::var(key).ok())
    }

    /// Overlay variables obtained from `lookup`, keyed by full variable name.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(&format!("{}{}", ENV_PREFIX, name));

        if let Some(v) = var("URL") {
            self.url = v;
        }
        if let Some(v) = var("USER") {
            self.user = v.into();
        }
        if let Some(v) = var("PASS") {
            self.pass = v.into();
        }
        if let Some(v) = var("DNSSERVERS") {
            self.dns_servers = v
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(String::from)
                .collect();
        }
        if let Some(v) = var("WORKERCOUNT") {
            self.worker_count = parse_number("RKN_WORKERCOUNT", &v)?;
        }
        if let Some(v) = var("RESOLVERFILE") {
            self.resolver_file = PathBuf::from(v);
        }
        if let Some(v) = var("SOCIALINTERVAL") {
            self.social_interval = parse_number("RKN_SOCIALINTERVAL", &v)?;
        }
        if let Some(v) = var("DUMPINTERVAL") {
            self.dump_interval = parse_number("RKN_DUMPINTERVAL", &v)?;
        }
        if let Some(v) = var("POSTSCRIPT") {
            self.post_script = non_empty(v);
        }
        if let Some(v) = var("SOCIALSCRIPT") {
            self.social_script = non_empty(v);
        }
        if let Some(v) = var("USEDUMP") {
            self.use_dump = parse_flag("RKN_USEDUMP", &v)?;
        }
        if let Some(v) = var("USESOC") {
            self.use_soc = parse_flag("RKN_USESOC", &v)?;
        }
        if let Some(v) = var("USERESOLVER") {
            self.use_resolver = parse_flag("RKN_USERESOLVER", &v)?;
        }
        if let Some(v) = var("CRON") {
            self.cron = parse_flag("RKN_CRON", &v)?;
        }
        if let Some(v) = var("LISTEN") {
            self.listen = non_empty(v);
        }
        if let Some(v) = var("HTTPTOKEN") {
            self.http_token = v.into();
        }
        if let Some(v) = var("OUTPUTDIR") {
            self.output_dir = PathBuf::from(v);
        }
        if let Some(v) = var("MARKERFILE") {
            self.marker_file = PathBuf::from(v);
        }

        Ok(())
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), RknError> {
        if (self.use_dump || self.use_soc) && (self.user.is_empty() || self.pass.is_empty()) {
            return Err(RknError::Config(
                "Registry user and password are required when a feed is enabled".to_string(),
            ));
        }

        Url::parse(&self.url)
            .map_err(|e| RknError::Config(format!("Invalid registry url '{}': {}", self.url, e)))?;

        if self.worker_count == 0 {
            return Err(RknError::Config("worker_count must be at least 1".to_string()));
        }
        if self.dump_interval == 0 || self.social_interval == 0 {
            return Err(RknError::Config(
                "dump_interval and social_interval must be at least 1 minute".to_string(),
            ));
        }

        if self.use_resolver && self.dns_servers.is_empty() {
            return Err(RknError::Config(
                "dns_servers must not be empty when the resolver is enabled".to_string(),
            ));
        }
        for server in &self.dns_servers {
            validate_dns_server(server).map_err(|e| RknError::Config(e.to_string()))?;
        }

        for hook in [&self.post_script, &self.social_script].into_iter().flatten() {
            if !is_safe_hook_path(hook) {
                warn!(
                    "Hook path '{}' contains shell metacharacters, it will be skipped",
                    hook
                );
            }
        }

        if let Some(listen) = &self.listen {
            validate_listen_addr(listen).map_err(|e| RknError::Config(e.to_string()))?;
            if self.http_token.is_empty() {
                return Err(RknError::Config(
                    "http_token is required when listen is set".to_string(),
                ));
            }
        }

        Ok(())
    }
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

fn parse_number<T: std::str::FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| {
            RknError::Parse(format!("{} must be a non-negative integer, got '{}'", name, value)).into()
        })
}

fn parse_flag(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(RknError::Parse(format!("{} must be a boolean, got '{}'", name, value)).into()),
    }
}
