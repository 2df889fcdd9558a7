//! Registry entry classifier.
//!
//! The registry describes the same block order through three independent
//! views (raw domain, literal IP, free-form URL). A downstream consumer may
//! match on any of them, so the classifier makes each view complete rather
//! than picking one canonical representation. One classifier lives for
//! exactly one ingestion cycle and always starts empty.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use tracing::{debug, info};

use crate::error::RknError;
use crate::registry::{BlockType, RegistryEntry, SocialEntry};
use crate::set::CanonicalSet;
use crate::uri;
use crate::utils::format_count;
use crate::validation::parse_global_ip;

pub const ALL_IPS_FILE: &str = "allips.txt";
pub const BLOCKED_IPS_FILE: &str = "bloked_ips.txt";
pub const HTTPS_IPS_FILE: &str = "https_ips.txt";
pub const URLS_FILE: &str = "urls.txt";
pub const SUBNETS_FILE: &str = "subnets.txt";
pub const DOMAIN_MASKS_FILE: &str = "mdoms.txt";
pub const DOMAINS_FILE: &str = "domains.txt";
pub const ALL_DOMAINS_FILE: &str = "all_domains.txt";
pub const SOC_NETS_FILE: &str = "SocNets.txt";
pub const SOC_DOMAINS_FILE: &str = "SocDomains.txt";

/// When IPs listed on domain-based entries count as blocked.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum BlockedIpPolicy {
    /// Every IP of a `domain`/`domain-mask` entry is blocked.
    #[default]
    Always,
    /// Only when the same entry also listed an `https` URL.
    HttpsOnly,
}

/// Accumulated blocklists for one ingestion cycle.
#[derive(Debug, Clone, Default)]
pub struct Classifier {
    policy: BlockedIpPolicy,
    /// Reserved allow-list, never populated.
    pub white_ip: CanonicalSet,
    /// Reserved allow-list, never populated.
    pub white_domain: CanonicalSet,
    pub all_ips: CanonicalSet,
    pub blocked_ips: CanonicalSet,
    pub https_ips: CanonicalSet,
    pub urls: CanonicalSet,
    pub domain_masks: CanonicalSet,
    pub domains: CanonicalSet,
    pub subnets: CanonicalSet,
    pub soc_nets: CanonicalSet,
    pub soc_domains: CanonicalSet,
}

impl Classifier {
    pub fn new(policy: BlockedIpPolicy) -> Self {
        Self {
            policy,
            ..Default::default()
        }
    }

    pub fn policy(&self) -> BlockedIpPolicy {
        self.policy
    }

    /// Fold one dump entry into the sets.
    ///
    /// Malformed sub-fields are skipped; nothing here can fail.
    pub fn classify_entry(&mut self, entry: &RegistryEntry) {
        match &entry.block_type {
            BlockType::Domain => {
                for domain in &entry.domains {
                    if let Some(ascii) = uri::domain_to_ascii(domain) {
                        self.domains.add(ascii);
                    }
                    if let Some(host) = uri::host_of_domain(domain) {
                        self.domains.add(host);
                    }
                }
            }
            BlockType::Ip => {
                for literal in &entry.ips {
                    if let Some(ip) = parse_global_ip(literal) {
                        self.blocked_ips.add(ip.to_string());
                    }
                }
            }
            BlockType::DomainMask => {
                for mask in &entry.domains {
                    self.domain_masks.add(mask.trim());
                    if let Some(ascii) = uri::strip_wildcard(mask).and_then(uri::domain_to_ascii) {
                        self.domain_masks.add(ascii);
                    }
                }
            }
            BlockType::Default | BlockType::Other(_) => {}
        }

        let mut https = false;
        for raw in &entry.urls {
            let variants = uri::url_variants(raw);
            if variants.is_empty() {
                debug!("Skipping unparseable URL {:?} (entry {:?})", raw, entry.id);
                continue;
            }
            if uri::is_https(raw) {
                https = true;
            }
            if let Some(ip) = uri::url_host(raw).as_deref().and_then(parse_global_ip) {
                self.all_ips.add(ip.to_string());
            }
            self.urls.extend(variants);
        }

        let blocks_resolved_ips = entry.block_type.is_domain_based()
            && (self.policy == BlockedIpPolicy::Always || https);
        for literal in &entry.ips {
            let Some(ip) = parse_global_ip(literal) else {
                continue;
            };
            let ip = ip.to_string();
            if https {
                self.https_ips.add(ip.clone());
            }
            if blocks_resolved_ips {
                self.blocked_ips.add(ip.clone());
            }
            self.all_ips.add(ip);
        }

        for subnet in &entry.subnets {
            self.subnets.add(subnet.trim());
        }
    }

    /// Fold one social-resources entry into the sets.
    pub fn classify_social(&mut self, entry: &SocialEntry) {
        self.soc_domains.add(entry.domain.trim());
        for subnet in &entry.subnets {
            self.soc_nets.add(subnet.trim());
        }
    }

    /// Union of exact domains and domain masks.
    pub fn all_domains(&self) -> CanonicalSet {
        let mut all = self.domains.clone();
        all.union_with(&self.domain_masks);
        all
    }

    /// Write the dump-feed lists into `dir`, replacing previous files.
    pub fn publish(&self, dir: &Path) -> Result<()> {
        ensure_output_dir(dir)?;
        info!("Publishing dump lists to {:?}", dir);

        let all_domains = self.all_domains();
        let lists: [(&str, &CanonicalSet); 8] = [
            (ALL_IPS_FILE, &self.all_ips),
            (BLOCKED_IPS_FILE, &self.blocked_ips),
            (HTTPS_IPS_FILE, &self.https_ips),
            (URLS_FILE, &self.urls),
            (SUBNETS_FILE, &self.subnets),
            (DOMAIN_MASKS_FILE, &self.domain_masks),
            (DOMAINS_FILE, &self.domains),
            (ALL_DOMAINS_FILE, &all_domains),
        ];
        write_lists(dir, &lists)?;

        info!(
            "Published {} URLs, {} domains, {} masks, {} IPs ({} blocked, {} https), {} subnets",
            format_count(self.urls.len()),
            format_count(self.domains.len()),
            format_count(self.domain_masks.len()),
            format_count(self.all_ips.len()),
            format_count(self.blocked_ips.len()),
            format_count(self.https_ips.len()),
            format_count(self.subnets.len()),
        );
        Ok(())
    }

    /// Write the social-feed lists into `dir`, replacing previous files.
    pub fn publish_social(&self, dir: &Path) -> Result<()> {
        ensure_output_dir(dir)?;
        write_lists(
            dir,
            &[
                (SOC_NETS_FILE, &self.soc_nets),
                (SOC_DOMAINS_FILE, &self.soc_domains),
            ],
        )?;
        info!(
            "Published {} social domains, {} social subnets",
            format_count(self.soc_domains.len()),
            format_count(self.soc_nets.len()),
        );
        Ok(())
    }
}

fn write_lists(dir: &Path, lists: &[(&str, &CanonicalSet)]) -> Result<()> {
    for (name, set) in lists {
        let path = dir.join(name);
        set.write_file(&path)
            .with_context(|| format!("Failed to write {:?}", path))?;
    }
    Ok(())
}

/// Create the output directory if missing; fail if the path is a file.
pub fn ensure_output_dir(dir: &Path) -> Result<(), RknError> {
    match fs::metadata(dir) {
        Ok(meta) if meta.is_dir() => Ok(()),
        Ok(_) => Err(RknError::FileSystem(format!(
            "{:?} exists and is not a directory",
            dir
        ))),
        Err(_) => fs::create_dir_all(dir).map_err(|e| {
            RknError::FileSystem(format!("Failed to create output directory {:?}: {}", dir, e))
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn entry(block_type: BlockType) -> RegistryEntry {
        RegistryEntry {
            block_type,
            ..Default::default()
        }
    }

    fn strings(items: &[&str]) -> Vec<String> {
        items.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_domain_entry() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Domain);
        e.domains = strings(&["example.com", "Пример.рф"]);
        c.classify_entry(&e);

        assert!(c.domains.contains("example.com"));
        assert!(c.domains.contains("xn--e1afmkfd.xn--p1ai"));
        assert!(c.urls.is_empty());
        assert!(c.domain_masks.is_empty());
    }

    #[test]
    fn test_ip_entry() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Ip);
        e.ips = strings(&["93.184.216.34", "10.0.0.1", "garbage"]);
        c.classify_entry(&e);

        assert!(c.blocked_ips.contains("93.184.216.34"));
        assert!(c.all_ips.contains("93.184.216.34"));
        assert_eq!(c.all_ips.len(), 1);
        assert_eq!(c.blocked_ips.len(), 1);
        assert!(c.https_ips.is_empty());
    }

    #[test]
    fn test_domain_mask_entry() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::DomainMask);
        e.domains = strings(&["*.пример.рф", "plain.example"]);
        c.classify_entry(&e);

        assert!(c.domain_masks.contains("*.пример.рф"));
        assert!(c.domain_masks.contains("xn--e1afmkfd.xn--p1ai"));
        assert!(c.domain_masks.contains("plain.example"));
        assert_eq!(c.domain_masks.len(), 3);
        assert!(c.domains.is_empty());
    }

    #[test]
    fn test_https_domain_entry_blocks_ips() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Domain);
        e.domains = strings(&["example.com"]);
        e.urls = strings(&["https://example.com/x"]);
        e.ips = strings(&["93.184.216.34"]);
        c.classify_entry(&e);

        assert!(c.https_ips.contains("93.184.216.34"));
        assert!(c.blocked_ips.contains("93.184.216.34"));
        assert!(c.all_ips.contains("93.184.216.34"));
        assert!(c.urls.contains("https://example.com/x"));
    }

    #[test]
    fn test_default_entry_ips_not_blocked() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Default);
        e.urls = strings(&["http://example.com/page"]);
        e.ips = strings(&["93.184.216.34"]);
        c.classify_entry(&e);

        assert!(c.all_ips.contains("93.184.216.34"));
        assert!(c.blocked_ips.is_empty());
        assert!(c.https_ips.is_empty());
    }

    #[test]
    fn test_https_only_policy() {
        let mut c = Classifier::new(BlockedIpPolicy::HttpsOnly);
        let mut plain = entry(BlockType::Domain);
        plain.domains = strings(&["plain.example"]);
        plain.ips = strings(&["8.8.8.8"]);
        c.classify_entry(&plain);
        assert!(c.blocked_ips.is_empty());

        let mut secure = entry(BlockType::Domain);
        secure.urls = strings(&["https://secure.example/"]);
        secure.ips = strings(&["1.1.1.1"]);
        c.classify_entry(&secure);
        assert!(c.blocked_ips.contains("1.1.1.1"));
        assert!(!c.blocked_ips.contains("8.8.8.8"));
    }

    #[test]
    fn test_url_variants_collected() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Default);
        e.urls = strings(&["http://пример.рф/a%20b"]);
        c.classify_entry(&e);

        assert!(c.urls.contains("http://пример.рф/a%20b"));
        assert!(c.urls.contains("http://xn--e1afmkfd.xn--p1ai/a%20b"));
        assert!(c.urls.contains("http://пример.рф/a b"));
        assert!(c.urls.contains("http://пример.рф/a%2520b"));
    }

    #[test]
    fn test_bad_url_skipped() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Default);
        e.urls = strings(&["not a url", "http://ok.example/"]);
        c.classify_entry(&e);
        assert!(!c.urls.contains("not a url"));
        assert!(c.urls.contains("http://ok.example/"));
    }

    #[test]
    fn test_url_host_ip_goes_to_all_ips() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Default);
        e.urls = strings(&["http://93.184.216.34/path", "http://192.168.0.1/"]);
        c.classify_entry(&e);
        assert!(c.all_ips.contains("93.184.216.34"));
        assert!(!c.all_ips.contains("192.168.0.1"));
    }

    #[test]
    fn test_subnets_pass_through() {
        let mut c = Classifier::default();
        let mut e = entry(BlockType::Other("custom".into()));
        e.subnets = strings(&["93.184.216.0/24", "not-a-cidr"]);
        c.classify_entry(&e);
        assert!(c.subnets.contains("93.184.216.0/24"));
        assert!(c.subnets.contains("not-a-cidr"));
    }

    #[test]
    fn test_classify_social() {
        let mut c = Classifier::default();
        c.classify_social(&SocialEntry {
            id: 2,
            domain: "social.example".into(),
            subnets: strings(&["203.0.113.0/24"]),
            ..Default::default()
        });
        c.classify_social(&SocialEntry {
            id: 3,
            domain: String::new(),
            ..Default::default()
        });
        assert_eq!(c.soc_domains.len(), 1);
        assert!(c.soc_nets.contains("203.0.113.0/24"));
    }

    #[test]
    fn test_publish_writes_files() {
        let dir = TempDir::new().unwrap();
        let out = dir.path().join("output");

        let mut c = Classifier::default();
        let mut e = entry(BlockType::Domain);
        e.domains = strings(&["b.example", "a.example"]);
        c.classify_entry(&e);
        let mut m = entry(BlockType::DomainMask);
        m.domains = strings(&["*.mask.example"]);
        c.classify_entry(&m);
        c.publish(&out).unwrap();

        for name in [
            ALL_IPS_FILE,
            BLOCKED_IPS_FILE,
            HTTPS_IPS_FILE,
            URLS_FILE,
            SUBNETS_FILE,
            DOMAIN_MASKS_FILE,
            DOMAINS_FILE,
            ALL_DOMAINS_FILE,
        ] {
            assert!(out.join(name).exists(), "{} missing", name);
        }
        assert_eq!(
            fs::read_to_string(out.join(DOMAINS_FILE)).unwrap(),
            "a.example\nb.example\n"
        );
        assert_eq!(
            fs::read_to_string(out.join(ALL_DOMAINS_FILE)).unwrap(),
            "*.mask.example\na.example\nb.example\nmask.example\n"
        );
        assert!(!out.join(SOC_NETS_FILE).exists());
    }

    #[test]
    fn test_publish_social_only_touches_social_files() {
        let dir = TempDir::new().unwrap();
        let c = Classifier::default();
        c.publish_social(dir.path()).unwrap();
        assert!(dir.path().join(SOC_NETS_FILE).exists());
        assert!(dir.path().join(SOC_DOMAINS_FILE).exists());
        assert!(!dir.path().join(URLS_FILE).exists());
    }

    #[test]
    fn test_publish_into_file_fails() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("output");
        fs::write(&file, b"not a dir").unwrap();
        let err = Classifier::default().publish(&file).unwrap_err();
        assert!(err.to_string().contains("not a directory"));
    }
}
