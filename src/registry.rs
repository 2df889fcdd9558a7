//! Registry entry data model.
//!
//! Entries are transient: the decoder builds one per `content` element and
//! hands it to the classifier, which consumes it.

use chrono::{DateTime, FixedOffset};

/// Blocking method declared on a registry entry.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum BlockType {
    /// Block by exact domain.
    Domain,
    /// Block by IP address.
    Ip,
    /// Block a wildcard domain and all its subdomains.
    DomainMask,
    /// Absent attribute; the entry is blocked by URL.
    #[default]
    Default,
    /// Any tag this version does not know about.
    Other(String),
}

impl BlockType {
    /// Map the `blockType` attribute value.
    pub fn from_attr(value: &str) -> Self {
        match value.trim() {
            "domain" => BlockType::Domain,
            "ip" => BlockType::Ip,
            "domain-mask" => BlockType::DomainMask,
            "" | "default" => BlockType::Default,
            other => BlockType::Other(other.to_string()),
        }
    }

    /// Whether IPs listed on this entry were obtained by resolving its domain.
    pub fn is_domain_based(&self) -> bool {
        matches!(self, BlockType::Domain | BlockType::DomainMask)
    }
}

/// One `content` element of the main registry dump.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RegistryEntry {
    pub id: Option<u64>,
    pub block_type: BlockType,
    /// Opaque `entryType` tag, carried but never branched on.
    pub entry_type: String,
    pub domains: Vec<String>,
    pub ips: Vec<String>,
    pub subnets: Vec<String>,
    pub urls: Vec<String>,
}

/// One `content` element of the social resources register.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SocialEntry {
    pub id: i64,
    /// Opaque hash, only useful for external change tracking.
    pub content_hash: String,
    pub include_time: Option<DateTime<FixedOffset>>,
    pub resource_name: String,
    pub domain: String,
    pub subnets: Vec<String>,
}

/// Parse an `includeTime` attribute (`2022-01-26T22:00:00+03:00`).
pub fn parse_include_time(value: &str) -> Option<DateTime<FixedOffset>> {
    let value = value.trim();
    DateTime::parse_from_rfc3339(value)
        .or_else(|_| DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%:z"))
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_type_from_attr() {
        assert_eq!(BlockType::from_attr("domain"), BlockType::Domain);
        assert_eq!(BlockType::from_attr("ip"), BlockType::Ip);
        assert_eq!(BlockType::from_attr("domain-mask"), BlockType::DomainMask);
        assert_eq!(BlockType::from_attr(""), BlockType::Default);
        assert_eq!(BlockType::from_attr("default"), BlockType::Default);
        assert_eq!(
            BlockType::from_attr("subnet"),
            BlockType::Other("subnet".to_string())
        );
    }

    #[test]
    fn test_domain_based() {
        assert!(BlockType::Domain.is_domain_based());
        assert!(BlockType::DomainMask.is_domain_based());
        assert!(!BlockType::Ip.is_domain_based());
        assert!(!BlockType::Default.is_domain_based());
    }

    #[test]
    fn test_parse_include_time() {
        let t = parse_include_time("2022-01-26T22:00:00+03:00").unwrap();
        assert_eq!(t.timestamp(), 1_643_223_600);
        assert!(parse_include_time("yesterday").is_none());
    }
}
