//! Classify a realistic dump end to end and check the published files.

use rkndaemon::classifier::{BlockedIpPolicy, Classifier};
use rkndaemon::daemon::{classify_document, Feed};
use std::path::Path;
use tempfile::TempDir;

/// A windows-1251 dump, as the registry ships it.
fn cp1251_dump() -> Vec<u8> {
    let xml = r#"<?xml version="1.0" encoding="windows-1251"?>
<reg:register xmlns:reg="http://rsoc.ru" updateTime="2024-01-01T00:00:00+03:00">
  <content id="1" includeTime="2017-01-01T10:00:00" entryType="1" blockType="domain" hash="A1">
    <decision date="2017-01-01" number="1" org="court"/>
    <domain><![CDATA[пример.рф]]></domain>
    <ip>93.184.216.34</ip>
  </content>
  <content id="2" entryType="1">
    <url><![CDATA[http://example.org/a b]]></url>
    <ip>192.168.1.1</ip>
    <ipSubnet>203.0.113.0/24</ipSubnet>
  </content>
  <content id="3" entryType="1" blockType="ip">
    <ip>1.1.1.1</ip>
  </content>
</reg:register>
"#;
    let (bytes, _, unmappable) = encoding_rs::WINDOWS_1251.encode(xml);
    assert!(!unmappable);
    bytes.into_owned()
}

fn lines(dir: &Path, name: &str) -> Vec<String> {
    std::fs::read_to_string(dir.join(name))
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect()
}

#[test]
fn test_cp1251_dump_to_files() {
    let dir = TempDir::new().unwrap();
    let mut classifier = Classifier::new(BlockedIpPolicy::Always);
    let stats = classify_document(Feed::Dump, cp1251_dump().as_slice(), &mut classifier).unwrap();
    assert_eq!(stats.entries, 3);
    classifier.publish(dir.path()).unwrap();

    let domains = lines(dir.path(), "domains.txt");
    assert_eq!(domains, vec!["xn--e1afmkfd.xn--p1ai"]);

    assert_eq!(
        lines(dir.path(), "bloked_ips.txt"),
        vec!["1.1.1.1", "93.184.216.34"]
    );
    // Private addresses never appear in any list.
    assert_eq!(lines(dir.path(), "allips.txt"), vec!["1.1.1.1", "93.184.216.34"]);
    assert_eq!(lines(dir.path(), "subnets.txt"), vec!["203.0.113.0/24"]);

    let urls = lines(dir.path(), "urls.txt");
    assert!(urls.contains(&"http://example.org/a%20b".to_string()));
    assert!(urls.contains(&"http://example.org/a b".to_string()));
}

#[test]
fn test_publish_is_sorted_and_deduplicated() {
    let xml = r#"<register>
  <content id="1" blockType="domain"><domain>b.example</domain></content>
  <content id="2" blockType="domain"><domain>a.example</domain></content>
  <content id="3" blockType="domain"><domain>B.EXAMPLE</domain></content>
</register>"#;
    let dir = TempDir::new().unwrap();
    let mut classifier = Classifier::default();
    classify_document(Feed::Dump, xml.as_bytes(), &mut classifier).unwrap();
    classifier.publish(dir.path()).unwrap();

    assert_eq!(lines(dir.path(), "domains.txt"), vec!["a.example", "b.example"]);
}

#[test]
fn test_empty_register_publishes_empty_files() {
    let dir = TempDir::new().unwrap();
    let mut classifier = Classifier::default();
    let stats =
        classify_document(Feed::Dump, &b"<register></register>"[..], &mut classifier).unwrap();
    assert_eq!(stats.entries, 0);
    classifier.publish(dir.path()).unwrap();

    assert_eq!(std::fs::read_to_string(dir.path().join("urls.txt")).unwrap(), "");
}

#[test]
fn test_malformed_document_is_rejected() {
    let mut classifier = Classifier::default();
    let broken = b"<register><content id=\"1\"><domain>a.example</domain></wrong></register>";
    assert!(classify_document(Feed::Dump, &broken[..], &mut classifier).is_err());
}
