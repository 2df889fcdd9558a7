//! Streaming decoder for registry documents.
//!
//! Both the main dump (`register`) and the social resources register
//! (`registerSocResources`) are a flat sequence of `content` elements.
//! Entries are handed to the caller one at a time in document order, read
//! straight from the source without holding the document in memory.

use encoding_rs::Encoding;
use encoding_rs_io::DecodeReaderBytesBuilder;
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::{BufRead, BufReader, Cursor, Read};
use tracing::debug;

use crate::error::DecodeError;
use crate::registry::{parse_include_time, BlockType, RegistryEntry, SocialEntry};

/// Counters reported after a document has been read.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DecodeStats {
    pub entries: usize,
    /// Tolerable schema mismatches that were skipped.
    pub tolerated: usize,
}

/// Bytes read ahead to find the XML declaration.
const PROLOG_PEEK: u64 = 1024;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Wrap `source` in a reader yielding UTF-8, transcoding from the charset
/// named in the XML declaration.
///
/// Documents without a declared encoding are treated as UTF-8. A byte order
/// mark wins over the declaration.
pub fn utf8_reader<R: Read>(mut source: R) -> Result<impl BufRead, DecodeError> {
    let mut head = Vec::new();
    (&mut source)
        .take(PROLOG_PEEK)
        .read_to_end(&mut head)
        .map_err(|e| DecodeError::Io(e.to_string()))?;

    let label = declared_label(&head).unwrap_or_else(|| "utf-8".to_string());
    let encoding = Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| DecodeError::Charset(label.clone()))?;
    debug!("Decoding registry document as {}", encoding.name());

    let transcoded = DecodeReaderBytesBuilder::new()
        .encoding(Some(encoding))
        .build(Cursor::new(head).chain(source));
    Ok(BufReader::new(transcoded))
}

/// Encoding label of the XML declaration at the start of `head`, if any.
fn declared_label(head: &[u8]) -> Option<String> {
    let head = head.strip_prefix(UTF8_BOM).unwrap_or(head);
    let mut reader = Reader::from_reader(head);
    let mut buf = Vec::new();
    match reader.read_event_into(&mut buf) {
        Ok(Event::Decl(decl)) => match decl.encoding() {
            Some(Ok(label)) => Some(String::from_utf8_lossy(&label).into_owned()),
            _ => None,
        },
        _ => None,
    }
}

/// A `content` element before it is mapped to a typed entry.
#[derive(Debug, Default)]
struct RawContent {
    attrs: Vec<(String, String)>,
    fields: Vec<(String, String)>,
}

impl RawContent {
    fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.as_str())
    }

    fn field_values(&self, names: &[&str]) -> Vec<String> {
        self.fields
            .iter()
            .filter(|(k, _)| names.iter().any(|n| *n == k.as_str()))
            .map(|(_, v)| v.clone())
            .collect()
    }

    fn first_field(&self, name: &str) -> String {
        self.fields
            .iter()
            .find(|(k, _)| k == name)
            .map(|(_, v)| v.clone())
            .unwrap_or_default()
    }

    fn into_registry_entry(self) -> RegistryEntry {
        RegistryEntry {
            id: self.attr("id").and_then(|v| v.trim().parse().ok()),
            block_type: BlockType::from_attr(self.attr("blockType").unwrap_or_default()),
            entry_type: self.attr("entryType").unwrap_or_default().to_string(),
            domains: self.field_values(&["domain"]),
            ips: self.field_values(&["ip", "ipv6"]),
            subnets: self.field_values(&["ipSubnet", "ipv6Subnet"]),
            urls: self.field_values(&["url"]),
        }
    }

    fn into_social_entry(self) -> SocialEntry {
        SocialEntry {
            id: self
                .attr("id")
                .and_then(|v| v.trim().parse().ok())
                .unwrap_or_default(),
            content_hash: self.attr("hash").unwrap_or_default().to_string(),
            include_time: self.attr("includeTime").and_then(parse_include_time),
            resource_name: self.first_field("resourceName"),
            domain: self.first_field("domain"),
            subnets: self.field_values(&["ipSubnet", "ipv6Subnet"]),
        }
    }
}

/// Stream the main dump, calling `on_entry` for every `content` element.
pub fn read_dump<R, F>(source: R, mut on_entry: F) -> Result<DecodeStats, DecodeError>
where
    R: Read,
    F: FnMut(RegistryEntry),
{
    walk_contents(source, |raw| on_entry(raw.into_registry_entry()))
}

/// Stream the social resources register.
pub fn read_social<R, F>(source: R, mut on_entry: F) -> Result<DecodeStats, DecodeError>
where
    R: Read,
    F: FnMut(SocialEntry),
{
    walk_contents(source, |raw| on_entry(raw.into_social_entry()))
}

fn walk_contents<R, F>(source: R, mut emit: F) -> Result<DecodeStats, DecodeError>
where
    R: Read,
    F: FnMut(RawContent),
{
    let mut reader = Reader::from_reader(utf8_reader(source)?);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();

    let mut stats = DecodeStats::default();
    let mut current: Option<RawContent> = None;
    let mut field: Option<(String, String)> = None;

    loop {
        buf.clear();
        let event = reader.read_event_into(&mut buf).map_err(|e| match e {
            quick_xml::Error::Io(io) => DecodeError::Io(io.to_string()),
            other => DecodeError::Syntax {
                position: reader.error_position() as u64,
                message: other.to_string(),
            },
        })?;

        match event {
            Event::Start(e) => {
                let name = local_name(&e);
                if name == "content" {
                    if let Some(open) = current.take() {
                        tolerate(
                            &mut stats,
                            DecodeError::SchemaMismatch("nested <content> element".into()),
                        );
                        stats.entries += 1;
                        emit(open);
                    }
                    current = Some(RawContent {
                        attrs: collect_attributes(&e, &mut stats),
                        fields: Vec::new(),
                    });
                } else if current.is_some() {
                    field = Some((name, String::new()));
                }
            }
            Event::Empty(e) => {
                if local_name(&e) == "content" {
                    stats.entries += 1;
                    emit(RawContent {
                        attrs: collect_attributes(&e, &mut stats),
                        fields: Vec::new(),
                    });
                }
            }
            Event::Text(t) => {
                if let Some((_, value)) = field.as_mut() {
                    match t.unescape() {
                        Ok(text) => value.push_str(&text),
                        Err(e) => tolerate(&mut stats, DecodeError::SchemaMismatch(e.to_string())),
                    }
                }
            }
            Event::CData(t) => {
                if let Some((_, value)) = field.as_mut() {
                    value.push_str(&String::from_utf8_lossy(&t.into_inner()));
                }
            }
            Event::End(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "content" {
                    field = None;
                    if let Some(done) = current.take() {
                        stats.entries += 1;
                        emit(done);
                    }
                } else if field.as_ref().is_some_and(|(open, _)| *open == name) {
                    if let (Some((key, value)), Some(content)) = (field.take(), current.as_mut()) {
                        let value = value.trim();
                        if !value.is_empty() {
                            content.fields.push((key, value.to_string()));
                        }
                    }
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if let Some(open) = current.take() {
        tolerate(
            &mut stats,
            DecodeError::SchemaMismatch("unterminated <content> element".into()),
        );
        stats.entries += 1;
        emit(open);
    }

    Ok(stats)
}

fn local_name(e: &BytesStart<'_>) -> String {
    String::from_utf8_lossy(e.local_name().as_ref()).into_owned()
}

fn collect_attributes(e: &BytesStart<'_>, stats: &mut DecodeStats) -> Vec<(String, String)> {
    let mut attrs = Vec::new();
    for attr in e.attributes() {
        match attr {
            Ok(attr) => {
                let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).into_owned();
                match attr.unescape_value() {
                    Ok(value) => attrs.push((key, value.into_owned())),
                    Err(err) => tolerate(stats, DecodeError::SchemaMismatch(err.to_string())),
                }
            }
            Err(err) => tolerate(stats, DecodeError::SchemaMismatch(err.to_string())),
        }
    }
    attrs
}

fn tolerate(stats: &mut DecodeStats, err: DecodeError) {
    debug_assert!(err.is_tolerable());
    debug!("Skipping malformed registry fragment: {}", err);
    stats.tolerated += 1;
}
