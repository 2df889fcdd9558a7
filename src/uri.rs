//! Hostname and URL normalization.
//!
//! Registry URLs arrive inconsistently encoded: some are already
//! percent-escaped, some carry raw Cyrillic, some carry both. Downstream
//! matchers compare strings literally, so the classifier publishes every
//! representation produced here.

use url::Url;

/// Characters `decodeURI` leaves escaped because they are URI delimiters.
const RESERVED: &[u8] = b";/?:@&=+$,#";

/// Parse `raw` and return its normalized serialization.
///
/// The host is IDNA-encoded, the path and query are percent-encoded and an
/// empty path becomes `/`.
pub fn normalize_url(raw: &str) -> Option<String> {
    Url::parse(raw.trim()).ok().map(String::from)
}

/// Extract the lowercase host of a URL, without port.
pub fn url_host(raw: &str) -> Option<String> {
    let url = Url::parse(raw.trim()).ok()?;
    url.host_str()
        .filter(|h| !h.is_empty())
        .map(|h| h.trim_start_matches('[').trim_end_matches(']').to_ascii_lowercase())
}

/// Whether the URL uses the secure scheme.
pub fn is_https(raw: &str) -> bool {
    Url::parse(raw.trim())
        .map(|u| u.scheme() == "https")
        .unwrap_or(false)
}

/// IDNA ASCII form of a domain (`пример.рф` -> `xn--e1afmkfd.xn--p1ai`).
pub fn domain_to_ascii(domain: &str) -> Option<String> {
    let domain = domain.trim().trim_end_matches('.');
    if domain.is_empty() {
        return None;
    }
    idna::domain_to_ascii(domain)
        .ok()
        .filter(|d| !d.is_empty())
}

/// Host of a bare domain, parsed as if it were `http://<domain>`.
pub fn host_of_domain(domain: &str) -> Option<String> {
    let domain = domain.trim();
    if domain.is_empty() {
        return None;
    }
    url_host(&format!("http://{}", domain))
}

/// Strip the leading wildcard marker of a domain mask.
pub fn strip_wildcard(mask: &str) -> Option<&str> {
    mask.trim()
        .strip_prefix("*.")
        .or_else(|| mask.trim().strip_prefix('*'))
        .map(|rest| rest.trim_start_matches('.'))
        .filter(|rest| !rest.is_empty())
}

/// Decode percent escapes the way JavaScript's `decodeURI` does.
///
/// Escapes of URI delimiters are kept. Returns `None` when the decoded
/// bytes are not valid UTF-8, where `decodeURI` would throw.
pub fn decode_uri(raw: &str) -> Option<String> {
    let bytes = raw.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' && i + 2 < bytes.len() {
            if let (Some(hi), Some(lo)) = (hex_value(bytes[i + 1]), hex_value(bytes[i + 2])) {
                let decoded = hi << 4 | lo;
                if RESERVED.contains(&decoded) {
                    out.extend_from_slice(&bytes[i..i + 3]);
                } else {
                    out.push(decoded);
                }
                i += 3;
                continue;
            }
        }
        out.push(bytes[i]);
        i += 1;
    }
    String::from_utf8(out).ok()
}

/// Escape every literal `%` as `%25`.
pub fn escape_percent(raw: &str) -> String {
    raw.replace('%', "%25")
}

fn hex_value(b: u8) -> Option<u8> {
    match b {
        b'0'..=b'9' => Some(b - b'0'),
        b'a'..=b'f' => Some(b - b'a' + 10),
        b'A'..=b'F' => Some(b - b'A' + 10),
        _ => None,
    }
}

/// Every published representation of a registry URL.
///
/// Returns an empty list when the URL does not parse.
pub fn url_variants(raw: &str) -> Vec<String> {
    let Some(normalized) = normalize_url(raw) else {
        return Vec::new();
    };
    let literal = raw.trim();
    let mut variants = vec![normalized, literal.to_string()];
    if let Some(decoded) = decode_uri(literal) {
        variants.push(decoded);
    }
    variants.push(escape_percent(literal));
    variants
}
