//! SOAP client for the registry operator service.
//!
//! Three calls are used: `getLastDumpDate` (current dump version),
//! `getResult` (main dump archive) and `getResultSocResources` (social
//! resources archive). Archives arrive base64-encoded inside the SOAP body;
//! the fetcher returns the decoded zip bytes and leaves extraction to the
//! caller.

use anyhow::{Context, Result};
use async_trait::async_trait;
use base64::Engine;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderValue, CONTENT_TYPE};
use reqwest::Client;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::{Config, SecureString};
use crate::error::{DecodeError, RknError};
use crate::utils::format_bytes;

#[cfg(test)]
use mockall::automock;

const TIMEOUT_SECS: u64 = 60;
const MAX_RETRIES: u32 = 3;
const RETRY_DELAY_MS: u64 = 2000;

/// Largest SOAP response accepted (1 GiB); full dumps are a few hundred MiB.
const MAX_RESPONSE_SIZE: u64 = 1024 * 1024 * 1024;

const SOAP_ENV_NS: &str = "http://schemas.xmlsoap.org/soap/envelope/";
const OPERATOR_NS: &str = "http://vigruzki.rkn.gov.ru/OperatorRequest/";

pub const METHOD_LAST_DUMP_DATE: &str = "getLastDumpDate";
pub const METHOD_RESULT: &str = "getResult";
pub const METHOD_SOC_RESULT: &str = "getResultSocResources";

/// Source of registry payloads.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Current dump version (epoch milliseconds).
    async fn last_dump_version(&self) -> Result<i64>;

    /// Zip archive holding the main dump.
    async fn fetch_dump(&self) -> Result<Vec<u8>>;

    /// Zip archive holding the social resources register.
    async fn fetch_social(&self) -> Result<Vec<u8>>;
}

/// Fields of interest in a SOAP response body.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct SoapResponse {
    pub last_dump_date: Option<i64>,
    pub result: Option<bool>,
    pub result_comment: Option<String>,
    /// Base64 text of `registerZipArchive`, whitespace removed.
    pub archive: Option<String>,
    pub fault: Option<String>,
}

impl SoapResponse {
    fn into_archive(self, method: &str) -> Result<Vec<u8>> {
        if let Some(fault) = self.fault {
            return Err(RknError::Registry(format!("{} fault: {}", method, fault)).into());
        }
        if self.result == Some(false) {
            return Err(RknError::Registry(format!(
                "{} refused: {}",
                method,
                self.result_comment.unwrap_or_else(|| "no comment".to_string())
            ))
            .into());
        }
        let encoded = self
            .archive
            .ok_or_else(|| RknError::Registry(format!("{} response has no archive", method)))?;
        base64::engine::general_purpose::STANDARD
            .decode(encoded.as_bytes())
            .with_context(|| format!("{} archive is not valid base64", method))
    }
}

/// HTTP client speaking SOAP 1.1 to the registry.
pub struct SoapFetcher {
    client: Client,
    endpoint: String,
    user: SecureString,
    pass: SecureString,
}

impl SoapFetcher {
    pub fn new(config: &Config) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(TIMEOUT_SECS))
            .user_agent(format!("rkndaemon/{}", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;
        Ok(Self {
            client,
            endpoint: config.url.clone(),
            user: config.user.clone(),
            pass: config.pass.clone(),
        })
    }

    /// Perform `method` with retry and exponential backoff; returns the body.
    async fn call(&self, method: &str) -> Result<String> {
        let envelope = build_envelope(method);
        let mut last_error = None;

        for attempt in 0..MAX_RETRIES {
            if attempt > 0 {
                let delay = RETRY_DELAY_MS * (1 << (attempt - 1));
                debug!("Retry {} after {}ms for {}", attempt, delay, method);
                tokio::time::sleep(Duration::from_millis(delay)).await;
            }

            let request = self
                .client
                .post(&self.endpoint)
                .basic_auth(self.user.as_str(), Some(self.pass.as_str()))
                .header(CONTENT_TYPE, HeaderValue::from_static("text/xml; charset=utf-8"))
                .header("SOAPAction", format!("\"{}{}\"", OPERATOR_NS, method))
                .body(envelope.clone());

            match request.send().await {
                Ok(response) => {
                    if let Some(length) = response.content_length() {
                        if length > MAX_RESPONSE_SIZE {
                            return Err(RknError::Network(format!(
                                "{} response too large: {} (max: {})",
                                method,
                                format_bytes(length),
                                format_bytes(MAX_RESPONSE_SIZE)
                            ))
                            .into());
                        }
                    }

                    let status = response.status();
                    let body = match response.text().await {
                        Ok(body) => body,
                        Err(e) => {
                            last_error = Some(anyhow::Error::from(e));
                            continue;
                        }
                    };

                    // SOAP faults come back as HTTP 500 with a parseable body.
                    if status.is_success() || body.contains("Fault") {
                        debug!("{} returned {} ({})", method, status, format_bytes(body.len() as u64));
                        return Ok(body);
                    }
                    last_error = Some(anyhow::anyhow!("{} failed with HTTP {}", method, status));
                }
                Err(e) => {
                    last_error = Some(e.into());
                }
            }
        }

        Err(last_error
            .unwrap_or_else(|| anyhow::anyhow!("Unknown error"))
            .context(RknError::Network(format!("{} failed after {} attempts", method, MAX_RETRIES))))
    }
}

#[async_trait]
impl Fetcher for SoapFetcher {
    async fn last_dump_version(&self) -> Result<i64> {
        let body = self.call(METHOD_LAST_DUMP_DATE).await?;
        let response = parse_response(&body)?;
        if let Some(fault) = response.fault {
            return Err(RknError::Registry(format!("{} fault: {}", METHOD_LAST_DUMP_DATE, fault)).into());
        }
        response.last_dump_date.ok_or_else(|| {
            RknError::Registry(format!("{} response has no lastDumpDate", METHOD_LAST_DUMP_DATE))
                .into()
        })
    }

    async fn fetch_dump(&self) -> Result<Vec<u8>> {
        let body = self.call(METHOD_RESULT).await?;
        let archive = parse_response(&body)?.into_archive(METHOD_RESULT)?;
        info!("Downloaded dump archive ({})", format_bytes(archive.len() as u64));
        Ok(archive)
    }

    async fn fetch_social(&self) -> Result<Vec<u8>> {
        let body = self.call(METHOD_SOC_RESULT).await?;
        let response = parse_response(&body).inspect_err(|e| {
            if matches!(e, DecodeError::Syntax { .. }) {
                warn!(
                    "Social register response is not XML. The server's IP address may need \
                     to be registered with the registry operator."
                );
            }
        })?;
        let archive = response.into_archive(METHOD_SOC_RESULT)?;
        info!("Downloaded social archive ({})", format_bytes(archive.len() as u64));
        Ok(archive)
    }
}

/// SOAP 1.1 envelope for a parameterless operator request.
pub fn build_envelope(method: &str) -> String {
    format!(
        "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
         <soap:Envelope xmlns:soap=\"{}\" xmlns:tns=\"{}\">\
         <soap:Body><tns:{}/></soap:Body></soap:Envelope>",
        SOAP_ENV_NS, OPERATOR_NS, method
    )
}

/// Pull the known fields out of a SOAP response, ignoring namespaces.
pub fn parse_response(xml: &str) -> Result<SoapResponse, DecodeError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut response = SoapResponse::default();
    let mut current: Option<String> = None;
    let mut saw_envelope = false;

    loop {
        let event = reader.read_event().map_err(|e| DecodeError::Syntax {
            position: reader.error_position() as u64,
            message: e.to_string(),
        })?;

        match event {
            Event::Start(e) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).into_owned();
                if name == "Envelope" {
                    saw_envelope = true;
                }
                current = Some(name);
            }
            Event::End(_) => current = None,
            Event::Text(t) => {
                let Some(name) = current.as_deref() else {
                    continue;
                };
                let text = t
                    .unescape()
                    .map_err(|e| DecodeError::SchemaMismatch(e.to_string()))?;
                let text = text.trim();
                match name {
                    "lastDumpDate" => {
                        response.last_dump_date = Some(text.parse().map_err(|_| {
                            DecodeError::SchemaMismatch(format!("bad lastDumpDate: {}", text))
                        })?);
                    }
                    "result" => response.result = Some(text.eq_ignore_ascii_case("true")),
                    "resultComment" => response.result_comment = Some(text.to_string()),
                    "registerZipArchive" => {
                        let archive = response.archive.get_or_insert_with(String::new);
                        archive.extend(text.chars().filter(|c| !c.is_ascii_whitespace()));
                    }
                    "faultstring" => response.fault = Some(text.to_string()),
                    _ => {}
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    if !saw_envelope {
        return Err(DecodeError::SchemaMismatch("not a SOAP envelope".into()));
    }
    Ok(response)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn envelope(body: &str) -> String {
        format!(
            "<?xml version=\"1.0\" encoding=\"UTF-8\"?>\
             <SOAP-ENV:Envelope xmlns:SOAP-ENV=\"{}\" xmlns:ns1=\"{}\">\
             <SOAP-ENV:Body>{}</SOAP-ENV:Body></SOAP-ENV:Envelope>",
            SOAP_ENV_NS, OPERATOR_NS, body
        )
    }

    #[test]
    fn test_build_envelope() {
        let env = build_envelope(METHOD_LAST_DUMP_DATE);
        assert!(env.contains("<tns:getLastDumpDate/>"));
        assert!(env.contains(OPERATOR_NS));
    }

    #[test]
    fn test_parse_last_dump_date() {
        let xml = envelope(
            "<ns1:getLastDumpDateResponse><lastDumpDate>1700000000123</lastDumpDate>\
             <lastDumpDateUrgently>1700000000000</lastDumpDateUrgently>\
             </ns1:getLastDumpDateResponse>",
        );
        let response = parse_response(&xml).unwrap();
        assert_eq!(response.last_dump_date, Some(1_700_000_000_123));
    }

    #[test]
    fn test_parse_result_archive() {
        let xml = envelope(
            "<ns1:getResultResponse><result>true</result>\
             <registerZipArchive>aGVs\nbG8=</registerZipArchive>\
             </ns1:getResultResponse>",
        );
        let response = parse_response(&xml).unwrap();
        assert_eq!(response.result, Some(true));
        assert_eq!(response.into_archive(METHOD_RESULT).unwrap(), b"hello");
    }

    #[test]
    fn test_result_false_carries_comment() {
        let xml = envelope(
            "<ns1:getResultResponse><result>false</result>\
             <resultComment>request is not ready</resultComment>\
             </ns1:getResultResponse>",
        );
        let err = parse_response(&xml)
            .unwrap()
            .into_archive(METHOD_RESULT)
            .unwrap_err();
        assert!(err.to_string().contains("request is not ready"));
    }

    #[test]
    fn test_fault() {
        let xml = envelope(
            "<SOAP-ENV:Fault><faultcode>SOAP-ENV:Client</faultcode>\
             <faultstring>Access denied</faultstring></SOAP-ENV:Fault>",
        );
        let response = parse_response(&xml).unwrap();
        assert_eq!(response.fault.as_deref(), Some("Access denied"));
        assert!(response.into_archive(METHOD_SOC_RESULT).is_err());
    }

    #[test]
    fn test_bad_base64() {
        let response = SoapResponse {
            result: Some(true),
            archive: Some("***".into()),
            ..Default::default()
        };
        assert!(response.into_archive(METHOD_RESULT).is_err());
    }

    #[test]
    fn test_not_soap() {
        assert!(matches!(
            parse_response("<html><body>Forbidden</body></html>"),
            Err(DecodeError::SchemaMismatch(_))
        ));
        assert!(matches!(
            parse_response("<a><b></a>"),
            Err(DecodeError::Syntax { .. })
        ));
    }

    #[tokio::test]
    async fn test_unreachable_endpoint_is_network_error() {
        let config = Config {
            url: "http://127.0.0.1:9/".to_string(),
            user: "u".into(),
            pass: "p".into(),
            ..Config::default()
        };
        let fetcher = SoapFetcher::new(&config).unwrap();
        let err = fetcher.last_dump_version().await.unwrap_err();
        assert!(err.to_string().contains("getLastDumpDate failed"));
    }
}
