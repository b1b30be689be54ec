//! PyPI registry client
//!
//! Two collaborator surfaces the pipeline depends on:
//! - the changelog API (XML-RPC): current serial and changes-since-serial
//! - the metadata API (JSON): release list and per-release file URLs
//!
//! Both are modelled as traits so the pipeline can be exercised against
//! in-memory fakes; [`PypiClient`] is the production implementation.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;

use crate::{Error, Result};

const PYPI_XMLRPC_URL: &str = "https://pypi.org/pypi";
const PYPI_JSON_BASE: &str = "https://pypi.org/pypi";
const USER_AGENT: &str = concat!("pkgdiff/", env!("CARGO_PKG_VERSION"));

/// One changelog entry, shaped after the registry's
/// `(name, version, timestamp, action, serial)` tuple.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeEvent {
    pub name: String,
    pub version: Option<String>,
    pub timestamp: i64,
    pub action: String,
    pub serial: u64,
}

/// One downloadable file attached to a release.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ReleaseFile {
    pub url: String,
    pub filename: String,
    #[serde(default)]
    pub size: Option<u64>,
}

/// Project-level metadata. Only the release map is used; its key order
/// is the registry-reported order and must be preserved.
#[derive(Debug, Default, Deserialize)]
pub struct ProjectMetadata {
    #[serde(default)]
    pub releases: serde_json::Map<String, serde_json::Value>,
}

/// Release-level metadata: the files published for one version.
#[derive(Debug, Default, Deserialize)]
pub struct ReleaseMetadata {
    #[serde(default)]
    pub urls: Vec<ReleaseFile>,
}

/// Serial-indexed change feed.
#[async_trait]
pub trait ChangeFeed: Send + Sync {
    async fn last_serial(&self) -> Result<u64>;
    async fn changes_since(&self, serial: u64) -> Result<Vec<ChangeEvent>>;
}

/// Package metadata lookups.
#[async_trait]
pub trait PackageIndex: Send + Sync {
    async fn project(&self, name: &str) -> Result<ProjectMetadata>;
    async fn release(&self, name: &str, version: &str) -> Result<ReleaseMetadata>;
}

/// PyPI client backed by the public XML-RPC and JSON APIs.
#[derive(Clone)]
pub struct PypiClient {
    client: reqwest::Client,
}

impl PypiClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::builder()
                .user_agent(USER_AGENT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    async fn xmlrpc_call(&self, body: String) -> Result<String> {
        let response = self
            .client
            .post(PYPI_XMLRPC_URL)
            .header(reqwest::header::CONTENT_TYPE, "text/xml")
            .body(body)
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Error::Feed(format!(
                "changelog API returned {}",
                response.status()
            )));
        }

        response.text().await.map_err(Error::Http)
    }
}

impl Default for PypiClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeed for PypiClient {
    async fn last_serial(&self) -> Result<u64> {
        let body = method_call("changelog_last_serial", None);
        let xml = self.xmlrpc_call(body).await?;
        parse_serial_response(&xml)
    }

    async fn changes_since(&self, serial: u64) -> Result<Vec<ChangeEvent>> {
        let body = method_call("changelog_since_serial", Some(serial));
        let xml = self.xmlrpc_call(body).await?;
        parse_changelog_response(&xml)
    }
}

#[async_trait]
impl PackageIndex for PypiClient {
    async fn project(&self, name: &str) -> Result<ProjectMetadata> {
        let url = format!("{}/{}/json", PYPI_JSON_BASE, name);
        fetch_json(&self.client, &url, name).await
    }

    async fn release(&self, name: &str, version: &str) -> Result<ReleaseMetadata> {
        let url = format!("{}/{}/{}/json", PYPI_JSON_BASE, name, version);
        fetch_json(&self.client, &url, name).await
    }
}

async fn fetch_json<T: serde::de::DeserializeOwned>(
    client: &reqwest::Client,
    url: &str,
    name: &str,
) -> Result<T> {
    let response = client.get(url).send().await?;

    if !response.status().is_success() {
        return Err(Error::Metadata(format!(
            "{}: metadata API returned {}",
            name,
            response.status()
        )));
    }

    let text = response.text().await?;
    serde_json::from_str(&text).map_err(|e| Error::Metadata(format!("{}: {}", name, e)))
}

/// Build an XML-RPC method call body. The changelog methods take at
/// most one integer parameter.
fn method_call(method: &str, arg: Option<u64>) -> String {
    let params = match arg {
        Some(n) => format!("<param><value><int>{}</int></value></param>", n),
        None => String::new(),
    };
    format!(
        "<?xml version=\"1.0\"?><methodCall><methodName>{}</methodName><params>{}</params></methodCall>",
        method, params
    )
}

static FAULT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?s)<fault>.*?<string>([^<]*)</string>").expect("invalid fault regex")
});
static INT_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(?:int|i4)>\s*(-?\d+)\s*</(?:int|i4)>").expect("invalid int regex")
});
static SCALAR_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"<(string|int|i4|nil)\s*/?>([^<]*)").expect("invalid scalar regex")
});

fn check_fault(xml: &str) -> Result<()> {
    if xml.contains("<fault>") {
        let msg = FAULT_RE
            .captures(xml)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_string())
            .unwrap_or_else(|| "unknown fault".to_string());
        return Err(Error::Feed(format!("XML-RPC fault: {}", msg)));
    }
    Ok(())
}

/// Extract the single integer from a `changelog_last_serial` response.
pub fn parse_serial_response(xml: &str) -> Result<u64> {
    check_fault(xml)?;
    INT_RE
        .captures(xml)
        .and_then(|c| c.get(1))
        .and_then(|m| m.as_str().parse().ok())
        .ok_or_else(|| Error::Feed("no serial in response".to_string()))
}

/// Extract changelog entries from a `changelog_since_serial` response.
///
/// The response is an array of `(name, version, timestamp, action,
/// serial)` arrays. The first `<array><data>` is the outer wrapper;
/// every subsequent one opens an entry.
pub fn parse_changelog_response(xml: &str) -> Result<Vec<ChangeEvent>> {
    check_fault(xml)?;

    let mut events = Vec::new();
    for chunk in xml.split("<array><data>").skip(2) {
        let entry = match chunk.split("</data>").next() {
            Some(body) => body,
            None => continue,
        };

        let mut fields = Vec::new();
        for caps in SCALAR_RE.captures_iter(entry) {
            let kind = &caps[1];
            let text = &caps[2];
            fields.push(match kind {
                "nil" => None,
                _ => Some(unescape_xml(text)),
            });
        }

        if fields.len() < 5 {
            return Err(Error::Feed(format!(
                "malformed changelog entry: expected 5 fields, got {}",
                fields.len()
            )));
        }

        let name = fields[0]
            .take()
            .ok_or_else(|| Error::Feed("changelog entry without package name".to_string()))?;
        let version = fields[1].take();
        let timestamp = parse_field(fields[2].take(), "timestamp")?;
        let action = fields[3]
            .take()
            .ok_or_else(|| Error::Feed("changelog entry without action".to_string()))?;
        let serial = parse_field(fields[4].take(), "serial")?;

        events.push(ChangeEvent {
            name,
            version,
            timestamp,
            action,
            serial,
        });
    }
    Ok(events)
}

fn parse_field<T: std::str::FromStr>(field: Option<String>, what: &str) -> Result<T> {
    field
        .as_deref()
        .and_then(|v| v.parse().ok())
        .ok_or_else(|| Error::Feed(format!("changelog entry with invalid {}", what)))
}

fn unescape_xml(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&apos;", "'")
        .replace("&amp;", "&")
}
