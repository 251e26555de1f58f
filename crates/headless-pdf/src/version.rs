//! Version probe - `/json/version` of a browser's debugging endpoint

use once_cell::sync::Lazy;
use regex::Regex;
use serde::Deserialize;
use std::time::Duration;
use url::Url;

use crate::error::{PdfError, Result};

static MAJOR_VERSION: Lazy<Regex> = Lazy::new(|| Regex::new(r"(\d+)\.[\d.]+").unwrap());

/// Browser metadata served at `/json/version`
#[derive(Debug, Clone, Deserialize)]
pub struct BrowserVersion {
    /// e.g. `HeadlessChrome/126.0.6478.126`
    #[serde(rename = "Browser")]
    pub browser: String,

    #[serde(rename = "webSocketDebuggerUrl")]
    pub web_socket_debugger_url: String,
}

impl BrowserVersion {
    /// Last path segment of the websocket debugger url
    pub fn browser_id(&self) -> Result<String> {
        let url = Url::parse(&self.web_socket_debugger_url)
            .map_err(|_| PdfError::InvalidDebuggerUrl(self.web_socket_debugger_url.clone()))?;

        url.path_segments()
            .and_then(|mut segments| segments.next_back())
            .filter(|id| !id.is_empty())
            .map(str::to_string)
            .ok_or_else(|| PdfError::InvalidDebuggerUrl(self.web_socket_debugger_url.clone()))
    }

    pub fn major_version(&self) -> Option<u32> {
        parse_major_version(&self.browser)
    }
}

/// Major version from a `<major>.<minor...>` string anywhere in `text`
pub fn parse_major_version(text: &str) -> Option<u32> {
    MAJOR_VERSION
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}

/// Fetches `/json/version` from a debugging endpoint
#[derive(Debug, Clone)]
pub struct VersionProbe {
    client: reqwest::Client,
}

impl VersionProbe {
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self { client })
    }

    /// `Ok(None)` when the endpoint answers with anything but 200
    pub async fn fetch(&self, host: &str, port: u16) -> Result<Option<BrowserVersion>> {
        let url = format!("http://{}:{}/json/version", host, port);
        tracing::debug!("Fetching browser version from {}", url);

        let response = self.client.get(&url).send().await?;
        if response.status() != reqwest::StatusCode::OK {
            tracing::debug!("Version endpoint answered with {}", response.status());
            return Ok(None);
        }

        Ok(Some(response.json().await?))
    }
}
