//! Export configuration

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Host and port of a browser already running with remote debugging enabled
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteBrowser {
    pub host: String,
    pub port: u16,
}

impl RemoteBrowser {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

/// Export configuration
///
/// At least one of `remote` and `binary` must be set. When both are, the
/// remote browser is tried first and the binary is the fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExportConfig {
    /// Path to a local Chrome/Chromium binary
    pub binary: Option<PathBuf>,

    pub remote: Option<RemoteBrowser>,

    /// How long a local browser may take to announce its debug address
    #[serde(with = "humantime_serde")]
    pub startup_timeout: Duration,

    /// Read timeout of the page connection; bounds every wait during a render
    #[serde(with = "humantime_serde")]
    pub page_timeout: Duration,

    /// Timeout of the `/json/version` request
    #[serde(with = "humantime_serde")]
    pub probe_timeout: Duration,

    /// Per call timeout of the layout scripts
    #[serde(with = "humantime_serde")]
    pub layout_timeout: Duration,

    /// Domains that must be enabled on the page
    pub required_domains: Vec<String>,

    /// Domains enabled on a best effort basis (e.g. deprecated ones)
    pub optional_domains: Vec<String>,

    /// Base for the temporary browser profile, defaults to the system temp dir
    pub temp_root: Option<PathBuf>,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            binary: None,
            remote: None,
            startup_timeout: Duration::from_secs(10),
            page_timeout: Duration::from_secs(300),
            probe_timeout: Duration::from_secs(10),
            layout_timeout: Duration::from_millis(1000),
            required_domains: vec!["Log".into(), "Network".into(), "Page".into()],
            optional_domains: vec!["Console".into()],
            temp_root: None,
        }
    }
}

impl ExportConfig {
    pub fn with_binary(mut self, binary: impl Into<PathBuf>) -> Self {
        self.binary = Some(binary.into());
        self
    }

    pub fn with_remote(mut self, host: impl Into<String>, port: u16) -> Self {
        self.remote = Some(RemoteBrowser::new(host, port));
        self
    }

    pub fn with_startup_timeout(mut self, timeout: Duration) -> Self {
        self.startup_timeout = timeout;
        self
    }

    pub fn with_temp_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.temp_root = Some(root.into());
        self
    }
}
