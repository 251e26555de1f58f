//! PDF Exporter - the high-level API
//!
//! Secures an endpoint, renders, and always releases the endpoint again.

use std::sync::Arc;

use crate::cdp::{Connector, WebSocketConnector};
use crate::config::ExportConfig;
use crate::error::Result;
use crate::render::{Document, PrintOptions, RenderSession};
use crate::supervisor::{Endpoint, Supervisor};

pub struct PdfExporter {
    supervisor: Supervisor,
    connector: Arc<dyn Connector>,
}

impl PdfExporter {
    pub fn new(config: ExportConfig) -> Result<Self> {
        Self::with_connector(config, Arc::new(WebSocketConnector))
    }

    pub fn with_connector(config: ExportConfig, connector: Arc<dyn Connector>) -> Result<Self> {
        Ok(Self {
            supervisor: Supervisor::new(config)?,
            connector,
        })
    }

    pub fn config(&self) -> &ExportConfig {
        self.supervisor.config()
    }

    /// Render `document` to PDF bytes
    pub async fn to_pdf(&self, document: &Document, options: &PrintOptions) -> Result<Vec<u8>> {
        document.validate()?;

        let result = self.export(document, options).await;
        match &result {
            Err(e) if e.is_startup() => tracing::error!("Failed to start browser process: {}", e),
            Err(e) => tracing::error!("Failed to print PDF. An error occurred: {}", e),
            Ok(_) => {}
        }
        result
    }

    async fn export(&self, document: &Document, options: &PrintOptions) -> Result<Vec<u8>> {
        let endpoint = self.supervisor.acquire_endpoint().await?;
        if endpoint.is_local() {
            return self.render_on(endpoint, document, options).await;
        }

        match self.render_on(endpoint, document, options).await {
            Err(e) => {
                let endpoint = self.supervisor.recover(e).await?;
                self.render_on(endpoint, document, options).await
            }
            pdf => pdf,
        }
    }

    /// Render on `endpoint`, releasing it whatever the outcome
    async fn render_on(
        &self,
        endpoint: Endpoint,
        document: &Document,
        options: &PrintOptions,
    ) -> Result<Vec<u8>> {
        tracing::debug!(
            "Rendering on {} browser at {}:{}",
            if endpoint.is_local() { "local" } else { "remote" },
            endpoint.address().host,
            endpoint.address().port
        );

        let session = RenderSession::new(self.connector.as_ref(), self.config());
        let result = session.render(endpoint.address(), document, options).await;

        endpoint.release().await;
        result
    }

    /// Major version of the browser that would be used
    pub async fn browser_version(&self) -> Result<Option<u32>> {
        self.supervisor.browser_version().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cdp::testing::{
        closed_port, serve_http_once, version_json, CapturedLogs, FakeChrome, ScriptedConnector,
        FAKE_PDF,
    };
    use crate::cdp::CDPError;
    use crate::error::PdfError;
    use tokio_test::assert_err;

    fn html() -> Document {
        Document::Html("<h1>Report</h1>".into())
    }

    #[tokio::test]
    async fn test_remote_browser_render() {
        let port = serve_http_once("200 OK", version_json(9222, "remote-id")).await;
        let connector = Arc::new(ScriptedConnector::new(FakeChrome::default()));
        let exporter = PdfExporter::with_connector(
            ExportConfig::default().with_remote("127.0.0.1", port),
            connector.clone(),
        )
        .unwrap();

        let pdf = exporter.to_pdf(&html(), &PrintOptions::new()).await.unwrap();
        assert_eq!(pdf, FAKE_PDF);
        assert_eq!(
            connector.connections()[0].0,
            format!("ws://127.0.0.1:{}/devtools/browser/remote-id", port)
        );
    }

    #[tokio::test]
    async fn test_remote_failure_without_binary_is_surfaced() {
        let connector = Arc::new(ScriptedConnector::new(FakeChrome::default()));
        let exporter = PdfExporter::with_connector(
            ExportConfig::default().with_remote("127.0.0.1", closed_port()),
            connector.clone(),
        )
        .unwrap();

        let err = assert_err!(exporter.to_pdf(&html(), &PrintOptions::new()).await);
        assert!(matches!(err, PdfError::Http(_)));
        assert!(connector.connections().is_empty());
    }

    #[tokio::test]
    async fn test_dropped_remote_without_binary_is_surfaced() {
        let port = serve_http_once("200 OK", version_json(9222, "remote-id")).await;
        let connector =
            Arc::new(ScriptedConnector::new(FakeChrome::default()).refusing("remote-id"));
        let exporter = PdfExporter::with_connector(
            ExportConfig::default().with_remote("127.0.0.1", port),
            connector.clone(),
        )
        .unwrap();

        let err = assert_err!(exporter.to_pdf(&html(), &PrintOptions::new()).await);
        assert!(matches!(err, PdfError::Cdp(CDPError::Closed)));
        assert_eq!(connector.connections().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_document_fails_before_any_browser_work() {
        let exporter = PdfExporter::new(ExportConfig::default()).unwrap();

        let err = assert_err!(
            exporter
                .to_pdf(&Document::Html(String::new()), &PrintOptions::new())
                .await
        );
        assert!(matches!(err, PdfError::NothingToRender));
    }

    #[cfg(unix)]
    fn fake_browser(dir: &std::path::Path) -> std::path::PathBuf {
        use std::os::unix::fs::PermissionsExt;

        let path = dir.join("fake-chrome");
        std::fs::write(
            &path,
            "#!/bin/sh\n\
             echo 'DevTools listening on ws://127.0.0.1:9555/devtools/browser/local-id' >&2\n\
             exec sleep 30\n",
        )
        .unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();
        path
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unreachable_remote_falls_back_to_local_binary() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let connector = Arc::new(ScriptedConnector::new(FakeChrome::default()));
        let exporter = PdfExporter::with_connector(
            ExportConfig::default()
                .with_remote("127.0.0.1", closed_port())
                .with_binary(fake_browser(dir.path()))
                .with_temp_root(root.path()),
            connector.clone(),
        )
        .unwrap();

        let pdf = exporter.to_pdf(&html(), &PrintOptions::new()).await.unwrap();
        assert_eq!(pdf, FAKE_PDF);

        assert_eq!(logs.lines_with("WARN"), 1);
        assert_eq!(logs.lines_with("Failed to connect to remote chrome"), 1);
        assert_eq!(
            connector.connections()[0].0,
            "ws://127.0.0.1:9555/devtools/browser/local-id"
        );
        // Browser terminated and profile removed
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_remote_dropping_connection_falls_back_to_local_binary() {
        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let port = serve_http_once("200 OK", version_json(9222, "remote-id")).await;
        let dir = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        let connector =
            Arc::new(ScriptedConnector::new(FakeChrome::default()).refusing("remote-id"));
        let exporter = PdfExporter::with_connector(
            ExportConfig::default()
                .with_remote("127.0.0.1", port)
                .with_binary(fake_browser(dir.path()))
                .with_temp_root(root.path()),
            connector.clone(),
        )
        .unwrap();

        let pdf = exporter.to_pdf(&html(), &PrintOptions::new()).await.unwrap();
        assert_eq!(pdf, FAKE_PDF);

        assert_eq!(logs.lines_with("WARN"), 1);
        assert_eq!(
            logs.lines_with(&format!("Failed to connect to remote chrome: 127.0.0.1:{}", port)),
            1
        );

        let connections = connector.connections();
        assert_eq!(
            connections[0].0,
            format!("ws://127.0.0.1:{}/devtools/browser/remote-id", port)
        );
        assert_eq!(
            connections[1].0,
            "ws://127.0.0.1:9555/devtools/browser/local-id"
        );
        assert_eq!(std::fs::read_dir(root.path()).unwrap().count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_startup_failure_is_logged_as_such() {
        use std::os::unix::fs::PermissionsExt;

        let logs = CapturedLogs::default();
        let _guard = logs.install();

        let dir = tempfile::tempdir().unwrap();
        let binary = dir.path().join("broken-chrome");
        std::fs::write(&binary, "#!/bin/sh\nexit 1\n").unwrap();
        std::fs::set_permissions(&binary, std::fs::Permissions::from_mode(0o755)).unwrap();

        let exporter = PdfExporter::new(ExportConfig::default().with_binary(&binary)).unwrap();
        let err = assert_err!(exporter.to_pdf(&html(), &PrintOptions::new()).await);

        assert!(err.is_startup());
        assert_eq!(logs.lines_with("Failed to start browser process"), 1);
        assert_eq!(logs.lines_with("Failed to print PDF"), 0);
    }
}
