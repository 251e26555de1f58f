//! Render Session - turns a document into PDF bytes over CDP
//!
//! Sequence on one endpoint:
//! 1. browser: `Target.createTarget(about:blank)`
//! 2. page: enable domains
//! 3. navigate and wait for the frame, or inject HTML and wait for load
//! 4. wait for network idle
//! 5. injected HTML only: run the layout hook under print media
//! 6. `Page.printToPDF`, decode
//! 7. close the target and both connections
//!
//! # Layout readiness
//!
//! Injected HTML may define a global `Layout` class; its `apply()` is
//! invoked on the next tick. The page signals that layout is done by
//! setting `document.documentElement.dataset.layoutReady = 'yes'` or by
//! dispatching a `layout-ready` event on `document`. Pages that do neither
//! are printed anyway after a 10 second grace period.

use base64::Engine as _;
use serde_json::{json, Map, Value};

use crate::cdp::protocol::CreateTargetResult;
use crate::cdp::{CDPClient, Connector, TargetId};
use crate::config::ExportConfig;
use crate::error::{PdfError, Result};
use crate::events::{FRAME_STOPPED_LOADING, LOAD_EVENT_FIRED};
use crate::supervisor::DebuggerAddress;

/// Options forwarded verbatim to `Page.printToPDF`
pub type PrintOptions = Map<String, Value>;

const LAYOUT_HOOK: &str = "setTimeout(() => new Layout().apply(), 0)";

const WAIT_FOR_LAYOUT: &str = r#"new Promise((fulfill, reject) => {
    let timeoutId = setTimeout(() => reject('fail'), 10000);

    if (document.documentElement.dataset.layoutReady === 'yes') {
        clearTimeout(timeoutId);
        fulfill(null);
        return;
    }

    document.addEventListener('layout-ready', e => {
        clearTimeout(timeoutId);
        fulfill(e.detail);
    }, {
        once: true
    });
})"#;

/// What to print
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Document {
    /// Injected into a blank page
    Html(String),
    /// Navigated to
    Url(String),
}

impl Document {
    pub fn validate(&self) -> Result<()> {
        match self {
            Document::Html(content) | Document::Url(content) if content.is_empty() => {
                Err(PdfError::NothingToRender)
            }
            _ => Ok(()),
        }
    }
}

pub struct RenderSession<'a> {
    connector: &'a dyn Connector,
    config: &'a ExportConfig,
}

impl<'a> RenderSession<'a> {
    pub fn new(connector: &'a dyn Connector, config: &'a ExportConfig) -> Self {
        Self { connector, config }
    }

    pub async fn render(
        &self,
        address: &DebuggerAddress,
        document: &Document,
        options: &PrintOptions,
    ) -> Result<Vec<u8>> {
        document.validate()?;

        let transport = self.connector.connect(&address.browser_url(), None).await?;
        let mut browser = CDPClient::new(transport);

        let result = self.render_target(&mut browser, address, document, options).await;
        browser.close().await;
        result
    }

    async fn render_target(
        &self,
        browser: &mut CDPClient,
        address: &DebuggerAddress,
        document: &Document,
        options: &PrintOptions,
    ) -> Result<Vec<u8>> {
        let target_id = create_target(browser).await?;

        let connected = self
            .connector
            .connect(&address.page_url(&target_id), Some(self.config.page_timeout))
            .await;
        let mut page = match connected {
            Ok(transport) => CDPClient::new(transport),
            Err(e) => {
                if let Err(closed) = close_target(browser, &target_id).await {
                    tracing::debug!("Failed to close target {}: {}", target_id, closed);
                }
                return Err(e.into());
            }
        };

        let printed = self.print_page(&mut page, &target_id, document, options).await;
        let closed = close_target(browser, &target_id).await;
        page.close().await;

        let pdf = printed?;
        closed?;
        Ok(pdf)
    }

    async fn print_page(
        &self,
        page: &mut CDPClient,
        target_id: &str,
        document: &Document,
        options: &PrintOptions,
    ) -> Result<Vec<u8>> {
        self.enable_domains(page).await?;

        match document {
            Document::Url(url) => {
                let result = page.call("Page.navigate", Some(json!({ "url": url }))).await?;
                let frame_id = result["frameId"]
                    .as_str()
                    .ok_or_else(|| PdfError::UnexpectedResponse {
                        expected: "navigation frame",
                        payload: result.to_string(),
                    })?
                    .to_string();

                page.wait_for_event(FRAME_STOPPED_LOADING, Some(json!({ "frameId": frame_id })))
                    .await?;
            }
            Document::Html(html) => {
                // The main frame shares its id with the target
                page.call(
                    "Page.setDocumentContent",
                    Some(json!({ "frameId": target_id, "html": html })),
                )
                .await?;

                page.wait_for_event(LOAD_EVENT_FIRED, None).await?;
            }
        }

        page.wait_for_network_idle().await?;

        if let Document::Html(_) = document {
            self.await_layout(page).await?;
        }

        print_to_pdf(page, options).await
    }

    async fn enable_domains(&self, page: &mut CDPClient) -> Result<()> {
        for domain in &self.config.required_domains {
            page.call(&format!("{}.enable", domain), None).await?;
        }

        for domain in &self.config.optional_domains {
            if let Err(e) = page.call(&format!("{}.enable", domain), None).await {
                tracing::debug!("Optional domain {} not enabled: {}", domain, e);
            }
        }

        Ok(())
    }

    /// Layout scripts run under print media, which is reset whatever the outcome
    async fn await_layout(&self, page: &mut CDPClient) -> Result<()> {
        page.call("Emulation.setEmulatedMedia", Some(json!({ "media": "print" })))
            .await?;

        let applied = self.apply_layout(page).await;
        let reset = page
            .call("Emulation.setEmulatedMedia", Some(json!({ "media": "" })))
            .await;

        applied?;
        reset?;
        Ok(())
    }

    async fn apply_layout(&self, page: &mut CDPClient) -> Result<()> {
        let timeout = u64::try_from(self.config.layout_timeout.as_millis()).unwrap_or(u64::MAX);

        page.call(
            "Runtime.evaluate",
            Some(json!({ "timeout": timeout, "expression": LAYOUT_HOOK })),
        )
        .await?;

        // The call timeout doesn't cover the await, the promise rejects on its own
        let promised = page
            .call(
                "Runtime.evaluate",
                Some(json!({
                    "awaitPromise": true,
                    "returnByValue": true,
                    "timeout": timeout,
                    "expression": WAIT_FOR_LAYOUT,
                })),
            )
            .await?;

        if let Some(details) = promised.get("exceptionDetails") {
            match details["exception"]["description"].as_str() {
                Some(description) => {
                    tracing::error!("PDF layout failed to initialize: {}", description)
                }
                None => tracing::warn!("PDF layout failed to initialize. Pages might look skewed."),
            }
        }

        Ok(())
    }
}

async fn create_target(browser: &mut CDPClient) -> Result<TargetId> {
    let result = browser
        .call("Target.createTarget", Some(json!({ "url": "about:blank" })))
        .await?;

    serde_json::from_value::<CreateTargetResult>(result.clone())
        .map(|created| created.target_id)
        .map_err(|_| PdfError::UnexpectedResponse {
            expected: "target id",
            payload: result.to_string(),
        })
}

async fn close_target(browser: &mut CDPClient, target_id: &str) -> Result<()> {
    let result = browser
        .call("Target.closeTarget", Some(json!({ "targetId": target_id })))
        .await?;

    if result.get("success").is_none() {
        return Err(PdfError::CloseConfirmation(result.to_string()));
    }
    Ok(())
}

async fn print_to_pdf(page: &mut CDPClient, options: &PrintOptions) -> Result<Vec<u8>> {
    let mut params = options.clone();
    params.insert("transferMode".into(), json!("ReturnAsBase64"));
    params.insert("printBackground".into(), json!(true));

    let result = page
        .call("Page.printToPDF", Some(Value::Object(params)))
        .await?;

    let data = result["data"]
        .as_str()
        .filter(|data| !data.is_empty())
        .ok_or_else(|| PdfError::EmptyOutput(result.to_string()))?;

    Ok(base64::engine::general_purpose::STANDARD.decode(data)?)
}
