//! Render an HTML file or a URL to PDF
//!
//! ```text
//! CHROME_BINARY=/usr/bin/chromium cargo run --example html_to_pdf -- report.html report.pdf
//! CHROME_REMOTE=localhost:9222 cargo run --example html_to_pdf -- https://example.com out.pdf
//! ```

use headless_pdf::{Document, ExportConfig, PdfExporter, PrintOptions};
use serde_json::json;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt::init();

    let mut args = std::env::args().skip(1);
    let input = args.next().ok_or("usage: html_to_pdf <file.html|url> [out.pdf]")?;
    let output = args.next().unwrap_or_else(|| "out.pdf".to_string());

    let mut config = ExportConfig::default();
    if let Ok(binary) = std::env::var("CHROME_BINARY") {
        config = config.with_binary(binary);
    }
    if let Ok(remote) = std::env::var("CHROME_REMOTE") {
        let (host, port) = remote.rsplit_once(':').ok_or("CHROME_REMOTE must be host:port")?;
        config = config.with_remote(host, port.parse()?);
    }

    let document = if input.starts_with("http://") || input.starts_with("https://") {
        Document::Url(input)
    } else {
        Document::Html(std::fs::read_to_string(&input)?)
    };

    let mut options = PrintOptions::new();
    options.insert("paperWidth".into(), json!(8.27));
    options.insert("paperHeight".into(), json!(11.69));

    let exporter = PdfExporter::new(config)?;
    if let Some(major) = exporter.browser_version().await? {
        println!("Browser major version: {}", major);
    }

    let pdf = exporter.to_pdf(&document, &options).await?;
    std::fs::write(&output, &pdf)?;
    println!("Wrote {} bytes to {}", pdf.len(), output);

    Ok(())
}
