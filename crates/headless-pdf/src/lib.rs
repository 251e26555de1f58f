//! Headless PDF Export - Rust Implementation
//!
//! Drives a headless Chrome/Chromium over the DevTools protocol to render
//! HTML (or a URL) into a PDF document.
//!
//! # Architecture
//!
//! 1. **Endpoint first**: a remote browser if configured and reachable,
//!    else a local process supervised until it announces its debug address
//! 2. **Synchronous protocol**: one connection per target, one call in
//!    flight, events buffered so no wait misses them
//! 3. **Best-effort cleanup**: target, connections and process are released
//!    whether the render succeeded or not
//!
//! ```no_run
//! use headless_pdf::{Document, ExportConfig, PdfExporter, PrintOptions};
//!
//! # async fn run() -> headless_pdf::Result<()> {
//! let exporter = PdfExporter::new(
//!     ExportConfig::default()
//!         .with_remote("chrome", 9222)
//!         .with_binary("/usr/bin/chromium"),
//! )?;
//! let pdf = exporter
//!     .to_pdf(&Document::Html("<h1>Hello</h1>".into()), &PrintOptions::new())
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod cdp;
pub mod config;
pub mod error;
pub mod events;
pub mod exporter;
pub mod render;
pub mod supervisor;
pub mod tempdir;
pub mod version;

pub use cdp::{CDPClient, CDPError, WaitCondition};
pub use config::{ExportConfig, RemoteBrowser};
pub use error::{PdfError, Result};
pub use exporter::PdfExporter;
pub use render::{Document, PrintOptions, RenderSession};
pub use supervisor::{DebuggerAddress, Endpoint, LaunchState, Supervisor};
pub use tempdir::TemporaryDirectory;
pub use version::{BrowserVersion, VersionProbe};
