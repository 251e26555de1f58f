//! Error types for PDF export
//!
//! Flat hierarchy. Wire-level failures live in `CDPError` and are wrapped
//! transparently.

use std::time::Duration;
use thiserror::Error;

use crate::cdp::CDPError;

pub type Result<T> = std::result::Result<T, PdfError>;

#[derive(Debug, Error)]
pub enum PdfError {
    #[error(transparent)]
    Cdp(#[from] CDPError),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Version endpoint http://{host}:{port}/json/version is unavailable")]
    VersionUnavailable { host: String, port: u16 },

    #[error("Invalid websocket debugger url: {0}")]
    InvalidDebuggerUrl(String),

    #[error("Neither a remote browser nor a local binary is configured")]
    NoBrowserAvailable,

    #[error("Browser process didn't announce its debug address within {0:?}")]
    StartupTimeout(Duration),

    #[error("Browser process exited early (code: {code:?}, signal: {signal:?})")]
    ProcessExited {
        code: Option<i32>,
        signal: Option<i32>,
    },

    #[error("Unknown OS detected while starting browser process: '{0}'")]
    UnsupportedPlatform(String),

    #[error("Failed to query browser version: {0}")]
    VersionCommand(String),

    #[error("Expected {expected}. Got instead: {payload}")]
    UnexpectedResponse {
        expected: &'static str,
        payload: String,
    },

    #[error("Nothing to print")]
    NothingToRender,

    #[error("Expected base64 data. Got instead: {0}")]
    EmptyOutput(String),

    #[error("Invalid base64 data: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Expected close confirmation. Got instead: {0}")]
    CloseConfirmation(String),

    #[error("Paths above the base directory are not allowed: {0}")]
    PathEscapesBase(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PdfError {
    /// Remote unreachable or channel dropped - the class a local fallback can recover
    pub fn is_connectivity(&self) -> bool {
        match self {
            PdfError::Http(_)
            | PdfError::VersionUnavailable { .. }
            | PdfError::InvalidDebuggerUrl(_) => true,
            PdfError::Cdp(e) => matches!(
                e,
                CDPError::Connect { .. } | CDPError::WebSocket(_) | CDPError::Closed
            ),
            _ => false,
        }
    }

    /// Failures of the local browser process
    pub fn is_startup(&self) -> bool {
        matches!(
            self,
            PdfError::StartupTimeout(_)
                | PdfError::ProcessExited { .. }
                | PdfError::UnsupportedPlatform(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification() {
        assert!(PdfError::Cdp(CDPError::Closed).is_connectivity());
        assert!(PdfError::VersionUnavailable {
            host: "chrome".into(),
            port: 9222
        }
        .is_connectivity());
        assert!(!PdfError::Cdp(CDPError::Protocol {
            code: -32000,
            message: "boom".into()
        })
        .is_connectivity());

        assert!(PdfError::StartupTimeout(Duration::from_secs(10)).is_startup());
        assert!(!PdfError::NothingToRender.is_startup());
    }

    #[test]
    fn test_messages_carry_payload() {
        let err = PdfError::EmptyOutput(r#"{"stream":"1"}"#.into());
        assert_eq!(
            err.to_string(),
            r#"Expected base64 data. Got instead: {"stream":"1"}"#
        );
    }
}
