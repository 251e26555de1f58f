//! Typed view on the CDP events the engine inspects
//!
//! Design: a tagged union keyed by method name. Only the handful of
//! methods the render flow cares about get typed fields, everything
//! else stays an opaque parameter map.

use serde_json::{Map, Value};
use std::fmt;

use crate::cdp::CDPEvent;

pub const REQUEST_WILL_BE_SENT: &str = "Network.requestWillBeSent";
pub const LOADING_FINISHED: &str = "Network.loadingFinished";
pub const LOADING_FAILED: &str = "Network.loadingFailed";
pub const FRAME_STOPPED_LOADING: &str = "Page.frameStoppedLoading";
pub const LOAD_EVENT_FIRED: &str = "Page.loadEventFired";

/// Longest string value shown in an event log line
const MAX_LOGGED_VALUE: usize = 256;

/// Page events the engine reacts to
#[derive(Debug, Clone, PartialEq)]
pub enum PageEvent<'a> {
    RequestWillBeSent { request_id: &'a str, url: &'a str },
    LoadingFinished { request_id: &'a str },
    LoadingFailed { request_id: &'a str, error_text: &'a str },
    FrameStoppedLoading { frame_id: &'a str },
    LoadEventFired,
    Other { method: &'a str, params: &'a Value },
}

impl<'a> PageEvent<'a> {
    pub fn from_cdp(event: &'a CDPEvent) -> Self {
        let params = &event.params;
        let str_field = |key: &str| params.get(key).and_then(Value::as_str);

        match event.method.as_str() {
            REQUEST_WILL_BE_SENT => match str_field("requestId") {
                Some(request_id) => PageEvent::RequestWillBeSent {
                    request_id,
                    url: params["request"]["url"].as_str().unwrap_or(""),
                },
                None => PageEvent::other(event),
            },
            LOADING_FINISHED => match str_field("requestId") {
                Some(request_id) => PageEvent::LoadingFinished { request_id },
                None => PageEvent::other(event),
            },
            LOADING_FAILED => match str_field("requestId") {
                Some(request_id) => PageEvent::LoadingFailed {
                    request_id,
                    error_text: str_field("errorText").unwrap_or(""),
                },
                None => PageEvent::other(event),
            },
            FRAME_STOPPED_LOADING => match str_field("frameId") {
                Some(frame_id) => PageEvent::FrameStoppedLoading { frame_id },
                None => PageEvent::other(event),
            },
            LOAD_EVENT_FIRED => PageEvent::LoadEventFired,
            _ => PageEvent::other(event),
        }
    }

    fn other(event: &'a CDPEvent) -> Self {
        PageEvent::Other {
            method: &event.method,
            params: &event.params,
        }
    }

    /// Network lifecycle events are bookkeeping only and never kept for later waits
    pub fn is_network_lifecycle(&self) -> bool {
        matches!(
            self,
            PageEvent::RequestWillBeSent { .. }
                | PageEvent::LoadingFinished { .. }
                | PageEvent::LoadingFailed { .. }
        )
    }
}

/// Log line for a received event, formatted only when actually written
///
/// Long string values are cut so a data URL or an injected document
/// doesn't flood the log.
pub struct EventSummary<'a> {
    event: &'a CDPEvent,
}

impl<'a> EventSummary<'a> {
    pub fn new(event: &'a CDPEvent) -> Self {
        Self { event }
    }
}

impl fmt::Display for EventSummary<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Received CDP event: {}(", self.event.method)?;

        if let Value::Object(params) = &self.event.params {
            for (i, (name, value)) in params.iter().enumerate() {
                if i > 0 {
                    f.write_str(",")?;
                }
                write!(f, "{}={}", name, shorten(value))?;
            }
        }

        f.write_str(")")
    }
}

fn shorten(value: &Value) -> Value {
    match value {
        Value::String(s) => match s.char_indices().nth(MAX_LOGGED_VALUE) {
            Some((cut, _)) => Value::String(format!("{}...", &s[..cut])),
            None => value.clone(),
        },
        Value::Array(items) => Value::Array(items.iter().map(shorten).collect()),
        Value::Object(map) => Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), shorten(v)))
                .collect::<Map<String, Value>>(),
        ),
        _ => value.clone(),
    }
}
