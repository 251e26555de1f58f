//! CDP Client - The Core Communication Layer
//!
//! Design decisions:
//! 1. One client per target (browser root or page), strictly request/response
//! 2. A call only completes on its own response; events seen on the way are
//!    handed to the broker, never dropped
//! 3. Waits consume intercepted events first, then read from the wire
//! 4. Fail fast - no retries. Let the caller decide.

use serde_json::{Map, Value};
use std::time::Duration;
use thiserror::Error;

use super::broker::EventBroker;
use super::connection::Transport;
use super::protocol::*;

#[derive(Error, Debug)]
pub enum CDPError {
    #[error("Failed to connect to {url}: {source}")]
    Connect {
        url: String,
        #[source]
        source: tokio_tungstenite::tungstenite::Error,
    },

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Error response ({code}): {message}")]
    Protocol { code: i64, message: String },

    #[error("Unknown response received: {0}")]
    Malformed(String),

    #[error("No frame received within {0:?}")]
    Timeout(Duration),

    #[error("Connection closed")]
    Closed,
}

/// Result type for CDP operations
pub type Result<T> = std::result::Result<T, CDPError>;

/// What a wait is waiting for
#[derive(Debug, Clone, PartialEq)]
pub enum WaitCondition {
    /// No network request is in flight
    NetworkIdle,
    /// An event with this method whose params include every `expected` entry
    Event {
        method: String,
        expected: Option<Map<String, Value>>,
    },
}

impl WaitCondition {
    pub fn event(method: impl Into<String>) -> Self {
        WaitCondition::Event {
            method: method.into(),
            expected: None,
        }
    }

    /// `expected` must be a JSON object, anything else matches on the method alone
    pub fn event_with(method: impl Into<String>, expected: Value) -> Self {
        let expected = match expected {
            Value::Object(map) => Some(map),
            _ => None,
        };

        WaitCondition::Event {
            method: method.into(),
            expected,
        }
    }
}

/// CDP Client - drives one connection to a CDP target
pub struct CDPClient {
    /// Monotonic request ID counter
    next_id: RequestId,

    transport: Box<dyn Transport>,

    broker: EventBroker,

    closed: bool,
}

impl CDPClient {
    pub fn new(transport: Box<dyn Transport>) -> Self {
        Self {
            next_id: 1,
            transport,
            broker: EventBroker::new(),
            closed: false,
        }
    }

    pub fn broker(&self) -> &EventBroker {
        &self.broker
    }

    /// Send CDP request and wait for its response
    pub async fn call(&mut self, method: &str, params: Option<Value>) -> Result<Value> {
        let id = self.next_id;
        self.next_id += 1;

        let request = CDPRequest::new(id, method, params);
        tracing::debug!(
            "Transmitting CDP call: {}({})",
            method,
            request.params.keys().map(String::as_str).collect::<Vec<_>>().join(",")
        );

        let json = serde_json::to_string(&request)?;
        self.transport.send(json).await?;

        loop {
            match self.next_frame().await? {
                Frame::Event(event) => self.broker.record(event),
                Frame::Error { code, message, .. } => {
                    return Err(CDPError::Protocol { code, message });
                }
                Frame::Result {
                    id: Some(response_id),
                    ..
                } if response_id != id => {
                    tracing::warn!(
                        "Received response for unknown request {} while awaiting {}",
                        response_id,
                        id
                    );
                }
                Frame::Result { result, .. } => {
                    tracing::debug!("Received CDP result: {}", describe_keys(&result));
                    return Ok(result);
                }
            }
        }
    }

    /// Block until `condition` holds.
    ///
    /// Returns the params of the matched event, `None` for network idle.
    /// There is no timeout of its own, the transport's read timeout bounds it.
    pub async fn wait_for(&mut self, condition: &WaitCondition) -> Result<Option<Value>> {
        match condition {
            WaitCondition::NetworkIdle => {
                // Queued events were booked on arrival and can't change the in-flight set
                while !self.broker.is_idle() {
                    let event = self.next_event().await?;
                    self.broker.record(event);
                }
                Ok(None)
            }
            WaitCondition::Event { method, expected } => {
                tracing::debug!(
                    "Awaiting CDP event: {}({})",
                    method,
                    expected
                        .as_ref()
                        .map(|e| e.keys().map(String::as_str).collect::<Vec<_>>().join(","))
                        .unwrap_or_default()
                );

                if let Some(event) = self.broker.take_matching(method, expected.as_ref()) {
                    return Ok(Some(event.params));
                }

                loop {
                    let event = self.next_event().await?;
                    let bookkeeping = self.broker.observe(&event);

                    if event.matches(method, expected.as_ref()) {
                        return Ok(Some(event.params));
                    }
                    if !bookkeeping {
                        self.broker.enqueue(event);
                    }
                }
            }
        }
    }

    pub async fn wait_for_event(
        &mut self,
        method: &str,
        expected: Option<Value>,
    ) -> Result<Option<Value>> {
        let condition = match expected {
            Some(expected) => WaitCondition::event_with(method, expected),
            None => WaitCondition::event(method),
        };
        self.wait_for(&condition).await
    }

    pub async fn wait_for_network_idle(&mut self) -> Result<()> {
        self.wait_for(&WaitCondition::NetworkIdle).await.map(|_| ())
    }

    /// Close the connection. Idempotent; errors are only logged since some
    /// browsers never acknowledge the close.
    pub async fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;

        if let Err(e) = self.transport.close().await {
            tracing::debug!("Failed to close browser connection: {}", e);
        }
    }

    async fn next_frame(&mut self) -> Result<Frame> {
        let payload = self.transport.receive().await?;
        Frame::parse(&payload).ok_or(CDPError::Malformed(payload))
    }

    /// Next event off the wire. Stray responses are skipped, error frames fail.
    async fn next_event(&mut self) -> Result<CDPEvent> {
        loop {
            match self.next_frame().await? {
                Frame::Event(event) => return Ok(event),
                Frame::Error { code, message, .. } => {
                    return Err(CDPError::Protocol { code, message });
                }
                Frame::Result { id, .. } => {
                    tracing::debug!("Ignoring response {:?} received while waiting", id);
                }
            }
        }
    }
}

fn describe_keys(result: &Value) -> String {
    match result {
        Value::Object(map) if !map.is_empty() => {
            map.keys().map(String::as_str).collect::<Vec<_>>().join(",")
        }
        _ => "none".to_string(),
    }
}
