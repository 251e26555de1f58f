//! Event Broker - bookkeeping for events seen outside of an explicit wait
//!
//! Events arrive interleaved with call responses. Nothing seen on the wire
//! is dropped: network lifecycle events update the in-flight set, every
//! other event is queued until a later wait consumes it.

use serde_json::{Map, Value};
use std::collections::{HashMap, VecDeque};

use super::protocol::CDPEvent;
use crate::events::{EventSummary, PageEvent};

/// Set of network requests known to be in flight
#[derive(Debug, Default)]
pub struct NetworkTracker {
    /// Key: request id, Value: requested url
    in_flight: HashMap<String, String>,
}

impl NetworkTracker {
    pub fn is_idle(&self) -> bool {
        self.in_flight.is_empty()
    }

    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    pub fn contains(&self, request_id: &str) -> bool {
        self.in_flight.contains_key(request_id)
    }

    fn track(&mut self, request_id: &str, url: &str) {
        self.in_flight
            .insert(request_id.to_string(), url.to_string());
    }

    /// Returns the url of the request if it was being tracked
    fn untrack(&mut self, request_id: &str) -> Option<String> {
        self.in_flight.remove(request_id)
    }
}

/// Records events and keeps the ones nobody waited for yet
#[derive(Debug, Default)]
pub struct EventBroker {
    network: NetworkTracker,
    intercepted: VecDeque<CDPEvent>,
}

impl EventBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn network(&self) -> &NetworkTracker {
        &self.network
    }

    pub fn is_idle(&self) -> bool {
        self.network.is_idle()
    }

    /// Number of intercepted events not consumed yet
    pub fn queued(&self) -> usize {
        self.intercepted.len()
    }

    /// Book an event and keep it for later waits unless it is network accounting
    pub fn record(&mut self, event: CDPEvent) {
        if !self.observe(&event) {
            self.intercepted.push_back(event);
        }
    }

    /// Log the event and apply network bookkeeping.
    ///
    /// Returns `true` for network lifecycle events, which must not be queued.
    pub fn observe(&mut self, event: &CDPEvent) -> bool {
        tracing::debug!("{}", EventSummary::new(event));

        let typed = PageEvent::from_cdp(event);
        let lifecycle = typed.is_network_lifecycle();

        match typed {
            PageEvent::RequestWillBeSent { request_id, url } => {
                self.network.track(request_id, url);
            }
            PageEvent::LoadingFinished { request_id } => {
                self.network.untrack(request_id);
            }
            PageEvent::LoadingFailed {
                request_id,
                error_text,
            } => {
                let url = self.network.untrack(request_id).unwrap_or_default();
                tracing::warn!(
                    "Headless browser was unable to complete a request to \"{}\". Error: {}",
                    url,
                    error_text
                );
            }
            _ => {}
        }

        lifecycle
    }

    /// Append an event to the intercepted queue without bookkeeping
    pub fn enqueue(&mut self, event: CDPEvent) {
        self.intercepted.push_back(event);
    }

    /// Remove and return the oldest queued event matching `method` and `expected`
    pub fn take_matching(
        &mut self,
        method: &str,
        expected: Option<&Map<String, Value>>,
    ) -> Option<CDPEvent> {
        let pos = self
            .intercepted
            .iter()
            .position(|event| event.matches(method, expected))?;

        self.intercepted.remove(pos)
    }
}
