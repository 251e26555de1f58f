//! Scripted browser side of the protocol for tests

use async_trait::async_trait;
use base64::Engine as _;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::client::{CDPError, Result};
use super::connection::{Connector, Transport};
use crate::events::{
    FRAME_STOPPED_LOADING, LOADING_FAILED, LOADING_FINISHED, LOAD_EVENT_FIRED,
    REQUEST_WILL_BE_SENT,
};

/// Requests sent through a transport, in order
pub type SentLog = Arc<Mutex<Vec<Value>>>;

type Responder = Box<dyn FnMut(&Value) -> Vec<String> + Send>;

pub fn result_frame(id: u64, result: Value) -> String {
    json!({"id": id, "result": result}).to_string()
}

pub fn error_frame(id: u64, code: i64, message: &str) -> String {
    json!({"id": id, "error": {"code": code, "message": message}}).to_string()
}

pub fn event_frame(method: &str, params: Value) -> String {
    json!({"method": method, "params": params}).to_string()
}

/// Transport replaying canned frames, optionally answering requests as they are sent
pub struct ScriptedTransport {
    inbound: VecDeque<String>,
    responder: Option<Responder>,
    sent: SentLog,
}

impl ScriptedTransport {
    pub fn with_frames(frames: Vec<String>) -> Self {
        Self {
            inbound: frames.into(),
            responder: None,
            sent: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn with_responder(responder: Responder, sent: SentLog) -> Self {
        Self {
            inbound: VecDeque::new(),
            responder: Some(responder),
            sent,
        }
    }

    pub fn sent(&self) -> SentLog {
        self.sent.clone()
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        let request: Value = serde_json::from_str(&text)?;
        if let Some(responder) = self.responder.as_mut() {
            self.inbound.extend(responder(&request));
        }
        self.sent.lock().unwrap().push(request);
        Ok(())
    }

    async fn receive(&mut self) -> Result<String> {
        self.inbound.pop_front().ok_or(CDPError::Closed)
    }

    async fn close(&mut self) -> Result<()> {
        // Mimic browsers that drop the socket without a close frame
        Err(CDPError::Closed)
    }
}

pub const FAKE_PDF: &[u8] = b"%PDF-1.4 fake document";

/// Knobs for the simulated browser
#[derive(Debug, Clone)]
pub struct FakeChrome {
    pub print_data: Option<String>,
    pub layout_exception: Option<Value>,
    pub close_confirmed: bool,
    pub fail_request: bool,
}

impl Default for FakeChrome {
    fn default() -> Self {
        Self {
            print_data: Some(base64::engine::general_purpose::STANDARD.encode(FAKE_PDF)),
            layout_exception: None,
            close_confirmed: true,
            fail_request: false,
        }
    }
}

impl FakeChrome {
    /// Frames a browser would emit in answer to `request`
    pub fn respond(&self, request: &Value) -> Vec<String> {
        let id = request["id"].as_u64().unwrap_or(0);
        let params = &request["params"];

        match request["method"].as_str().unwrap_or("") {
            "Target.createTarget" => vec![result_frame(id, json!({"targetId": "TARGET-1"}))],
            "Target.closeTarget" if self.close_confirmed => {
                vec![result_frame(id, json!({"success": true}))]
            }
            "Target.closeTarget" => vec![result_frame(id, json!({}))],
            "Console.enable" => vec![error_frame(id, -32601, "'Console.enable' wasn't found")],
            "Page.navigate" => vec![
                event_frame(
                    REQUEST_WILL_BE_SENT,
                    json!({"requestId": "nav", "request": {"url": params["url"]}}),
                ),
                result_frame(id, json!({"frameId": "FRAME-1", "loaderId": "L1"})),
                event_frame(FRAME_STOPPED_LOADING, json!({"frameId": "CHILD"})),
                event_frame(LOADING_FINISHED, json!({"requestId": "nav"})),
                event_frame(FRAME_STOPPED_LOADING, json!({"frameId": "FRAME-1"})),
            ],
            "Page.setDocumentContent" => {
                let mut frames = vec![
                    result_frame(id, json!({})),
                    event_frame(
                        REQUEST_WILL_BE_SENT,
                        json!({"requestId": "img", "request": {"url": "https://example.com/logo.png"}}),
                    ),
                    event_frame(LOAD_EVENT_FIRED, json!({"timestamp": 1.0})),
                ];
                if self.fail_request {
                    frames.push(event_frame(
                        LOADING_FAILED,
                        json!({"requestId": "img", "errorText": "net::ERR_NAME_NOT_RESOLVED"}),
                    ));
                } else {
                    frames.push(event_frame(LOADING_FINISHED, json!({"requestId": "img"})));
                }
                frames
            }
            "Runtime.evaluate" if params["awaitPromise"] == json!(true) => {
                match &self.layout_exception {
                    Some(details) => vec![result_frame(
                        id,
                        json!({"result": {"type": "object"}, "exceptionDetails": details}),
                    )],
                    None => vec![result_frame(id, json!({"result": {"type": "object", "value": null}}))],
                }
            }
            "Runtime.evaluate" => vec![result_frame(id, json!({"result": {"type": "number", "value": 1}}))],
            "Page.printToPDF" => match &self.print_data {
                Some(data) => vec![result_frame(id, json!({"data": data}))],
                None => vec![result_frame(id, json!({"stream": "handle"}))],
            },
            _ => vec![result_frame(id, json!({}))],
        }
    }
}

/// Requests sent per connection url, in order
pub type ConnectionLog = Arc<Mutex<Vec<(String, Value)>>>;

/// Connector handing out transports backed by a [`FakeChrome`]
pub struct ScriptedConnector {
    chrome: FakeChrome,
    log: ConnectionLog,
    connections: Arc<Mutex<Vec<(String, Option<Duration>)>>>,
    refused: Option<&'static str>,
}

impl ScriptedConnector {
    pub fn new(chrome: FakeChrome) -> Self {
        Self {
            chrome,
            log: Arc::new(Mutex::new(Vec::new())),
            connections: Arc::new(Mutex::new(Vec::new())),
            refused: None,
        }
    }

    /// Connections to urls containing `fragment` fail with `Closed`
    pub fn refusing(mut self, fragment: &'static str) -> Self {
        self.refused = Some(fragment);
        self
    }

    /// Methods sent on connections whose url contains `fragment`
    pub fn methods_on(&self, fragment: &str) -> Vec<String> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(url, _)| url.contains(fragment))
            .map(|(_, request)| request["method"].as_str().unwrap_or("").to_string())
            .collect()
    }

    pub fn requests(&self, method: &str) -> Vec<Value> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(_, request)| request["method"] == method)
            .map(|(_, request)| request.clone())
            .collect()
    }

    pub fn connections(&self) -> Vec<(String, Option<Duration>)> {
        self.connections.lock().unwrap().clone()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    async fn connect(
        &self,
        url: &str,
        read_timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>> {
        self.connections
            .lock()
            .unwrap()
            .push((url.to_string(), read_timeout));

        if self.refused.is_some_and(|fragment| url.contains(fragment)) {
            return Err(CDPError::Closed);
        }

        let chrome = self.chrome.clone();
        let log = self.log.clone();
        let url = url.to_string();
        let responder: Responder = Box::new(move |request| {
            log.lock().unwrap().push((url.clone(), request.clone()));
            chrome.respond(request)
        });

        Ok(Box::new(ScriptedTransport::with_responder(
            responder,
            Arc::new(Mutex::new(Vec::new())),
        )))
    }
}

/// Collects formatted log output of the current thread
#[derive(Clone, Default)]
pub struct CapturedLogs(Arc<Mutex<Vec<u8>>>);

impl io::Write for CapturedLogs {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl CapturedLogs {
    /// Capture warnings and errors until the guard is dropped
    pub fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_max_level(tracing::Level::WARN)
            .with_ansi(false)
            .with_writer(move || writer.clone())
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    pub fn lines_with(&self, needle: &str) -> usize {
        self.lines().iter().filter(|line| line.contains(needle)).count()
    }

    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.0.lock().unwrap())
            .lines()
            .map(str::to_string)
            .collect()
    }
}

/// Serve a single canned HTTP response on an ephemeral port
pub async fn serve_http_once(status: &'static str, body: String) -> u16 {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();

    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 1024];
        let _ = socket.read(&mut buf).await;
        let response = format!(
            "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
            status,
            body.len(),
            body
        );
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
    });

    port
}

/// Port nothing listens on
pub fn closed_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

/// `/json/version` body announcing `browser_id` on `port`
pub fn version_json(port: u16, browser_id: &str) -> String {
    json!({
        "Browser": "HeadlessChrome/126.0.6478.126",
        "Protocol-Version": "1.3",
        "User-Agent": "Mozilla/5.0",
        "webSocketDebuggerUrl": format!("ws://127.0.0.1:{}/devtools/browser/{}", port, browser_id),
    })
    .to_string()
}
