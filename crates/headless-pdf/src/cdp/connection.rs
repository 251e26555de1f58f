//! Wire connection - one duplex text channel to a single CDP target
//!
//! The client only ever needs send, receive and close, so the WebSocket
//! sits behind a small trait. Tests plug a scripted browser in here.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use super::client::{CDPError, Result};

/// Duplex channel carrying JSON text frames
#[async_trait]
pub trait Transport: Send {
    async fn send(&mut self, text: String) -> Result<()>;

    /// Next text frame. Fails with `Closed` on peer close and `Timeout` when
    /// the read timeout elapses.
    async fn receive(&mut self) -> Result<String>;

    async fn close(&mut self) -> Result<()>;
}

/// Opens transports to CDP endpoints
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(
        &self,
        url: &str,
        read_timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>>;
}

/// Connector speaking real WebSockets
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketConnector;

#[async_trait]
impl Connector for WebSocketConnector {
    async fn connect(
        &self,
        url: &str,
        read_timeout: Option<Duration>,
    ) -> Result<Box<dyn Transport>> {
        tracing::debug!("Connecting to {}", url);
        let (stream, _) = connect_async(url).await.map_err(|source| CDPError::Connect {
            url: url.to_string(),
            source,
        })?;

        Ok(Box::new(WebSocketTransport {
            stream,
            read_timeout,
            closed: false,
        }))
    }
}

/// WebSocket backed transport
pub struct WebSocketTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    read_timeout: Option<Duration>,
    closed: bool,
}

impl WebSocketTransport {
    async fn next_text(&mut self) -> Result<String> {
        loop {
            match self.stream.next().await {
                Some(Ok(Message::Text(text))) => return Ok(text),
                Some(Ok(Message::Close(_))) | None => return Err(CDPError::Closed),
                Some(Err(e)) => return Err(CDPError::WebSocket(e)),
                // ping/pong are answered by tungstenite, binary frames aren't CDP
                Some(Ok(_)) => {}
            }
        }
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn send(&mut self, text: String) -> Result<()> {
        if self.closed {
            return Err(CDPError::Closed);
        }
        self.stream.send(Message::Text(text)).await?;
        Ok(())
    }

    async fn receive(&mut self) -> Result<String> {
        if self.closed {
            return Err(CDPError::Closed);
        }

        match self.read_timeout {
            Some(limit) => tokio::time::timeout(limit, self.next_text())
                .await
                .map_err(|_| CDPError::Timeout(limit))?,
            None => self.next_text().await,
        }
    }

    async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.stream.close(None).await?;
        Ok(())
    }
}
