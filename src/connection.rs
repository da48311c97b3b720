use crate::error::{EvokError, Result};
use crate::protocol::{parse_frame, Request};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use url::Url;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(2);

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Message channel to one controller
///
/// A session's supervisor task is the only caller. `receive` must be cancel
/// safe: the supervisor drops an in-flight receive whenever it has to handle
/// a command or a shutdown.
#[async_trait]
pub trait Transport: Send {
    /// Open the connection, replacing any previous one
    async fn connect(&mut self) -> Result<()>;

    /// Wait for the next message
    ///
    /// `Ok(None)` means nothing was received (empty frame or the stream
    /// ended). A peer that closes the connection yields
    /// [`EvokError::ConnectionClosed`].
    async fn receive(&mut self) -> Result<Option<Value>>;

    /// Send a request to the controller
    async fn send(&mut self, request: &Request) -> Result<()>;

    /// Close the connection. Safe to call when already closed.
    async fn close(&mut self);

    fn is_connected(&self) -> bool;
}

/// Evok WebSocket transport
pub struct EvokTransport {
    url: Url,
    stream: Option<WsStream>,
}

impl EvokTransport {
    /// Create a transport for the given `ws://` URL. Does not connect.
    pub fn new(url: Url) -> Self {
        Self { url, stream: None }
    }

    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl Transport for EvokTransport {
    async fn connect(&mut self) -> Result<()> {
        self.close().await;

        tracing::info!("Connecting to {}", self.url);
        let (ws_stream, _) = connect_async(self.url.as_str()).await?;
        self.stream = Some(ws_stream);

        Ok(())
    }

    async fn receive(&mut self) -> Result<Option<Value>> {
        let stream = self.stream.as_mut().ok_or(EvokError::NotConnected)?;

        loop {
            match stream.next().await {
                Some(Ok(Message::Text(text))) => {
                    tracing::trace!("Received: {}", text);
                    return parse_frame(&text);
                }
                Some(Ok(Message::Close(frame))) => {
                    match frame {
                        Some(cf) => tracing::info!(code = %cf.code, reason = %cf.reason, "WebSocket close frame received"),
                        None => tracing::info!("WebSocket close frame received"),
                    }
                    self.stream = None;
                    return Err(EvokError::ConnectionClosed);
                }
                Some(Ok(Message::Ping(_))) => {
                    // tungstenite queues the pong itself
                    tracing::trace!("WebSocket ping");
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    self.stream = None;
                    return Err(e.into());
                }
                None => {
                    tracing::info!("WebSocket stream ended");
                    self.stream = None;
                    return Ok(None);
                }
            }
        }
    }

    async fn send(&mut self, request: &Request) -> Result<()> {
        let stream = self.stream.as_mut().ok_or(EvokError::NotConnected)?;

        let json = request.to_text()?;
        tracing::debug!("Sending: {}", json);

        stream.send(Message::Text(json)).await?;
        Ok(())
    }

    async fn close(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            tracing::debug!("Closing WebSocket to {}", self.url);
            match timeout(CLOSE_TIMEOUT, stream.close(None)).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::debug!("Error while closing WebSocket: {}", e),
                Err(_) => tracing::debug!("Timed out closing WebSocket"),
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
