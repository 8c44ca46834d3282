//! Duplex transport to the dictation service.
//!
//! The session only needs to send text frames, receive text events and close.
//! Keeping that behind [`SpeechTransport`] / [`SpeechConnector`] lets the
//! protocol logic run against in-memory fakes; [`WsConnector`] is the real
//! secure WebSocket.

use futures::{SinkExt, StreamExt};
use std::time::Duration;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::protocol::Message;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::{VoiceError, VoiceResult};

/// Default bound on the WebSocket handshake
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(15);

/// One open connection
#[async_trait::async_trait]
pub trait SpeechTransport: Send {
    /// Send one text message
    async fn send(&mut self, text: String) -> VoiceResult<()>;

    /// Next text message; `Ok(None)` once the remote has closed
    async fn recv(&mut self) -> VoiceResult<Option<String>>;

    /// Close the connection; closing twice is not an error
    async fn close(&mut self) -> VoiceResult<()>;
}

/// Opens connections to a signed URL
#[async_trait::async_trait]
pub trait SpeechConnector: Send + Sync {
    async fn connect(&self, url: &Url) -> VoiceResult<Box<dyn SpeechTransport>>;
}

/// Secure WebSocket connector
#[derive(Debug, Clone)]
pub struct WsConnector {
    connect_timeout: Duration,
}

impl WsConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

impl Default for WsConnector {
    fn default() -> Self {
        Self::new(DEFAULT_CONNECT_TIMEOUT)
    }
}

#[async_trait::async_trait]
impl SpeechConnector for WsConnector {
    async fn connect(&self, url: &Url) -> VoiceResult<Box<dyn SpeechTransport>> {
        let host = url.host_str().unwrap_or_default().to_string();

        let connect_result = timeout(self.connect_timeout, connect_async(url.as_str()))
            .await
            .map_err(|_| {
                VoiceError::ConnectionFailed(format!(
                    "connection to {host} timed out after {}s",
                    self.connect_timeout.as_secs()
                ))
            })?;

        let (stream, response) = connect_result.map_err(|e| {
            let msg = e.to_string();
            if msg.contains("401") || msg.contains("403") {
                VoiceError::ConnectionFailed(format!(
                    "{host} rejected the signed request ({msg}); check the API key, secret and clock"
                ))
            } else {
                VoiceError::ConnectionFailed(format!("failed to connect to {host}: {msg}"))
            }
        })?;

        info!(
            "Connected to speech service {} (HTTP {})",
            host,
            response.status()
        );

        Ok(Box::new(WsTransport {
            stream,
            closed: false,
        }))
    }
}

/// Open WebSocket connection
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
    closed: bool,
}

#[async_trait::async_trait]
impl SpeechTransport for WsTransport {
    async fn send(&mut self, text: String) -> VoiceResult<()> {
        self.stream
            .send(Message::Text(text.into()))
            .await
            .map_err(|e| VoiceError::ConnectionFailed(format!("failed to send frame: {e}")))
    }

    async fn recv(&mut self) -> VoiceResult<Option<String>> {
        while let Some(message) = self.stream.next().await {
            match message {
                Ok(Message::Text(text)) => return Ok(Some(text.as_str().to_owned())),
                Ok(Message::Close(frame)) => {
                    debug!("Speech service closed the connection: {:?}", frame);
                    self.closed = true;
                    return Ok(None);
                }
                Ok(Message::Binary(data)) => {
                    warn!("Ignoring unexpected binary message ({} bytes)", data.len());
                }
                Ok(_) => {} // ping/pong handled by tungstenite
                Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => {
                    self.closed = true;
                    return Ok(None);
                }
                Err(e) => {
                    return Err(VoiceError::ConnectionFailed(format!(
                        "connection error: {e}"
                    )))
                }
            }
        }

        self.closed = true;
        Ok(None)
    }

    async fn close(&mut self) -> VoiceResult<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        match self.stream.close(None).await {
            Ok(()) | Err(WsError::ConnectionClosed | WsError::AlreadyClosed) => Ok(()),
            Err(e) => Err(VoiceError::ConnectionFailed(format!(
                "failed to close connection: {e}"
            ))),
        }
    }
}
