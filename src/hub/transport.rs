//! Realtime transport
//!
//! The hub client is generic over a [`RealtimeTransport`]; the default
//! implementation negotiates the hub session over HTTP and upgrades to a
//! WebSocket, forwarding the session cookies on the upgrade request.

use std::sync::Arc;

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use reqwest::cookie::CookieStore;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    connect_async,
    tungstenite::client::IntoClientRequest,
    tungstenite::http::header::{HeaderValue, COOKIE},
    tungstenite::protocol::Message,
    MaybeTlsStream, WebSocketStream,
};
use tracing::{debug, info, warn};

use super::protocol::{connect_url, negotiate_url, NegotiateResponse};
use crate::error::{FeedError, Result};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Pluggable realtime session under the hub client
#[async_trait]
pub trait RealtimeTransport: Send {
    /// Establish a session against the hub base URL
    async fn start(&mut self, url: &str) -> Result<()>;

    /// Send one text frame
    async fn send_text(&mut self, text: &str) -> Result<()>;

    /// Receive the next text frame. `Ok(None)` means a control frame was
    /// consumed and the caller should poll again.
    async fn recv(&mut self) -> Result<Option<String>>;

    /// Keep-alive probe
    async fn ping(&mut self) -> Result<()>;

    /// Tear the session down; idempotent
    async fn stop(&mut self);

    fn is_connected(&self) -> bool;
}

/// Factory producing a fresh transport for each connection attempt
pub type TransportFactory = Arc<dyn Fn() -> Box<dyn RealtimeTransport> + Send + Sync>;

/// Default WebSocket transport for hub sessions
pub struct WebSocketTransport {
    hub: String,
    stream: Option<WsStream>,
}

impl WebSocketTransport {
    pub fn new(hub: &str) -> Self {
        Self {
            hub: hub.to_string(),
            stream: None,
        }
    }
}

#[async_trait]
impl RealtimeTransport for WebSocketTransport {
    async fn start(&mut self, url: &str) -> Result<()> {
        let jar = Arc::new(reqwest::cookie::Jar::default());
        let http = reqwest::Client::builder()
            .cookie_provider(jar.clone())
            .build()
            .map_err(|e| FeedError::Transport(format!("failed to build http client: {}", e)))?;

        let negotiate = negotiate_url(url, &self.hub)?;
        debug!(url = %negotiate, "negotiating hub session");
        let negotiated = http
            .get(negotiate.clone())
            .send()
            .await
            .map_err(|e| FeedError::Transport(format!("negotiate failed: {}", e)))?
            .error_for_status()
            .map_err(|e| FeedError::Transport(format!("negotiate failed: {}", e)))?
            .json::<NegotiateResponse>()
            .await
            .map_err(|e| FeedError::Transport(format!("bad negotiate response: {}", e)))?;

        let connect = connect_url(url, &self.hub, &negotiated.connection_token)?;
        let mut request = connect.as_str().into_client_request()?;
        // The hub session is cookie-bound; carry it onto the upgrade.
        if let Some(cookies) = jar.cookies(&negotiate) {
            let value = HeaderValue::from_bytes(cookies.as_bytes())
                .map_err(|e| FeedError::Transport(format!("bad session cookie: {}", e)))?;
            request.headers_mut().insert(COOKIE, value);
        }

        info!(url = %connect, "connecting hub websocket");
        let (stream, response) = connect_async(request).await?;
        debug!(status = ?response.status(), "hub websocket connected");
        self.stream = Some(stream);
        Ok(())
    }

    async fn send_text(&mut self, text: &str) -> Result<()> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Transport("not connected".to_string()))?;
        stream.send(Message::Text(text.to_string())).await?;
        Ok(())
    }

    async fn recv(&mut self) -> Result<Option<String>> {
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| FeedError::Transport("not connected".to_string()))?;

        match stream.next().await {
            Some(Ok(Message::Text(text))) => Ok(Some(text)),
            Some(Ok(Message::Binary(data))) => {
                Ok(Some(String::from_utf8_lossy(&data).to_string()))
            }
            Some(Ok(Message::Ping(data))) => {
                if let Some(stream) = self.stream.as_mut() {
                    let _ = stream.send(Message::Pong(data)).await;
                }
                Ok(None)
            }
            Some(Ok(Message::Pong(_))) => Ok(None),
            Some(Ok(Message::Close(frame))) => {
                warn!(frame = ?frame, "hub websocket closed by server");
                self.stream = None;
                Err(FeedError::Transport("connection closed".to_string()))
            }
            Some(Ok(Message::Frame(_))) => Ok(None),
            Some(Err(e)) => {
                self.stream = None;
                Err(FeedError::Transport(e.to_string()))
            }
            None => {
                self.stream = None;
                Err(FeedError::Transport("stream ended".to_string()))
            }
        }
    }

    async fn ping(&mut self) -> Result<()> {
        if let Some(stream) = self.stream.as_mut() {
            stream.send(Message::Ping(Vec::new())).await?;
        }
        Ok(())
    }

    async fn stop(&mut self) {
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.close(None).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }
}
