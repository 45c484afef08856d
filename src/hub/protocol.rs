//! Hub wire protocol
//!
//! The minimum of the classic hub framing the client understands:
//! negotiate, connect, invoke-method-by-name, receive-named-event.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::error::{FeedError, Result};

pub const CLIENT_PROTOCOL: &str = "1.5";

/// Hub reference serialized into the `connectionData` query parameter
#[derive(Debug, Serialize)]
pub struct HubRef<'a> {
    pub name: &'a str,
}

/// Server response to the negotiate request
#[derive(Debug, Deserialize)]
pub struct NegotiateResponse {
    #[serde(rename = "ConnectionToken")]
    pub connection_token: String,
    #[serde(rename = "ConnectionId", default)]
    pub connection_id: String,
}

/// Outbound method invocation
#[derive(Debug, Serialize)]
pub struct HubInvocation<'a> {
    #[serde(rename = "H")]
    pub hub: &'a str,
    #[serde(rename = "M")]
    pub method: &'a str,
    #[serde(rename = "A")]
    pub args: Vec<Value>,
    #[serde(rename = "I")]
    pub id: String,
}

/// One named server-initiated event inside an inbound frame
#[derive(Debug, Deserialize)]
pub struct HubEvent {
    #[serde(rename = "H", default)]
    pub hub: String,
    #[serde(rename = "M", default)]
    pub method: String,
    #[serde(rename = "A", default)]
    pub args: Vec<Value>,
}

/// Inbound frame: either an invocation result (`I` set) or a batch of
/// named events
#[derive(Debug, Deserialize)]
pub struct HubFrame {
    #[serde(rename = "I")]
    pub invoke_id: Option<String>,
    #[serde(rename = "R")]
    pub result: Option<Value>,
    #[serde(rename = "E")]
    pub error: Option<String>,
    #[serde(rename = "M", default)]
    pub events: Vec<HubEvent>,
}

/// Serialized `connectionData` for one hub
pub fn connection_data(hub: &str) -> Result<String> {
    serde_json::to_string(&[HubRef { name: hub }]).map_err(FeedError::from)
}

/// Negotiate endpoint for a hub base URL
pub fn negotiate_url(base: &str, hub: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/negotiate", base.trim_end_matches('/')))
        .map_err(|e| FeedError::Transport(format!("bad hub url '{}': {}", base, e)))?;
    url.query_pairs_mut()
        .append_pair("clientProtocol", CLIENT_PROTOCOL)
        .append_pair("connectionData", &connection_data(hub)?);
    Ok(url)
}

/// WebSocket connect endpoint: the hub HTTP URL with its scheme mapped
/// `http -> ws` / `https -> wss` and the negotiated token attached
pub fn connect_url(base: &str, hub: &str, connection_token: &str) -> Result<Url> {
    let mut url = Url::parse(&format!("{}/connect", base.trim_end_matches('/')))
        .map_err(|e| FeedError::Transport(format!("bad hub url '{}': {}", base, e)))?;
    let ws_scheme = match url.scheme() {
        "https" => "wss",
        "http" => "ws",
        other => {
            return Err(FeedError::Transport(format!(
                "unsupported hub scheme '{}'",
                other
            )))
        }
    };
    url.set_scheme(ws_scheme)
        .map_err(|_| FeedError::Transport("failed to map hub scheme to websocket".into()))?;
    url.query_pairs_mut()
        .append_pair("transport", "webSockets")
        .append_pair("clientProtocol", CLIENT_PROTOCOL)
        .append_pair("connectionToken", connection_token)
        .append_pair("connectionData", &connection_data(hub)?);
    Ok(url)
}
