//! Protocol message definitions

use crate::headers::{deserialize_headers, Headers};
use agentlink_common::{Result, TunnelError};
use serde::{Deserialize, Serialize};

/// Messages sent by the tunnel client
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ClientMessage {
    /// First frame on every connection
    Auth {
        #[serde(rename = "apiKey")]
        api_key: String,
        #[serde(rename = "localPort")]
        local_port: u16,
    },

    /// Announces a planned reconnect so the proxy buffers requests
    WillReconnect,

    /// Answer to a forwarded request
    Response { data: ResponseData },
}

impl ClientMessage {
    /// Serialize to a text frame.
    pub fn encode(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| TunnelError::Serialization(e.to_string()))
    }

    /// Short name used in logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ClientMessage::Auth { .. } => "auth",
            ClientMessage::WillReconnect => "will-reconnect",
            ClientMessage::Response { .. } => "response",
        }
    }
}

/// Messages sent by the proxy
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum ServerMessage {
    /// Authentication accepted
    Registered {
        #[serde(default)]
        data: Registration,
    },

    /// Authentication or protocol failure
    Error {
        #[serde(default)]
        error: String,
        #[serde(default)]
        message: String,
    },

    /// The proxy is buffering requests until we reconnect
    WillReconnectAck {
        #[serde(default)]
        data: ReconnectAck,
    },

    /// HTTP request to replay against the local server
    Request { data: RequestData },

    /// Any type this client does not know about
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    /// Parse one text frame.
    pub fn decode(text: &str) -> Result<Self> {
        serde_json::from_str(text).map_err(|e| TunnelError::Protocol(format!("bad frame: {e}")))
    }
}

/// Payload of a `registered` message
#[derive(Debug, Clone, Default, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Registration {
    #[serde(default)]
    pub tunnel_id: String,
    #[serde(default)]
    pub public_url: String,
}

/// Payload of a `will-reconnect-ack` message
#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectAck {
    /// How long the proxy buffers requests, in milliseconds
    #[serde(default)]
    pub buffer_timeout: u64,
}

/// Inbound request descriptor
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct RequestData {
    /// Correlation id echoed in the response
    pub id: String,
    pub method: String,
    pub path: String,
    #[serde(default, deserialize_with = "deserialize_headers")]
    pub headers: Headers,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<String>,
}

/// Outbound response descriptor
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct ResponseData {
    pub id: String,
    pub status: u16,
    pub headers: Headers,
    pub body: String,
}
