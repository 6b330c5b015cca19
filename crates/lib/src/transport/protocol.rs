//! Bridge WebSocket protocol types (requests, responses, events, method params).

use serde::{Deserialize, Serialize};

use crate::compose::OutboundMessage;
use crate::event::MediaRef;
use crate::transport::{b64, MediaKind};

/// Wire request: `{ "type": "req", "id", "method", "params" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsRequest {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

/// Wire response: `{ "type": "res", "id", "ok", "payload" or "error" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsResponse {
    #[serde(rename = "type")]
    pub typ: String,
    pub id: String,
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Wire event: `{ "type": "event", "event", "payload" }`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WsEvent {
    #[serde(rename = "type")]
    pub typ: String,
    pub event: String,
    #[serde(default)]
    pub payload: serde_json::Value,
}

/// Any frame the bridge may send.
#[derive(Debug, Clone)]
pub enum Frame {
    Response(WsResponse),
    Event(WsEvent),
}

impl WsRequest {
    pub fn new(
        id: impl Into<String>,
        method: impl Into<String>,
        params: serde_json::Value,
    ) -> Self {
        Self {
            typ: "req".to_string(),
            id: id.into(),
            method: method.into(),
            params,
        }
    }
}

impl WsResponse {
    pub fn ok(id: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: true,
            payload: Some(payload),
            error: None,
        }
    }

    pub fn err(id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            typ: "res".to_string(),
            id: id.into(),
            ok: false,
            payload: None,
            error: Some(error.into()),
        }
    }
}

impl WsEvent {
    pub fn new(event: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            typ: "event".to_string(),
            event: event.into(),
            payload,
        }
    }
}

/// Parse a text frame by its `type` field. Unknown types and malformed JSON yield None.
pub fn parse_frame(text: &str) -> Option<Frame> {
    let value: serde_json::Value = serde_json::from_str(text).ok()?;
    match value.get("type").and_then(|v| v.as_str())? {
        "res" => serde_json::from_value(value).ok().map(Frame::Response),
        "event" => serde_json::from_value(value).ok().map(Frame::Event),
        _ => None,
    }
}

/// Params for method "connect".
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectParams {
    pub client_id: String,
}

/// Payload of a successful "connect". `logged_in == false` means pairing events will follow.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectResult {
    #[serde(default)]
    pub logged_in: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadParams {
    pub media: MediaRef,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadResult {
    #[serde(with = "b64")]
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadParams {
    #[serde(with = "b64")]
    pub data: Vec<u8>,
    pub media_type: MediaKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SendParams {
    pub chat: String,
    pub message: OutboundMessage,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendResult {
    #[serde(default)]
    pub message_id: String,
}

/// Payload of the "qr" event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QrPayload {
    pub code: String,
}
