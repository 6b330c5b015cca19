//! Messaging transport: the live account connection used to fetch media, upload media and
//! send replies.
//!
//! `Transport` is the seam handlers talk to; `BridgeTransport` implements it over the
//! WebSocket bridge that owns the actual messaging session.

mod bridge;
mod protocol;

pub use bridge::{BridgeStreams, BridgeTransport, PairingEvent};
pub use protocol::{WsEvent, WsRequest, WsResponse};

use crate::compose::OutboundMessage;
use crate::event::MediaRef;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Kind of media being uploaded; selects the encryption info the bridge applies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MediaKind {
    Image,
}

/// Result of uploading media: the references an outbound media message must carry.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadedMedia {
    pub url: String,
    pub direct_path: String,
    #[serde(with = "b64")]
    pub media_key: Vec<u8>,
    #[serde(rename = "fileEncSHA256", with = "b64")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(rename = "fileSHA256", with = "b64")]
    pub file_sha256: Vec<u8>,
    /// Unix seconds the media key was generated. Filled with the upload time when the bridge
    /// omits it.
    #[serde(default = "unix_now")]
    pub media_key_timestamp: i64,
}

fn unix_now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("bridge connection failed: {0}")]
    Connection(String),
    #[error("bridge connection closed")]
    Closed,
    #[error("{method} failed: {message}")]
    Remote { method: String, message: String },
    #[error("invalid bridge payload: {0}")]
    Protocol(String),
}

/// Handle to the live messaging connection, shared by all handlers.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch and decrypt an inbound media attachment.
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError>;

    /// Encrypt and upload media for use in an outbound message.
    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, TransportError>;

    /// Send a composed message to a conversation. Returns the sent message id.
    async fn send_message(
        &self,
        chat: &str,
        message: &OutboundMessage,
    ) -> Result<String, TransportError>;

    /// Close the connection. Best effort.
    async fn disconnect(&self);
}

/// Serde adapter: `Vec<u8>` as a standard base64 string.
pub(crate) mod b64 {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = Option::<String>::deserialize(d)?.unwrap_or_default();
        STANDARD.decode(s.as_bytes()).map_err(serde::de::Error::custom)
    }
}
