//! Inbound events delivered by the transport, and their classification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::transport::b64;

/// One new message received from the messaging transport.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InboundEvent {
    pub info: MessageInfo,
    #[serde(default)]
    pub content: MessageContent,
}

/// Envelope metadata of an inbound message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageInfo {
    /// Message (stanza) id.
    pub id: String,
    /// Conversation the message arrived in; replies go here.
    pub chat: String,
    /// Sender JID, possibly with a device suffix.
    pub sender: String,
    #[serde(default)]
    pub push_name: Option<String>,
    #[serde(default)]
    pub is_from_me: bool,
    pub timestamp: DateTime<Utc>,
}

/// Payload of an inbound message. A message normally carries at most one of these.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageContent {
    /// Plain conversation text.
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub image: Option<ImageContent>,
}

/// Image attachment as announced by the sender; bytes are fetched with `Transport::download`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageContent {
    pub media: MediaRef,
    #[serde(default)]
    pub mimetype: Option<String>,
    #[serde(default)]
    pub width: u32,
    #[serde(default)]
    pub height: u32,
    #[serde(default)]
    pub caption: Option<String>,
}

impl ImageContent {
    pub fn dimensions(&self) -> Dimensions {
        Dimensions {
            width: self.width,
            height: self.height,
        }
    }
}

/// Declared pixel size of an image.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

/// Everything the transport needs to fetch and decrypt a media attachment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaRef {
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub direct_path: String,
    #[serde(default, with = "b64")]
    pub media_key: Vec<u8>,
    #[serde(default, with = "b64")]
    pub file_sha256: Vec<u8>,
    #[serde(default, with = "b64")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(default)]
    pub file_length: u64,
}

/// Which handler an event is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Image,
    Text,
}

impl InboundEvent {
    /// Classifications that apply to this event. Image and text are checked independently,
    /// so an event carrying both yields both; an event carrying neither yields none.
    pub fn classify(&self) -> Vec<EventKind> {
        let mut kinds = Vec::with_capacity(2);
        if self.content.image.is_some() {
            kinds.push(EventKind::Image);
        }
        if self.text().is_some() {
            kinds.push(EventKind::Text);
        }
        kinds
    }

    /// Non-empty conversation text, if any.
    pub fn text(&self) -> Option<&str> {
        self.content.text.as_deref().filter(|t| !t.is_empty())
    }
}

/// Strip the device part from a JID: `user:device@server` becomes `user@server`.
pub fn non_device_jid(jid: &str) -> String {
    match jid.split_once('@') {
        Some((user, server)) => {
            let user = user.split_once(':').map(|(u, _)| u).unwrap_or(user);
            format!("{}@{}", user, server)
        }
        None => jid.split_once(':').map(|(u, _)| u).unwrap_or(jid).to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(text: Option<&str>, image: bool) -> InboundEvent {
        InboundEvent {
            info: MessageInfo {
                id: "3EB0ABC".to_string(),
                chat: "15551234567@s.whatsapp.net".to_string(),
                sender: "15551234567:12@s.whatsapp.net".to_string(),
                push_name: None,
                is_from_me: false,
                timestamp: Utc::now(),
            },
            content: MessageContent {
                text: text.map(str::to_string),
                image: image.then(|| ImageContent {
                    media: MediaRef::default(),
                    mimetype: Some("image/jpeg".to_string()),
                    width: 100,
                    height: 100,
                    caption: None,
                }),
            },
        }
    }

    #[test]
    fn classifies_text() {
        assert_eq!(event(Some("hi"), false).classify(), vec![EventKind::Text]);
    }

    #[test]
    fn empty_text_is_unclassified() {
        assert!(event(Some(""), false).classify().is_empty());
        assert!(event(None, false).classify().is_empty());
    }

    #[test]
    fn classifies_image() {
        assert_eq!(event(None, true).classify(), vec![EventKind::Image]);
    }

    #[test]
    fn image_and_text_both_classify() {
        assert_eq!(
            event(Some("look"), true).classify(),
            vec![EventKind::Image, EventKind::Text]
        );
    }

    #[test]
    fn strips_device_suffix() {
        assert_eq!(
            non_device_jid("15551234567:12@s.whatsapp.net"),
            "15551234567@s.whatsapp.net"
        );
        assert_eq!(
            non_device_jid("15551234567@s.whatsapp.net"),
            "15551234567@s.whatsapp.net"
        );
        assert_eq!(non_device_jid("120363@g.us"), "120363@g.us");
    }

    #[test]
    fn decodes_wire_event() {
        let ev: InboundEvent = serde_json::from_value(serde_json::json!({
            "info": {
                "id": "ABC",
                "chat": "1@s.whatsapp.net",
                "sender": "1:3@s.whatsapp.net",
                "timestamp": "2024-05-01T12:00:00Z"
            },
            "content": {
                "image": {
                    "media": {
                        "url": "https://mmg.example/x",
                        "directPath": "/v/x",
                        "mediaKey": "AQID",
                        "fileLength": 3
                    },
                    "width": 640,
                    "height": 480
                }
            }
        }))
        .unwrap();
        let image = ev.content.image.unwrap();
        assert_eq!(image.media.media_key, vec![1, 2, 3]);
        assert_eq!(image.dimensions(), Dimensions { width: 640, height: 480 });
        assert!(ev.content.text.is_none());
    }
}
