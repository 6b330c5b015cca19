//! Response composer: turns a generated artifact (or a failure) into the outbound message
//! sent back to the originating conversation.

use serde::{Deserialize, Serialize};

use crate::event::{non_device_jid, Dimensions};
use crate::transport::{b64, UploadedMedia};

/// Caption attached to every generated image.
pub const IMAGE_CAPTION: &str = "AI-generated image";

const FALLBACK_MIMETYPE: &str = "application/octet-stream";

/// Message ready for the transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum OutboundMessage {
    Image(ImageReply),
    Text(TextReply),
    Error(ErrorReply),
}

/// Image message referencing already-uploaded media.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageReply {
    pub caption: String,
    pub url: String,
    pub direct_path: String,
    #[serde(with = "b64")]
    pub media_key: Vec<u8>,
    pub media_key_timestamp: i64,
    pub mimetype: String,
    #[serde(rename = "fileEncSHA256", with = "b64")]
    pub file_enc_sha256: Vec<u8>,
    #[serde(rename = "fileSHA256", with = "b64")]
    pub file_sha256: Vec<u8>,
    pub file_length: u64,
    pub height: u32,
    pub width: u32,
}

/// Text reply rendered in context of the message it answers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextReply {
    pub text: String,
    pub quoted_text: String,
    /// Message id of the quoted message.
    pub stanza_id: String,
    /// Sender of the quoted message, without device part.
    pub participant: String,
}

/// Plain, un-quoted failure description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    pub text: String,
}

impl OutboundMessage {
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundMessage::Image(_) => "image",
            OutboundMessage::Text(_) => "text",
            OutboundMessage::Error(_) => "error",
        }
    }
}

/// Sniff the mimetype from the artifact's leading bytes.
pub fn detect_mimetype(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or(FALLBACK_MIMETYPE)
}

pub fn compose_image_reply(
    generated: &[u8],
    original: Dimensions,
    uploaded: &UploadedMedia,
) -> OutboundMessage {
    OutboundMessage::Image(ImageReply {
        caption: IMAGE_CAPTION.to_string(),
        url: uploaded.url.clone(),
        direct_path: uploaded.direct_path.clone(),
        media_key: uploaded.media_key.clone(),
        media_key_timestamp: uploaded.media_key_timestamp,
        mimetype: detect_mimetype(generated).to_string(),
        file_enc_sha256: uploaded.file_enc_sha256.clone(),
        file_sha256: uploaded.file_sha256.clone(),
        file_length: generated.len() as u64,
        height: original.height,
        width: original.width,
    })
}

pub fn compose_text_reply(
    generated: &str,
    original_text: &str,
    message_id: &str,
    sender: &str,
) -> OutboundMessage {
    OutboundMessage::Text(TextReply {
        text: generated.to_string(),
        quoted_text: original_text.to_string(),
        stanza_id: message_id.to_string(),
        participant: non_device_jid(sender),
    })
}

pub fn compose_error_reply(err: &dyn std::error::Error) -> OutboundMessage {
    OutboundMessage::Error(ErrorReply {
        text: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const JPEG_HEADER: &[u8] = &[0xFF, 0xD8, 0xFF, 0xE0, 0x00, 0x10, b'J', b'F', b'I', b'F'];

    fn uploaded() -> UploadedMedia {
        UploadedMedia {
            url: "https://mmg.example/d/f/abc.enc".to_string(),
            direct_path: "/v/t62.7118-24/abc.enc".to_string(),
            media_key: vec![1; 32],
            file_enc_sha256: vec![2; 32],
            file_sha256: vec![3; 32],
            media_key_timestamp: 1_700_000_000,
        }
    }

    #[test]
    fn image_reply_copies_dimensions_and_references() {
        let mut generated = JPEG_HEADER.to_vec();
        generated.resize(2048, 0);
        let msg = compose_image_reply(
            &generated,
            Dimensions {
                width: 100,
                height: 100,
            },
            &uploaded(),
        );
        let OutboundMessage::Image(reply) = msg else {
            panic!("expected image reply");
        };
        assert_eq!(reply.height, 100);
        assert_eq!(reply.width, 100);
        assert_eq!(reply.file_length, 2048);
        assert_eq!(reply.caption, "AI-generated image");
        assert_eq!(reply.mimetype, "image/jpeg");
        assert_eq!(reply.url, "https://mmg.example/d/f/abc.enc");
        assert_eq!(reply.direct_path, "/v/t62.7118-24/abc.enc");
        assert_eq!(reply.media_key, vec![1; 32]);
        assert_eq!(reply.file_enc_sha256, vec![2; 32]);
        assert_eq!(reply.file_sha256, vec![3; 32]);
        assert_eq!(reply.media_key_timestamp, 1_700_000_000);
    }

    #[test]
    fn mimetype_falls_back_for_unknown_bytes() {
        assert_eq!(detect_mimetype(b"hello"), "application/octet-stream");
        assert_eq!(detect_mimetype(b"\x89PNG\r\n\x1a\n\0\0\0\rIHDR"), "image/png");
    }

    #[test]
    fn text_reply_quotes_original() {
        let msg = compose_text_reply(
            "Hi there!",
            "Hello",
            "3EB0C0FFEE",
            "15551234567:4@s.whatsapp.net",
        );
        assert_eq!(
            msg,
            OutboundMessage::Text(TextReply {
                text: "Hi there!".to_string(),
                quoted_text: "Hello".to_string(),
                stanza_id: "3EB0C0FFEE".to_string(),
                participant: "15551234567@s.whatsapp.net".to_string(),
            })
        );
    }

    #[test]
    fn error_reply_uses_display_text() {
        let err = std::io::Error::new(std::io::ErrorKind::ConnectionRefused, "connection refused");
        assert_eq!(
            compose_error_reply(&err),
            OutboundMessage::Error(ErrorReply {
                text: "connection refused".to_string()
            })
        );
    }

    #[test]
    fn wire_shape_is_tagged() {
        let msg = compose_text_reply("a", "b", "c", "d@s.whatsapp.net");
        let v = serde_json::to_value(msg).unwrap();
        assert_eq!(v["kind"], "text");
        assert_eq!(v["quotedText"], "b");
        assert_eq!(v["stanzaId"], "c");
    }
}
