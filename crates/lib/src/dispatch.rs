//! Event dispatcher: classify each inbound event and run one independent handler task per
//! classification.
//!
//! Every handler ends by delivering exactly one message to the originating conversation:
//! the generated reply, or an error reply describing what failed.

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;

use crate::compose::{
    compose_error_reply, compose_image_reply, compose_text_reply, OutboundMessage,
};
use crate::event::{EventKind, ImageContent, InboundEvent, MessageInfo};
use crate::generation::{GenerationError, Generator};
use crate::transport::{MediaKind, Transport, TransportError};

/// Why a handler could not produce its reply.
#[derive(Debug, thiserror::Error)]
pub enum HandlerError {
    #[error(transparent)]
    Generation(#[from] GenerationError),
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// The composed reply could not be delivered.
    #[error("failed to send reply: {0}")]
    Send(TransportError),
}

/// Everything a handler needs, shared read-only across all handler tasks.
pub struct Session {
    pub transport: Arc<dyn Transport>,
    pub generator: Arc<dyn Generator>,
    limiter: Option<Arc<Semaphore>>,
}

impl Session {
    pub fn new(transport: Arc<dyn Transport>, generator: Arc<dyn Generator>) -> Self {
        Self {
            transport,
            generator,
            limiter: None,
        }
    }

    /// Cap the number of handlers doing I/O at once. `None` or zero leaves it unbounded.
    pub fn with_max_concurrent_handlers(mut self, max: Option<usize>) -> Self {
        self.limiter = max.filter(|n| *n > 0).map(|n| Arc::new(Semaphore::new(n)));
        self
    }
}

/// Routes inbound events to handlers.
#[derive(Clone)]
pub struct Dispatcher {
    session: Arc<Session>,
}

impl Dispatcher {
    pub fn new(session: Session) -> Self {
        Self {
            session: Arc::new(session),
        }
    }

    /// Spawn one handler per classification of `event`. Returns the spawned tasks (empty for
    /// unclassified events); callers are free to drop them.
    pub fn dispatch(&self, event: InboundEvent) -> Vec<JoinHandle<()>> {
        let kinds = event.classify();
        if kinds.is_empty() {
            return Vec::new();
        }
        let event = Arc::new(event);
        kinds
            .into_iter()
            .map(|kind| {
                let session = self.session.clone();
                let event = event.clone();
                tokio::spawn(async move {
                    let _permit = match &session.limiter {
                        Some(limiter) => limiter.clone().acquire_owned().await.ok(),
                        None => None,
                    };
                    match kind {
                        EventKind::Image => {
                            if let Some(image) = &event.content.image {
                                handle_image_message(&session, &event.info, image).await;
                            }
                        }
                        EventKind::Text => {
                            if let Some(text) = event.text() {
                                handle_text_message(&session, &event.info, text).await;
                            }
                        }
                    }
                })
            })
            .collect()
    }
}

/// Download the image, restyle it, upload the result and reply with it.
pub async fn handle_image_message(session: &Session, info: &MessageInfo, image: &ImageContent) {
    log::debug!("image message {} from {} in {}", info.id, info.sender, info.chat);
    let reply = match generate_image_reply(session, image).await {
        Ok(reply) => reply,
        Err(e) => {
            log::warn!("image handler for {} failed: {}", info.id, e);
            send_error_reply(session, &info.chat, &e).await;
            return;
        }
    };
    deliver(session, info, reply).await;
}

async fn generate_image_reply(
    session: &Session,
    image: &ImageContent,
) -> Result<OutboundMessage, HandlerError> {
    let source = session.transport.download(&image.media).await?;
    if source.is_empty() {
        return Err(GenerationError::EmptySource.into());
    }
    let generated = session.generator.generate_image(&source).await?;
    let uploaded = session.transport.upload(&generated, MediaKind::Image).await?;
    Ok(compose_image_reply(&generated, image.dimensions(), &uploaded))
}

/// Ask the text backend for a reply and send it quoting the original message.
pub async fn handle_text_message(session: &Session, info: &MessageInfo, text: &str) {
    log::debug!("text message {} from {} in {}", info.id, info.sender, info.chat);
    let generated = match session.generator.generate_text(text).await {
        Ok(t) => t,
        Err(e) => {
            let e = HandlerError::from(e);
            log::warn!("text handler for {} failed: {}", info.id, e);
            send_error_reply(session, &info.chat, &e).await;
            return;
        }
    };
    let reply = compose_text_reply(&generated, text, &info.id, &info.sender);
    deliver(session, info, reply).await;
}

/// Send the reply; if that fails, tell the user why.
async fn deliver(session: &Session, info: &MessageInfo, reply: OutboundMessage) {
    match session.transport.send_message(&info.chat, &reply).await {
        Ok(id) => log::info!(
            "sent {} reply {} to {} for {}",
            reply.kind(),
            id,
            info.chat,
            info.id
        ),
        Err(e) => {
            let e = HandlerError::Send(e);
            log::warn!("{} reply for {} not delivered: {}", reply.kind(), info.id, e);
            send_error_reply(session, &info.chat, &e).await;
        }
    }
}

/// Best effort: a failure here is only logged.
async fn send_error_reply(session: &Session, chat: &str, err: &HandlerError) {
    let reply = compose_error_reply(err);
    if let Err(e) = session.transport.send_message(chat, &reply).await {
        log::warn!("error reply to {} not delivered: {}", chat, e);
    }
}
