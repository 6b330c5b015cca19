//! WebSocket bridge transport.
//!
//! The bridge process owns the messaging session. We send `req` frames (connect, download,
//! upload, send, disconnect) and match `res` frames by id; `event` frames carry inbound
//! messages and pairing progress.

use crate::compose::OutboundMessage;
use crate::event::{InboundEvent, MediaRef};
use crate::transport::protocol::{
    self, ConnectParams, ConnectResult, DownloadParams, DownloadResult, Frame, QrPayload,
    SendParams, SendResult, UploadParams, WsEvent, WsRequest, WsResponse,
};
use crate::transport::{MediaKind, Transport, TransportError, UploadedMedia};
use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
type PendingMap = Arc<Mutex<HashMap<String, oneshot::Sender<WsResponse>>>>;

/// Pairing progress reported by the bridge while the account is not logged in.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingEvent {
    /// New code to render for scanning.
    Code(String),
    Success,
    Timeout,
    LoggedOut,
}

impl PairingEvent {
    pub fn name(&self) -> &'static str {
        match self {
            PairingEvent::Code(_) => "code",
            PairingEvent::Success => "success",
            PairingEvent::Timeout => "timeout",
            PairingEvent::LoggedOut => "logged-out",
        }
    }
}

/// Streams handed to the run loop after connecting.
pub struct BridgeStreams {
    /// False when the account still has to be paired; pairing events follow on `pairing`.
    pub logged_in: bool,
    pub events: mpsc::UnboundedReceiver<InboundEvent>,
    pub pairing: mpsc::UnboundedReceiver<PairingEvent>,
}

/// Bridge connection shared by all handlers. Writes are serialized; responses are routed by
/// request id.
pub struct BridgeTransport {
    sink: tokio::sync::Mutex<SplitSink<WsStream, Message>>,
    pending: PendingMap,
    running: Arc<AtomicBool>,
}

fn lock_pending(
    pending: &PendingMap,
) -> std::sync::MutexGuard<'_, HashMap<String, oneshot::Sender<WsResponse>>> {
    pending.lock().unwrap_or_else(|e| e.into_inner())
}

impl BridgeTransport {
    /// Open the WebSocket, start the read loop and perform the connect handshake.
    pub async fn connect(
        url: &str,
        client_id: &str,
    ) -> Result<(Arc<Self>, BridgeStreams), TransportError> {
        let (ws, _) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))?;
        let (sink, stream) = ws.split();
        let pending: PendingMap = Arc::new(Mutex::new(HashMap::new()));
        let running = Arc::new(AtomicBool::new(true));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (pairing_tx, pairing_rx) = mpsc::unbounded_channel();

        log::info!("bridge: connected to {}, starting read loop", url);
        tokio::spawn(run_read_loop(
            stream,
            pending.clone(),
            running.clone(),
            event_tx,
            pairing_tx,
        ));

        let transport = Arc::new(Self {
            sink: tokio::sync::Mutex::new(sink),
            pending,
            running,
        });
        let hello: ConnectResult = transport
            .request(
                "connect",
                &ConnectParams {
                    client_id: client_id.to_string(),
                },
            )
            .await?;
        log::info!("bridge: session ready (logged in: {})", hello.logged_in);

        Ok((
            transport,
            BridgeStreams {
                logged_in: hello.logged_in,
                events: event_rx,
                pairing: pairing_rx,
            },
        ))
    }

    /// True until the bridge closes the socket or `disconnect` is called.
    pub fn is_connected(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn send_frame(&self, frame: &WsRequest) -> Result<(), TransportError> {
        let text =
            serde_json::to_string(frame).map_err(|e| TransportError::Protocol(e.to_string()))?;
        self.sink
            .lock()
            .await
            .send(Message::Text(text))
            .await
            .map_err(|e| TransportError::Connection(e.to_string()))
    }

    /// Send one request and wait for its response payload.
    async fn request<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: &P,
    ) -> Result<R, TransportError> {
        if !self.is_connected() {
            return Err(TransportError::Closed);
        }
        let id = uuid::Uuid::new_v4().to_string();
        let params =
            serde_json::to_value(params).map_err(|e| TransportError::Protocol(e.to_string()))?;
        let (tx, rx) = oneshot::channel();
        lock_pending(&self.pending).insert(id.clone(), tx);
        if !self.is_connected() {
            lock_pending(&self.pending).remove(&id);
            return Err(TransportError::Closed);
        }

        if let Err(e) = self.send_frame(&WsRequest::new(&id, method, params)).await {
            lock_pending(&self.pending).remove(&id);
            return Err(e);
        }

        let res = rx.await.map_err(|_| TransportError::Closed)?;
        if !res.ok {
            return Err(TransportError::Remote {
                method: method.to_string(),
                message: res.error.unwrap_or_else(|| "unknown error".to_string()),
            });
        }
        serde_json::from_value(res.payload.unwrap_or(serde_json::Value::Null))
            .map_err(|e| TransportError::Protocol(format!("{} response: {}", method, e)))
    }
}

#[async_trait]
impl Transport for BridgeTransport {
    async fn download(&self, media: &MediaRef) -> Result<Vec<u8>, TransportError> {
        let res: DownloadResult = self
            .request(
                "download",
                &DownloadParams {
                    media: media.clone(),
                },
            )
            .await?;
        Ok(res.data)
    }

    async fn upload(&self, data: &[u8], kind: MediaKind) -> Result<UploadedMedia, TransportError> {
        self.request(
            "upload",
            &UploadParams {
                data: data.to_vec(),
                media_type: kind,
            },
        )
        .await
    }

    async fn send_message(
        &self,
        chat: &str,
        message: &OutboundMessage,
    ) -> Result<String, TransportError> {
        let res: SendResult = self
            .request(
                "send",
                &SendParams {
                    chat: chat.to_string(),
                    message: message.clone(),
                },
            )
            .await?;
        Ok(res.message_id)
    }

    /// Announce the disconnect and close the socket without waiting for a reply.
    async fn disconnect(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            log::debug!("bridge: already disconnected");
            return;
        }
        let id = uuid::Uuid::new_v4().to_string();
        let frame = WsRequest::new(id, "disconnect", serde_json::json!({}));
        if let Err(e) = self.send_frame(&frame).await {
            log::debug!("bridge: disconnect request not delivered: {}", e);
        }
        if let Err(e) = self.sink.lock().await.close().await {
            log::debug!("bridge: close failed: {}", e);
        }
        log::info!("bridge: disconnected");
    }
}

async fn run_read_loop(
    mut stream: SplitStream<WsStream>,
    pending: PendingMap,
    running: Arc<AtomicBool>,
    event_tx: mpsc::UnboundedSender<InboundEvent>,
    pairing_tx: mpsc::UnboundedSender<PairingEvent>,
) {
    while let Some(msg) = stream.next().await {
        let msg = match msg {
            Ok(m) => m,
            Err(e) => {
                log::warn!("bridge: read error: {}", e);
                break;
            }
        };
        let text = match msg {
            Message::Text(t) => t,
            Message::Close(_) => break,
            _ => continue,
        };
        match protocol::parse_frame(&text) {
            Some(Frame::Response(res)) => {
                let waiter = lock_pending(&pending).remove(&res.id);
                match waiter {
                    Some(tx) => {
                        let _ = tx.send(res);
                    }
                    None => log::debug!("bridge: response for unknown request {}", res.id),
                }
            }
            Some(Frame::Event(ev)) => handle_event(ev, &event_tx, &pairing_tx),
            None => log::debug!("bridge: ignoring unrecognized frame"),
        }
    }
    running.store(false, Ordering::SeqCst);
    // Dropping the waiters fails their requests with `Closed`.
    lock_pending(&pending).clear();
    log::info!("bridge: read loop stopped");
}

fn handle_event(
    ev: WsEvent,
    event_tx: &mpsc::UnboundedSender<InboundEvent>,
    pairing_tx: &mpsc::UnboundedSender<PairingEvent>,
) {
    let pairing = match ev.event.as_str() {
        "message" => {
            match serde_json::from_value::<InboundEvent>(ev.payload) {
                Ok(inbound) => {
                    if event_tx.send(inbound).is_err() {
                        log::debug!("bridge: event receiver dropped");
                    }
                }
                Err(e) => log::warn!("bridge: malformed message event: {}", e),
            }
            return;
        }
        "qr" => match serde_json::from_value::<QrPayload>(ev.payload) {
            Ok(qr) => PairingEvent::Code(qr.code),
            Err(e) => {
                log::warn!("bridge: malformed qr event: {}", e);
                return;
            }
        },
        "pair-success" => PairingEvent::Success,
        "pair-timeout" => PairingEvent::Timeout,
        "logged-out" => PairingEvent::LoggedOut,
        "disconnected" => {
            let reason = ev
                .payload
                .get("reason")
                .and_then(|v| v.as_str())
                .unwrap_or("unknown");
            log::warn!("bridge: messaging connection dropped: {}", reason);
            return;
        }
        other => {
            log::debug!("bridge: unhandled event {}", other);
            return;
        }
    };
    let _ = pairing_tx.send(pairing);
}
