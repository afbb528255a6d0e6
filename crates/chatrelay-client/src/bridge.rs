//! Bridge client — drives a protocol sidecar over WebSocket
//!
//! The sidecar owns the actual messaging protocol (pairing, encryption,
//! credential storage). It pushes JSON frames tagged by `event`:
//!
//! - `{"event":"qr","code":"..."}`
//! - `{"event":"open"}`
//! - `{"event":"close","reason":"..."}`
//! - `{"event":"message","from":"...","body":"..."}`
//! - `{"event":"ack","id":"...","ok":true,"error":null}`
//!
//! and accepts `{"action":"send","id":"...","to":"...","text":"..."}`.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};

use crate::client::{MessagingClient, SendError};
use crate::event::ClientEvent;

type AckTx = oneshot::Sender<Result<(), SendError>>;

/// Where the sidecar lives and how long to wait for send acknowledgements
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    pub url: String,
    pub ack_timeout: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3100/bridge".to_string(),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

/// Sidecar → client frame
#[derive(Debug, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum BridgeFrame {
    Qr {
        code: String,
    },
    Open,
    Close {
        #[serde(default)]
        reason: Option<String>,
    },
    Message {
        from: String,
        #[serde(default)]
        body: String,
    },
    Ack {
        id: String,
        ok: bool,
        #[serde(default)]
        error: Option<String>,
    },
}

/// Client → sidecar command
#[derive(Debug, Serialize)]
#[serde(tag = "action", rename_all = "snake_case")]
enum BridgeCommand<'a> {
    Send {
        id: &'a str,
        to: &'a str,
        text: &'a str,
    },
}

/// [`MessagingClient`] backed by a protocol sidecar
pub struct BridgeClient {
    config: BridgeConfig,
    outbound: Mutex<Option<mpsc::UnboundedSender<String>>>,
    pending: Arc<Mutex<HashMap<String, AckTx>>>,
    open: AtomicBool,
}

impl BridgeClient {
    pub fn new(config: BridgeConfig) -> Self {
        Self {
            config,
            outbound: Mutex::new(None),
            pending: Arc::new(Mutex::new(HashMap::new())),
            open: AtomicBool::new(false),
        }
    }

    /// Whether the sidecar currently reports an open session
    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }

    /// Translate a sidecar frame; acks are resolved here and produce no event
    async fn handle_frame(&self, frame: BridgeFrame) -> Option<ClientEvent> {
        match frame {
            BridgeFrame::Qr { code } => Some(ClientEvent::PairingCode { code }),
            BridgeFrame::Open => {
                self.open.store(true, Ordering::SeqCst);
                Some(ClientEvent::Opened)
            }
            BridgeFrame::Message { from, body } => Some(ClientEvent::Message { from, body }),
            BridgeFrame::Ack { id, ok, error } => {
                let waiter = self.pending.lock().await.remove(&id);
                match waiter {
                    Some(tx) => {
                        let result = if ok {
                            Ok(())
                        } else {
                            Err(SendError::Rejected(
                                error.unwrap_or_else(|| "unspecified".to_string()),
                            ))
                        };
                        let _ = tx.send(result);
                    }
                    None => debug!("Ack for unknown or expired send '{}'", id),
                }
                None
            }
            // Handled by the read loop
            BridgeFrame::Close { .. } => None,
        }
    }

    async fn fail_pending(&self) {
        let mut pending = self.pending.lock().await;
        for (_, tx) in pending.drain() {
            let _ = tx.send(Err(SendError::NotConnected));
        }
    }
}

#[async_trait]
impl MessagingClient for BridgeClient {
    async fn run(&self, events: mpsc::Sender<ClientEvent>) -> Result<()> {
        let ws = match connect_async(self.config.url.as_str()).await {
            Ok((ws, _)) => ws,
            Err(e) => {
                let _ = events.send(ClientEvent::closed(e.to_string())).await;
                return Err(e).with_context(|| format!("Failed to reach bridge at {}", self.config.url));
            }
        };
        info!("Connected to bridge at {}", self.config.url);

        let (mut sink, mut stream) = ws.split();
        let (out_tx, mut out_rx) = mpsc::unbounded_channel::<String>();
        *self.outbound.lock().await = Some(out_tx);
        let mut opened = false;

        let reason: Option<String> = loop {
            tokio::select! {
                Some(frame) = out_rx.recv() => {
                    if let Err(e) = sink.send(Message::Text(frame.into())).await {
                        break Some(format!("write failed: {}", e));
                    }
                }
                msg = stream.next() => match msg {
                    Some(Ok(Message::Text(text))) => {
                        let frame = match serde_json::from_str::<BridgeFrame>(text.as_str()) {
                            Ok(f) => f,
                            Err(e) => {
                                warn!("Ignoring malformed bridge frame: {}", e);
                                continue;
                            }
                        };
                        if let BridgeFrame::Close { reason } = frame {
                            break reason;
                        }
                        if let Some(event) = self.handle_frame(frame).await {
                            if event == ClientEvent::Opened {
                                opened = true;
                            }
                            if events.send(event).await.is_err() {
                                break Some("event consumer gone".to_string());
                            }
                        }
                    }
                    Some(Ok(Message::Close(frame))) => {
                        break frame.map(|f| f.reason.as_str().to_string());
                    }
                    Some(Ok(_)) => {}
                    Some(Err(e)) => break Some(e.to_string()),
                    None => break None,
                }
            }
        };

        self.open.store(false, Ordering::SeqCst);
        *self.outbound.lock().await = None;
        self.fail_pending().await;
        let _ = sink.close().await;

        info!(
            "Bridge session ended: {}",
            reason.as_deref().unwrap_or("connection closed")
        );
        let _ = events
            .send(ClientEvent::Closed {
                reason: reason.clone(),
            })
            .await;

        if opened {
            Ok(())
        } else {
            Err(anyhow!(
                "bridge session ended before opening: {}",
                reason.as_deref().unwrap_or("connection closed")
            ))
        }
    }

    async fn send_text(&self, to: &str, text: &str) -> Result<(), SendError> {
        if !self.is_open() {
            return Err(SendError::NotConnected);
        }

        let id = uuid::Uuid::new_v4().to_string();
        let frame = serde_json::to_string(&BridgeCommand::Send { id: &id, to, text })
            .map_err(|e| SendError::Transport(e.to_string()))?;

        let (ack_tx, ack_rx) = oneshot::channel();
        {
            let outbound = self.outbound.lock().await;
            let Some(tx) = outbound.as_ref() else {
                return Err(SendError::NotConnected);
            };
            self.pending.lock().await.insert(id.clone(), ack_tx);
            if tx.send(frame).is_err() {
                self.pending.lock().await.remove(&id);
                return Err(SendError::NotConnected);
            }
        }
        debug!("Sent message {} to {}", id, to);

        match tokio::time::timeout(self.config.ack_timeout, ack_rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(SendError::NotConnected),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                Err(SendError::Timeout(self.config.ack_timeout))
            }
        }
    }

    fn name(&self) -> &str {
        "bridge"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;
    use tokio_tungstenite::accept_async;

    /// Fake sidecar: pairs, opens, delivers one message, acks sends
    async fn spawn_sidecar(reject_sends: bool) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let mut ws = accept_async(stream).await.unwrap();
            for frame in [
                r#"{"event":"qr","code":"2@abc"}"#,
                r#"{"event":"open"}"#,
                r#"{"event":"message","from":"5511:3@s.whatsapp.net","body":"oi"}"#,
            ] {
                ws.send(Message::Text(frame.into())).await.unwrap();
            }
            while let Some(Ok(msg)) = ws.next().await {
                if let Message::Text(text) = msg {
                    let cmd: serde_json::Value = serde_json::from_str(text.as_str()).unwrap();
                    let ack = if reject_sends {
                        serde_json::json!({"event":"ack","id":cmd["id"],"ok":false,"error":"blocked"})
                    } else {
                        serde_json::json!({"event":"ack","id":cmd["id"],"ok":true})
                    };
                    ws.send(Message::Text(ack.to_string().into())).await.unwrap();
                    ws.send(Message::Text(r#"{"event":"close","reason":"logged out"}"#.into()))
                        .await
                        .unwrap();
                }
            }
        });
        format!("ws://{}", addr)
    }

    fn client(url: String) -> Arc<BridgeClient> {
        Arc::new(BridgeClient::new(BridgeConfig {
            url,
            ack_timeout: Duration::from_secs(5),
        }))
    }

    #[tokio::test]
    async fn test_bridge_session_roundtrip() {
        let client = client(spawn_sidecar(false).await);
        let (tx, mut rx) = mpsc::channel(16);
        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run(tx).await })
        };

        assert_eq!(rx.recv().await, Some(ClientEvent::pairing_code("2@abc")));
        assert_eq!(rx.recv().await, Some(ClientEvent::Opened));
        assert_eq!(
            rx.recv().await,
            Some(ClientEvent::message("5511:3@s.whatsapp.net", "oi"))
        );

        client.send_text("5511@s.whatsapp.net", "hello").await.unwrap();

        assert_eq!(rx.recv().await, Some(ClientEvent::closed("logged out")));
        assert!(runner.await.unwrap().is_ok());
        assert!(!client.is_open());
    }

    #[tokio::test]
    async fn test_bridge_rejected_send() {
        let client = client(spawn_sidecar(true).await);
        let (tx, mut rx) = mpsc::channel(16);
        let runner = {
            let client = client.clone();
            tokio::spawn(async move { client.run(tx).await })
        };
        while let Some(event) = rx.recv().await {
            if event == ClientEvent::Opened {
                break;
            }
        }

        let err = client.send_text("5511@s.whatsapp.net", "hello").await.unwrap_err();
        assert!(matches!(err, SendError::Rejected(ref reason) if reason == "blocked"));
        drop(rx);
        let _ = runner.await;
    }

    #[tokio::test]
    async fn test_send_before_open_is_not_connected() {
        let client = client("ws://127.0.0.1:9".to_string());
        let err = client.send_text("1@s.whatsapp.net", "hi").await.unwrap_err();
        assert_eq!(err.kind(), "not_connected");
    }

    #[tokio::test]
    async fn test_unreachable_bridge_reports_close_and_errors() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let client = client(format!("ws://{}", addr));
        let (tx, mut rx) = mpsc::channel(4);
        assert!(client.run(tx).await.is_err());
        assert!(matches!(rx.recv().await, Some(ClientEvent::Closed { reason: Some(_) })));
    }

    #[test]
    fn test_frame_parsing() {
        let frame: BridgeFrame = serde_json::from_str(r#"{"event":"close"}"#).unwrap();
        assert!(matches!(frame, BridgeFrame::Close { reason: None }));
        let frame: BridgeFrame =
            serde_json::from_str(r#"{"event":"message","from":"1@s.whatsapp.net"}"#).unwrap();
        assert!(matches!(frame, BridgeFrame::Message { ref body, .. } if body.is_empty()));
    }

    #[test]
    fn test_command_serialization() {
        let json = serde_json::to_value(BridgeCommand::Send {
            id: "1",
            to: "2@s.whatsapp.net",
            text: "hi",
        })
        .unwrap();
        assert_eq!(
            json,
            serde_json::json!({"action":"send","id":"1","to":"2@s.whatsapp.net","text":"hi"})
        );
    }
}
