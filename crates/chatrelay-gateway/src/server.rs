//! Gateway server — Axum-based HTTP + WS server

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::Json;
use axum::Router;
use axum::extract::rejection::JsonRejection;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::ws::rejection::WebSocketUpgradeRejection;
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode, header};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use chatrelay_client::MessagingClient;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tracing::{debug, info, warn};

use crate::api::{self, ApiError};
use crate::auth;
use crate::events::EventPump;
use crate::protocol::{QrResponse, SendRequest, SendResponse};
use crate::registry::{Subscriber, SubscriberError, SubscriberRegistry};
use crate::session::SessionRelay;

/// Frames buffered per WebSocket connection before it counts as too slow
pub const DEFAULT_SUBSCRIBER_BUFFER: usize = 64;

/// Shared state for all handlers
#[derive(Clone)]
pub struct GatewayState {
    pub relay: Arc<SessionRelay>,
    pub subscribers: Arc<SubscriberRegistry>,
    pub client: Arc<dyn MessagingClient>,
    pub auth_token: String,
    pub subscriber_buffer: usize,
    pub shutdown: CancellationToken,
    pub start_time: std::time::Instant,
}

/// The gateway server
pub struct GatewayServer {
    state: GatewayState,
    bind: SocketAddr,
}

impl GatewayServer {
    /// Create a new gateway server in front of `client`
    pub fn new(bind: SocketAddr, auth_token: String, client: Arc<dyn MessagingClient>) -> Self {
        let state = GatewayState {
            relay: Arc::new(SessionRelay::new()),
            subscribers: Arc::new(SubscriberRegistry::new()),
            client,
            auth_token,
            subscriber_buffer: DEFAULT_SUBSCRIBER_BUFFER,
            shutdown: CancellationToken::new(),
            start_time: std::time::Instant::now(),
        };
        Self { state, bind }
    }

    /// Set the per-connection frame buffer
    pub fn with_subscriber_buffer(mut self, frames: usize) -> Self {
        self.state.subscriber_buffer = frames.max(1);
        self
    }

    /// Get a reference to the session relay
    pub fn relay(&self) -> &Arc<SessionRelay> {
        &self.state.relay
    }

    /// Get a reference to the subscriber registry
    pub fn subscribers(&self) -> &Arc<SubscriberRegistry> {
        &self.state.subscribers
    }

    /// An event pump feeding this server's relay and subscribers
    pub fn event_pump(&self) -> EventPump {
        EventPump::new(self.state.relay.clone(), self.state.subscribers.clone())
    }

    /// Build the Axum router
    pub fn router(&self) -> Router {
        Router::new()
            .route("/", get(ws_handler))
            .route("/ws", get(ws_handler))
            .route("/qr", get(qr_handler))
            .route("/send", post(send_handler))
            .route("/api/status", get(status_handler))
            .layer(CorsLayer::permissive())
            .with_state(self.state.clone())
    }

    /// Bind and serve until `cancel` fires
    pub async fn run(self, cancel: CancellationToken) -> anyhow::Result<()> {
        let listener = TcpListener::bind(self.bind)
            .await
            .with_context(|| format!("Failed to bind gateway to {}", self.bind))?;
        self.serve(listener, cancel).await
    }

    /// Serve on an already-bound listener until `cancel` fires
    pub async fn serve(self, listener: TcpListener, cancel: CancellationToken) -> anyhow::Result<()> {
        let router = self.router();
        info!("Gateway listening on {}", listener.local_addr()?);

        let shutdown = self.state.shutdown.clone();
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            cancel.cancelled().await;
            shutdown.cancel();
        })
        .await
        .context("Gateway server exited")?;

        info!("Gateway stopped");
        Ok(())
    }

    /// Start the server in the background, returning a handle
    pub fn spawn(self, cancel: CancellationToken) -> tokio::task::JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move { self.run(cancel).await })
    }
}

/// `?token=` query parameter
#[derive(Debug, Default, Deserialize)]
struct TokenQuery {
    token: Option<String>,
}

fn authorize(state: &GatewayState, headers: &HeaderMap, query: &TokenQuery) -> Result<(), ApiError> {
    if auth::check_auth(&state.auth_token, headers, query.token.as_deref()) {
        Ok(())
    } else {
        Err(ApiError::Unauthorized)
    }
}

// ── HTTP Handlers ──

async fn status_handler(State(state): State<GatewayState>) -> impl IntoResponse {
    let session = state.relay.snapshot();
    Json(serde_json::json!({
        "status": "ok",
        "session": session.state,
        "connected_clients": state.subscribers.len(),
        "uptime_secs": state.start_time.elapsed().as_secs(),
    }))
}

async fn qr_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
) -> Result<Json<QrResponse>, ApiError> {
    authorize(&state, &headers, &query)?;
    Ok(Json(api::current_code(&state.relay)))
}

async fn send_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    body: Result<Json<SendRequest>, JsonRejection>,
) -> Result<Json<SendResponse>, ApiError> {
    authorize(&state, &headers, &query)?;
    let Json(request) = body.map_err(|e| ApiError::InvalidRequest(e.body_text()))?;
    api::send_message(state.client.as_ref(), request).await?;
    Ok(Json(SendResponse { ok: true }))
}

// ── WebSocket Handler ──

/// Subscriber backed by a WebSocket writer task
struct WsSubscriber {
    tx: mpsc::Sender<Arc<str>>,
    /// Cancelled once the registry gives up on this connection
    evicted: CancellationToken,
}

impl Subscriber for WsSubscriber {
    fn send(&self, frame: Arc<str>) -> Result<(), SubscriberError> {
        self.tx.try_send(frame).map_err(|e| {
            self.evicted.cancel();
            match e {
                mpsc::error::TrySendError::Full(_) => SubscriberError::Full,
                mpsc::error::TrySendError::Closed(_) => SubscriberError::Closed,
            }
        })
    }
}

/// Refuse an upgrade without a handshake or body
fn refuse_upgrade() -> Response {
    (StatusCode::UNAUTHORIZED, [(header::CONNECTION, "close")]).into_response()
}

async fn ws_handler(
    State(state): State<GatewayState>,
    headers: HeaderMap,
    Query(query): Query<TokenQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    ws: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    // Auth check before any upgrade
    if authorize(&state, &headers, &query).is_err() {
        warn!("Refusing WebSocket upgrade from {}", addr);
        return refuse_upgrade();
    }
    let ws = match ws {
        Ok(ws) => ws,
        Err(rejection) => return rejection.into_response(),
    };

    info!("WebSocket connection from {}", addr);
    ws.on_upgrade(move |socket| handle_ws(socket, state, addr))
}

async fn handle_ws(socket: WebSocket, state: GatewayState, addr: SocketAddr) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (frame_tx, mut frame_rx) = mpsc::channel::<Arc<str>>(state.subscriber_buffer);
    let evicted = CancellationToken::new();
    let subscriber: Arc<dyn Subscriber> = Arc::new(WsSubscriber {
        tx: frame_tx,
        evicted: evicted.clone(),
    });

    let id = match state
        .subscribers
        .register_with(&subscriber, || state.relay.greeting())
    {
        Ok(id) => id,
        Err(e) => {
            warn!("Could not greet client {}: {}", addr, e);
            return;
        }
    };

    // Forward queued frames to this client
    let send_task = tokio::spawn(async move {
        while let Some(frame) = frame_rx.recv().await {
            if ws_sender
                .send(Message::Text(frame.to_string().into()))
                .await
                .is_err()
            {
                break;
            }
        }
        let _ = ws_sender.close().await;
    });

    // Inbound frames carry nothing; only watch for the close
    loop {
        tokio::select! {
            _ = state.shutdown.cancelled() => break,
            _ = evicted.cancelled() => {
                warn!("Client {} fell behind, closing", addr);
                break;
            }
            msg = ws_receiver.next() => match msg {
                Some(Ok(Message::Close(_))) | None => {
                    debug!("Client {} closed the connection", addr);
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    warn!("WebSocket error from {}: {}", addr, e);
                    break;
                }
            },
        }
    }

    state.subscribers.unregister(id);
    drop(subscriber);
    if tokio::time::timeout(std::time::Duration::from_secs(1), send_task)
        .await
        .is_err()
    {
        debug!("Writer for client {} did not finish in time", addr);
    }
    info!("Client {} disconnected", addr);
}
