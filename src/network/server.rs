//! Leaderboard Server
//!
//! One listener for everything: WebSocket subscribers, the pull endpoint and
//! the camera endpoint. Each accepted connection's request head is read
//! first; upgrade requests become subscribers, everything else is answered
//! as plain HTTP and closed.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::io::AsyncWriteExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::tungstenite::handshake::derive_accept_key;
use tokio_tungstenite::tungstenite::protocol::Role;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, instrument, warn};

use crate::leaderboard::entity::EntityId;
use crate::network::http::{read_request, HttpError, HttpRequest, HttpResponse};
use crate::network::protocol::{
    focus_target, parse_plid, CameraRequest, CameraResponse, ClientMessage, InfoMessage,
};
use crate::network::publisher::{SubscriberHub, SubscriberId};
use crate::telemetry::control::SessionControl;

/// Budget for reading a request head.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Bind host, an IP literal or a resolvable name.
    pub bind_host: String,
    /// Bind port.
    pub port: u16,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Server version string.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_host: "0.0.0.0".to_string(),
            port: 3000,
            max_connections: 1000,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

/// Server errors.
#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    BindFailed(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Unreadable request.
    #[error("HTTP error: {0}")]
    Http(#[from] HttpError),
}

/// State shared by every connection task.
struct Shared {
    hub: Arc<SubscriberHub>,
    control: Arc<dyn SessionControl>,
    connections: AtomicUsize,
}

/// Subscriber-facing server.
pub struct LeaderboardServer {
    config: ServerConfig,
    shared: Arc<Shared>,
    shutdown_tx: broadcast::Sender<()>,
}

impl LeaderboardServer {
    /// Create a server over a subscriber hub and a session-control handle.
    pub fn new(
        config: ServerConfig,
        hub: Arc<SubscriberHub>,
        control: Arc<dyn SessionControl>,
        shutdown_tx: broadcast::Sender<()>,
    ) -> Self {
        Self {
            config,
            shared: Arc::new(Shared {
                hub,
                control,
                connections: AtomicUsize::new(0),
            }),
            shutdown_tx,
        }
    }

    /// Bind and serve until shutdown.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind().await?;
        self.serve(listener).await
    }

    /// Bind the configured host and port. Host names are resolved.
    pub async fn bind(&self) -> Result<TcpListener, ServerError> {
        let listener = TcpListener::bind((self.config.bind_host.as_str(), self.config.port)).await?;
        Ok(listener)
    }

    /// Serve on an already-bound listener until shutdown.
    #[instrument(skip_all, fields(version = %self.config.version))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        info!("Leaderboard server listening on {}", listener.local_addr()?);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            if self.connection_count() >= self.config.max_connections {
                                warn!("Connection limit reached, rejecting {}", addr);
                                continue;
                            }
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        Ok(())
    }

    /// Signal every task sharing the shutdown channel.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Open connections, subscribers and HTTP requests alike.
    pub fn connection_count(&self) -> usize {
        self.shared.connections.load(Ordering::Acquire)
    }

    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let shared = self.shared.clone();
        let shutdown_rx = self.shutdown_tx.subscribe();
        shared.connections.fetch_add(1, Ordering::AcqRel);

        tokio::spawn(async move {
            if let Err(e) = serve_connection(stream, addr, &shared, shutdown_rx).await {
                debug!("Connection {} ended with error: {}", addr, e);
            }
            shared.connections.fetch_sub(1, Ordering::AcqRel);
        });
    }
}

async fn serve_connection(
    mut stream: TcpStream,
    addr: SocketAddr,
    shared: &Shared,
    shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), ServerError> {
    let request = match tokio::time::timeout(REQUEST_TIMEOUT, read_request(&mut stream)).await {
        Ok(Ok(request)) => request,
        Ok(Err(e @ HttpError::Invalid(_))) | Ok(Err(e @ HttpError::TooLarge)) => {
            stream.write_all(&HttpResponse::bad_request().build()).await?;
            return Err(e.into());
        }
        Ok(Err(e)) => return Err(e.into()),
        Err(_) => {
            debug!("Request head from {} timed out", addr);
            return Ok(());
        }
    };

    if let Some(key) = request.websocket_key() {
        let accept = derive_accept_key(key.as_bytes());
        stream.write_all(&HttpResponse::switching_protocols(accept).build()).await?;
        let ws = WebSocketStream::from_raw_socket(stream, Role::Server, None).await;
        serve_subscriber(ws, addr, shared, shutdown_rx).await;
        return Ok(());
    }

    let response = route(&request, &shared.hub, shared.control.as_ref()).await;
    debug!("{} {} {} -> {}", addr, request.method, request.path, response.code());
    stream.write_all(&response.build()).await?;
    stream.shutdown().await?;
    Ok(())
}

/// Answer a plain HTTP request.
pub async fn route(
    request: &HttpRequest,
    hub: &SubscriberHub,
    control: &dyn SessionControl,
) -> HttpResponse {
    match (request.method.as_str(), request.path.as_str()) {
        ("GET", "/api/leaderboard") => match hub.latest().await {
            Some(latest) => HttpResponse::ok().with_json(&latest),
            None => json(HttpResponse::ok(), &InfoMessage::no_data()),
        },
        ("POST", "/camera") => camera(request, control).await,
        _ => json(HttpResponse::not_found(), &InfoMessage { info: "not found".to_string() }),
    }
}

async fn camera(request: &HttpRequest, control: &dyn SessionControl) -> HttpResponse {
    let body: CameraRequest = match serde_json::from_slice(&request.body) {
        Ok(body) => body,
        Err(e) => {
            debug!("Rejected camera body: {}", e);
            return json(HttpResponse::bad_request(), &CameraResponse::error("invalid body"));
        }
    };
    let plid = match body.plid {
        serde_json::Value::Null => None,
        ref value => parse_plid(value),
    };
    let Some(plid) = plid else {
        return json(HttpResponse::bad_request(), &CameraResponse::error("invalid plid"));
    };

    match control.set_camera_focus(EntityId(plid)).await {
        Ok(()) => {
            info!("Camera focus -> PLID {}", plid);
            json(HttpResponse::ok(), &CameraResponse::ok())
        }
        Err(e) => {
            warn!("Camera directive for PLID {} failed: {}", plid, e);
            json(HttpResponse::internal_error(), &CameraResponse::error(e.to_string()))
        }
    }
}

fn json<T: Serialize>(response: HttpResponse, body: &T) -> HttpResponse {
    match serde_json::to_string(body) {
        Ok(text) => response.with_json(&text),
        Err(e) => {
            error!("Failed to serialize response: {}", e);
            HttpResponse::internal_error()
        }
    }
}

async fn serve_subscriber(
    ws: WebSocketStream<TcpStream>,
    addr: SocketAddr,
    shared: &Shared,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let (mut ws_sender, mut ws_receiver) = ws.split();
    let (id, mut snapshots) = shared.hub.register().await;
    let (reply_tx, mut replies) = mpsc::channel::<Arc<str>>(8);
    info!("Subscriber {} connected from {}", id, addr);

    // Greeting: latest snapshot first, then welcome
    if let Some(latest) = shared.hub.latest().await {
        let _ = reply_tx.send(latest).await;
    }
    match InfoMessage::welcome().to_json() {
        Ok(welcome) => {
            let _ = reply_tx.send(welcome.into()).await;
        }
        Err(e) => error!("Failed to serialize welcome: {}", e),
    }

    let sender_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                Some(text) = replies.recv() => text,
                Some(text) = snapshots.recv() => text,
                else => break,
            };
            if ws_sender.send(Message::Text(text.to_string())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            msg = ws_receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        match ClientMessage::from_json(&text) {
                            Ok(message) => handle_message(id, message, shared, &reply_tx).await,
                            Err(e) => debug!("Invalid message from {}: {}", id, e),
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        debug!("Subscriber {} disconnected", id);
                        break;
                    }
                    Some(Err(e)) => {
                        warn!("WebSocket error for {}: {}", id, e);
                        break;
                    }
                    _ => {}
                }
            }
            _ = shutdown_rx.recv() => break,
        }
    }

    sender_task.abort();
    shared.hub.unregister(id).await;
    info!("Subscriber {} cleaned up", id);
}

async fn handle_message(
    id: SubscriberId,
    message: ClientMessage,
    shared: &Shared,
    reply_tx: &mpsc::Sender<Arc<str>>,
) {
    match message {
        ClientMessage::Focus { plid } => {
            let focus = focus_target(plid);
            shared.hub.set_focus(id, focus).await;
            match focus {
                Some(target) => info!("Subscriber {} focus -> PLID {}", id, target.0),
                None => info!("Subscriber {} cleared focus", id),
            }
            // ViewPLID 0 hands the camera back to the simulation
            if let Err(e) = shared.control.set_camera_focus(EntityId(plid)).await {
                warn!("Camera directive for PLID {} failed: {}", plid, e);
            }
        }
        ClientMessage::SyncRequest => {
            if let Some(latest) = shared.hub.latest().await {
                let _ = reply_tx.send(latest).await;
            }
        }
    }
}
