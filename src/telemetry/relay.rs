//! Telemetry Relay Client
//!
//! TCP connection to the packet relay in front of the simulation. Inbound:
//! one decoded packet per line, mapped to [`TelemetryEvent`]s for the engine.
//! Outbound: [`Directive`]s as JSON lines. The connection is retried forever
//! with capped exponential backoff; losing it never stops the process.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, instrument, warn};

use crate::telemetry::control::{ControlError, Directive, SessionControl, PROTOCOL_VERSION};
use crate::telemetry::packet::{parse_line, TelemetryEvent};

/// First reconnect delay.
pub const INITIAL_BACKOFF: Duration = Duration::from_secs(1);
/// Reconnect delay cap.
pub const MAX_BACKOFF: Duration = Duration::from_secs(30);

/// Relay connection settings.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Relay host
    pub host: String,
    /// Relay port
    pub port: u16,
    /// Name announced in the hello
    pub client_name: String,
    /// Requested telemetry interval (ms)
    pub interval_ms: u64,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 29999,
            client_name: "SRA Leaderboard".to_string(),
            interval_ms: 100,
        }
    }
}

/// Next delay after a failed attempt.
pub fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(MAX_BACKOFF)
}

/// Handle used by the rest of the process to send directives.
#[derive(Clone)]
pub struct RelayHandle {
    directives: mpsc::Sender<Directive>,
    connected: Arc<AtomicBool>,
}

impl RelayHandle {
    /// Whether the relay currently has a live connection.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }
}

#[async_trait]
impl SessionControl for RelayHandle {
    async fn send(&self, directive: Directive) -> Result<(), ControlError> {
        if !self.is_connected() {
            return Err(ControlError::NotConnected);
        }
        self.directives.send(directive).await.map_err(|_| ControlError::Closed)
    }
}

enum SessionEnd {
    Disconnected(String),
    Shutdown,
}

/// The relay client task.
pub struct TelemetryRelay {
    config: RelayConfig,
    events: mpsc::Sender<TelemetryEvent>,
    directives: mpsc::Receiver<Directive>,
    connected: Arc<AtomicBool>,
}

impl TelemetryRelay {
    /// Create the client and its directive handle.
    pub fn new(config: RelayConfig, events: mpsc::Sender<TelemetryEvent>) -> (Self, RelayHandle) {
        let (directive_tx, directive_rx) = mpsc::channel(64);
        let connected = Arc::new(AtomicBool::new(false));

        let relay = Self {
            config,
            events,
            directives: directive_rx,
            connected: connected.clone(),
        };
        let handle = RelayHandle {
            directives: directive_tx,
            connected,
        };
        (relay, handle)
    }

    fn hello(&self) -> Directive {
        Directive::Isi {
            name: self.config.client_name.clone(),
            interval_ms: self.config.interval_ms,
            version: PROTOCOL_VERSION,
            multi_car_info: true,
        }
    }

    /// Connect, pump lines, reconnect. Returns only on shutdown or when the
    /// engine stops consuming events.
    #[instrument(skip_all, fields(host = %self.config.host, port = self.config.port))]
    pub async fn run(mut self, mut shutdown: broadcast::Receiver<()>) {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let mut backoff = INITIAL_BACKOFF;

        loop {
            info!("Connecting to telemetry source at {}", addr);
            tokio::select! {
                result = TcpStream::connect(&addr) => match result {
                    Ok(stream) => {
                        info!("Telemetry source connected");
                        backoff = INITIAL_BACKOFF;
                        self.connected.store(true, Ordering::Release);
                        let end = self.pump(stream, &mut shutdown).await;
                        self.connected.store(false, Ordering::Release);
                        match end {
                            SessionEnd::Shutdown => return,
                            SessionEnd::Disconnected(reason) => {
                                warn!("Telemetry source disconnected: {}; serving last snapshot", reason);
                            }
                        }
                    }
                    Err(e) => {
                        warn!("Telemetry source unreachable: {}; retrying in {:?}", e, backoff);
                    }
                },
                _ = shutdown.recv() => return,
            }

            tokio::select! {
                _ = tokio::time::sleep(backoff) => {}
                _ = shutdown.recv() => return,
            }
            backoff = next_backoff(backoff);
        }
    }

    async fn pump(&mut self, stream: TcpStream, shutdown: &mut broadcast::Receiver<()>) -> SessionEnd {
        let (reader, mut writer) = stream.into_split();
        let mut lines = BufReader::new(reader).lines();

        if let Err(e) = write_directive(&mut writer, &self.hello()).await {
            return SessionEnd::Disconnected(format!("hello failed: {}", e));
        }

        loop {
            tokio::select! {
                line = lines.next_line() => {
                    let line = match line {
                        Ok(Some(line)) => line,
                        Ok(None) => return SessionEnd::Disconnected("closed by peer".to_string()),
                        Err(e) => return SessionEnd::Disconnected(e.to_string()),
                    };
                    if line.trim().is_empty() {
                        continue;
                    }
                    match parse_line(&line) {
                        Ok(Some(event)) => {
                            if self.events.send(event).await.is_err() {
                                return SessionEnd::Shutdown;
                            }
                        }
                        Ok(None) => {}
                        Err(e) => debug!("Skipping malformed packet: {}", e),
                    }
                }
                directive = self.directives.recv() => {
                    let Some(directive) = directive else {
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = write_directive(&mut writer, &directive).await {
                        return SessionEnd::Disconnected(format!("write failed: {}", e));
                    }
                }
                _ = shutdown.recv() => return SessionEnd::Shutdown,
            }
        }
    }
}

async fn write_directive<W>(writer: &mut W, directive: &Directive) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    let mut line = directive.to_json()
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    line.push('\n');
    writer.write_all(line.as_bytes()).await?;
    writer.flush().await
}
