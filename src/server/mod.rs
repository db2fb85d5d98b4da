pub mod protocol;

use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{RwLock, broadcast};
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use crate::engine::CycleReport;
use crate::host::EntityId;
use protocol::{CooldownsResponse, CycleMessage, ErrorResponse, HealthStatus, OperatorView};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Shared between the engine loop and every connection handler.
pub struct ServerState {
    pub view: RwLock<OperatorView>,
    /// Serialized cycle messages for WebSocket clients.
    pub cycle_sender: broadcast::Sender<String>,
    pub health: RwLock<HealthData>,
}

pub struct HealthData {
    pub last_cycle_ms: f32,
    pub recent_cycle_durations_ms: Vec<f32>,
}

impl HealthData {
    pub fn cycle_rate(&self) -> f32 {
        if self.recent_cycle_durations_ms.is_empty() {
            return 0.0;
        }
        let avg_ms: f32 = self.recent_cycle_durations_ms.iter().sum::<f32>()
            / self.recent_cycle_durations_ms.len() as f32;
        if avg_ms <= 0.0 {
            return 0.0;
        }
        1000.0 / avg_ms
    }
}

impl ServerState {
    pub fn new(view: OperatorView) -> Self {
        let (tx, _) = broadcast::channel(64);
        ServerState {
            view: RwLock::new(view),
            cycle_sender: tx,
            health: RwLock::new(HealthData {
                last_cycle_ms: 0.0,
                recent_cycle_durations_ms: Vec::new(),
            }),
        }
    }

    /// Replace the operator view and, when a pass ran, stream its report.
    pub async fn publish(&self, view: OperatorView, report: Option<&CycleReport>) {
        *self.view.write().await = view;

        let Some(report) = report else {
            return;
        };
        match serde_json::to_string(&CycleMessage::new(report)) {
            // No receivers is fine.
            Ok(json) => {
                let _ = self.cycle_sender.send(json);
            }
            Err(e) => warn!("Cannot serialize cycle report: {}", e),
        }

        let mut health = self.health.write().await;
        health.last_cycle_ms = report.duration_ms;
        health.recent_cycle_durations_ms.push(report.duration_ms);
        if health.recent_cycle_durations_ms.len() > 100 {
            health.recent_cycle_durations_ms.remove(0);
        }
    }

    /// Answer a GET for `path` with a status code and JSON body.
    pub async fn respond(&self, path: &str) -> (u16, String) {
        let view = self.view.read().await;
        let body = match path {
            "/health" => {
                let health = self.health.read().await;
                serde_json::to_string(&HealthStatus {
                    tick: view.tick,
                    state: view.state,
                    generation: view.generation,
                    rule_count: view.rules.len(),
                    cache_size: view.cache_size,
                    cache_hits: view.cache_counters.hits,
                    cache_misses: view.cache_counters.misses,
                    cycle_rate: health.cycle_rate(),
                    last_cycle_ms: health.last_cycle_ms,
                })
            }
            "/rules" => serde_json::to_string(&view.rules),
            "/stats" => serde_json::to_string(&view.stats),
            _ => match path.strip_prefix("/cooldowns/") {
                Some(raw) => match raw.parse::<EntityId>() {
                    Ok(id) => serde_json::to_string(&CooldownsResponse {
                        entity: id.to_string(),
                        cooldowns: view.cooldowns.get(&id).map(Vec::as_slice).unwrap_or(&[]),
                    }),
                    Err(_) => return error_body(400, "invalid entity id"),
                },
                None => return error_body(404, "not found"),
            },
        };
        match body {
            Ok(json) => (200, json),
            Err(_) => error_body(500, "serialization failed"),
        }
    }
}

fn error_body(status: u16, message: &str) -> (u16, String) {
    let body = serde_json::to_string(&ErrorResponse { error: message })
        .unwrap_or_else(|_| "{}".to_string());
    (status, body)
}

fn reason(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        404 => "Not Found",
        _ => "Internal Server Error",
    }
}

/// Serve the operator endpoints until the listener fails.
pub async fn start_server(state: Arc<ServerState>, addr: SocketAddr) -> Result<(), BoxError> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "Operator surface listening");
    serve(listener, state).await
}

pub async fn serve(listener: TcpListener, state: Arc<ServerState>) -> Result<(), BoxError> {
    loop {
        let (stream, peer) = listener.accept().await?;
        let state = Arc::clone(&state);
        tokio::spawn(async move {
            if let Err(e) = handle_connection(stream, peer, state).await {
                error!(%peer, "Connection error: {}", e);
            }
        });
    }
}

/// Route to WebSocket or plain HTTP by peeking at the request headers.
async fn handle_connection(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), BoxError> {
    let mut buf = [0u8; 1024];
    let n = stream.peek(&mut buf).await?;
    let head = String::from_utf8_lossy(&buf[..n]).to_lowercase();

    if head.contains("upgrade: websocket") {
        handle_websocket(stream, peer, state).await
    } else {
        handle_http(stream, state).await
    }
}

/// Send the current status, then stream cycle reports until the client leaves.
async fn handle_websocket(
    stream: TcpStream,
    peer: SocketAddr,
    state: Arc<ServerState>,
) -> Result<(), BoxError> {
    let ws_stream = tokio_tungstenite::accept_async(stream).await?;
    info!(%peer, "WebSocket connected");

    let (mut write, mut read) = futures_util::StreamExt::split(ws_stream);

    let status = serde_json::to_string(&state.view.read().await.status_message())?;
    futures_util::SinkExt::send(&mut write, Message::Text(status.into())).await?;

    let mut rx = state.cycle_sender.subscribe();
    loop {
        tokio::select! {
            report = rx.recv() => {
                match report {
                    Ok(json) => {
                        if futures_util::SinkExt::send(&mut write, Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(%peer, lagged = n, "Client lagged behind on cycle reports");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = futures_util::StreamExt::next(&mut read) => {
                match msg {
                    Some(Ok(Message::Close(_))) | None | Some(Err(_)) => break,
                    _ => {}
                }
            }
        }
    }

    info!(%peer, "WebSocket disconnected");
    Ok(())
}

async fn handle_http(mut stream: TcpStream, state: Arc<ServerState>) -> Result<(), BoxError> {
    let mut buf = vec![0u8; 4096];
    let n = stream.read(&mut buf).await?;
    let request = String::from_utf8_lossy(&buf[..n]);

    let mut parts = request.lines().next().unwrap_or_default().split_whitespace();
    let (status, body) = match (parts.next(), parts.next()) {
        (Some("GET"), Some(path)) => state.respond(path).await,
        _ => error_body(404, "not found"),
    };
    debug!(status, "Operator request");

    let response = format!(
        "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        reason(status),
        body.len(),
        body
    );
    stream.write_all(response.as_bytes()).await?;
    stream.shutdown().await?;
    Ok(())
}
