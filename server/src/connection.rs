//! Per-connection actor: admission, upgrade, inbound and outbound loops
//!
//! Each admitted websocket gets two tasks. The inbound loop decodes and
//! dispatches client frames sequentially, so updates from one connection
//! are applied in the order they arrived. The outbound loop drains that
//! connection's bounded queue and owns all socket writes, including
//! liveness pings. The two sides share nothing but the queue; teardown is
//! driven by whichever side fails first and is idempotent throughout.

use crate::admission::AdmissionError;
use crate::board::WriteOutcome;
use crate::hub::{ClientHandle, ClientId};
use crate::limiter::TokenBucket;
use crate::AppState;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use log::{debug, info, warn};
use rand::Rng;
use serde::Deserialize;
use shared::{compress_panel, ClientFrame, Color, ServerFrame, ACK_ACCEPTED, MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio::sync::mpsc;
use tokio::time::timeout;

static NEXT_CLIENT_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Deserialize)]
pub struct UpgradeQuery {
    pub token: Option<String>,
}

/// Current wall clock in milliseconds since the epoch; the timestamp
/// attached to every applied update.
pub fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::from_secs(0))
        .as_millis() as u64
}

fn random_color() -> Color {
    let mut rng = rand::thread_rng();
    Color::new(rng.gen(), rng.gen(), rng.gen())
}

/// An empty allow-list admits any origin; otherwise the Origin header
/// must match one entry exactly.
fn origin_allowed(allowed: &[String], headers: &HeaderMap) -> bool {
    if allowed.is_empty() {
        return true;
    }
    headers
        .get("origin")
        .and_then(|value| value.to_str().ok())
        .map(|origin| allowed.iter().any(|entry| entry == origin))
        .unwrap_or(false)
}

/// The `/ws` upgrade handler. Origin and admission are checked before the
/// upgrade; a failure never constructs an actor.
pub async fn serve_ws(
    State(state): State<Arc<AppState>>,
    ws: WebSocketUpgrade,
    Query(query): Query<UpgradeQuery>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
) -> Response {
    if !origin_allowed(&state.config.allowed_origins, &headers) {
        warn!("rejected upgrade from {}: origin not allowed", addr);
        return StatusCode::FORBIDDEN.into_response();
    }

    let remote = addr.to_string();
    if let Err(e) = state.gate.verify(query.token.as_deref(), &remote).await {
        warn!("admission failed for {}: {}", remote, e);
        let status = match e {
            AdmissionError::MissingToken => StatusCode::BAD_REQUEST,
            _ => StatusCode::FORBIDDEN,
        };
        return (status, format!("admission failed: {}", e)).into_response();
    }

    ws.max_message_size(MAX_FRAME_SIZE)
        .on_upgrade(move |socket| handle_socket(state, socket, addr))
}

async fn handle_socket(state: Arc<AppState>, socket: WebSocket, addr: SocketAddr) {
    let id = NEXT_CLIENT_ID.fetch_add(1, Ordering::Relaxed);
    let color = random_color();
    let (out_tx, out_rx) = mpsc::channel::<Vec<u8>>(state.config.queue_capacity);

    info!("client {} connected from {}", id, addr);

    // The color assignment goes first, ahead of any fan-out frame. The
    // queue is freshly created, so this cannot fail.
    let _ = out_tx.try_send(ServerFrame::AssignColor { color }.encode());

    state.hub.register(ClientHandle {
        id,
        sender: out_tx.clone(),
    });

    let (ws_tx, ws_rx) = socket.split();
    let write_task = tokio::spawn(write_loop(
        ws_tx,
        out_rx,
        state.config.write_wait(),
        state.config.ping_period(),
        id,
    ));

    read_loop(&state, ws_rx, out_tx, id, color).await;

    // Inbound side is done: leave the fan-out set. Dropping the local
    // sender above plus the hub's copy closes the queue, which ends the
    // outbound loop after it drains.
    state.hub.unregister(id);
    let _ = write_task.await;
    info!("client {} disconnected", id);
}

/// Sequential inbound loop: one frame decoded and dispatched at a time.
async fn read_loop(
    state: &AppState,
    mut ws_rx: SplitStream<WebSocket>,
    out_tx: mpsc::Sender<Vec<u8>>,
    id: ClientId,
    assigned: Color,
) {
    let mode = state.config.color_mode();
    let mut limiter = TokenBucket::new(state.config.rate_refill, state.config.rate_burst);
    let pong_wait = state.config.pong_wait();

    loop {
        let message = match timeout(pong_wait, ws_rx.next()).await {
            Ok(Some(Ok(message))) => message,
            Ok(Some(Err(e))) => {
                debug!("client {} read error: {}", id, e);
                break;
            }
            Ok(None) => break,
            Err(_) => {
                info!("client {} idle past the pong deadline", id);
                break;
            }
        };

        let data = match message {
            Message::Binary(data) => data,
            Message::Close(_) => break,
            // Pings are answered by the transport layer; pongs and text
            // only serve to reset the read deadline above.
            _ => continue,
        };

        let frame = match ClientFrame::decode(&data, mode) {
            Ok(frame) => frame,
            Err(e) => {
                debug!("client {} sent an undecodable frame: {}", id, e);
                continue;
            }
        };

        match frame {
            ClientFrame::Update { panel, x, y, color } => {
                // Back-pressure is invisible: an exhausted bucket drops
                // the frame without an ack or an error.
                if !limiter.allow() {
                    continue;
                }

                let paint = color.unwrap_or(assigned);
                let now = now_millis();
                let outcome = state
                    .store
                    .write_cell(panel as usize, x as usize, y as usize, paint, now)
                    .await;

                match outcome {
                    WriteOutcome::Applied => {
                        state.hub.broadcast(
                            ServerFrame::Broadcast {
                                panel,
                                x,
                                y,
                                color: paint,
                                timestamp: now,
                            }
                            .encode(),
                        );
                        enqueue(
                            &out_tx,
                            ServerFrame::UpdateAck {
                                result: ACK_ACCEPTED,
                            }
                            .encode(),
                            id,
                        );
                    }
                    WriteOutcome::Stale => {
                        debug!("client {} lost a paint race on panel {}", id, panel);
                    }
                    WriteOutcome::OutOfRange => {
                        debug!(
                            "client {} sent out-of-range update (panel {}, {}, {})",
                            id, panel, x, y
                        );
                    }
                }
            }
            ClientFrame::Request { panel } => match state.store.read_panel(panel as usize).await {
                Some(raw) => {
                    debug!("panel sync requested for panel {}", panel);
                    let payload = compress_panel(&raw);
                    enqueue(&out_tx, ServerFrame::PanelSync { panel, payload }.encode(), id);
                }
                None => {
                    debug!("client {} requested out-of-range panel {}", id, panel);
                }
            },
        }
    }
}

/// Direct replies share the broadcast discipline: non-blocking enqueue,
/// drop on overflow. The client can always re-request a panel sync.
fn enqueue(out_tx: &mpsc::Sender<Vec<u8>>, frame: Vec<u8>, id: ClientId) {
    if out_tx.try_send(frame).is_err() {
        debug!("client {} reply dropped (queue full or closed)", id);
    }
}

/// Outbound loop: owns the socket's write half. Every write carries the
/// configured deadline; any failure ends the loop and with it the
/// connection's useful life.
async fn write_loop(
    mut ws_tx: SplitSink<WebSocket, Message>,
    mut out_rx: mpsc::Receiver<Vec<u8>>,
    write_wait: Duration,
    ping_period: Duration,
    id: ClientId,
) {
    let mut ping = tokio::time::interval(ping_period);
    // Skip the immediate first tick.
    ping.tick().await;

    loop {
        tokio::select! {
            frame = out_rx.recv() => match frame {
                Some(frame) => {
                    if let Err(e) =
                        send_with_deadline(&mut ws_tx, Message::Binary(frame), write_wait).await
                    {
                        debug!("client {} write failed: {}", id, e);
                        break;
                    }
                }
                None => {
                    // Every sender is gone: orderly shutdown.
                    let _ =
                        send_with_deadline(&mut ws_tx, Message::Close(None), write_wait).await;
                    break;
                }
            },
            _ = ping.tick() => {
                if let Err(e) =
                    send_with_deadline(&mut ws_tx, Message::Ping(Vec::new()), write_wait).await
                {
                    debug!("client {} ping failed: {}", id, e);
                    break;
                }
            }
        }
    }

    // Close the transport so the inbound loop does not linger until its
    // pong deadline on a connection that can no longer be written to.
    let _ = timeout(write_wait, ws_tx.close()).await;
}

async fn send_with_deadline(
    ws_tx: &mut SplitSink<WebSocket, Message>,
    message: Message,
    write_wait: Duration,
) -> Result<(), String> {
    match timeout(write_wait, ws_tx.send(message)).await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(e)) => Err(e.to_string()),
        Err(_) => Err(format!("write deadline of {:?} exceeded", write_wait)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_origin_allowed_with_empty_allowlist() {
        let headers = HeaderMap::new();
        assert!(origin_allowed(&[], &headers));
    }

    #[test]
    fn test_origin_must_match_exactly() {
        let allowed = vec!["https://example.org".to_string()];

        let mut headers = HeaderMap::new();
        headers.insert("origin", HeaderValue::from_static("https://example.org"));
        assert!(origin_allowed(&allowed, &headers));

        headers.insert("origin", HeaderValue::from_static("https://evil.example"));
        assert!(!origin_allowed(&allowed, &headers));

        // Missing Origin header fails a non-empty allowlist.
        assert!(!origin_allowed(&allowed, &HeaderMap::new()));
    }

    #[test]
    fn test_enqueue_drops_on_full_queue() {
        let (tx, mut rx) = mpsc::channel::<Vec<u8>>(1);
        enqueue(&tx, vec![1], 7);
        enqueue(&tx, vec![2], 7); // silently dropped

        assert_eq!(rx.try_recv().unwrap(), vec![1]);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn test_now_millis_is_monotonic_enough() {
        let a = now_millis();
        std::thread::sleep(Duration::from_millis(2));
        let b = now_millis();
        assert!(b > a);
        // Sanity: the clock is an epoch-milliseconds value, not seconds.
        assert!(a > 1_600_000_000_000);
    }

    #[test]
    fn test_random_colors_vary() {
        let colors: Vec<Color> = (0..32).map(|_| random_color()).collect();
        let first = colors[0];
        assert!(
            colors.iter().any(|c| *c != first),
            "32 random colors came out identical"
        );
    }
}
