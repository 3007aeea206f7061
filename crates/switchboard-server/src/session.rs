//! WebSocket session lifecycle — one connected device from upgrade through
//! disconnect.
//!
//! Each session owns its socket. A writer task drains the connection's send
//! queue and probes liveness with Ping frames; the reader loop decodes
//! inbound frames into envelopes and dispatches them. Registration state is
//! a per-session `Option<DeviceId>`: `None` until a valid `register` frame
//! arrives, after which teardown releases the identity and announces it
//! offline.

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use metrics::{counter, gauge, histogram};
use switchboard_core::{ConnectionId, DeviceId, Envelope};
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn};

use crate::connection::DeviceConnection;
use crate::metrics::{
    DEVICES_REGISTERED, ENVELOPES_DROPPED_TOTAL, WS_CONNECTIONS_ACTIVE,
    WS_CONNECTIONS_TOTAL, WS_CONNECTION_DURATION_SECONDS, WS_DISCONNECTIONS_TOTAL,
};
use crate::presence;
use crate::registry::DeviceRegistry;
use crate::router;
use crate::server::AppState;

/// Run a WebSocket session for a connected device.
///
/// 1. Spawns the writer task (send queue drain + heartbeat Pings)
/// 2. Dispatches inbound frames: registration, addressed forwarding
/// 3. On disconnect, releases the registered identity and broadcasts offline
#[instrument(skip_all, fields(conn_id))]
pub async fn run_device_session(ws: WebSocket, state: AppState) {
    let (ws_tx, mut ws_rx) = ws.split();

    let conn_id = ConnectionId::new();
    tracing::Span::current().record("conn_id", conn_id.as_str());

    let (send_tx, send_rx) = mpsc::channel::<Arc<String>>(state.config.max_send_queue);
    let connection = Arc::new(DeviceConnection::new(conn_id, send_tx));

    info!("device connected");
    counter!(WS_CONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).increment(1.0);
    state.active_connections.fetch_add(1, Ordering::Relaxed);

    let writer = tokio::spawn(write_loop(
        ws_tx,
        send_rx,
        Arc::clone(&connection),
        Duration::from_secs(state.config.heartbeat_interval_secs),
        Duration::from_secs(state.config.heartbeat_timeout_secs),
    ));

    let shutdown = state.shutdown.token();
    let mut registered: Option<DeviceId> = None;

    loop {
        let msg = tokio::select! {
            msg = ws_rx.next() => msg,
            _ = shutdown.cancelled() => {
                debug!("session closing for shutdown");
                break;
            }
        };
        let Some(Ok(msg)) = msg else { break };

        // Accept either Text or UTF-8 Binary frames as envelope carriers.
        let text = match msg {
            Message::Text(ref t) => Some(t.to_string()),
            Message::Binary(ref data) => match std::str::from_utf8(data) {
                Ok(s) => Some(s.to_string()),
                Err(_) => {
                    counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "parse").increment(1);
                    debug!(len = data.len(), "discarding non-UTF8 binary frame");
                    None
                }
            },
            Message::Close(_) => {
                debug!("device sent close frame");
                break;
            }
            Message::Ping(_) | Message::Pong(_) => {
                connection.mark_alive();
                None
            }
        };

        let Some(text) = text else { continue };
        dispatch_frame(&text, &connection, &state.registry, &mut registered);
    }

    // Teardown. Only the identity's current owner deregisters it: a session
    // displaced by a takeover must not delete the new owner's entry or
    // announce a device that is still online as offline.
    if let Some(device_id) = registered {
        if state.registry.remove_if_owner(&device_id, &connection.id) {
            gauge!(DEVICES_REGISTERED).set(state.registry.len() as f64);
            presence::broadcast_offline(&state.registry, &device_id);
            info!(device_id = %device_id, "device offline");
        } else {
            debug!(device_id = %device_id, "identity already taken over, skipping offline broadcast");
        }
    }

    info!(dropped = connection.drop_count(), "device disconnected");
    counter!(WS_DISCONNECTIONS_TOTAL).increment(1);
    gauge!(WS_CONNECTIONS_ACTIVE).decrement(1.0);
    state.active_connections.fetch_sub(1, Ordering::Relaxed);
    histogram!(WS_CONNECTION_DURATION_SECONDS).record(connection.age().as_secs_f64());
    writer.abort();
}

/// Drain the send queue into the socket, interleaved with heartbeat Pings.
async fn write_loop(
    mut ws_tx: futures::stream::SplitSink<WebSocket, Message>,
    mut send_rx: mpsc::Receiver<Arc<String>>,
    connection: Arc<DeviceConnection>,
    ping_interval: Duration,
    pong_timeout: Duration,
) {
    let mut ping = tokio::time::interval(ping_interval);
    // Skip the immediate first tick
    let _ = ping.tick().await;

    loop {
        tokio::select! {
            frame = send_rx.recv() => {
                match frame {
                    Some(frame) => {
                        if ws_tx.send(Message::Text(frame.as_str().into())).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            _ = ping.tick() => {
                if !connection.check_alive() && connection.last_pong_elapsed() > pong_timeout {
                    warn!(conn_id = %connection.id, "device unresponsive for {pong_timeout:?}, closing");
                    break;
                }
                if ws_tx.send(Message::Ping(vec![].into())).await.is_err() {
                    break;
                }
            }
        }
    }

    let _ = ws_tx.send(Message::Close(None)).await;
}

/// Decode one inbound frame and apply it.
///
/// Unparseable frames, registrations without an identity, and unrecognized
/// envelope kinds are all discarded here without side effects; the
/// connection stays open regardless.
pub(crate) fn dispatch_frame(
    text: &str,
    connection: &Arc<DeviceConnection>,
    registry: &DeviceRegistry,
    registered: &mut Option<DeviceId>,
) {
    let envelope: Envelope = match serde_json::from_str(text) {
        Ok(envelope) => envelope,
        Err(e) => {
            counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "parse").increment(1);
            debug!(conn_id = %connection.id, error = %e, "discarding undecodable frame");
            return;
        }
    };

    let kind = envelope.kind();
    match envelope {
        Envelope::Register {
            device_id,
            device_name,
        } => {
            if device_id.is_empty() {
                counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "empty_device_id").increment(1);
                debug!(conn_id = %connection.id, "discarding register with empty deviceId");
                return;
            }
            register_device(connection, registry, registered, device_id, device_name);
        }

        // Routing does not require the sender to be registered.
        Envelope::PairRequest(addressed)
        | Envelope::PairAccept(addressed)
        | Envelope::WebrtcOffer(addressed)
        | Envelope::WebrtcAnswer(addressed)
        | Envelope::WebrtcIce(addressed) => {
            router::forward(registry, &addressed.to_device_id, kind, text);
        }

        Envelope::Presence { .. } | Envelope::Unknown => {
            counter!(ENVELOPES_DROPPED_TOTAL, "reason" => "ignored_type").increment(1);
            debug!(conn_id = %connection.id, kind, "ignoring envelope");
        }
    }
}

/// Claim `device_id` for this session.
///
/// Order matters: registry insertion, then the catch-up roster to the
/// joiner, then the online broadcast to everyone else, so the joiner has
/// the prior roster before peers start reacting to its arrival.
fn register_device(
    connection: &Arc<DeviceConnection>,
    registry: &DeviceRegistry,
    registered: &mut Option<DeviceId>,
    device_id: DeviceId,
    device_name: Option<String>,
) {
    // A session switching identities releases the one it holds first, so
    // the registry never carries a ghost entry for this socket.
    if let Some(prev) = registered.take() {
        if prev != device_id && registry.remove_if_owner(&prev, &connection.id) {
            presence::broadcast_offline(registry, &prev);
            info!(conn_id = %connection.id, device_id = %prev, "released previous identity");
        }
    }

    let displaced = registry.register(device_id.clone(), Arc::clone(connection), device_name);
    if let Some(displaced) = displaced {
        if displaced.connection_id != connection.id {
            info!(
                device_id = %device_id,
                old_conn = %displaced.connection_id,
                new_conn = %connection.id,
                "identity taken over by newer connection"
            );
        }
    }
    gauge!(DEVICES_REGISTERED).set(registry.len() as f64);

    presence::send_roster(registry, connection, &device_id);
    presence::broadcast_online(registry, &device_id);

    info!(conn_id = %connection.id, device_id = %device_id, "device registered");
    *registered = Some(device_id);
}
