//! WebSocket upgrade handler and per-session pump

use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
};
use futures::{SinkExt, StreamExt};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::app::AppState;
use crate::game::{ConnId, EngineCommand, InputCommand, RoomError};
use crate::util::rate_limit::SessionRateLimiter;
use crate::util::time::unix_millis;
use crate::ws::conn::RTT_MAX_MS;
use crate::ws::protocol::{frame, ClientMsg, RoomInfo, ServerMsg};

/// Outbound channel depth per connection; overflow drops frames
/// instead of stalling the simulation
const OUTBOUND_CAPACITY: usize = 64;

/// WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

/// Handle the upgraded WebSocket connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let conn_id: ConnId = Uuid::new_v4();
    info!(conn_id = %conn_id, "new WebSocket connection");

    let (mut ws_sink, mut ws_stream) = socket.split();

    let (out_tx, mut out_rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);
    state.connections.insert(conn_id, out_tx);

    if let Some(welcome) = frame(&ServerMsg::Welcome {
        conn_id,
        server_time: unix_millis(),
    }) {
        state.connections.send(&conn_id, welcome);
    }

    // Writer task: per-connection channel -> WebSocket.
    let writer_conn_id = conn_id;
    let writer_handle = tokio::spawn(async move {
        while let Some(json) = out_rx.recv().await {
            if let Err(e) = ws_sink.send(Message::Text(json)).await {
                debug!(conn_id = %writer_conn_id, error = %e, "WebSocket send failed");
                break;
            }
        }
    });

    // Reader loop: WebSocket -> engine.
    let rate_limiter = SessionRateLimiter::new();
    while let Some(result) = ws_stream.next().await {
        match result {
            Ok(Message::Text(text)) => {
                if !rate_limiter.check_message() {
                    warn!(conn_id = %conn_id, "transport rate limit hit, message discarded");
                    continue;
                }
                match serde_json::from_str::<ClientMsg>(&text) {
                    Ok(msg) => {
                        if !dispatch(conn_id, msg, &state).await {
                            break;
                        }
                    }
                    Err(e) => {
                        warn!(conn_id = %conn_id, error = %e, "failed to parse client message");
                    }
                }
            }
            Ok(Message::Binary(_)) => {
                warn!(conn_id = %conn_id, "received binary message, ignoring");
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                info!(conn_id = %conn_id, "client initiated close");
                break;
            }
            Err(e) => {
                debug!(conn_id = %conn_id, error = %e, "WebSocket error");
                break;
            }
        }
    }

    // Remove from the table first so pruning sees this connection as
    // gone even if the engine command lags.
    state.connections.remove(&conn_id);
    let _ = state.engine.send(EngineCommand::Disconnect { conn: conn_id }).await;
    writer_handle.abort();

    info!(conn_id = %conn_id, "WebSocket connection closed");
}

/// Route one parsed message. Returns false when the engine is gone and
/// the session should end.
async fn dispatch(conn_id: ConnId, msg: ClientMsg, state: &AppState) -> bool {
    match msg {
        ClientMsg::Input {
            seq,
            move_x,
            move_z,
            yaw,
            pitch,
            sprint,
            jump,
        } => {
            let cmd = InputCommand {
                seq,
                move_x,
                move_z,
                yaw,
                pitch,
                sprint,
                jump,
                received_at: unix_millis(),
            };
            state.engine.send(EngineCommand::Input { conn: conn_id, cmd }).await
        }

        // Pure echo, never rate limited beyond the transport cap and
        // never routed through the engine.
        ClientMsg::Ping { id, t } => {
            if let Some(pong) = frame(&ServerMsg::Pong { id, t }) {
                state.connections.send(&conn_id, pong);
            }
            true
        }

        ClientMsg::Rtt { rtt_ms } => {
            if rtt_ms.is_finite() && (0.0..=RTT_MAX_MS).contains(&rtt_ms) {
                state.connections.set_rtt(&conn_id, rtt_ms);
            } else {
                debug!(conn_id = %conn_id, rtt_ms, "ignoring out-of-range rtt report");
            }
            true
        }

        ClientMsg::QuickJoin { name } => {
            room_op(conn_id, state, |ack| EngineCommand::QuickJoin {
                conn: conn_id,
                name,
                ack,
            })
            .await
        }

        ClientMsg::CreateRoom { name } => {
            room_op(conn_id, state, |ack| EngineCommand::CreateRoom {
                conn: conn_id,
                name,
                ack,
            })
            .await
        }

        ClientMsg::JoinRoom { code, name } => {
            room_op(conn_id, state, |ack| EngineCommand::JoinRoom {
                conn: conn_id,
                code,
                name,
                ack,
            })
            .await
        }

        ClientMsg::LeaveRoom => state.engine.send(EngineCommand::LeaveRoom { conn: conn_id }).await,

        ClientMsg::ClaimHost => {
            room_op(conn_id, state, |ack| EngineCommand::ClaimHost {
                conn: conn_id,
                ack,
            })
            .await
        }
    }
}

/// Run a room operation through the engine and relay its ack to the
/// client as a `room_ack`
async fn room_op<F>(conn_id: ConnId, state: &AppState, make_cmd: F) -> bool
where
    F: FnOnce(oneshot::Sender<Result<RoomInfo, RoomError>>) -> EngineCommand,
{
    let (ack_tx, ack_rx) = oneshot::channel();
    if !state.engine.send(make_cmd(ack_tx)).await {
        return false;
    }

    let ack = match ack_rx.await {
        Ok(Ok(room)) => ServerMsg::RoomAck {
            ok: true,
            room: Some(room),
            error: None,
        },
        Ok(Err(e)) => ServerMsg::RoomAck {
            ok: false,
            room: None,
            error: Some(e.code().to_string()),
        },
        Err(_) => return false, // engine dropped the ack; shutting down
    };

    if let Some(json) = frame(&ack) {
        state.connections.send(&conn_id, json);
    }
    true
}
