use std::net::SocketAddr;
use std::time::{Duration, Instant};

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;
use bken_presence::{ChannelId, PresenceError, SessionId};
use bken_wire::{parse_voice_datagram, Channel as WireChannel, ControlEnvelope};
use bytes::Bytes;
use futures_util::{Sink, SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{info, warn};

use crate::state::AppState;
use crate::voice_relay::VoiceSeat;

const HELLO_TIMEOUT: Duration = Duration::from_secs(10);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);
const VOICE_QUEUE_SIZE: usize = 64;

pub async fn ws_upgrade(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, remote, state))
}

async fn handle_socket(socket: WebSocket, remote: SocketAddr, state: AppState) {
    state.metrics.gateway.conn_accepted();
    let (mut sink, mut stream) = socket.split();
    let hello_started = Instant::now();

    let hello = match timeout(HELLO_TIMEOUT, stream.next()).await {
        Ok(Some(Ok(Message::Text(line)))) => ControlEnvelope::from_line(line.trim_end().as_bytes()),
        _ => {
            state.metrics.gateway.hello_rejected();
            return;
        }
    };
    let username = match hello {
        Ok(env) if env.kind == "hello" => match env.username {
            Some(u) if !u.trim().is_empty() => u,
            _ => {
                state.metrics.gateway.hello_rejected();
                let _ = send_line(&mut sink, &ControlEnvelope::error("username is required")).await;
                return;
            }
        },
        _ => {
            state.metrics.gateway.hello_rejected();
            let _ = send_line(&mut sink, &ControlEnvelope::error("first message must be hello")).await;
            return;
        }
    };

    let (session_id, mut outbound_rx, users) = match state.presence.add(username.clone()) {
        Ok(v) => v,
        Err(e) => {
            let _ = send_line(&mut sink, &ControlEnvelope::error(e.to_string())).await;
            return;
        }
    };
    state.metrics.gateway.hello_seconds(hello_started.elapsed().as_secs_f64());
    state.metrics.presence.op_total("add");
    info!(session = %session_id, %username, %remote, "session established");

    let new_user = users.iter().find(|u| u.id == session_id.to_string()).cloned();

    state
        .presence
        .send_to(
            &session_id,
            ControlEnvelope { self_id: Some(session_id.to_string()), users: Some(users), ..ControlEnvelope::new("snapshot") },
        )
        .await;
    state
        .presence
        .broadcast_except(&session_id, ControlEnvelope { user: new_user, ..ControlEnvelope::new("user_joined") })
        .await;

    let (voice_tx, mut voice_rx) = mpsc::channel::<Bytes>(VOICE_QUEUE_SIZE);

    // Single writer task: it alone owns the socket sink, draining both the
    // control-envelope queue and the voice-relay queue into it.
    let writer = tokio::spawn(async move {
        loop {
            tokio::select! {
                msg = outbound_rx.recv() => {
                    let Some(env) = msg else { break };
                    if send_line(&mut sink, &env).await.is_err() {
                        break;
                    }
                }
                frame = voice_rx.recv() => {
                    let Some(bytes) = frame else { break };
                    if timeout(WRITE_TIMEOUT, sink.send(Message::Binary(bytes.to_vec()))).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    let mut voice_seat: Option<VoiceSeat> = None;
    loop {
        match stream.next().await {
            Some(Ok(Message::Text(line))) => {
                let env = match ControlEnvelope::from_line(line.trim_end().as_bytes()) {
                    Ok(e) => e,
                    Err(e) => {
                        state.presence.send_to(&session_id, ControlEnvelope::error(e.to_string())).await;
                        continue;
                    }
                };
                dispatch(&state, &session_id, env, &mut voice_seat, &voice_tx).await;
            }
            Some(Ok(Message::Binary(data))) => {
                handle_voice_frame(&state, &voice_seat, &data).await;
            }
            Some(Ok(Message::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!(session = %session_id, error = %e, "read error");
                break;
            }
        }
    }

    voice_seat.take();
    let departures = state.presence.remove(&session_id);
    state.metrics.presence.op_total("remove");
    for (server_id, user) in departures {
        state
            .presence
            .broadcast_to_server(
                &server_id,
                ControlEnvelope { user: Some(user), ..ControlEnvelope::new("user_left") },
            )
            .await;
    }
    state.metrics.gateway.conn_closed();
    writer.abort();
}

async fn handle_voice_frame(state: &AppState, voice_seat: &Option<VoiceSeat>, data: &[u8]) {
    let Some(seat) = voice_seat else { return };
    match parse_voice_datagram(data) {
        Ok((_claimed_sender, seq, opus)) => {
            let channel_id = seat.channel_id();
            state.voice.relay(channel_id, seat.sender_id, seq, opus, &state.metrics.voice).await;
        }
        Err(_) => state.metrics.voice.drop_reason("invalid"),
    }
}

async fn send_line(
    sink: &mut (impl Sink<Message, Error = axum::Error> + Unpin),
    env: &ControlEnvelope,
) -> Result<(), axum::Error> {
    let bytes = env.to_line().unwrap_or_else(|_| b"{\"type\":\"error\"}\n".to_vec());
    let mut text = String::from_utf8_lossy(&bytes).into_owned();
    text.pop(); // Message::Text already carries its own framing boundary
    match timeout(WRITE_TIMEOUT, sink.send(Message::Text(text))).await {
        Ok(inner) => inner,
        Err(_) => Err(axum::Error::new(std::io::Error::new(std::io::ErrorKind::TimedOut, "write timed out"))),
    }
}

async fn dispatch(
    state: &AppState,
    session_id: &SessionId,
    env: ControlEnvelope,
    voice_seat: &mut Option<VoiceSeat>,
    voice_tx: &mpsc::Sender<Bytes>,
) {
    state.metrics.gateway.control_msg_rx(kind_label(&env.kind));
    match env.kind.as_str() {
        "ping" => {
            state.presence.send_to(session_id, ControlEnvelope { ts: env.ts, ..ControlEnvelope::new("pong") }).await;
        }
        "connect_server" => on_connect_server(state, session_id, env).await,
        "disconnect_server" => on_disconnect_server(state, session_id, env, voice_seat).await,
        "join_voice" => on_join_voice(state, session_id, env, voice_seat, voice_tx).await,
        "disconnect_voice" | "DisconnectVoice" => on_disconnect_voice(state, session_id, voice_seat).await,
        "set_voice_state" => on_set_voice_state(state, session_id, env).await,
        "send_text" => on_send_text(state, session_id, env).await,
        "create_channel" => on_create_channel(state, session_id, env).await,
        "rename_channel" => on_rename_channel(state, session_id, env).await,
        "delete_channel" => on_delete_channel(state, session_id, env).await,
        "get_channels" => on_get_channels(state, session_id, env).await,
        "get_messages" => {
            state.presence.send_to(session_id, ControlEnvelope::new("message_history")).await;
        }
        "get_server_info" => {
            state.presence.send_to(session_id, ControlEnvelope::new("server_info")).await;
        }
        "add_reaction" | "remove_reaction" => {
            // Cosmetic; recognized by shape only, no business logic in the hard core.
        }
        _ => {
            state.presence.send_to(session_id, ControlEnvelope::error(format!("unknown type: {}", env.kind))).await;
        }
    }
}

fn kind_label(kind: &str) -> &'static str {
    match kind {
        "ping" => "ping",
        "connect_server" => "connect_server",
        "disconnect_server" => "disconnect_server",
        "join_voice" => "join_voice",
        "disconnect_voice" | "DisconnectVoice" => "disconnect_voice",
        "set_voice_state" => "set_voice_state",
        "send_text" => "send_text",
        "create_channel" => "create_channel",
        "rename_channel" => "rename_channel",
        "delete_channel" => "delete_channel",
        "get_channels" => "get_channels",
        "get_messages" => "get_messages",
        "get_server_info" => "get_server_info",
        "add_reaction" => "add_reaction",
        "remove_reaction" => "remove_reaction",
        _ => "unknown",
    }
}

async fn reply_error(state: &AppState, session_id: &SessionId, e: impl std::fmt::Display) {
    state.presence.send_to(session_id, ControlEnvelope::error(e.to_string())).await;
}

async fn on_connect_server(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    let Some(server_id) = env.server_id else {
        return reply_error(state, session_id, PresenceError::EmptyServerId).await;
    };
    if let Err(e) = state.presence.connect_server(session_id, &server_id) {
        state.metrics.presence.op_error_total("connect_server");
        return reply_error(state, session_id, e).await;
    }
    state.metrics.presence.op_total("connect_server");
    let channels: Vec<WireChannel> = state.presence.channels(&server_id);
    state
        .presence
        .send_to(
            session_id,
            ControlEnvelope { server_id: Some(server_id.clone()), channels: Some(channels), ..ControlEnvelope::new("channel_list") },
        )
        .await;
    let user = state.presence.user_snapshot(session_id);
    state
        .presence
        .broadcast_to_server(&server_id, ControlEnvelope { user, ..ControlEnvelope::new("user_joined") })
        .await;
}

async fn on_disconnect_server(state: &AppState, session_id: &SessionId, env: ControlEnvelope, voice_seat: &mut Option<VoiceSeat>) {
    let Some(server_id) = env.server_id else {
        return reply_error(state, session_id, PresenceError::EmptyServerId).await;
    };
    let leaving_voice = match state.presence.disconnect_server(session_id, &server_id) {
        Ok(v) => v,
        Err(e) => {
            state.metrics.presence.op_error_total("disconnect_server");
            return reply_error(state, session_id, e).await;
        }
    };
    state.metrics.presence.op_total("disconnect_server");
    if leaving_voice {
        // The seat belonged to the server just left; drop it so the relay
        // stops treating this session as present in that channel.
        voice_seat.take();
    }
    let user = state.presence.user_snapshot(session_id);
    state
        .presence
        .broadcast_to_server(&server_id, ControlEnvelope { user, voice: None, ..ControlEnvelope::new("user_left") })
        .await;
}

async fn on_join_voice(
    state: &AppState,
    session_id: &SessionId,
    env: ControlEnvelope,
    voice_seat: &mut Option<VoiceSeat>,
    voice_tx: &mpsc::Sender<Bytes>,
) {
    let (Some(server_id), Some(channel_raw)) = (env.server_id.clone(), env.channel_id.clone()) else {
        return reply_error(state, session_id, "join_voice requires server_id and channel_id").await;
    };
    let Ok(raw) = channel_raw.parse::<i64>() else {
        return reply_error(state, session_id, "channel_id must be numeric").await;
    };
    let channel_id = ChannelId(raw);
    let previous = match state.presence.join_voice(session_id, &server_id, channel_id) {
        Ok(p) => p,
        Err(e) => {
            state.metrics.presence.op_error_total("join_voice");
            return reply_error(state, session_id, e).await;
        }
    };
    state.metrics.presence.op_total("join_voice");
    *voice_seat = Some(state.voice.join(channel_id, voice_tx.clone()));

    if let Some(prev) = previous.filter(|p| p.server_id != server_id) {
        // The prior binding was on a different server; its subscribers need
        // to see the voice state cleared before the new server hears of it.
        let mut released_user = state.presence.user_snapshot(session_id);
        if let Some(u) = released_user.as_mut() {
            u.voice = None;
        }
        state
            .presence
            .broadcast_to_server(&prev.server_id, ControlEnvelope { user: released_user, voice: None, ..ControlEnvelope::new("user_state") })
            .await;
    }

    let user = state.presence.user_snapshot(session_id);
    let voice = user.as_ref().and_then(|u| u.voice.clone());
    state
        .presence
        .broadcast_to_server(&server_id, ControlEnvelope { user, voice, channel_id: Some(channel_id.to_string()), ..ControlEnvelope::new("user_state") })
        .await;
}

async fn on_disconnect_voice(state: &AppState, session_id: &SessionId, voice_seat: &mut Option<VoiceSeat>) {
    match state.presence.disconnect_voice(session_id) {
        Ok(Some(binding)) => {
            state.metrics.presence.op_total("disconnect_voice");
            voice_seat.take();
            let user = state.presence.user_snapshot(session_id);
            state
                .presence
                .broadcast_to_server(&binding.server_id, ControlEnvelope { user, voice: None, ..ControlEnvelope::new("user_state") })
                .await;
        }
        Ok(None) => {}
        Err(e) => {
            state.metrics.presence.op_error_total("disconnect_voice");
            reply_error(state, session_id, e).await;
        }
    }
}

async fn on_set_voice_state(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    if let Err(e) = state.presence.set_voice_flags(session_id, env.muted, env.deafened) {
        state.metrics.presence.op_error_total("set_voice_state");
        return reply_error(state, session_id, e).await;
    }
    state.metrics.presence.op_total("set_voice_state");
    if let Ok(server_id) = state.presence.user_server(session_id) {
        let user = state.presence.user_snapshot(session_id);
        let voice = user.as_ref().and_then(|u| u.voice.clone());
        state
            .presence
            .broadcast_to_server(&server_id, ControlEnvelope { user, voice, muted: env.muted, deafened: env.deafened, ..ControlEnvelope::new("user_state") })
            .await;
    }
}

async fn on_send_text(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    let (Some(server_id), Some(channel_id)) = (env.server_id.clone(), env.channel_id.clone()) else {
        return reply_error(state, session_id, "send_text requires server_id and channel_id").await;
    };
    let has_payload = env.message.as_deref().is_some_and(|m| !m.trim().is_empty()) || env.file_id.as_deref().is_some_and(|f| !f.is_empty());
    if !has_payload {
        return reply_error(state, session_id, "send_text requires message or file_id").await;
    }
    if !state.presence.can_send_text(session_id, &server_id) {
        state.metrics.presence.op_error_total("send_text");
        return reply_error(state, session_id, PresenceError::NotConnectedToServer(server_id)).await;
    }
    state.metrics.presence.op_total("send_text");
    let ts = now_ms();
    state
        .presence
        .broadcast_to_server(
            &server_id,
            ControlEnvelope {
                server_id: Some(server_id),
                channel_id: Some(channel_id),
                self_id: Some(session_id.to_string()),
                message: env.message,
                file_id: env.file_id,
                file_name: env.file_name,
                file_size: env.file_size,
                ts: Some(ts),
                msg_id: Some(0),
                ..ControlEnvelope::new("text_message")
            },
        )
        .await;
}

async fn on_create_channel(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    let server_id = match state.presence.user_server(session_id) {
        Ok(s) => s,
        Err(e) => return reply_error(state, session_id, e).await,
    };
    let Some(name) = env.message else {
        return reply_error(state, session_id, "create_channel requires a name").await;
    };
    if let Err(e) = state.presence.create_channel(&server_id, name) {
        state.metrics.presence.op_error_total("create_channel");
        return reply_error(state, session_id, e).await;
    }
    state.metrics.presence.op_total("create_channel");
    broadcast_channel_list(state, &server_id).await;
}

async fn on_rename_channel(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    let server_id = match state.presence.user_server(session_id) {
        Ok(s) => s,
        Err(e) => return reply_error(state, session_id, e).await,
    };
    let (Some(channel_raw), Some(name)) = (env.channel_id.clone(), env.message.clone()) else {
        return reply_error(state, session_id, "rename_channel requires channel_id and name").await;
    };
    let Ok(raw) = channel_raw.parse::<i64>() else {
        return reply_error(state, session_id, "channel_id must be numeric").await;
    };
    if let Err(e) = state.presence.rename_channel(&server_id, ChannelId(raw), name) {
        state.metrics.presence.op_error_total("rename_channel");
        return reply_error(state, session_id, e).await;
    }
    state.metrics.presence.op_total("rename_channel");
    broadcast_channel_list(state, &server_id).await;
}

async fn on_delete_channel(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    let server_id = match state.presence.user_server(session_id) {
        Ok(s) => s,
        Err(e) => return reply_error(state, session_id, e).await,
    };
    let Some(channel_raw) = env.channel_id.clone() else {
        return reply_error(state, session_id, "delete_channel requires channel_id").await;
    };
    let Ok(raw) = channel_raw.parse::<i64>() else {
        return reply_error(state, session_id, "channel_id must be numeric").await;
    };
    let evicted = match state.presence.delete_channel(&server_id, ChannelId(raw)) {
        Ok(v) => v,
        Err(e) => {
            state.metrics.presence.op_error_total("delete_channel");
            return reply_error(state, session_id, e).await;
        }
    };
    state.metrics.presence.op_total("delete_channel");
    for victim in evicted {
        let user = state.presence.user_snapshot(&victim);
        state.presence.send_to(&victim, ControlEnvelope { user, voice: None, ..ControlEnvelope::new("user_state") }).await;
    }
    broadcast_channel_list(state, &server_id).await;
}

async fn on_get_channels(state: &AppState, session_id: &SessionId, env: ControlEnvelope) {
    let server_id = match env.server_id {
        Some(s) => s,
        None => match state.presence.user_server(session_id) {
            Ok(s) => s,
            Err(e) => return reply_error(state, session_id, e).await,
        },
    };
    let channels: Vec<WireChannel> = state.presence.channels(&server_id);
    state
        .presence
        .send_to(session_id, ControlEnvelope { server_id: Some(server_id), channels: Some(channels), ..ControlEnvelope::new("channel_list") })
        .await;
}

async fn broadcast_channel_list(state: &AppState, server_id: &str) {
    let channels: Vec<WireChannel> = state.presence.channels(server_id);
    state
        .presence
        .broadcast_to_server(
            server_id,
            ControlEnvelope { server_id: Some(server_id.to_string()), channels: Some(channels), ..ControlEnvelope::new("channel_list") },
        )
        .await;
}

fn now_ms() -> i64 {
    std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH).unwrap_or_default().as_millis() as i64
}
