use super::protocol as ws_protocol;
use super::session::{HEARTBEAT_INTERVAL, HEARTBEAT_TIMEOUT};
use super::WsState;
use crate::auth::{bearer_token_from_headers, AuthError, Identity};
use crate::error::{
    current_request_id, request_id_from_headers_or_generate, with_request_id_scope, ErrorCode,
    RelayError,
};
use crate::metrics;
use crate::timeline::{Caller, TimelineEngine};
use crate::validation::{self, MAX_WS_FRAME_BYTES};
use axum::{
    extract::{
        ws::{close_code, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use cowatch_common::protocol::ws::{ClientEvent, ServerEvent};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Default, Deserialize)]
pub struct UpgradeQuery {
    token: Option<String>,
}

/// Upgrades `GET /v1/ws`. A token in `?token=` or an `Authorization: Bearer`
/// header authenticates the connection up front; a bad one is rejected before
/// the upgrade.
pub async fn ws_upgrade(
    State(state): State<WsState>,
    Query(query): Query<UpgradeQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> Response {
    let token = query
        .token
        .filter(|token| !token.trim().is_empty())
        .or_else(|| bearer_token_from_headers(&headers).map(ToOwned::to_owned));

    let identity = match token {
        Some(token) => match resolve_identity(&state, &token).await {
            Ok(identity) => Some(identity),
            Err(error) => {
                warn!(error = %error, "websocket upgrade rejected");
                return error.into_response();
            }
        },
        None => None,
    };

    let request_id = request_id_from_headers_or_generate(&headers);
    // Transport cap. The per-frame limit is enforced on each text frame so
    // the close code stays under our control.
    ws.max_frame_size(MAX_WS_FRAME_BYTES * 2)
        .max_message_size(MAX_WS_FRAME_BYTES * 2)
        .on_upgrade(move |socket| async move {
            with_request_id_scope(request_id, handle_socket(state, socket, identity)).await;
        })
}

async fn resolve_identity(state: &WsState, token: &str) -> Result<Identity, RelayError> {
    let identity = tokio::time::timeout(state.identity_timeout, state.identity.authenticate(token))
        .await
        .map_err(|_| AuthError::Timeout)??;
    Ok(identity)
}

/// What the socket loop does after an inbound event.
enum Reply {
    Nothing,
    Event(ServerEvent),
}

async fn handle_socket(state: WsState, mut socket: WebSocket, identity: Option<Identity>) {
    let request_id = current_request_id().unwrap_or_else(|| "unknown".to_string());
    let connection_id = Uuid::new_v4();
    let connections = state.engine.router().connections().clone();

    let (outbound_sender, mut outbound_receiver) = mpsc::unbounded_channel::<ServerEvent>();
    connections.register(connection_id, outbound_sender).await;
    metrics::connection_opened();
    info!(connection_id = %connection_id, request_id = %request_id, "websocket connected");

    let mut identity = identity;
    if let Some(identity) = &identity {
        let user_id = identity.user_id;
        mark_online(&state, connection_id, user_id).await;
        if ws_protocol::send_event(&mut socket, &ServerEvent::Authenticated { user_id })
            .await
            .is_err()
        {
            finish(&state, connection_id, Some(identity)).await;
            return;
        }
    }

    let auth_deadline = tokio::time::sleep(state.auth_timeout);
    tokio::pin!(auth_deadline);

    let mut heartbeat_interval = tokio::time::interval(HEARTBEAT_INTERVAL);
    heartbeat_interval.reset();
    let mut last_pong = Instant::now();

    loop {
        tokio::select! {
            _ = heartbeat_interval.tick() => {
                if last_pong.elapsed() > HEARTBEAT_TIMEOUT {
                    warn!(connection_id = %connection_id, request_id = %request_id, "heartbeat timeout, disconnecting");
                    break;
                }
                if socket.send(Message::Ping(Vec::new().into())).await.is_err() {
                    break;
                }
            }
            () = &mut auth_deadline, if identity.is_none() => {
                warn!(connection_id = %connection_id, "no startup before the auth deadline");
                let error = RelayError::new(ErrorCode::AuthRequired, "authentication timed out");
                fail_closed(&mut socket, &mut outbound_receiver, &error, close_code::POLICY).await;
                break;
            }
            maybe_outbound = outbound_receiver.recv() => {
                match maybe_outbound {
                    Some(event) => {
                        if ws_protocol::send_event(&mut socket, &event).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            maybe_message = socket.recv() => {
                let Some(message) = maybe_message else {
                    break;
                };

                match message {
                    Ok(Message::Text(raw_message)) => {
                        if validation::check_ws_frame_size(raw_message.as_str()).is_err() {
                            metrics::record_ws_event("oversized", true, 0);
                            ws_protocol::close_frame_too_large(&mut socket).await;
                            break;
                        }

                        let started_at = Instant::now();
                        let event = match validation::decode_client_event(raw_message.as_str()) {
                            Ok(event) => event,
                            Err(error) => {
                                metrics::record_ws_event("invalid", true, elapsed_ms(started_at));
                                if ws_protocol::send_event(&mut socket, &error.to_event()).await.is_err() {
                                    break;
                                }
                                continue;
                            }
                        };

                        let event_name = event.name();
                        let is_startup = matches!(event, ClientEvent::Startup { .. });
                        let outcome = dispatch(&state, connection_id, &mut identity, event).await;
                        metrics::record_ws_event(event_name, outcome.is_err(), elapsed_ms(started_at));

                        if flush_outbound(&mut socket, &mut outbound_receiver).await.is_err() {
                            break;
                        }
                        match outcome {
                            Ok(Reply::Event(reply)) => {
                                if ws_protocol::send_event(&mut socket, &reply).await.is_err() {
                                    break;
                                }
                            }
                            Ok(Reply::Nothing) => {}
                            Err(error) if error.is_fatal() || is_startup => {
                                warn!(
                                    connection_id = %connection_id,
                                    request_id = %request_id,
                                    event = event_name,
                                    code = error.code().as_str(),
                                    "closing connection after fatal error"
                                );
                                let close = if error.code() == ErrorCode::InternalError {
                                    close_code::ERROR
                                } else {
                                    close_code::POLICY
                                };
                                fail_closed(&mut socket, &mut outbound_receiver, &error, close).await;
                                break;
                            }
                            Err(error) => {
                                debug!(
                                    connection_id = %connection_id,
                                    event = event_name,
                                    code = error.code().as_str(),
                                    "event rejected"
                                );
                                if ws_protocol::send_event(&mut socket, &error.to_event()).await.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    Ok(Message::Binary(_)) => {
                        let error = RelayError::new(ErrorCode::ValidationFailed, "binary frames are not supported");
                        if ws_protocol::send_event(&mut socket, &error.to_event()).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Ping(payload)) => {
                        if socket.send(Message::Pong(payload)).await.is_err() {
                            break;
                        }
                    }
                    Ok(Message::Pong(_)) => {
                        last_pong = Instant::now();
                    }
                    Ok(Message::Close(_)) => break,
                    Err(error) => {
                        if ws_protocol::is_frame_size_violation(&error) {
                            ws_protocol::close_frame_too_large(&mut socket).await;
                        }
                        break;
                    }
                }
            }
        }
    }

    finish(&state, connection_id, identity.as_ref()).await;
}

async fn dispatch(
    state: &WsState,
    connection_id: Uuid,
    identity: &mut Option<Identity>,
    event: ClientEvent,
) -> Result<Reply, RelayError> {
    match event {
        ClientEvent::Ping => Ok(Reply::Event(ServerEvent::Pong)),
        ClientEvent::Startup { auth_token } => {
            if let Some(existing) = identity.as_ref() {
                return Ok(Reply::Event(ServerEvent::Authenticated { user_id: existing.user_id }));
            }

            let resolved = resolve_identity(state, &auth_token).await?;
            let user_id = resolved.user_id;
            mark_online(state, connection_id, user_id).await;
            *identity = Some(resolved);
            Ok(Reply::Event(ServerEvent::Authenticated { user_id }))
        }
        event => {
            let Some(identity) = identity.as_ref() else {
                return Err(RelayError::new(
                    ErrorCode::AuthRequired,
                    "send startup before timeline events",
                ));
            };
            let caller = Caller { connection_id, identity: identity.clone() };
            route(&state.engine, &caller, event).await.map(|()| Reply::Nothing)
        }
    }
}

async fn route(engine: &TimelineEngine, caller: &Caller, event: ClientEvent) -> Result<(), RelayError> {
    match event {
        ClientEvent::TimelineConnect { video_id } => engine.connect(caller, video_id).await,
        ClientEvent::TimelineReconnect { video_id, group_id } => {
            engine.reconnect(caller, video_id, group_id).await
        }
        ClientEvent::TimelineJoinUser { target_user_id } => {
            engine.join_user(caller, target_user_id).await
        }
        ClientEvent::TimelineJoinGroup { group_id } => engine.join_group(caller, group_id).await,
        ClientEvent::TimelineLeaveGroup => engine.leave_group(caller).await,
        ClientEvent::TimelineLeave => engine.leave_timeline(caller).await,
        ClientEvent::TimelineUpdateTimecode { timecode, server_timestamp } => {
            engine.update_timecode(caller, timecode, server_timestamp).await
        }
        ClientEvent::TimelineSetPause { timecode, server_timestamp } => {
            engine.set_pause(caller, timecode, server_timestamp).await
        }
        ClientEvent::TimelineSetUnpause { timecode, server_timestamp } => {
            engine.set_unpause(caller, timecode, server_timestamp).await
        }
        ClientEvent::TimelineSetMicEnabled { mic_enabled } => {
            engine.set_mic_enabled(caller, mic_enabled).await
        }
        ClientEvent::TimelineSendChatMessage { message } => {
            engine.send_chat_message(caller, &message).await
        }
        ClientEvent::TimelineSetVideoEnded { video_duration } => {
            engine.set_video_ended(caller, video_duration).await
        }
        ClientEvent::Startup { .. } | ClientEvent::Ping => Ok(()),
    }
}

async fn mark_online(state: &WsState, connection_id: Uuid, user_id: Uuid) {
    state.engine.router().connections().mark_authenticated(connection_id, user_id).await;
    info!(connection_id = %connection_id, user_id = %user_id, "websocket authenticated");
    state.engine.presence().user_online(user_id).await;
}

/// Flushes queued events, then sends the fatal event and closes.
async fn fail_closed(
    socket: &mut WebSocket,
    outbound_receiver: &mut mpsc::UnboundedReceiver<ServerEvent>,
    error: &RelayError,
    code: u16,
) {
    if flush_outbound(socket, outbound_receiver).await.is_err() {
        return;
    }

    let fatal = ServerEvent::FatalError {
        code: error.code().as_str().to_string(),
        message: error.message().to_string(),
    };
    if ws_protocol::send_event(socket, &fatal).await.is_ok() {
        ws_protocol::close_with(socket, code, error.code().as_str()).await;
    }
}

/// Sends everything already queued for this connection so a direct reply
/// never overtakes the broadcasts its event produced.
async fn flush_outbound(
    socket: &mut WebSocket,
    outbound_receiver: &mut mpsc::UnboundedReceiver<ServerEvent>,
) -> Result<(), ()> {
    while let Ok(event) = outbound_receiver.try_recv() {
        ws_protocol::send_event(socket, &event).await?;
    }
    Ok(())
}

async fn finish(state: &WsState, connection_id: Uuid, identity: Option<&Identity>) {
    if let Some(identity) = identity {
        let caller = Caller { connection_id, identity: identity.clone() };
        if let Err(error) = state.engine.disconnect(&caller).await {
            warn!(connection_id = %connection_id, user_id = %caller.user_id(), code = error.code().as_str(), "disconnect cleanup failed");
        }
    }

    let rooms = state.engine.router().connections().unregister(connection_id).await;
    metrics::connection_closed();
    info!(connection_id = %connection_id, leftover_rooms = rooms.len(), "websocket disconnected");
}

fn elapsed_ms(started_at: Instant) -> u64 {
    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX)
}
