use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use cowatch_common::protocol::ws::ServerEvent;

use crate::validation::MAX_WS_FRAME_BYTES;

pub fn encode_event(event: &ServerEvent) -> Result<String, serde_json::Error> {
    serde_json::to_string(event)
}

pub async fn send_event(socket: &mut WebSocket, event: &ServerEvent) -> Result<(), ()> {
    let encoded = encode_event(event).map_err(|_| ())?;
    socket.send(Message::Text(encoded.into())).await.map_err(|_| ())
}

pub async fn close_with(socket: &mut WebSocket, code: u16, reason: &str) {
    let _ = socket
        .send(Message::Close(Some(CloseFrame { code, reason: reason.to_string().into() })))
        .await;
}

pub async fn close_frame_too_large(socket: &mut WebSocket) {
    close_with(
        socket,
        close_code::SIZE,
        &format!("websocket frame exceeds maximum size of {MAX_WS_FRAME_BYTES} bytes"),
    )
    .await;
}

pub fn is_frame_size_violation(error: &axum::Error) -> bool {
    let message = error.to_string().to_ascii_lowercase();
    message.contains("message too long")
        || message.contains("frame too long")
        || message.contains("too large")
        || message.contains("too big")
        || message.contains("size limit")
        || message.contains("space limit")
}
