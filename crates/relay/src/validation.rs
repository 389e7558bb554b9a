// Boundary validation for inbound timeline events.
//
// - Frame size limit for WebSocket text frames.
// - Decode failures mapped to VALIDATION_FAILED with a `kind` detail.
// - Field-level checks (timecodes, durations, chat text).

use cowatch_common::protocol::ws::{ClientEvent, MAX_CHAT_MESSAGE_CHARS};
use serde_json::{error::Category, json};

use crate::error::{ErrorCode, RelayError};

/// Maximum WebSocket frame payload in bytes (64 KiB).
pub const MAX_WS_FRAME_BYTES: usize = 64 * 1024;

/// Maximum HTTP request body in bytes.
pub const MAX_REST_BODY_BYTES: usize = 64 * 1024;

/// Check a WebSocket text frame against the size limit.
/// Returns a reason suitable for a close frame.
pub fn check_ws_frame_size(payload: &str) -> Result<(), String> {
    if payload.len() > MAX_WS_FRAME_BYTES {
        Err(format!(
            "frame size {} bytes exceeds limit of {} bytes",
            payload.len(),
            MAX_WS_FRAME_BYTES
        ))
    } else {
        Ok(())
    }
}

/// Parses a client frame, mapping every failure onto `VALIDATION_FAILED`.
pub fn decode_client_event(raw: &str) -> Result<ClientEvent, RelayError> {
    serde_json::from_str::<ClientEvent>(raw).map_err(|error| {
        let kind = match error.classify() {
            Category::Syntax => "syntax_error",
            Category::Eof => "truncated",
            Category::Data => "data_error",
            Category::Io => "io_error",
        };
        RelayError::new(ErrorCode::ValidationFailed, format!("invalid event payload: {error}"))
            .with_details(json!({ "kind": kind }))
    })
}

pub fn validate_timecode(timecode: i64) -> Result<i64, RelayError> {
    if timecode < 0 {
        return Err(field_error("timecode", "timecode must be >= 0"));
    }
    Ok(timecode)
}

pub fn validate_video_duration(video_duration: i64) -> Result<i64, RelayError> {
    if video_duration < 0 {
        return Err(field_error("video_duration", "video_duration must be >= 0"));
    }
    Ok(video_duration)
}

/// Trims a chat message and enforces the non-empty and length rules.
pub fn normalize_chat_message(message: &str) -> Result<String, RelayError> {
    let trimmed = message.trim();
    if trimmed.is_empty() {
        return Err(field_error("message", "message must not be empty"));
    }
    let chars = trimmed.chars().count();
    if chars > MAX_CHAT_MESSAGE_CHARS {
        return Err(RelayError::new(
            ErrorCode::ValidationFailed,
            format!("message must be at most {MAX_CHAT_MESSAGE_CHARS} characters"),
        )
        .with_details(json!({ "field": "message", "length": chars })));
    }
    Ok(trimmed.to_string())
}

fn field_error(field: &str, message: &str) -> RelayError {
    RelayError::new(ErrorCode::ValidationFailed, message).with_details(json!({ "field": field }))
}
