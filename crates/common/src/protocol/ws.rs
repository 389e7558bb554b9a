// WebSocket event types for the cowatch timeline protocol.
//
// Every frame is a JSON text message of the form
// `{"event": "<name>", "data": {...}}`. Events without a payload omit `data`.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::types::{ChatMessageView, GroupView, UserAvatar, UserView};

/// Longest accepted chat message, in characters, after trimming.
pub const MAX_CHAT_MESSAGE_CHARS: usize = 1000;

/// Number of avatars included in a `timeline_user_avatars` preview.
pub const AVATAR_PREVIEW_LIMIT: usize = 6;

pub const CLIENT_EVENT_NAMES: &[&str] = &[
    "startup",
    "ping",
    "timeline_connect",
    "timeline_reconnect",
    "timeline_join_user",
    "timeline_join_group",
    "timeline_leave_group",
    "timeline_leave",
    "timeline_update_timecode",
    "timeline_set_pause",
    "timeline_set_unpause",
    "timeline_set_mic_enabled",
    "timeline_send_chat_message",
    "timeline_set_video_ended",
];

pub const SERVER_EVENT_NAMES: &[&str] = &[
    "authenticated",
    "pong",
    "timeline_status",
    "timeline_chat_history",
    "timeline_server_timestamp",
    "timeline_groups",
    "timeline_single_users",
    "timeline_current_group",
    "timeline_you_joined_group",
    "timeline_you_left_group",
    "timeline_start_voice_chat",
    "timeline_timecode",
    "timeline_pause",
    "timeline_unpause",
    "timeline_user_mic_state_changed",
    "timeline_chat_message",
    "timeline_video_ended",
    "timeline_user_avatars",
    "error",
    "fatal_error",
];

/// Events sent by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Authenticate the connection with an identity-service token.
    Startup { auth_token: String },

    /// Application-level keepalive, answered with `pong`.
    Ping,

    /// Join the timeline of a video as a single watcher.
    TimelineConnect { video_id: Uuid },

    /// Join the timeline again after a dropped connection, re-attaching to
    /// the previous group when it still exists.
    TimelineReconnect {
        video_id: Uuid,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        group_id: Option<Uuid>,
    },

    /// Form a new group with a single watcher, who becomes its host.
    TimelineJoinUser { target_user_id: Uuid },

    /// Join an existing group.
    TimelineJoinGroup { group_id: Uuid },

    TimelineLeaveGroup,

    TimelineLeave,

    /// Host-only: advance the playback position. Resumes a paused group.
    TimelineUpdateTimecode {
        timecode: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<i64>,
    },

    /// Host-only: pause playback at `timecode`.
    TimelineSetPause {
        timecode: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<i64>,
    },

    /// Host-only: resume playback at `timecode`.
    TimelineSetUnpause {
        timecode: i64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        server_timestamp: Option<i64>,
    },

    TimelineSetMicEnabled { mic_enabled: bool },

    TimelineSendChatMessage { message: String },

    TimelineSetVideoEnded { video_duration: i64 },
}

impl ClientEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Startup { .. } => "startup",
            Self::Ping => "ping",
            Self::TimelineConnect { .. } => "timeline_connect",
            Self::TimelineReconnect { .. } => "timeline_reconnect",
            Self::TimelineJoinUser { .. } => "timeline_join_user",
            Self::TimelineJoinGroup { .. } => "timeline_join_group",
            Self::TimelineLeaveGroup => "timeline_leave_group",
            Self::TimelineLeave => "timeline_leave",
            Self::TimelineUpdateTimecode { .. } => "timeline_update_timecode",
            Self::TimelineSetPause { .. } => "timeline_set_pause",
            Self::TimelineSetUnpause { .. } => "timeline_set_unpause",
            Self::TimelineSetMicEnabled { .. } => "timeline_set_mic_enabled",
            Self::TimelineSendChatMessage { .. } => "timeline_send_chat_message",
            Self::TimelineSetVideoEnded { .. } => "timeline_set_video_ended",
        }
    }
}

/// Events sent by the relay.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Reply to a successful `startup`.
    Authenticated { user_id: Uuid },

    Pong,

    /// Full snapshot of a timeline: every group with its roster plus the
    /// single watchers.
    TimelineStatus { video_id: Uuid, groups: Vec<GroupView>, users: Vec<UserView> },

    /// Recent chat messages, oldest first.
    TimelineChatHistory { messages: Vec<ChatMessageView> },

    /// Server wall clock in Unix milliseconds.
    TimelineServerTimestamp { timestamp: i64 },

    TimelineGroups { video_id: Uuid, groups: Vec<GroupView> },

    TimelineSingleUsers { video_id: Uuid, users: Vec<UserView> },

    /// Roster of one group, delivered to that group's room.
    TimelineCurrentGroup { group_id: Uuid, host_user_id: Uuid, users: Vec<UserView> },

    /// Sent to a user who was attached to a group.
    TimelineYouJoinedGroup { group_id: Uuid, timecode: i64 },

    /// Sent to a user who was detached from a group, including a member
    /// demoted because the group dissolved.
    TimelineYouLeftGroup { group_id: Uuid },

    /// Sent to the host when the group reaches two members.
    TimelineStartVoiceChat { group_id: Uuid },

    TimelineTimecode {
        user_id: Uuid,
        group_id: Option<Uuid>,
        timecode: i64,
        server_timestamp: i64,
    },

    TimelinePause {
        user_id: Uuid,
        group_id: Option<Uuid>,
        timecode: i64,
        server_timestamp: i64,
    },

    TimelineUnpause {
        user_id: Uuid,
        group_id: Option<Uuid>,
        timecode: i64,
        server_timestamp: i64,
    },

    TimelineUserMicStateChanged { user_id: Uuid, mic_enabled: bool },

    TimelineChatMessage(ChatMessageView),

    TimelineVideoEnded { user_id: Uuid, group_id: Option<Uuid>, video_duration: i64 },

    /// Avatar preview of the timeline: at most [`AVATAR_PREVIEW_LIMIT`]
    /// users plus the total number of watchers.
    TimelineUserAvatars { users: Vec<UserAvatar>, count: u64 },

    /// Recoverable error. The connection stays open.
    Error {
        code: String,
        message: String,
        retryable: bool,
        #[serde(default, skip_serializing_if = "Value::is_null")]
        details: Value,
    },

    /// Unrecoverable error. The relay closes the connection after sending it.
    FatalError { code: String, message: String },
}

impl ServerEvent {
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Authenticated { .. } => "authenticated",
            Self::Pong => "pong",
            Self::TimelineStatus { .. } => "timeline_status",
            Self::TimelineChatHistory { .. } => "timeline_chat_history",
            Self::TimelineServerTimestamp { .. } => "timeline_server_timestamp",
            Self::TimelineGroups { .. } => "timeline_groups",
            Self::TimelineSingleUsers { .. } => "timeline_single_users",
            Self::TimelineCurrentGroup { .. } => "timeline_current_group",
            Self::TimelineYouJoinedGroup { .. } => "timeline_you_joined_group",
            Self::TimelineYouLeftGroup { .. } => "timeline_you_left_group",
            Self::TimelineStartVoiceChat { .. } => "timeline_start_voice_chat",
            Self::TimelineTimecode { .. } => "timeline_timecode",
            Self::TimelinePause { .. } => "timeline_pause",
            Self::TimelineUnpause { .. } => "timeline_unpause",
            Self::TimelineUserMicStateChanged { .. } => "timeline_user_mic_state_changed",
            Self::TimelineChatMessage(_) => "timeline_chat_message",
            Self::TimelineVideoEnded { .. } => "timeline_video_ended",
            Self::TimelineUserAvatars { .. } => "timeline_user_avatars",
            Self::Error { .. } => "error",
            Self::FatalError { .. } => "fatal_error",
        }
    }
}
