// Views of timeline state as they appear on the wire.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A watcher on a timeline, as listed in group rosters and the single-user list.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserView {
    pub user_id: Uuid,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar: Option<String>,
    pub avatar_thumbnail: Option<String>,
    pub bio: Option<String>,
    /// Identifier the RTC provider uses for this user's audio stream.
    pub stream_id: u32,
    pub mic_enabled: bool,
    pub watch_time: i64,
    pub paused: bool,
    pub video_ended: bool,
    /// True when this user hosts the group they are listed in.
    #[serde(default)]
    pub is_host: bool,
}

/// A group of co-watchers with its roster.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct GroupView {
    pub group_id: Uuid,
    pub video_id: Uuid,
    pub host_user_id: Uuid,
    pub member_count: u32,
    pub watch_time: i64,
    pub paused: bool,
    pub video_ended: bool,
    /// Members ordered by the time they joined the group.
    pub users: Vec<UserView>,
}

/// A timeline chat message with the author's display attributes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatMessageView {
    pub id: Uuid,
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub created_at: DateTime<Utc>,
    pub username: String,
    pub first_name: Option<String>,
    pub last_name: Option<String>,
    pub avatar_thumbnail: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserAvatar {
    pub user_id: Uuid,
    pub username: String,
    pub avatar: Option<String>,
    pub avatar_thumbnail: Option<String>,
}
