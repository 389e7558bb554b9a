// Timeline records as stored in the registries.
//
// Records are always written whole; handlers read, modify and write back the
// full value rather than patching individual fields in the store.

use chrono::{DateTime, SubsecRound, Utc};
use cowatch_common::types::{ChatMessageView, UserAvatar, UserView};
use uuid::Uuid;

use crate::auth::{Identity, Profile};

/// Current time truncated to the microsecond precision PostgreSQL keeps.
pub fn now() -> DateTime<Utc> {
    Utc::now().trunc_subsecs(6)
}

/// A user watching a video. At most one exists per user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchSession {
    pub user_id: Uuid,
    pub connection_id: Uuid,
    pub video_id: Uuid,
    /// `None` while the user is a single watcher.
    pub group_id: Option<Uuid>,
    pub watch_time: i64,
    pub paused: bool,
    pub video_ended: bool,
    pub mic_enabled: bool,
    pub stream_id: u32,
    pub profile: Profile,
    pub connected_at: DateTime<Utc>,
    /// When the user joined their current group; orders group rosters.
    pub group_joined_at: Option<DateTime<Utc>>,
}

impl WatchSession {
    /// A fresh single-watcher session with a random RTC stream id.
    pub fn new(identity: &Identity, connection_id: Uuid, video_id: Uuid) -> Self {
        Self {
            user_id: identity.user_id,
            connection_id,
            video_id,
            group_id: None,
            watch_time: 0,
            paused: false,
            video_ended: false,
            mic_enabled: false,
            stream_id: rand::random::<u32>(),
            profile: identity.profile.clone(),
            connected_at: now(),
            group_joined_at: None,
        }
    }

    pub fn attach_to(&mut self, group_id: Uuid) {
        self.group_id = Some(group_id);
        self.group_joined_at = Some(now());
        self.mic_enabled = false;
    }

    pub fn detach(&mut self) {
        self.group_id = None;
        self.group_joined_at = None;
        self.mic_enabled = false;
    }

    pub fn to_view(&self, host_user_id: Option<Uuid>) -> UserView {
        UserView {
            user_id: self.user_id,
            username: self.profile.username.clone(),
            first_name: self.profile.first_name.clone(),
            last_name: self.profile.last_name.clone(),
            avatar: self.profile.avatar.clone(),
            avatar_thumbnail: self.profile.avatar_thumbnail.clone(),
            bio: self.profile.bio.clone(),
            stream_id: self.stream_id,
            mic_enabled: self.mic_enabled,
            watch_time: self.watch_time,
            paused: self.paused,
            video_ended: self.video_ended,
            is_host: host_user_id == Some(self.user_id),
        }
    }

    pub fn to_avatar(&self) -> UserAvatar {
        UserAvatar {
            user_id: self.user_id,
            username: self.profile.username.clone(),
            avatar: self.profile.avatar.clone(),
            avatar_thumbnail: self.profile.avatar_thumbnail.clone(),
        }
    }
}

/// An active group of two or more co-watchers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Group {
    pub group_id: Uuid,
    pub video_id: Uuid,
    pub host_user_id: Uuid,
    pub member_count: u32,
    pub watch_time: i64,
    pub paused: bool,
    pub video_ended: bool,
    pub created_at: DateTime<Utc>,
}

impl Group {
    /// A two-member group hosted by `host`, starting from the host's playback state.
    pub fn formed_around(host: &WatchSession) -> Self {
        Self {
            group_id: Uuid::new_v4(),
            video_id: host.video_id,
            host_user_id: host.user_id,
            member_count: 2,
            watch_time: host.watch_time,
            paused: host.paused,
            video_ended: host.video_ended,
            created_at: now(),
        }
    }
}

/// An append-only timeline chat message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatMessage {
    pub id: Uuid,
    pub video_id: Uuid,
    pub user_id: Uuid,
    pub message: String,
    pub profile: Profile,
    pub created_at: DateTime<Utc>,
}

impl ChatMessage {
    pub fn new(author: &WatchSession, message: String) -> Self {
        Self {
            id: Uuid::new_v4(),
            video_id: author.video_id,
            user_id: author.user_id,
            message,
            profile: author.profile.clone(),
            created_at: now(),
        }
    }

    pub fn to_view(&self) -> ChatMessageView {
        ChatMessageView {
            id: self.id,
            video_id: self.video_id,
            user_id: self.user_id,
            message: self.message.clone(),
            created_at: self.created_at,
            username: self.profile.username.clone(),
            first_name: self.profile.first_name.clone(),
            last_name: self.profile.last_name.clone(),
            avatar_thumbnail: self.profile.avatar_thumbnail.clone(),
        }
    }
}
