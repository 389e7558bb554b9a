// Group membership engine.
//
// A user is Absent (no watch session), Single (session without a group) or
// Grouped. Every transition holds the caller's user lock and then the lock
// of the video it mutates, re-reads the records it needs, writes them back
// whole, and only then broadcasts.

pub mod locks;
pub mod model;
mod views;

use chrono::Utc;
use cowatch_common::protocol::ws::{ServerEvent, AVATAR_PREVIEW_LIMIT};
use tracing::{debug, info};
use uuid::Uuid;

use self::{
    locks::{KeyedGuard, KeyedLocks, LockKey},
    model::{ChatMessage, Group, WatchSession},
};
use crate::auth::Identity;
use crate::error::{ErrorCode, RelayError};
use crate::metrics;
use crate::presence::PresencePublisher;
use crate::rooms::{RoomKey, RoomRouter, Target};
use crate::store::TimelineStore;
use crate::validation;

/// The authenticated connection an event arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Caller {
    pub connection_id: Uuid,
    pub identity: Identity,
}

impl Caller {
    pub fn user_id(&self) -> Uuid {
        self.identity.user_id
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Playback {
    Timecode,
    Pause,
    Unpause,
}

/// Where a session goes after leaving its group. Decides what the
/// leave-group effect writes and broadcasts for the leaver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Departure {
    /// Stays on the timeline as a single user.
    ToSingle,
    /// Attaches to another group; the caller persists and broadcasts.
    ToGroup,
    /// Already deleted from the registry.
    FromTimeline,
}

#[derive(Clone)]
pub struct TimelineEngine {
    store: TimelineStore,
    router: RoomRouter,
    presence: PresencePublisher,
    locks: KeyedLocks,
    chat_history_limit: i64,
}

fn not_connected() -> RelayError {
    RelayError::new(ErrorCode::NotFound, "not connected to a timeline")
}

fn server_clock_millis() -> i64 {
    Utc::now().timestamp_millis()
}

impl TimelineEngine {
    pub fn new(
        store: TimelineStore,
        router: RoomRouter,
        presence: PresencePublisher,
        chat_history_limit: i64,
    ) -> Self {
        Self { store, router, presence, locks: KeyedLocks::default(), chat_history_limit }
    }

    pub fn router(&self) -> &RoomRouter {
        &self.router
    }

    pub fn presence(&self) -> &PresencePublisher {
        &self.presence
    }

    /// Absent/Single/Grouped -> Single on `video_id`.
    pub async fn connect(&self, caller: &Caller, video_id: Uuid) -> Result<(), RelayError> {
        self.join_timeline(caller, video_id, None).await
    }

    /// Connect, then re-attach to `group_id` when it is still live on the
    /// same video.
    pub async fn reconnect(
        &self,
        caller: &Caller,
        video_id: Uuid,
        group_id: Option<Uuid>,
    ) -> Result<(), RelayError> {
        self.join_timeline(caller, video_id, group_id).await
    }

    /// Forms a new group hosted by `target_user_id`, who must be single.
    pub async fn join_user(
        &self,
        caller: &Caller,
        target_user_id: Uuid,
    ) -> Result<(), RelayError> {
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((session, _video)) = self.lock_own_session(caller).await? else {
            return Err(not_connected());
        };

        if target_user_id == session.user_id {
            return Err(RelayError::new(ErrorCode::ValidationFailed, "cannot join yourself"));
        }

        let target = match self.store.sessions.get_by_user(target_user_id).await? {
            Some(target) if target.video_id == session.video_id => target,
            _ => {
                return Err(RelayError::new(
                    ErrorCode::NotFound,
                    "user is not watching this video",
                ))
            }
        };
        if target.group_id.is_some() {
            return Err(RelayError::new(ErrorCode::AlreadyInGroup, "user is already in a group"));
        }

        let mut joiner = self.leave_group_effect(session, Departure::ToGroup).await?;
        let mut host = target;
        let group = Group::formed_around(&host);
        self.store.groups.create(&group).await?;
        host.attach_to(group.group_id);
        joiner.attach_to(group.group_id);
        self.store.sessions.upsert(&host).await?;
        self.store.sessions.upsert(&joiner).await?;
        metrics::group_created();

        let room = RoomKey::Group(group.group_id);
        self.router.join_room(host.connection_id, room).await;
        self.router.join_room(joiner.connection_id, room).await;

        info!(
            group_id = %group.group_id,
            host_user_id = %host.user_id,
            user_id = %joiner.user_id,
            video_id = %group.video_id,
            "group formed"
        );

        self.broadcast_single_users(group.video_id).await?;
        self.broadcast_groups(group.video_id).await?;
        self.broadcast_current_group(&group).await?;
        for member in [&host, &joiner] {
            self.emit_to(
                member.connection_id,
                ServerEvent::TimelineYouJoinedGroup {
                    group_id: group.group_id,
                    timecode: group.watch_time,
                },
            )
            .await;
        }
        self.start_voice_chat_if_pair(&group, &host).await;

        self.presence.user_joined_group(joiner.user_id, group.group_id, group.video_id).await;
        self.presence.user_joined_group(host.user_id, group.group_id, group.video_id).await;
        Ok(())
    }

    /// Joins an existing group, leaving the caller's current group first.
    pub async fn join_group(&self, caller: &Caller, group_id: Uuid) -> Result<(), RelayError> {
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((session, _video)) = self.lock_own_session(caller).await? else {
            return Err(not_connected());
        };

        let mut group = match self.store.groups.get_by_id(group_id).await? {
            Some(group) if group.video_id == session.video_id => group,
            _ => return Err(RelayError::new(ErrorCode::NotFound, "group not found")),
        };
        if session.group_id == Some(group_id) {
            return Err(RelayError::new(ErrorCode::AlreadyInGroup, "already in this group"));
        }

        let mut session = self.leave_group_effect(session, Departure::ToGroup).await?;

        let members = self.store.sessions.list_by_group(group_id).await?;
        group.member_count = member_count(members.len() + 1);
        session.attach_to(group_id);
        self.store.sessions.upsert(&session).await?;
        self.store.groups.upsert(&group).await?;
        self.router.join_room(session.connection_id, RoomKey::Group(group_id)).await;

        debug!(user_id = %session.user_id, group_id = %group_id, members = group.member_count, "joined group");

        self.broadcast_single_users(group.video_id).await?;
        self.broadcast_groups(group.video_id).await?;
        self.broadcast_current_group(&group).await?;
        self.emit_to(
            session.connection_id,
            ServerEvent::TimelineYouJoinedGroup { group_id, timecode: group.watch_time },
        )
        .await;

        self.presence.user_joined_group(session.user_id, group_id, group.video_id).await;
        Ok(())
    }

    pub async fn leave_group(&self, caller: &Caller) -> Result<(), RelayError> {
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((session, _video)) = self.lock_own_session(caller).await? else {
            return Err(not_connected());
        };
        if session.group_id.is_none() {
            return Err(RelayError::from_code(ErrorCode::NotInGroup));
        }

        self.leave_group_effect(session, Departure::ToSingle).await?;
        Ok(())
    }

    /// Any state -> Absent. A no-op when the caller has no session.
    pub async fn leave_timeline(&self, caller: &Caller) -> Result<(), RelayError> {
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((session, _video)) = self.lock_own_session(caller).await? else {
            return Ok(());
        };

        self.remove_from_timeline(session, true).await
    }

    /// Transport-level close of `caller.connection_id`.
    ///
    /// Only removes the watch session while it still belongs to this
    /// connection; a session already taken over by a newer connection, or
    /// already removed by an explicit leave, is left alone.
    pub async fn disconnect(&self, caller: &Caller) -> Result<(), RelayError> {
        let user_id = caller.user_id();
        let outcome = {
            let _user = self.locks.lock(LockKey::User(user_id)).await;
            match self.lock_own_session(caller).await? {
                Some((session, _video)) if session.connection_id == caller.connection_id => {
                    self.remove_from_timeline(session, true).await
                }
                _ => Ok(()),
            }
        };

        self.router.leave_all_rooms(caller.connection_id).await;
        self.presence.user_disconnected(user_id).await;
        outcome
    }

    pub async fn update_timecode(
        &self,
        caller: &Caller,
        timecode: i64,
        server_timestamp: Option<i64>,
    ) -> Result<(), RelayError> {
        self.apply_playback(caller, Playback::Timecode, timecode, server_timestamp).await
    }

    pub async fn set_pause(
        &self,
        caller: &Caller,
        timecode: i64,
        server_timestamp: Option<i64>,
    ) -> Result<(), RelayError> {
        self.apply_playback(caller, Playback::Pause, timecode, server_timestamp).await
    }

    pub async fn set_unpause(
        &self,
        caller: &Caller,
        timecode: i64,
        server_timestamp: Option<i64>,
    ) -> Result<(), RelayError> {
        self.apply_playback(caller, Playback::Unpause, timecode, server_timestamp).await
    }

    pub async fn set_mic_enabled(&self, caller: &Caller, mic_enabled: bool) -> Result<(), RelayError> {
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((mut session, _video)) = self.lock_own_session(caller).await? else {
            return Ok(());
        };

        session.mic_enabled = mic_enabled;
        self.store.sessions.upsert(&session).await?;

        let event = ServerEvent::TimelineUserMicStateChanged { user_id: session.user_id, mic_enabled };
        match session.group_id {
            Some(group_id) => self.router.emit(Target::Room(RoomKey::Group(group_id)), event).await,
            None => self.router.emit(Target::Connection(session.connection_id), event).await,
        };
        Ok(())
    }

    pub async fn send_chat_message(&self, caller: &Caller, message: &str) -> Result<(), RelayError> {
        let message = validation::normalize_chat_message(message)?;
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some(author) = self.store.sessions.get_by_user(caller.user_id()).await? else {
            return Ok(());
        };

        let chat = ChatMessage::new(&author, message);
        self.store.chat.insert(&chat).await?;
        self.router
            .emit(
                Target::Room(RoomKey::Video(chat.video_id)),
                ServerEvent::TimelineChatMessage(chat.to_view()),
            )
            .await;
        self.presence.chat_message_sent(chat.user_id, chat.video_id, chat.id).await;
        Ok(())
    }

    /// Marks the video finished: on the group when grouped (host only),
    /// otherwise on the caller's session.
    pub async fn set_video_ended(&self, caller: &Caller, video_duration: i64) -> Result<(), RelayError> {
        let video_duration = validation::validate_video_duration(video_duration)?;
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((mut session, _video)) = self.lock_own_session(caller).await? else {
            return Ok(());
        };

        if let Some(group_id) = session.group_id {
            let mut group = self.hosted_group(group_id, session.user_id).await?;
            group.video_ended = true;
            group.watch_time = video_duration;
            self.store.groups.upsert(&group).await?;
        }
        session.video_ended = true;
        session.watch_time = video_duration;
        self.store.sessions.upsert(&session).await?;

        self.router
            .emit(
                Target::Room(RoomKey::Video(session.video_id)),
                ServerEvent::TimelineVideoEnded {
                    user_id: session.user_id,
                    group_id: session.group_id,
                    video_duration,
                },
            )
            .await;
        Ok(())
    }

    async fn join_timeline(
        &self,
        caller: &Caller,
        video_id: Uuid,
        rejoin_group: Option<Uuid>,
    ) -> Result<(), RelayError> {
        let user_id = caller.user_id();
        let _user = self.locks.lock(LockKey::User(user_id)).await;

        // A reconnect into the group the stale session still belongs to takes
        // that session over. Anything else clears the previous session under
        // its own video's lock before the new video's lock is taken.
        let previous = self.lock_own_session(caller).await?;
        let had_session = previous.is_some();
        if let Some((stale, _previous_video)) = previous {
            if stale.video_id == video_id
                && stale.group_id.is_some()
                && stale.group_id == rejoin_group
            {
                return self.resume_session(caller, stale).await;
            }

            let stale_connection = stale.connection_id;
            let stale_video = stale.video_id;
            let moved = stale_video != video_id || stale_connection != caller.connection_id;
            self.remove_from_timeline(stale, moved).await?;
            if stale_connection != caller.connection_id {
                self.router.leave_all_rooms(stale_connection).await;
            }
            debug!(user_id = %user_id, video_id = %stale_video, "replaced previous watch session");
        }

        let _video = self.locks.lock(LockKey::Video(video_id)).await;
        let mut session = WatchSession::new(&caller.identity, caller.connection_id, video_id);
        self.store.sessions.upsert(&session).await?;
        self.router.join_room(caller.connection_id, RoomKey::Video(video_id)).await;
        if !had_session {
            self.presence.user_connected_to_timeline(user_id, video_id).await;
        }

        info!(user_id = %user_id, connection_id = %caller.connection_id, video_id = %video_id, "joined timeline");
        self.send_snapshot(caller.connection_id, video_id).await?;

        let mut grouped = None;
        if let Some(group_id) = rejoin_group {
            match self.store.groups.get_by_id(group_id).await? {
                Some(mut group) if group.video_id == video_id => {
                    let members = self.store.sessions.list_by_group(group_id).await?;
                    group.member_count = member_count(members.len() + 1);
                    session.attach_to(group_id);
                    session.watch_time = group.watch_time;
                    session.paused = group.paused;
                    session.video_ended = group.video_ended;
                    self.store.sessions.upsert(&session).await?;
                    self.store.groups.upsert(&group).await?;
                    self.router.join_room(caller.connection_id, RoomKey::Group(group_id)).await;
                    grouped = Some(group);
                }
                _ => debug!(user_id = %user_id, group_id = %group_id, "previous group is gone, staying single"),
            }
        }

        self.broadcast_single_users(video_id).await?;
        self.emit_avatars_after_join(video_id, caller.connection_id).await?;

        if let Some(group) = grouped {
            self.broadcast_groups(video_id).await?;
            self.broadcast_current_group(&group).await?;
            self.emit_to(
                caller.connection_id,
                ServerEvent::TimelineYouJoinedGroup {
                    group_id: group.group_id,
                    timecode: group.watch_time,
                },
            )
            .await;
            self.presence.user_joined_group(user_id, group.group_id, video_id).await;
        }
        Ok(())
    }

    /// Moves a still-grouped session onto the caller's new connection.
    async fn resume_session(&self, caller: &Caller, mut session: WatchSession) -> Result<(), RelayError> {
        let previous_connection = session.connection_id;
        session.connection_id = caller.connection_id;
        self.store.sessions.upsert(&session).await?;
        if previous_connection != caller.connection_id {
            self.router.leave_all_rooms(previous_connection).await;
        }

        let video_id = session.video_id;
        self.router.join_room(caller.connection_id, RoomKey::Video(video_id)).await;
        info!(user_id = %session.user_id, connection_id = %caller.connection_id, video_id = %video_id, "resumed watch session");
        self.send_snapshot(caller.connection_id, video_id).await?;

        if let Some(group_id) = session.group_id {
            self.router.join_room(caller.connection_id, RoomKey::Group(group_id)).await;
            if let Some(group) = self.store.groups.get_by_id(group_id).await? {
                self.broadcast_current_group(&group).await?;
                self.emit_to(
                    caller.connection_id,
                    ServerEvent::TimelineYouJoinedGroup { group_id, timecode: group.watch_time },
                )
                .await;
            }
        }
        Ok(())
    }

    /// Chat history, timeline status and server clock for a joining connection.
    async fn send_snapshot(&self, connection_id: Uuid, video_id: Uuid) -> Result<(), RelayError> {
        let history = self.store.chat.recent_for_video(video_id, self.chat_history_limit).await?;
        self.emit_to(
            connection_id,
            ServerEvent::TimelineChatHistory {
                messages: history.iter().map(ChatMessage::to_view).collect(),
            },
        )
        .await;
        self.emit_to(connection_id, views::status(&self.store, video_id).await?).await;
        self.emit_to(
            connection_id,
            ServerEvent::TimelineServerTimestamp { timestamp: server_clock_millis() },
        )
        .await;
        Ok(())
    }

    async fn apply_playback(
        &self,
        caller: &Caller,
        change: Playback,
        timecode: i64,
        server_timestamp: Option<i64>,
    ) -> Result<(), RelayError> {
        let timecode = validation::validate_timecode(timecode)?;
        let _user = self.locks.lock(LockKey::User(caller.user_id())).await;
        let Some((mut session, _video)) = self.lock_own_session(caller).await? else {
            return Err(not_connected());
        };

        let was_paused = match session.group_id {
            Some(group_id) => {
                let mut group = self.hosted_group(group_id, session.user_id).await?;
                let was_paused = group.paused;
                group.watch_time = timecode;
                group.paused = change == Playback::Pause;
                self.store.groups.upsert(&group).await?;
                was_paused
            }
            None => session.paused,
        };
        session.watch_time = timecode;
        session.paused = change == Playback::Pause;
        self.store.sessions.upsert(&session).await?;

        let user_id = session.user_id;
        let group_id = session.group_id;
        let server_timestamp = server_timestamp.unwrap_or_else(server_clock_millis);
        let mut events = Vec::with_capacity(2);
        match change {
            Playback::Timecode => {
                events.push(ServerEvent::TimelineTimecode { user_id, group_id, timecode, server_timestamp });
                if was_paused {
                    events.push(ServerEvent::TimelineUnpause { user_id, group_id, timecode, server_timestamp });
                }
            }
            Playback::Pause => {
                events.push(ServerEvent::TimelinePause { user_id, group_id, timecode, server_timestamp })
            }
            Playback::Unpause => {
                events.push(ServerEvent::TimelineUnpause { user_id, group_id, timecode, server_timestamp })
            }
        }

        let room = Target::Room(RoomKey::Video(session.video_id));
        for event in events {
            self.router.emit(room, event).await;
        }
        Ok(())
    }

    /// Takes the video lock for the caller's current session and re-reads it
    /// under that lock. The caller's user lock must already be held, which
    /// keeps the session's video fixed between the two reads.
    async fn lock_own_session(
        &self,
        caller: &Caller,
    ) -> Result<Option<(WatchSession, KeyedGuard)>, RelayError> {
        let user_id = caller.user_id();
        let Some(session) = self.store.sessions.get_by_user(user_id).await? else {
            return Ok(None);
        };
        let video = self.locks.lock(LockKey::Video(session.video_id)).await;
        Ok(self.store.sessions.get_by_user(user_id).await?.map(|session| (session, video)))
    }

    async fn hosted_group(&self, group_id: Uuid, user_id: Uuid) -> Result<Group, RelayError> {
        let group = self
            .store
            .groups
            .get_by_id(group_id)
            .await?
            .ok_or_else(|| RelayError::new(ErrorCode::NotFound, "group not found"))?;
        if group.host_user_id != user_id {
            return Err(RelayError::from_code(ErrorCode::NotGroupHost));
        }
        Ok(group)
    }

    /// Detaches `session` from its group, dissolving the group when at most
    /// one member would remain and handing the host role on otherwise.
    /// Returns the detached session. Requires the session's video lock.
    ///
    /// Only `Departure::ToSingle` persists the leaver and broadcasts the
    /// single-user list; the other departures leave both to the caller.
    async fn leave_group_effect(
        &self,
        session: WatchSession,
        departure: Departure,
    ) -> Result<WatchSession, RelayError> {
        let Some(group_id) = session.group_id else {
            return Ok(session);
        };
        let mut leaver = session;
        let room = RoomKey::Group(group_id);
        self.router.leave_room(leaver.connection_id, room).await;

        let remaining: Vec<WatchSession> = self
            .store
            .sessions
            .list_by_group(group_id)
            .await?
            .into_iter()
            .filter(|member| member.user_id != leaver.user_id)
            .collect();
        let participant_ids: Vec<Uuid> = remaining.iter().map(|member| member.user_id).collect();

        let mut demoted = None;
        let mut surviving = None;
        match self.store.groups.get_by_id(group_id).await? {
            Some(mut group) => {
                leaver.watch_time = group.watch_time;
                leaver.paused = group.paused;
                leaver.video_ended = group.video_ended;

                if remaining.len() <= 1 {
                    if let Some(last) = remaining.first() {
                        let mut last = last.clone();
                        last.detach();
                        last.watch_time = group.watch_time;
                        last.paused = group.paused;
                        last.video_ended = group.video_ended;
                        self.store.sessions.upsert(&last).await?;
                        self.router.leave_room(last.connection_id, room).await;
                        demoted = Some(last);
                    }
                    self.store.groups.delete(group_id).await?;
                    metrics::group_dissolved();
                    info!(group_id = %group_id, video_id = %group.video_id, "group dissolved");
                } else {
                    group.member_count = member_count(remaining.len());
                    if !remaining.iter().any(|member| member.user_id == group.host_user_id) {
                        group.host_user_id = remaining[0].user_id;
                        debug!(group_id = %group_id, host_user_id = %group.host_user_id, "host reassigned");
                    }
                    self.store.groups.upsert(&group).await?;
                    surviving = Some(group);
                }
            }
            None => debug!(group_id = %group_id, "detaching from a group that no longer exists"),
        }

        leaver.detach();
        if departure == Departure::ToSingle {
            self.store.sessions.upsert(&leaver).await?;
            self.broadcast_single_users(leaver.video_id).await?;
        }
        if departure != Departure::ToGroup {
            self.broadcast_groups(leaver.video_id).await?;
        }
        if let Some(group) = &surviving {
            self.router
                .emit(Target::Room(room), views::current_group(group, &remaining))
                .await;
        }
        if departure != Departure::FromTimeline {
            self.emit_to(leaver.connection_id, ServerEvent::TimelineYouLeftGroup { group_id }).await;
        }
        if let Some(demoted) = &demoted {
            self.emit_to(demoted.connection_id, ServerEvent::TimelineYouLeftGroup { group_id })
                .await;
        }

        self.presence.user_left_group(leaver.user_id, group_id, &participant_ids).await;
        Ok(leaver)
    }

    /// Deletes the session, then runs the leave-group effect silently for
    /// the leaver. `timeline.user_left` is published only when `announce`.
    /// Requires the session's video lock.
    async fn remove_from_timeline(
        &self,
        session: WatchSession,
        announce: bool,
    ) -> Result<(), RelayError> {
        self.store.sessions.delete(session.user_id).await?;
        let session = self.leave_group_effect(session, Departure::FromTimeline).await?;
        self.router.leave_room(session.connection_id, RoomKey::Video(session.video_id)).await;

        info!(user_id = %session.user_id, video_id = %session.video_id, watch_time = session.watch_time, "left timeline");

        if announce {
            self.presence
                .user_left_timeline(session.user_id, session.video_id, session.watch_time)
                .await;
        }
        self.broadcast_single_users(session.video_id).await?;
        let avatars = views::avatars(&self.store, session.video_id).await?;
        self.router.emit(Target::Room(RoomKey::Video(session.video_id)), avatars).await;
        Ok(())
    }

    async fn start_voice_chat_if_pair(&self, group: &Group, host: &WatchSession) {
        if group.member_count == 2 && host.user_id == group.host_user_id {
            self.emit_to(
                host.connection_id,
                ServerEvent::TimelineStartVoiceChat { group_id: group.group_id },
            )
            .await;
        }
    }

    async fn emit_avatars_after_join(
        &self,
        video_id: Uuid,
        connection_id: Uuid,
    ) -> Result<(), RelayError> {
        let avatars = views::avatars(&self.store, video_id).await?;
        let crowded = matches!(
            &avatars,
            ServerEvent::TimelineUserAvatars { count, .. } if *count >= AVATAR_PREVIEW_LIMIT as u64
        );
        let target = if crowded {
            Target::Connection(connection_id)
        } else {
            Target::Room(RoomKey::Video(video_id))
        };
        self.router.emit(target, avatars).await;
        Ok(())
    }

    async fn broadcast_single_users(&self, video_id: Uuid) -> Result<(), RelayError> {
        let users = views::single_users(&self.store, video_id).await?;
        self.router
            .emit(
                Target::Room(RoomKey::Video(video_id)),
                ServerEvent::TimelineSingleUsers { video_id, users },
            )
            .await;
        Ok(())
    }

    async fn broadcast_groups(&self, video_id: Uuid) -> Result<(), RelayError> {
        let groups = views::groups(&self.store, video_id).await?;
        self.router
            .emit(Target::Room(RoomKey::Video(video_id)), ServerEvent::TimelineGroups { video_id, groups })
            .await;
        Ok(())
    }

    async fn broadcast_current_group(&self, group: &Group) -> Result<(), RelayError> {
        let members = self.store.sessions.list_by_group(group.group_id).await?;
        self.router
            .emit(Target::Room(RoomKey::Group(group.group_id)), views::current_group(group, &members))
            .await;
        Ok(())
    }

    async fn emit_to(&self, connection_id: Uuid, event: ServerEvent) {
        self.router.emit(Target::Connection(connection_id), event).await;
    }
}

fn member_count(members: usize) -> u32 {
    u32::try_from(members).unwrap_or(u32::MAX)
}
