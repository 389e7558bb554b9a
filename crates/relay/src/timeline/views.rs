// Wire views of a timeline, rebuilt from the registries on every broadcast.

use cowatch_common::{
    protocol::ws::{ServerEvent, AVATAR_PREVIEW_LIMIT},
    types::{GroupView, UserView},
};
use uuid::Uuid;

use super::model::{Group, WatchSession};
use crate::store::{StoreError, TimelineStore};

pub(super) fn group_view(group: &Group, members: &[WatchSession]) -> GroupView {
    GroupView {
        group_id: group.group_id,
        video_id: group.video_id,
        host_user_id: group.host_user_id,
        member_count: group.member_count,
        watch_time: group.watch_time,
        paused: group.paused,
        video_ended: group.video_ended,
        users: members.iter().map(|member| member.to_view(Some(group.host_user_id))).collect(),
    }
}

pub(super) fn current_group(group: &Group, members: &[WatchSession]) -> ServerEvent {
    ServerEvent::TimelineCurrentGroup {
        group_id: group.group_id,
        host_user_id: group.host_user_id,
        users: members.iter().map(|member| member.to_view(Some(group.host_user_id))).collect(),
    }
}

/// Every group on the video with its roster, oldest group first.
pub(super) async fn groups(
    store: &TimelineStore,
    video_id: Uuid,
) -> Result<Vec<GroupView>, StoreError> {
    let groups = store.groups.list_by_video(video_id).await?;
    let mut views = Vec::with_capacity(groups.len());
    for group in &groups {
        let members = store.sessions.list_by_group(group.group_id).await?;
        views.push(group_view(group, &members));
    }
    Ok(views)
}

pub(super) async fn single_users(
    store: &TimelineStore,
    video_id: Uuid,
) -> Result<Vec<UserView>, StoreError> {
    Ok(store
        .sessions
        .list_ungrouped_by_video(video_id)
        .await?
        .iter()
        .map(|session| session.to_view(None))
        .collect())
}

pub(super) async fn status(store: &TimelineStore, video_id: Uuid) -> Result<ServerEvent, StoreError> {
    Ok(ServerEvent::TimelineStatus {
        video_id,
        groups: groups(store, video_id).await?,
        users: single_users(store, video_id).await?,
    })
}

pub(super) async fn avatars(store: &TimelineStore, video_id: Uuid) -> Result<ServerEvent, StoreError> {
    let sessions = store.sessions.list_by_video(video_id).await?;
    let count = store.sessions.count_by_video(video_id).await?;
    Ok(ServerEvent::TimelineUserAvatars {
        users: sessions.iter().take(AVATAR_PREVIEW_LIMIT).map(WatchSession::to_avatar).collect(),
        count,
    })
}
