use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;
use crate::auth::Profile;
use crate::timeline::model::WatchSession;

const SELECT_COLUMNS: &str = r#"
    SELECT user_id, connection_id, video_id, group_id, watch_time, paused, video_ended,
           mic_enabled, stream_id, profile, connected_at, group_joined_at
    FROM watch_sessions
"#;

/// Watch sessions keyed by user id.
#[derive(Clone)]
pub enum WatchSessionStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<Uuid, WatchSession>>>),
}

#[derive(sqlx::FromRow)]
struct WatchSessionRow {
    user_id: Uuid,
    connection_id: Uuid,
    video_id: Uuid,
    group_id: Option<Uuid>,
    watch_time: i64,
    paused: bool,
    video_ended: bool,
    mic_enabled: bool,
    stream_id: i64,
    profile: Json<Profile>,
    connected_at: DateTime<Utc>,
    group_joined_at: Option<DateTime<Utc>>,
}

impl TryFrom<WatchSessionRow> for WatchSession {
    type Error = StoreError;

    fn try_from(row: WatchSessionRow) -> Result<Self, Self::Error> {
        let stream_id = u32::try_from(row.stream_id).map_err(|_| StoreError::CorruptRecord {
            entity: "watch_session",
            reason: format!("stream_id {} is out of range", row.stream_id),
        })?;

        Ok(Self {
            user_id: row.user_id,
            connection_id: row.connection_id,
            video_id: row.video_id,
            group_id: row.group_id,
            watch_time: row.watch_time,
            paused: row.paused,
            video_ended: row.video_ended,
            mic_enabled: row.mic_enabled,
            stream_id,
            profile: row.profile.0,
            connected_at: row.connected_at,
            group_joined_at: row.group_joined_at,
        })
    }
}

fn collect(rows: Vec<WatchSessionRow>) -> Result<Vec<WatchSession>, StoreError> {
    rows.into_iter().map(WatchSession::try_from).collect()
}

impl WatchSessionStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn upsert(&self, session: &WatchSession) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO watch_sessions (
                        user_id, connection_id, video_id, group_id, watch_time, paused,
                        video_ended, mic_enabled, stream_id, profile, connected_at, group_joined_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
                    ON CONFLICT (user_id) DO UPDATE SET
                        connection_id = EXCLUDED.connection_id,
                        video_id = EXCLUDED.video_id,
                        group_id = EXCLUDED.group_id,
                        watch_time = EXCLUDED.watch_time,
                        paused = EXCLUDED.paused,
                        video_ended = EXCLUDED.video_ended,
                        mic_enabled = EXCLUDED.mic_enabled,
                        stream_id = EXCLUDED.stream_id,
                        profile = EXCLUDED.profile,
                        connected_at = EXCLUDED.connected_at,
                        group_joined_at = EXCLUDED.group_joined_at
                    "#,
                )
                .bind(session.user_id)
                .bind(session.connection_id)
                .bind(session.video_id)
                .bind(session.group_id)
                .bind(session.watch_time)
                .bind(session.paused)
                .bind(session.video_ended)
                .bind(session.mic_enabled)
                .bind(i64::from(session.stream_id))
                .bind(Json(&session.profile))
                .bind(session.connected_at)
                .bind(session.group_joined_at)
                .execute(pool)
                .await?;
                Ok(())
            }
            Self::Memory(sessions) => {
                sessions.write().await.insert(session.user_id, session.clone());
                Ok(())
            }
        }
    }

    pub async fn get_by_user(&self, user_id: Uuid) -> Result<Option<WatchSession>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let row = sqlx::query_as::<_, WatchSessionRow>(&format!(
                    "{SELECT_COLUMNS} WHERE user_id = $1"
                ))
                .bind(user_id)
                .fetch_optional(pool)
                .await?;
                row.map(WatchSession::try_from).transpose()
            }
            Self::Memory(sessions) => Ok(sessions.read().await.get(&user_id).cloned()),
        }
    }

    /// Returns whether a session was removed.
    pub async fn delete(&self, user_id: Uuid) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM watch_sessions WHERE user_id = $1")
                    .bind(user_id)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            }
            Self::Memory(sessions) => Ok(sessions.write().await.remove(&user_id).is_some()),
        }
    }

    /// Members of a group, ordered by the time they joined it.
    pub async fn list_by_group(&self, group_id: Uuid) -> Result<Vec<WatchSession>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, WatchSessionRow>(&format!(
                    "{SELECT_COLUMNS} WHERE group_id = $1 ORDER BY group_joined_at ASC, user_id ASC"
                ))
                .bind(group_id)
                .fetch_all(pool)
                .await?;
                collect(rows)
            }
            Self::Memory(sessions) => {
                let mut members: Vec<WatchSession> = sessions
                    .read()
                    .await
                    .values()
                    .filter(|session| session.group_id == Some(group_id))
                    .cloned()
                    .collect();
                members.sort_by_key(|session| (session.group_joined_at, session.user_id));
                Ok(members)
            }
        }
    }

    /// Single watchers of a video, ordered by connect time.
    pub async fn list_ungrouped_by_video(
        &self,
        video_id: Uuid,
    ) -> Result<Vec<WatchSession>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, WatchSessionRow>(&format!(
                    "{SELECT_COLUMNS} WHERE video_id = $1 AND group_id IS NULL ORDER BY connected_at ASC, user_id ASC"
                ))
                .bind(video_id)
                .fetch_all(pool)
                .await?;
                collect(rows)
            }
            Self::Memory(_) => Ok(self
                .list_by_video(video_id)
                .await?
                .into_iter()
                .filter(|session| session.group_id.is_none())
                .collect()),
        }
    }

    /// Every watcher of a video, ordered by connect time.
    pub async fn list_by_video(&self, video_id: Uuid) -> Result<Vec<WatchSession>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, WatchSessionRow>(&format!(
                    "{SELECT_COLUMNS} WHERE video_id = $1 ORDER BY connected_at ASC, user_id ASC"
                ))
                .bind(video_id)
                .fetch_all(pool)
                .await?;
                collect(rows)
            }
            Self::Memory(sessions) => {
                let mut watchers: Vec<WatchSession> = sessions
                    .read()
                    .await
                    .values()
                    .filter(|session| session.video_id == video_id)
                    .cloned()
                    .collect();
                watchers.sort_by_key(|session| (session.connected_at, session.user_id));
                Ok(watchers)
            }
        }
    }

    pub async fn count_by_video(&self, video_id: Uuid) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let count = sqlx::query_scalar::<_, i64>(
                    "SELECT COUNT(*) FROM watch_sessions WHERE video_id = $1",
                )
                .bind(video_id)
                .fetch_one(pool)
                .await?;
                Ok(u64::try_from(count).unwrap_or_default())
            }
            Self::Memory(sessions) => Ok(sessions
                .read()
                .await
                .values()
                .filter(|session| session.video_id == video_id)
                .count() as u64),
        }
    }

    /// Removes every session. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM watch_sessions").execute(pool).await?;
                Ok(result.rows_affected())
            }
            Self::Memory(sessions) => {
                let mut guard = sessions.write().await;
                let removed = guard.len() as u64;
                guard.clear();
                Ok(removed)
            }
        }
    }
}
