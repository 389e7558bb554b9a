use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;
use crate::timeline::model::Group;

const SELECT_COLUMNS: &str = r#"
    SELECT group_id, video_id, host_user_id, member_count, watch_time, paused, video_ended,
           created_at
    FROM timeline_groups
"#;

/// Active groups keyed by group id.
///
/// The registry does no cross-field validation: keeping `member_count` above
/// one is the engine's responsibility.
#[derive(Clone)]
pub enum GroupStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<Uuid, Group>>>),
}

#[derive(sqlx::FromRow)]
struct GroupRow {
    group_id: Uuid,
    video_id: Uuid,
    host_user_id: Uuid,
    member_count: i32,
    watch_time: i64,
    paused: bool,
    video_ended: bool,
    created_at: DateTime<Utc>,
}

impl TryFrom<GroupRow> for Group {
    type Error = StoreError;

    fn try_from(row: GroupRow) -> Result<Self, Self::Error> {
        let member_count = u32::try_from(row.member_count).map_err(|_| StoreError::CorruptRecord {
            entity: "timeline_group",
            reason: format!("member_count {} is negative", row.member_count),
        })?;

        Ok(Self {
            group_id: row.group_id,
            video_id: row.video_id,
            host_user_id: row.host_user_id,
            member_count,
            watch_time: row.watch_time,
            paused: row.paused,
            video_ended: row.video_ended,
            created_at: row.created_at,
        })
    }
}

fn member_count_param(group: &Group) -> Result<i32, StoreError> {
    i32::try_from(group.member_count).map_err(|_| StoreError::CorruptRecord {
        entity: "timeline_group",
        reason: format!("member_count {} is out of range", group.member_count),
    })
}

impl GroupStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn create(&self, group: &Group) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO timeline_groups (
                        group_id, video_id, host_user_id, member_count, watch_time, paused,
                        video_ended, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    "#,
                )
                .bind(group.group_id)
                .bind(group.video_id)
                .bind(group.host_user_id)
                .bind(member_count_param(group)?)
                .bind(group.watch_time)
                .bind(group.paused)
                .bind(group.video_ended)
                .bind(group.created_at)
                .execute(pool)
                .await?;
                Ok(())
            }
            Self::Memory(groups) => {
                groups.write().await.insert(group.group_id, group.clone());
                Ok(())
            }
        }
    }

    pub async fn get_by_id(&self, group_id: Uuid) -> Result<Option<Group>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let row =
                    sqlx::query_as::<_, GroupRow>(&format!("{SELECT_COLUMNS} WHERE group_id = $1"))
                        .bind(group_id)
                        .fetch_optional(pool)
                        .await?;
                row.map(Group::try_from).transpose()
            }
            Self::Memory(groups) => Ok(groups.read().await.get(&group_id).cloned()),
        }
    }

    pub async fn upsert(&self, group: &Group) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO timeline_groups (
                        group_id, video_id, host_user_id, member_count, watch_time, paused,
                        video_ended, created_at
                    )
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                    ON CONFLICT (group_id) DO UPDATE SET
                        host_user_id = EXCLUDED.host_user_id,
                        member_count = EXCLUDED.member_count,
                        watch_time = EXCLUDED.watch_time,
                        paused = EXCLUDED.paused,
                        video_ended = EXCLUDED.video_ended
                    "#,
                )
                .bind(group.group_id)
                .bind(group.video_id)
                .bind(group.host_user_id)
                .bind(member_count_param(group)?)
                .bind(group.watch_time)
                .bind(group.paused)
                .bind(group.video_ended)
                .bind(group.created_at)
                .execute(pool)
                .await?;
                Ok(())
            }
            Self::Memory(groups) => {
                groups.write().await.insert(group.group_id, group.clone());
                Ok(())
            }
        }
    }

    /// Returns whether a group was removed.
    pub async fn delete(&self, group_id: Uuid) -> Result<bool, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM timeline_groups WHERE group_id = $1")
                    .bind(group_id)
                    .execute(pool)
                    .await?;
                Ok(result.rows_affected() > 0)
            }
            Self::Memory(groups) => Ok(groups.write().await.remove(&group_id).is_some()),
        }
    }

    /// Groups of a video, oldest first.
    pub async fn list_by_video(&self, video_id: Uuid) -> Result<Vec<Group>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, GroupRow>(&format!(
                    "{SELECT_COLUMNS} WHERE video_id = $1 ORDER BY created_at ASC, group_id ASC"
                ))
                .bind(video_id)
                .fetch_all(pool)
                .await?;
                rows.into_iter().map(Group::try_from).collect()
            }
            Self::Memory(groups) => {
                let mut listed: Vec<Group> = groups
                    .read()
                    .await
                    .values()
                    .filter(|group| group.video_id == video_id)
                    .cloned()
                    .collect();
                listed.sort_by_key(|group| (group.created_at, group.group_id));
                Ok(listed)
            }
        }
    }

    /// Removes every group. Returns how many were removed.
    pub async fn clear(&self) -> Result<u64, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let result = sqlx::query("DELETE FROM timeline_groups").execute(pool).await?;
                Ok(result.rows_affected())
            }
            Self::Memory(groups) => {
                let mut guard = groups.write().await;
                let removed = guard.len() as u64;
                guard.clear();
                Ok(removed)
            }
        }
    }
}
