use std::{collections::HashMap, sync::Arc};

use chrono::{DateTime, Utc};
use sqlx::{types::Json, PgPool};
use tokio::sync::RwLock;
use uuid::Uuid;

use super::StoreError;
use crate::auth::Profile;
use crate::timeline::model::ChatMessage;

/// Append-only timeline chat, scoped per video.
#[derive(Clone)]
pub enum ChatStore {
    Postgres(PgPool),
    Memory(Arc<RwLock<HashMap<Uuid, Vec<ChatMessage>>>>),
}

#[derive(sqlx::FromRow)]
struct ChatMessageRow {
    id: Uuid,
    video_id: Uuid,
    user_id: Uuid,
    message: String,
    profile: Json<Profile>,
    created_at: DateTime<Utc>,
}

impl From<ChatMessageRow> for ChatMessage {
    fn from(row: ChatMessageRow) -> Self {
        Self {
            id: row.id,
            video_id: row.video_id,
            user_id: row.user_id,
            message: row.message,
            profile: row.profile.0,
            created_at: row.created_at,
        }
    }
}

impl ChatStore {
    pub fn in_memory() -> Self {
        Self::Memory(Arc::new(RwLock::new(HashMap::new())))
    }

    pub async fn insert(&self, message: &ChatMessage) -> Result<(), StoreError> {
        match self {
            Self::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO timeline_chat_messages (id, video_id, user_id, message, profile, created_at)
                    VALUES ($1, $2, $3, $4, $5, $6)
                    "#,
                )
                .bind(message.id)
                .bind(message.video_id)
                .bind(message.user_id)
                .bind(&message.message)
                .bind(Json(&message.profile))
                .bind(message.created_at)
                .execute(pool)
                .await?;
                Ok(())
            }
            Self::Memory(messages) => {
                messages.write().await.entry(message.video_id).or_default().push(message.clone());
                Ok(())
            }
        }
    }

    /// The latest `limit` messages of a video, oldest first.
    pub async fn recent_for_video(
        &self,
        video_id: Uuid,
        limit: i64,
    ) -> Result<Vec<ChatMessage>, StoreError> {
        match self {
            Self::Postgres(pool) => {
                let rows = sqlx::query_as::<_, ChatMessageRow>(
                    r#"
                    SELECT id, video_id, user_id, message, profile, created_at
                    FROM (
                        SELECT id, video_id, user_id, message, profile, created_at
                        FROM timeline_chat_messages
                        WHERE video_id = $1
                        ORDER BY created_at DESC, id DESC
                        LIMIT $2
                    ) AS recent
                    ORDER BY created_at ASC, id ASC
                    "#,
                )
                .bind(video_id)
                .bind(limit)
                .fetch_all(pool)
                .await?;
                Ok(rows.into_iter().map(ChatMessage::from).collect())
            }
            Self::Memory(messages) => {
                let guard = messages.read().await;
                let Some(history) = guard.get(&video_id) else {
                    return Ok(Vec::new());
                };
                let keep = usize::try_from(limit.max(0)).unwrap_or(usize::MAX);
                let skip = history.len().saturating_sub(keep);
                Ok(history[skip..].to_vec())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use uuid::Uuid;

    use super::ChatStore;
    use crate::auth::{Identity, Profile};
    use crate::store::test_support::test_pool;
    use crate::timeline::model::{ChatMessage, WatchSession};

    fn author(video_id: Uuid) -> WatchSession {
        let identity = Identity {
            user_id: Uuid::new_v4(),
            profile: Profile { username: "noor".into(), ..Profile::default() },
        };
        WatchSession::new(&identity, Uuid::new_v4(), video_id)
    }

    #[tokio::test]
    async fn recent_history_keeps_latest_messages_in_order() {
        let store = ChatStore::in_memory();
        let video_id = Uuid::new_v4();
        let author = author(video_id);

        for i in 0..5 {
            store.insert(&ChatMessage::new(&author, format!("m{i}"))).await.expect("insert");
        }

        let recent = store.recent_for_video(video_id, 3).await.expect("history");
        let texts: Vec<_> = recent.iter().map(|m| m.message.as_str()).collect();
        assert_eq!(texts, vec!["m2", "m3", "m4"]);
    }

    #[tokio::test]
    async fn history_is_scoped_per_video() {
        let store = ChatStore::in_memory();
        let here = author(Uuid::new_v4());
        store.insert(&ChatMessage::new(&here, "hello".into())).await.expect("insert");

        assert!(store.recent_for_video(Uuid::new_v4(), 10).await.expect("history").is_empty());
        assert_eq!(store.recent_for_video(here.video_id, 10).await.expect("history").len(), 1);
    }

    #[tokio::test]
    async fn postgres_history_round_trips() {
        let Some(pool) = test_pool().await else {
            return;
        };
        let store = ChatStore::Postgres(pool);
        let author = author(Uuid::new_v4());
        let message = ChatMessage::new(&author, "persisted".into());
        store.insert(&message).await.expect("insert");

        let history = store.recent_for_video(author.video_id, 10).await.expect("history");
        assert_eq!(history, vec![message]);
    }
}
