// Timeline registries.
//
// Each registry is an enum over a PostgreSQL backend and an in-memory backend.
// The in-memory backend serves single-process deployments without a database
// and the unit tests. All operations are single-record atomic; multi-record
// consistency is the engine's job.

pub mod chat;
pub mod groups;
pub mod watch_sessions;

use anyhow::Context;
use sqlx::PgPool;
use tracing::info;

use crate::config::RelayConfig;
use crate::db::{
    migrations::run_migrations,
    pool::{check_pool_health, create_pg_pool, PoolConfig},
};

pub use self::{chat::ChatStore, groups::GroupStore, watch_sessions::WatchSessionStore};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("corrupt {entity} record: {reason}")]
    CorruptRecord { entity: &'static str, reason: String },
}

/// The three registries the timeline engine drives.
#[derive(Clone)]
pub struct TimelineStore {
    pub sessions: WatchSessionStore,
    pub groups: GroupStore,
    pub chat: ChatStore,
    pool: Option<PgPool>,
}

impl TimelineStore {
    pub fn in_memory() -> Self {
        Self {
            sessions: WatchSessionStore::in_memory(),
            groups: GroupStore::in_memory(),
            chat: ChatStore::in_memory(),
            pool: None,
        }
    }

    pub fn postgres(pool: PgPool) -> Self {
        Self {
            sessions: WatchSessionStore::Postgres(pool.clone()),
            groups: GroupStore::Postgres(pool.clone()),
            chat: ChatStore::Postgres(pool.clone()),
            pool: Some(pool),
        }
    }

    /// PostgreSQL when a database URL is configured (migrated and health
    /// checked), in-memory otherwise.
    pub async fn connect(config: &RelayConfig) -> anyhow::Result<Self> {
        let Some(database_url) = config.database_url.as_deref() else {
            info!("no database configured, using in-memory timeline registries");
            return Ok(Self::in_memory());
        };

        let pool = create_pg_pool(database_url, PoolConfig::from_env())
            .await
            .context("failed to initialize relay PostgreSQL pool")?;
        check_pool_health(&pool).await?;
        run_migrations(&pool).await?;

        Ok(Self::postgres(pool))
    }

    pub fn backend_name(&self) -> &'static str {
        if self.pool.is_some() {
            "postgres"
        } else {
            "memory"
        }
    }

    /// Drops all watch sessions and groups. Their connections belonged to a
    /// previous process and cannot be resumed. Chat is kept.
    pub async fn clear_ephemeral_state(&self) -> Result<(u64, u64), StoreError> {
        let sessions = self.sessions.clear().await?;
        let groups = self.groups.clear().await?;
        Ok((sessions, groups))
    }

    pub async fn check_health(&self) -> anyhow::Result<()> {
        match &self.pool {
            Some(pool) => check_pool_health(pool).await,
            None => Ok(()),
        }
    }
}
