use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use common::context::Context;
use uuid::Uuid;

use crate::database::channel::{Channel, UserAccess};
use crate::repository::{
    run_with_context, ChannelRepository, FindAllPage, FindResult, RepositoryError,
};

// LIMIT binds as i64, sizes beyond that clamp instead of wrapping.
fn page_limit(size: u64) -> i64 {
    i64::try_from(size).unwrap_or(i64::MAX)
}

/// The durable channel store, the system of record.
pub struct PostgresRepository {
    db: Arc<sqlx::PgPool>,
}

impl PostgresRepository {
    pub fn new(db: Arc<sqlx::PgPool>) -> Self {
        Self { db }
    }

    /// Creates the channel tables if they do not exist.
    pub async fn migrate(&self) -> Result<(), RepositoryError> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS channels (
                channel_id UUID PRIMARY KEY,
                name VARCHAR(255),
                is_public BOOLEAN NOT NULL,
                owner_id UUID NOT NULL,
                created_at TIMESTAMPTZ NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL
            )",
        )
        .execute(&*self.db)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS user_access (
                channel_id UUID NOT NULL REFERENCES channels (channel_id) ON DELETE CASCADE,
                user_id UUID NOT NULL,
                is_admin BOOLEAN NOT NULL,
                can_write BOOLEAN NOT NULL,
                PRIMARY KEY (channel_id, user_id)
            )",
        )
        .execute(&*self.db)
        .await?;

        Ok(())
    }

    async fn try_insert(&self, channel: &Channel) -> Result<(), RepositoryError> {
        let mut tx = self.db.begin().await?;

        sqlx::query(
            "INSERT INTO channels (channel_id, name, is_public, owner_id, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(channel.channel_id)
        .bind(&channel.name)
        .bind(channel.is_public)
        .bind(channel.owner_id)
        .bind(channel.created_at)
        .bind(channel.updated_at)
        .execute(&mut *tx)
        .await?;

        for grant in &channel.users_access {
            sqlx::query(
                "INSERT INTO user_access (channel_id, user_id, is_admin, can_write)
                 VALUES ($1, $2, $3, $4)",
            )
            .bind(channel.channel_id)
            .bind(grant.user_id)
            .bind(grant.is_admin)
            .bind(grant.can_write)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;

        Ok(())
    }

    async fn load_grants(&self, id: Uuid) -> Result<Vec<UserAccess>, RepositoryError> {
        Ok(sqlx::query_as(
            "SELECT channel_id, user_id, is_admin, can_write FROM user_access WHERE channel_id = $1",
        )
        .bind(id)
        .fetch_all(&*self.db)
        .await?)
    }

    async fn with_grants(&self, channel: Option<Channel>) -> Result<Channel, RepositoryError> {
        let mut channel = channel.ok_or(RepositoryError::NotFound)?;
        channel.users_access = self.load_grants(channel.channel_id).await?;
        Ok(channel)
    }

    pub async fn find_by_name(&self, ctx: &Context, name: &str) -> Result<Channel, RepositoryError> {
        run_with_context(ctx, async {
            let channel: Option<Channel> = sqlx::query_as(
                "SELECT channel_id, name, is_public, owner_id, created_at, updated_at
                 FROM channels WHERE name = $1",
            )
            .bind(name)
            .fetch_optional(&*self.db)
            .await?;

            self.with_grants(channel).await
        })
        .await
    }
}

#[async_trait]
impl ChannelRepository for PostgresRepository {
    type Cursor = Uuid;

    /// Inserts a new row plus its grants in one transaction. On failure a
    /// best-effort schema repair runs first, the original error is always
    /// the one reported.
    async fn insert(&self, ctx: &Context, channel: &Channel) -> Result<(), RepositoryError> {
        run_with_context(ctx, async {
            match self.try_insert(channel).await {
                Ok(()) => Ok(()),
                Err(err) => {
                    if let Err(repair) = self.migrate().await {
                        tracing::debug!("schema repair failed: {}", repair);
                    }
                    Err(err)
                }
            }
        })
        .await
    }

    async fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Channel, RepositoryError> {
        run_with_context(ctx, async {
            let channel: Option<Channel> = sqlx::query_as(
                "SELECT channel_id, name, is_public, owner_id, created_at, updated_at
                 FROM channels WHERE channel_id = $1",
            )
            .bind(id)
            .fetch_optional(&*self.db)
            .await?;

            self.with_grants(channel).await
        })
        .await
    }

    /// Full-row replace plus grant replacement in one transaction. No
    /// upsert, a missing row is `NotFound`.
    async fn update(&self, ctx: &Context, channel: &Channel) -> Result<(), RepositoryError> {
        run_with_context(ctx, async {
            let mut tx = self.db.begin().await?;

            let result = sqlx::query(
                "UPDATE channels SET name = $2, is_public = $3, owner_id = $4, created_at = $5,
                 updated_at = $6 WHERE channel_id = $1",
            )
            .bind(channel.channel_id)
            .bind(&channel.name)
            .bind(channel.is_public)
            .bind(channel.owner_id)
            .bind(channel.created_at)
            .bind(channel.updated_at)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(RepositoryError::NotFound);
            }

            sqlx::query("DELETE FROM user_access WHERE channel_id = $1")
                .bind(channel.channel_id)
                .execute(&mut *tx)
                .await?;

            for grant in &channel.users_access {
                sqlx::query(
                    "INSERT INTO user_access (channel_id, user_id, is_admin, can_write)
                     VALUES ($1, $2, $3, $4)",
                )
                .bind(channel.channel_id)
                .bind(grant.user_id)
                .bind(grant.is_admin)
                .bind(grant.can_write)
                .execute(&mut *tx)
                .await?;
            }

            tx.commit().await?;

            Ok(())
        })
        .await
    }

    /// Idempotent delete: zero matched rows is still a success, unlike the
    /// cache store's strict delete. Grants go with the row via cascade.
    async fn delete_by_id(&self, ctx: &Context, id: Uuid) -> Result<(), RepositoryError> {
        run_with_context(ctx, async {
            sqlx::query("DELETE FROM channels WHERE channel_id = $1")
                .bind(id)
                .execute(&*self.db)
                .await?;

            Ok(())
        })
        .await
    }

    /// Pages ordered by `channel_id` ascending; the cursor is an exclusive
    /// lower bound on the identifier. The returned cursor is the id of the
    /// last row of the page, so resumption is exact.
    async fn find_all(
        &self,
        ctx: &Context,
        page: FindAllPage<Uuid>,
    ) -> Result<FindResult<Uuid>, RepositoryError> {
        run_with_context(ctx, async {
            let query = match page.cursor {
                Some(cursor) => sqlx::query_as(
                    "SELECT channel_id, name, is_public, owner_id, created_at, updated_at
                     FROM channels WHERE channel_id > $1 ORDER BY channel_id ASC LIMIT $2",
                )
                .bind(cursor)
                .bind(page_limit(page.size)),
                None => sqlx::query_as(
                    "SELECT channel_id, name, is_public, owner_id, created_at, updated_at
                     FROM channels ORDER BY channel_id ASC LIMIT $1",
                )
                .bind(page_limit(page.size)),
            };

            let mut channels: Vec<Channel> = query.fetch_all(&*self.db).await?;

            if channels.is_empty() {
                return Ok(FindResult {
                    channels,
                    cursor: None,
                });
            }

            let ids: Vec<Uuid> = channels.iter().map(|c| c.channel_id).collect();
            let grants: Vec<UserAccess> = sqlx::query_as(
                "SELECT channel_id, user_id, is_admin, can_write FROM user_access
                 WHERE channel_id = ANY($1)",
            )
            .bind(&ids)
            .fetch_all(&*self.db)
            .await?;

            let mut by_channel: HashMap<Uuid, Vec<UserAccess>> = HashMap::new();
            for grant in grants {
                by_channel.entry(grant.channel_id).or_default().push(grant);
            }

            for channel in &mut channels {
                if let Some(grants) = by_channel.remove(&channel.channel_id) {
                    channel.users_access = grants;
                }
            }

            let cursor = channels.last().map(|c| c.channel_id);

            Ok(FindResult { channels, cursor })
        })
        .await
    }
}
