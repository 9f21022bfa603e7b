use std::sync::Arc;

use async_trait::async_trait;
use common::context::Context;
use fred::clients::RedisPool;
use fred::interfaces::{ClientLike, KeysInterface, SetsInterface, TransactionInterface};
use fred::types::{ClusterHash, CustomCommand, RedisValue, SetOptions};
use uuid::Uuid;

use crate::database::channel::Channel;
use crate::repository::{
    run_with_context, ChannelRepository, FindAllPage, FindResult, RepositoryError,
};

/// The set of every cached channel key, used for enumeration.
const CHANNELS_SET: &str = "channels";

fn channel_key(id: Uuid) -> String {
    format!("channel:{}", id)
}

/// The cache-aside channel store.
///
/// Values are JSON blobs under `channel:<id>`; the `channels` set indexes
/// every key. Insert and delete touch value and index inside one MULTI/EXEC
/// so the two are never observable out of sync.
pub struct RedisRepository {
    redis: Arc<RedisPool>,
}

impl RedisRepository {
    pub fn new(redis: Arc<RedisPool>) -> Self {
        Self { redis }
    }

    fn encode(channel: &Channel) -> Result<String, RepositoryError> {
        serde_json::to_string(channel).map_err(|err| RepositoryError::Store(err.into()))
    }
}

#[async_trait]
impl ChannelRepository for RedisRepository {
    type Cursor = u64;

    async fn insert(&self, ctx: &Context, channel: &Channel) -> Result<(), RepositoryError> {
        let data = Self::encode(channel)?;
        let key = channel_key(channel.channel_id);

        run_with_context(ctx, async {
            let trx = self.redis.next().multi();

            let () = trx
                .set(key.as_str(), data, None, Some(SetOptions::NX), false)
                .await?;
            let () = trx.sadd(CHANNELS_SET, key.as_str()).await?;

            let results: Vec<RedisValue> = trx.exec(true).await?;

            // SET NX replies nil when the key already holds a value. The
            // SADD next to it was a no-op in that case, the key was already
            // indexed by the insert that created it.
            match results.first() {
                Some(reply) if !reply.is_null() => Ok(()),
                _ => Err(RepositoryError::AlreadyExists),
            }
        })
        .await
    }

    async fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Channel, RepositoryError> {
        let key = channel_key(id);

        run_with_context(ctx, async {
            let value: Option<String> = self.redis.next().get(key.as_str()).await?;

            match value {
                Some(value) => {
                    serde_json::from_str(&value).map_err(RepositoryError::CorruptRecord)
                }
                None => Err(RepositoryError::NotFound),
            }
        })
        .await
    }

    /// Replaces an existing value. Never creates one, the enumeration index
    /// is not touched.
    async fn update(&self, ctx: &Context, channel: &Channel) -> Result<(), RepositoryError> {
        let data = Self::encode(channel)?;
        let key = channel_key(channel.channel_id);

        run_with_context(ctx, async {
            let replaced: Option<String> = self
                .redis
                .next()
                .set(key.as_str(), data, None, Some(SetOptions::XX), false)
                .await?;

            match replaced {
                Some(_) => Ok(()),
                None => Err(RepositoryError::NotFound),
            }
        })
        .await
    }

    /// Strict delete: a missing key is `NotFound`, unlike the Postgres
    /// store's idempotent delete.
    async fn delete_by_id(&self, ctx: &Context, id: Uuid) -> Result<(), RepositoryError> {
        let key = channel_key(id);

        run_with_context(ctx, async {
            let trx = self.redis.next().multi();

            let () = trx.del(key.as_str()).await?;
            let () = trx.srem(CHANNELS_SET, key.as_str()).await?;

            let results: Vec<RedisValue> = trx.exec(true).await?;

            match results.first().and_then(|reply| reply.as_u64()) {
                Some(0) | None => Err(RepositoryError::NotFound),
                Some(_) => Ok(()),
            }
        })
        .await
    }

    /// Cursor scan over the enumeration set. The set is unordered, so page
    /// boundaries are not stable under concurrent mutation; a key whose
    /// value vanished between the scan and the fetch is omitted from the
    /// page rather than failing it.
    async fn find_all(
        &self,
        ctx: &Context,
        page: FindAllPage<u64>,
    ) -> Result<FindResult<u64>, RepositoryError> {
        run_with_context(ctx, async {
            let client = self.redis.next();

            // Raw SSCAN so the opaque cursor round-trips to the caller.
            let sscan = CustomCommand::new_static("SSCAN", ClusterHash::FirstKey, false);
            let args: Vec<RedisValue> = vec![
                CHANNELS_SET.into(),
                page.cursor.unwrap_or(0).to_string().into(),
                "COUNT".into(),
                page.size.to_string().into(),
            ];

            let (next, keys): (u64, Vec<String>) = client.custom(sscan, args).await?;
            let cursor = (next != 0).then_some(next);

            if keys.is_empty() {
                return Ok(FindResult {
                    channels: Vec::new(),
                    cursor,
                });
            }

            let values: Vec<Option<String>> = client.mget(keys).await?;

            let mut channels = Vec::with_capacity(values.len());
            for value in values.into_iter().flatten() {
                channels.push(serde_json::from_str(&value).map_err(RepositoryError::CorruptRecord)?);
            }

            Ok(FindResult { channels, cursor })
        })
        .await
    }
}
