use std::sync::Arc;

use common::context::Context;
use fred::clients::RedisPool;
use fred::interfaces::KeysInterface;
use uuid::Uuid;

use crate::repository::{run_with_context, RepositoryError};

/// The session-credential cache writer.
///
/// Credentials live in their own key space, keyed by the subject's canonical
/// uuid string, the value is the raw token with no envelope. No TTL is set
/// here, lifetime policy belongs to the store configuration.
pub struct SessionRepository {
    redis: Arc<RedisPool>,
}

impl SessionRepository {
    pub fn new(redis: Arc<RedisPool>) -> Self {
        Self { redis }
    }

    /// Unconditional create-or-overwrite, deliberately not cache-aside
    /// strict: re-issuance for the same subject always wins with the latest
    /// token, which also makes duplicate queue deliveries harmless.
    pub async fn insert(
        &self,
        ctx: &Context,
        subject_id: Uuid,
        token: &str,
    ) -> Result<(), RepositoryError> {
        run_with_context(ctx, async {
            let () = self
                .redis
                .next()
                .set(subject_id.to_string(), token, None, None, false)
                .await?;

            Ok(())
        })
        .await
    }
}
