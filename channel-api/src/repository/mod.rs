use async_trait::async_trait;
use common::context::{CancelReason, Context};
use futures::Future;
use uuid::Uuid;

use crate::database::channel::Channel;

pub mod postgres;
pub mod redis;
pub mod session;

/// Error taxonomy shared by both channel stores.
///
/// `NotFound` and `AlreadyExists` are expected outcomes, distinguished from
/// failure. `CorruptRecord` is fatal and always surfaced, it means a stored
/// value no longer matches the write format. `Store` is a transient
/// network/IO failure; this layer never retries it.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record does not exist")]
    NotFound,
    #[error("record already exists")]
    AlreadyExists,
    #[error("corrupt record: {0}")]
    CorruptRecord(#[source] serde_json::Error),
    #[error("operation canceled: {0}")]
    Canceled(CancelReason),
    #[error("store error: {0}")]
    Store(#[source] anyhow::Error),
}

impl RepositoryError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound)
    }
}

impl From<sqlx::Error> for RepositoryError {
    fn from(err: sqlx::Error) -> Self {
        match err {
            sqlx::Error::RowNotFound => Self::NotFound,
            sqlx::Error::Database(err) if err.is_unique_violation() => Self::AlreadyExists,
            err => Self::Store(err.into()),
        }
    }
}

impl From<fred::error::RedisError> for RepositoryError {
    fn from(err: fred::error::RedisError) -> Self {
        Self::Store(err.into())
    }
}

/// A request for one page of an enumeration. `cursor` is `None` for the
/// first page; subsequent pages pass back the cursor of the previous result.
#[derive(Debug, Clone, Copy)]
pub struct FindAllPage<C> {
    pub size: u64,
    pub cursor: Option<C>,
}

/// One page of channels. `cursor` is `None` when there is no more data.
#[derive(Debug, Clone)]
pub struct FindResult<C> {
    pub channels: Vec<Channel>,
    pub cursor: Option<C>,
}

/// The abstract contract both stores implement independently. There is no
/// cross-store transaction; a caller wiring both stores together accepts
/// manual reconciliation between them.
#[async_trait]
pub trait ChannelRepository {
    /// The opaque pagination cursor of this store.
    type Cursor;

    async fn insert(&self, ctx: &Context, channel: &Channel) -> Result<(), RepositoryError>;

    async fn find_by_id(&self, ctx: &Context, id: Uuid) -> Result<Channel, RepositoryError>;

    async fn update(&self, ctx: &Context, channel: &Channel) -> Result<(), RepositoryError>;

    async fn delete_by_id(&self, ctx: &Context, id: Uuid) -> Result<(), RepositoryError>;

    async fn find_all(
        &self,
        ctx: &Context,
        page: FindAllPage<Self::Cursor>,
    ) -> Result<FindResult<Self::Cursor>, RepositoryError>;
}

/// Races a store operation against the caller's context. A canceled
/// operation either never happened or fully happened on the store side,
/// the racing here only decides what the caller observes.
pub(crate) async fn run_with_context<T, F>(ctx: &Context, fut: F) -> Result<T, RepositoryError>
where
    F: Future<Output = Result<T, RepositoryError>> + Send,
{
    tokio::select! {
        res = fut => res,
        reason = ctx.done() => Err(RepositoryError::Canceled(reason)),
    }
}
