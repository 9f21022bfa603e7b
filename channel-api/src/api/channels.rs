use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use chrono::Utc;
use common::context::Context;
use hyper::{Body, Request, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;
use uuid::Uuid;

use crate::database::channel::{Channel, UserAccess};
use crate::global::GlobalState;
use crate::repository::postgres::PostgresRepository;
use crate::repository::redis::RedisRepository;
use crate::repository::{ChannelRepository, FindAllPage, RepositoryError};

use super::{json_response, message_response, repository_error_response};

const DEFAULT_PAGE_SIZE: u64 = 50;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

fn request_context(global: &Arc<GlobalState>) -> (Context, common::context::Handler) {
    Context::with_parent(global.ctx.clone(), Some(Instant::now() + REQUEST_TIMEOUT))
}

#[derive(Debug, Deserialize)]
struct GrantBody {
    user_id: Uuid,
    #[serde(default)]
    is_admin: bool,
    #[serde(default)]
    can_write: bool,
}

fn grants(channel_id: Uuid, grants: Vec<GrantBody>) -> Vec<UserAccess> {
    grants
        .into_iter()
        .map(|grant| UserAccess {
            channel_id,
            user_id: grant.user_id,
            is_admin: grant.is_admin,
            can_write: grant.can_write,
        })
        .collect()
}

async fn parse_body<T: serde::de::DeserializeOwned>(req: Request<Body>) -> Result<Option<T>> {
    let body = hyper::body::to_bytes(req.into_body()).await?;
    Ok(serde_json::from_slice(&body).ok())
}

/// Best-effort cache maintenance after a durable write. Failures are logged,
/// never returned: the durable store already committed and the cache is
/// allowed to be stale.
async fn sync_cache<F>(what: &str, fut: F)
where
    F: std::future::Future<Output = Result<(), RepositoryError>>,
{
    match fut.await {
        Ok(()) | Err(RepositoryError::NotFound) | Err(RepositoryError::AlreadyExists) => {}
        Err(err) => tracing::warn!("failed to {} cached channel: {}", what, err),
    }
}

pub async fn create(global: Arc<GlobalState>, req: Request<Body>) -> Result<Response<Body>> {
    #[derive(Debug, Deserialize)]
    struct CreateBody {
        name: Option<String>,
        #[serde(default)]
        is_public: bool,
        owner_id: Uuid,
        #[serde(default)]
        users_access: Vec<GrantBody>,
    }

    let Some(body) = parse_body::<CreateBody>(req).await? else {
        return Ok(message_response(StatusCode::BAD_REQUEST, "invalid body"));
    };

    let now = Utc::now();
    let channel_id = Uuid::new_v4();
    let channel = Channel {
        channel_id,
        name: body.name,
        is_public: body.is_public,
        owner_id: body.owner_id,
        users_access: grants(channel_id, body.users_access),
        created_at: now,
        updated_at: now,
    };

    let (ctx, _handler) = request_context(&global);

    let pg = PostgresRepository::new(global.db.clone());
    if let Err(err) = pg.insert(&ctx, &channel).await {
        return Ok(repository_error_response(err));
    }

    let rd = RedisRepository::new(global.redis.clone());
    sync_cache("insert", rd.insert(&ctx, &channel)).await;

    json_response(StatusCode::CREATED, &channel)
}

pub async fn list(global: Arc<GlobalState>, req: Request<Body>) -> Result<Response<Body>> {
    let mut cursor = None;
    let mut size = DEFAULT_PAGE_SIZE;

    for pair in req.uri().query().unwrap_or_default().split('&') {
        match pair.split_once('=') {
            Some(("cursor", value)) => match value.parse::<Uuid>() {
                Ok(value) => cursor = Some(value),
                Err(_) => {
                    return Ok(message_response(StatusCode::BAD_REQUEST, "invalid cursor"));
                }
            },
            Some(("size", value)) => match value.parse::<u64>() {
                Ok(value) if value > 0 => size = value.min(100),
                _ => return Ok(message_response(StatusCode::BAD_REQUEST, "invalid size")),
            },
            _ => {}
        }
    }

    let (ctx, _handler) = request_context(&global);

    let pg = PostgresRepository::new(global.db.clone());
    let result = match pg.find_all(&ctx, FindAllPage { size, cursor }).await {
        Ok(result) => result,
        Err(err) => return Ok(repository_error_response(err)),
    };

    #[derive(Debug, Serialize)]
    struct ListResponse {
        items: Vec<Channel>,
        #[serde(skip_serializing_if = "Option::is_none")]
        next: Option<Uuid>,
    }

    json_response(
        StatusCode::OK,
        &ListResponse {
            items: result.channels,
            next: result.cursor,
        },
    )
}

/// Cache-aside read: the cache is consulted first, a miss falls back to the
/// durable store and back-fills the cache.
pub async fn get_by_id(global: Arc<GlobalState>, id: Uuid) -> Result<Response<Body>> {
    let (ctx, _handler) = request_context(&global);

    let rd = RedisRepository::new(global.redis.clone());
    match rd.find_by_id(&ctx, id).await {
        Ok(channel) => return json_response(StatusCode::OK, &channel),
        Err(RepositoryError::NotFound) => {}
        Err(err @ RepositoryError::CorruptRecord(_)) => {
            return Ok(repository_error_response(err));
        }
        Err(err) => tracing::warn!("cache read failed: {}", err),
    }

    let pg = PostgresRepository::new(global.db.clone());
    let channel = match pg.find_by_id(&ctx, id).await {
        Ok(channel) => channel,
        Err(err) => return Ok(repository_error_response(err)),
    };

    sync_cache("populate", rd.insert(&ctx, &channel)).await;

    json_response(StatusCode::OK, &channel)
}

pub async fn search(global: Arc<GlobalState>, name: &str) -> Result<Response<Body>> {
    let (ctx, _handler) = request_context(&global);

    let pg = PostgresRepository::new(global.db.clone());
    match pg.find_by_name(&ctx, name).await {
        Ok(channel) => json_response(StatusCode::OK, &channel),
        Err(err) => Ok(repository_error_response(err)),
    }
}

pub async fn update_by_id(
    global: Arc<GlobalState>,
    id: Uuid,
    req: Request<Body>,
) -> Result<Response<Body>> {
    #[derive(Debug, Default, Deserialize)]
    #[serde(default)]
    struct UpdateBody {
        name: Option<String>,
        is_public: Option<bool>,
        owner_id: Option<Uuid>,
        users_access: Option<Vec<GrantBody>>,
    }

    let Some(body) = parse_body::<UpdateBody>(req).await? else {
        return Ok(message_response(StatusCode::BAD_REQUEST, "invalid body"));
    };

    let (ctx, _handler) = request_context(&global);

    let pg = PostgresRepository::new(global.db.clone());
    let mut channel = match pg.find_by_id(&ctx, id).await {
        Ok(channel) => channel,
        Err(err) => return Ok(repository_error_response(err)),
    };

    if let Some(name) = body.name {
        channel.name = Some(name);
    }
    if let Some(is_public) = body.is_public {
        channel.is_public = is_public;
    }
    if let Some(owner_id) = body.owner_id {
        channel.owner_id = owner_id;
    }
    if let Some(users_access) = body.users_access {
        channel.users_access = grants(id, users_access);
    }
    channel.updated_at = Utc::now();

    if let Err(err) = pg.update(&ctx, &channel).await {
        return Ok(repository_error_response(err));
    }

    let rd = RedisRepository::new(global.redis.clone());
    sync_cache("update", rd.update(&ctx, &channel)).await;

    json_response(StatusCode::OK, &channel)
}

pub async fn delete_by_id(global: Arc<GlobalState>, id: Uuid) -> Result<Response<Body>> {
    let (ctx, _handler) = request_context(&global);

    let pg = PostgresRepository::new(global.db.clone());
    if let Err(err) = pg.delete_by_id(&ctx, id).await {
        return Ok(repository_error_response(err));
    }

    let rd = RedisRepository::new(global.redis.clone());
    sync_cache("evict", rd.delete_by_id(&ctx, id)).await;

    Ok(Response::builder()
        .status(StatusCode::NO_CONTENT)
        .body(Body::empty())?)
}
