use std::sync::Arc;

use anyhow::Result;
use futures::StreamExt;
use lapin::options::BasicConsumeOptions;
use tokio::select;
use uuid::Uuid;

use crate::config::AppConfig;
use crate::global::GlobalState;
use crate::messaging::SessionTokenMessage;
use crate::repository::session::SessionRepository;
use crate::tokens;

const CONSUMER_TAG: &str = "channel-api";

/// Lifecycle of the ingestion loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Connected,
    Consuming,
    Stopped,
}

/// Consumes credential-issuance events and pushes validated session tokens
/// into the cache.
///
/// Per-event failures never propagate: an undecodable body or a rejected
/// token is logged and dropped, never requeued, and the loop moves on to the
/// next delivery. Duplicate deliveries are tolerated because the writer
/// overwrites unconditionally.
pub async fn run(global: Arc<GlobalState>) -> Result<()> {
    let sessions = SessionRepository::new(global.redis.clone());

    let state = State::Connected;
    tracing::debug!(state = ?state, queue = %global.config.session_queue, "subscribing");

    let stream = global.rmq.consume(
        &global.config.session_queue,
        CONSUMER_TAG,
        BasicConsumeOptions {
            no_ack: true,
            ..Default::default()
        },
    );
    tokio::pin!(stream);

    let state = State::Consuming;
    tracing::info!(state = ?state, queue = %global.config.session_queue, "consuming session tokens");

    loop {
        select! {
            _ = global.ctx.done() => break,
            delivery = stream.next() => match delivery {
                Some(Ok(delivery)) => {
                    handle_event(&global, &sessions, &delivery.data).await;
                }
                Some(Err(err)) => {
                    tracing::error!("failed to receive session token event: {}", err);
                }
                None => break,
            },
        }
    }

    let state = State::Stopped;
    tracing::info!(state = ?state, "session token consumer stopped");

    Ok(())
}

async fn handle_event(global: &Arc<GlobalState>, sessions: &SessionRepository, body: &[u8]) {
    let Some((user_id, token)) = decode_and_validate(&global.config, body) else {
        return;
    };

    // The event was consumed either way, a failed write is not redelivered.
    if let Err(err) = sessions.insert(&global.ctx, user_id, &token).await {
        tracing::error!(user_id = %user_id, "failed to store session token: {}", err);
    } else {
        tracing::debug!(user_id = %user_id, "stored session token");
    }
}

/// Decode and validate without touching any store, so the drop decisions are
/// testable without a live queue.
pub(crate) fn decode_and_validate(config: &AppConfig, body: &[u8]) -> Option<(Uuid, String)> {
    let message: SessionTokenMessage = match serde_json::from_slice(body) {
        Ok(message) => message,
        Err(err) => {
            tracing::warn!("dropping undecodable session token event: {}", err);
            return None;
        }
    };

    match tokens::verify(
        &config.jwt_secret,
        &config.jwt_issuer,
        &message.token,
        message.user_id,
    ) {
        Ok(_) => Some((message.user_id, message.token)),
        Err(err) => {
            tracing::warn!(user_id = %message.user_id, "dropping session token event: {}", err);
            None
        }
    }
}
