use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Result};
use common::context::Context;
use common::rmq::RmqConnection;
use common::{logging, signal};
use fred::interfaces::ClientLike;
use lapin::ConnectionProperties;
use tokio::signal::unix::SignalKind;
use tokio::{select, time};

mod api;
mod config;
mod database;
mod global;
mod messaging;
mod repository;
#[cfg(test)]
mod tests;
mod tokens;

const RMQ_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    let config = config::AppConfig::parse()?;
    logging::init(&config.log_level)?;

    let db = Arc::new(
        sqlx::PgPool::connect(&config.database_url)
            .await
            .context("failed to connect to postgres")?,
    );

    let redis_server = fred::types::Server::try_from(config.redis_address.as_str())
        .context("failed to parse redis address")?;
    let redis = Arc::new(
        fred::clients::RedisPool::new(
            fred::types::RedisConfig {
                server: fred::types::ServerConfig::Centralized {
                    server: redis_server,
                },
                ..Default::default()
            },
            None,
            None,
            None,
            config.redis_pool_size,
        )
        .context("failed to create redis pool")?,
    );
    redis.connect();
    redis
        .wait_for_connect()
        .await
        .context("failed to connect to redis")?;

    let rmq = RmqConnection::connect(
        config.rmq_url.clone(),
        ConnectionProperties::default(),
        RMQ_CONNECT_TIMEOUT,
    )
    .await
    .context("failed to connect to rabbitmq")?;

    let (ctx, handler) = Context::new();

    let global = Arc::new(global::GlobalState::new(config, ctx, db, redis, rmq));

    tracing::info!("starting");

    let api_future = tokio::spawn(api::run(global.clone()));
    let consumer_future = tokio::spawn(messaging::consumer::run(global.clone()));

    let reconnect_future = {
        let global = global.clone();
        tokio::spawn(async move {
            select! {
                _ = global.ctx.done() => {}
                r = global.rmq.handle_reconnects() => {
                    tracing::error!("rabbitmq reconnect loop stopped: {:?}", r);
                }
            }
        })
    };

    // Listen on both sigint and sigterm and cancel the context when either is received
    let mut signal_handler = signal::SignalHandler::new()
        .with_signal(SignalKind::interrupt())
        .with_signal(SignalKind::terminate());

    select! {
        r = api_future => tracing::error!("api stopped unexpectedly: {:?}", r),
        r = consumer_future => tracing::error!("consumer stopped unexpectedly: {:?}", r),
        _ = signal_handler.recv() => tracing::info!("shutting down"),
    }

    if let Err(err) = global.rmq.close().await {
        tracing::warn!("failed to close rabbitmq connection: {}", err);
    }

    reconnect_future.abort();

    // We cannot have a context in scope when we cancel the handler, otherwise it will deadlock.
    drop(global);

    tracing::info!("waiting for tasks to finish");

    select! {
        _ = time::sleep(Duration::from_secs(60)) => tracing::warn!("force shutting down"),
        _ = signal_handler.recv() => tracing::warn!("force shutting down"),
        _ = handler.cancel() => tracing::info!("shutting down"),
    }

    Ok(())
}
