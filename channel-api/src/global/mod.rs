use std::sync::Arc;

use common::context::Context;
use common::rmq::RmqConnection;

use crate::config::AppConfig;

pub struct GlobalState {
    pub config: AppConfig,
    pub ctx: Context,
    pub db: Arc<sqlx::PgPool>,
    pub redis: Arc<fred::clients::RedisPool>,
    pub rmq: RmqConnection,
}

impl GlobalState {
    pub fn new(
        config: AppConfig,
        ctx: Context,
        db: Arc<sqlx::PgPool>,
        redis: Arc<fred::clients::RedisPool>,
        rmq: RmqConnection,
    ) -> Self {
        Self {
            config,
            ctx,
            db,
            redis,
            rmq,
        }
    }
}
