use crate::{CacheError, KvCache};
use async_trait::async_trait;
use bb8_redis::RedisConnectionManager;
use redis::AsyncCommands;
use std::time::Duration;
use tracing::{trace, warn};

type RedisPool = bb8::Pool<RedisConnectionManager>;

/// A shared KV cache backed by Redis, for operators running more than one
/// agent process that should see the same cached results.
///
/// Pooling follows the reference system's `redis-rate-limiter` crate: a
/// `bb8` pool of `RedisConnectionManager` connections, with an error sink
/// that logs pool-level failures (a dropped connection, a full pool) at
/// `warn` instead of propagating them as request failures.
#[derive(Debug, Clone)]
pub struct RedisCache {
    pool: RedisPool,
}

#[derive(Debug, Clone)]
struct RedisErrorSink;

impl bb8::ErrorSink<redis::RedisError> for RedisErrorSink {
    fn sink(&self, err: redis::RedisError) {
        warn!(?err, "redis error");
    }

    fn boxed_clone(&self) -> Box<dyn bb8::ErrorSink<redis::RedisError>> {
        Box::new(self.clone())
    }
}

impl RedisCache {
    pub async fn new(redis_url: &str, max_size: u32) -> anyhow::Result<Self> {
        let manager = RedisConnectionManager::new(redis_url)?;

        let pool = bb8::Pool::builder()
            .error_sink(RedisErrorSink.boxed_clone())
            .max_size(max_size)
            .build(manager)
            .await?;

        Ok(Self { pool })
    }
}

#[async_trait]
impl KvCache for RedisCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| CacheError::Pool(err.to_string()))?;

        let value: Option<String> = conn.get(key).await?;

        trace!(%key, hit = value.is_some(), "redis cache lookup");

        Ok(value)
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        let mut conn = self
            .pool
            .get()
            .await
            .map_err(|err| CacheError::Pool(err.to_string()))?;

        let ttl_secs = ttl.as_secs().max(1);

        let _: () = conn.set_ex(key, value, ttl_secs).await?;

        Ok(())
    }
}
