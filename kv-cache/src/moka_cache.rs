use crate::{CacheError, KvCache};
use async_trait::async_trait;
use moka::future::Cache;
use std::time::Duration;
use tracing::trace;

/// An in-process cache backed by `moka`.
///
/// This is the default KV cache: it costs nothing to stand up, needs no
/// network round trip, and is good enough for a single long-running agent
/// process. Entries do not survive a restart and are not shared across
/// processes; an operator who needs either reaches for [`crate::RedisCache`]
/// instead.
///
/// `moka::future::Cache` applies a single time-to-live policy to the whole
/// cache rather than a per-entry TTL, so `ttl` on [`KvCache::set`] is only
/// honored insofar as it matches the TTL this cache was built with -- in
/// practice `rpc-fabric` always calls `set` with `PROVIDER_CACHE_TTL`, so a
/// single cache-wide policy is sufficient.
#[derive(Debug, Clone)]
pub struct MokaCache {
    inner: Cache<String, String>,
}

impl MokaCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .time_to_live(ttl)
            .build();

        Self { inner }
    }
}

#[async_trait]
impl KvCache for MokaCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        let hit = self.inner.get(key).await;

        trace!(%key, hit = hit.is_some(), "moka cache lookup");

        Ok(hit)
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.inner.insert(key.to_owned(), value).await;

        Ok(())
    }
}
