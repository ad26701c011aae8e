//! Wraps a [`RateLimitedEndpoint`] with cache lookup/population for
//! cacheable `eth_getLogs` calls (spec §4.2).
//!
//! Cacheability and the current-head lookup are kept together here because
//! both exist for the same reason: a log range is only safe to cache once
//! it is far enough behind the chain head that a reorg cannot invalidate it.

use crate::endpoint::RateLimitedEndpoint;
use crate::errors::{FabricError, FabricResult};
use crate::value::parse_hex_block_tag;
use kv_cache::KvCache;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::trace;

/// Amortizes the "what's the current head" lookup across however many
/// cacheable calls land within [`crate::config::GlobalSettings::block_number_ttl`]
/// of each other, so cache-admission checks don't themselves become a
/// second, uncached RPC call per request.
#[derive(Debug)]
struct HeadCache {
    ttl: Duration,
    value: Mutex<Option<(u64, Instant)>>,
}

impl HeadCache {
    fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            value: Mutex::new(None),
        }
    }
}

#[derive(Debug)]
pub struct CachingEndpoint {
    pub endpoint: Arc<RateLimitedEndpoint>,
    cache: Option<Arc<dyn KvCache>>,
    cache_namespace: String,
    provider_cache_ttl: Duration,
    max_reorg_distance: u64,
    head_cache: HeadCache,
    cache_hits: AtomicU64,
    cache_misses: AtomicU64,
}

impl CachingEndpoint {
    pub fn new(
        endpoint: Arc<RateLimitedEndpoint>,
        cache: Option<Arc<dyn KvCache>>,
        cache_namespace: String,
        provider_cache_ttl: Duration,
        max_reorg_distance: u64,
        block_number_ttl: Duration,
    ) -> Self {
        Self {
            endpoint,
            cache,
            cache_namespace,
            provider_cache_ttl,
            max_reorg_distance,
            head_cache: HeadCache::new(block_number_ttl),
            cache_hits: AtomicU64::new(0),
            cache_misses: AtomicU64::new(0),
        }
    }

    pub fn cache_hits(&self) -> u64 {
        self.cache_hits.load(Ordering::Relaxed)
    }

    pub fn cache_misses(&self) -> u64 {
        self.cache_misses.load(Ordering::Relaxed)
    }

    /// Sends `method`/`params`, consulting and populating the cache when the
    /// call qualifies.
    pub async fn send(&self, method: &str, params: &Value) -> FabricResult<Value> {
        let cache_key = match self.cacheable_key(method, params).await? {
            Some(key) => key,
            None => return self.endpoint.send(method, params).await,
        };

        if let Some(cache) = &self.cache {
            match cache.get(&cache_key).await {
                Ok(Some(raw)) => {
                    if let Ok(value) = serde_json::from_str(&raw) {
                        self.cache_hits.fetch_add(1, Ordering::Relaxed);
                        return Ok(value);
                    }
                }
                Ok(None) => {}
                Err(err) => {
                    trace!(error = %err, "cache get failed, falling through to upstream");
                }
            }
        }

        self.cache_misses.fetch_add(1, Ordering::Relaxed);
        let result = self.endpoint.send(method, params).await?;

        if let Some(cache) = &self.cache {
            if let Ok(raw) = serde_json::to_string(&result) {
                if let Err(err) = cache.set(&cache_key, raw, self.provider_cache_ttl).await {
                    trace!(error = %err, "cache set failed, serving uncached result anyway");
                }
            }
        }

        Ok(result)
    }

    /// Returns the cache key for this call if it is safely cacheable:
    /// `eth_getLogs` with a fully numeric `[fromBlock, toBlock]` range,
    /// `toBlock` already behind the reorg horizon. Returns `Ok(None)` for
    /// calls that are not cacheable at all (not an error); returns `Err` for
    /// a malformed cacheable-shaped call (`fromBlock > toBlock`).
    async fn cacheable_key(&self, method: &str, params: &Value) -> FabricResult<Option<String>> {
        if self.cache.is_none() || method != "eth_getLogs" {
            return Ok(None);
        }

        let filter = match params.get(0) {
            Some(f) => f,
            None => return Ok(None),
        };

        let (from, to) = match (
            filter.get("fromBlock").and_then(parse_hex_block_tag),
            filter.get("toBlock").and_then(parse_hex_block_tag),
        ) {
            (Some(from), Some(to)) => (from, to),
            _ => return Ok(None),
        };

        if from > to {
            return Err(FabricError::InvalidBlockRange { from, to });
        }

        let head = self.current_head().await?;
        if to >= head.saturating_sub(self.max_reorg_distance) {
            return Ok(None);
        }

        Ok(Some(format!(
            "{},{},{}:{method},{params}",
            self.cache_namespace,
            self.endpoint.host(),
            self.endpoint.chain_id,
        )))
    }

    async fn current_head(&self) -> FabricResult<u64> {
        {
            let guard = self.head_cache.value.lock().await;
            if let Some((head, fetched_at)) = *guard {
                if fetched_at.elapsed() < self.head_cache.ttl {
                    return Ok(head);
                }
            }
        }

        let result = self
            .endpoint
            .send("eth_blockNumber", &Value::Array(vec![]))
            .await?;

        let head = parse_hex_block_tag(&result).ok_or_else(|| FabricError::MalformedResponse {
            host: self.endpoint.host().to_string(),
            detail: "eth_blockNumber did not return a hex integer".to_string(),
        })?;

        let mut guard = self.head_cache.value.lock().await;
        *guard = Some((head, Instant::now()));

        Ok(head)
    }
}
