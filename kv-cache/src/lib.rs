//! A tiny key-value cache contract, plus two implementations.
//!
//! `rpc-fabric`'s `CachingEndpoint` depends only on the [`KvCache`] trait. This
//! crate exists separately from `rpc-fabric`, the same way the reference
//! system keeps rate limiting in its own `redis-rate-limiter` /
//! `deferred-rate-limiter` crates: caching-with-a-TTL is a generic concern
//! that doesn't need to know anything about JSON-RPC, quorum, or chains.

mod errors;
mod moka_cache;

#[cfg(feature = "redis")]
mod redis_cache;

pub use errors::CacheError;
pub use moka_cache::MokaCache;

#[cfg(feature = "redis")]
pub use redis_cache::RedisCache;

use async_trait::async_trait;
use std::time::Duration;

/// The external KV-cache contract consumed (not provided) by `rpc-fabric`.
///
/// Implementations must not block indefinitely; a bounded internal timeout
/// is the implementer's responsibility, not the caller's.
#[async_trait]
pub trait KvCache: std::fmt::Debug + Send + Sync + 'static {
    /// Fetch a previously-stored value, or `None` if absent or expired.
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    /// Store a value under `key` for `ttl`. Last writer wins; there is no
    /// compare-and-swap.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test_log::test(tokio::test)]
    async fn moka_cache_is_a_kv_cache() {
        fn assert_kv_cache<T: KvCache>() {}
        assert_kv_cache::<MokaCache>();
    }
}
