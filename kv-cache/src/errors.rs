use derive_more::{Display, Error, From};

/// Errors surfaced by a [`crate::KvCache`] implementation.
///
/// These are always non-fatal to the caller: `CachingEndpoint` treats any
/// `CacheError` the same as a cache miss and falls through to the upstream.
#[derive(Debug, Display, Error, From)]
pub enum CacheError {
    #[display(fmt = "cache backend timed out")]
    #[from(ignore)]
    Timeout,
    #[cfg(feature = "redis")]
    Redis(redis::RedisError),
    #[cfg(feature = "redis")]
    #[display(fmt = "redis pool error: {:?}", _0)]
    #[from(ignore)]
    Pool(String),
}
