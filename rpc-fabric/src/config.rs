//! Environment-driven configuration (spec §6).
//!
//! Every variable is optional and has a process-wide default; a `_<chainId>`
//! suffixed variant overrides the default for that one chain. This mirrors
//! the shape of the reference system's `AppConfig` (a `shared` block plus
//! per-chain entries) even though the reference system itself loads that
//! shape from a TOML file rather than the environment; the environment is
//! what this spec's external interface names, so that's what we parse.

use crate::errors::{FabricError, FabricResult};
use anyhow::{anyhow, Context};
use std::env;
use std::time::Duration;
use url::Url;

const DEFAULT_TIMEOUT_MS: u64 = 60_000;
const DEFAULT_RETRIES: u32 = 2;
const DEFAULT_RETRY_DELAY_SECS: u64 = 1;
const DEFAULT_QUORUM: usize = 1;
const DEFAULT_MAX_CONCURRENCY: usize = 25;
const DEFAULT_PROVIDER_CACHE_NAMESPACE: &str = "DEFAULT_0";
const DEFAULT_LOG_EVERY_N_RATE_LIMIT_ERRORS: u64 = 100;
const DEFAULT_PROVIDER_CACHE_TTL_SECS: u64 = 86_400;
const DEFAULT_BLOCK_NUMBER_TTL_SECS: u64 = 2;

/// Per-chain settings resolved from the environment, with per-chain
/// overrides already applied.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    pub chain_id: u64,
    pub urls: Vec<Url>,
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub quorum_threshold: usize,
    pub max_concurrency: usize,
}

/// Settings that are not per-chain.
#[derive(Debug, Clone)]
pub struct GlobalSettings {
    pub disable_provider_caching: bool,
    pub provider_cache_namespace: String,
    pub log_every_n_rate_limit_errors: u64,
    pub provider_cache_ttl: Duration,
    pub block_number_ttl: Duration,
}

impl Default for GlobalSettings {
    fn default() -> Self {
        Self {
            disable_provider_caching: false,
            provider_cache_namespace: DEFAULT_PROVIDER_CACHE_NAMESPACE.to_string(),
            log_every_n_rate_limit_errors: DEFAULT_LOG_EVERY_N_RATE_LIMIT_ERRORS,
            provider_cache_ttl: Duration::from_secs(DEFAULT_PROVIDER_CACHE_TTL_SECS),
            block_number_ttl: Duration::from_secs(DEFAULT_BLOCK_NUMBER_TTL_SECS),
        }
    }
}

impl GlobalSettings {
    pub fn from_env() -> anyhow::Result<Self> {
        let mut settings = Self::default();

        if let Ok(v) = env::var("NODE_DISABLE_PROVIDER_CACHING") {
            settings.disable_provider_caching = v == "true";
        }

        if let Ok(v) = env::var("NODE_PROVIDER_CACHE_NAMESPACE") {
            settings.provider_cache_namespace = v;
        }

        if let Some(v) = parse_env("NODE_LOG_EVERY_N_RATE_LIMIT_ERRORS")? {
            settings.log_every_n_rate_limit_errors = v;
        }

        if let Some(v) = parse_env::<u64>("NODE_PROVIDER_CACHE_TTL")? {
            settings.provider_cache_ttl = Duration::from_secs(v);
        }

        if let Some(v) = parse_env::<u64>("NODE_BLOCK_NUMBER_TTL")? {
            settings.block_number_ttl = Duration::from_secs(v);
        }

        Ok(settings)
    }
}

/// `NODE_REDIS_URL`, read separately since whether to build a `RedisCache`
/// or a `MokaCache` is a decision made once, outside of any one chain's
/// configuration.
pub fn redis_url_from_env() -> Option<String> {
    env::var("NODE_REDIS_URL").ok()
}

/// Reads `ChainConfig` for a single chain, applying `_<chainId>` overrides
/// on top of the process-wide defaults. Returns [`FabricError::MissingUrls`]
/// if neither `NODE_URL_<chainId>` nor `NODE_URLS_<chainId>` is set.
pub fn chain_config_from_env(chain_id: u64) -> FabricResult<ChainConfig> {
    let urls = read_urls(chain_id)?;

    let timeout_ms = env_for_chain_parsed::<u64>("NODE_TIMEOUT", chain_id)
        .map_err(FabricError::Config)?
        .unwrap_or(DEFAULT_TIMEOUT_MS);

    let retries_raw = env_for_chain_parsed::<i64>("NODE_RETRIES", chain_id)
        .map_err(FabricError::Config)?
        .unwrap_or(DEFAULT_RETRIES as i64);
    if retries_raw < 0 {
        return Err(FabricError::InvalidRetries(retries_raw));
    }

    let retry_delay_raw = env_for_chain_parsed::<i64>("NODE_RETRY_DELAY", chain_id)
        .map_err(FabricError::Config)?
        .unwrap_or(DEFAULT_RETRY_DELAY_SECS as i64);
    if retry_delay_raw < 0 {
        return Err(FabricError::InvalidRetryDelay(retry_delay_raw));
    }

    let quorum_raw = env_for_chain_parsed::<i64>("NODE_QUORUM", chain_id)
        .map_err(FabricError::Config)?
        .unwrap_or(DEFAULT_QUORUM as i64);
    if quorum_raw < 1 || quorum_raw as usize > urls.len() {
        return Err(FabricError::InvalidQuorumThreshold {
            threshold: quorum_raw,
            num_endpoints: urls.len(),
        });
    }

    let max_concurrency = env_for_chain_parsed::<usize>("NODE_MAX_CONCURRENCY", chain_id)
        .map_err(FabricError::Config)?
        .unwrap_or(DEFAULT_MAX_CONCURRENCY);

    Ok(ChainConfig {
        chain_id,
        urls,
        timeout: Duration::from_millis(timeout_ms),
        retries: retries_raw as u32,
        retry_delay: Duration::from_secs(retry_delay_raw as u64),
        quorum_threshold: quorum_raw as usize,
        max_concurrency,
    })
}

fn read_urls(chain_id: u64) -> FabricResult<Vec<Url>> {
    if let Ok(raw) = env::var(format!("NODE_URLS_{chain_id}")) {
        let urls: Vec<String> =
            serde_json::from_str(&raw).map_err(|err| FabricError::Config(anyhow!(err)))?;

        return urls
            .iter()
            .map(|u| Url::parse(u).map_err(|err| FabricError::Config(anyhow!(err))))
            .collect();
    }

    if let Ok(raw) = env::var(format!("NODE_URL_{chain_id}")) {
        let url = Url::parse(&raw).map_err(|err| FabricError::Config(anyhow!(err)))?;
        return Ok(vec![url]);
    }

    Err(FabricError::MissingUrls { chain_id })
}

/// Reads `{base}_{chainId}` if set, falling back to `{base}`.
fn env_for_chain(base: &str, chain_id: u64) -> Option<String> {
    env::var(format!("{base}_{chain_id}"))
        .ok()
        .or_else(|| env::var(base).ok())
}

fn env_for_chain_parsed<T: std::str::FromStr>(
    base: &str,
    chain_id: u64,
) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env_for_chain(base, chain_id) {
        Some(raw) => Ok(Some(
            raw.parse::<T>()
                .with_context(|| format!("parsing {base}_{chain_id} (or {base})"))?,
        )),
        None => Ok(None),
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> anyhow::Result<Option<T>>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match env::var(name) {
        Ok(raw) => Ok(Some(
            raw.parse::<T>().with_context(|| format!("parsing {name}"))?,
        )),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    // environment variables are process-global; serialize tests that touch them
    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear(keys: &[&str]) {
        for k in keys {
            env::remove_var(k);
        }
    }

    #[test_log::test]
    fn missing_urls_is_a_construction_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear(&["NODE_URL_999", "NODE_URLS_999"]);

        let err = chain_config_from_env(999).unwrap_err();
        assert!(matches!(err, FabricError::MissingUrls { chain_id: 999 }));
    }

    #[test_log::test]
    fn single_url_is_read() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear(&["NODE_URL_1337", "NODE_URLS_1337"]);
        env::set_var("NODE_URL_1337", "https://example.com/rpc");

        let cfg = chain_config_from_env(1337).unwrap();
        assert_eq!(cfg.urls.len(), 1);
        assert_eq!(cfg.quorum_threshold, 1);

        clear(&["NODE_URL_1337"]);
    }

    #[test_log::test]
    fn url_list_and_quorum_validated_against_endpoint_count() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear(&["NODE_URL_7", "NODE_URLS_7", "NODE_QUORUM_7"]);
        env::set_var(
            "NODE_URLS_7",
            r#"["https://a.example.com","https://b.example.com"]"#,
        );
        env::set_var("NODE_QUORUM_7", "5");

        let err = chain_config_from_env(7).unwrap_err();
        assert!(matches!(err, FabricError::InvalidQuorumThreshold { .. }));

        clear(&["NODE_URLS_7", "NODE_QUORUM_7"]);
    }

    #[test_log::test]
    fn negative_retries_is_a_construction_error() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear(&["NODE_URL_42", "NODE_RETRIES_42"]);
        env::set_var("NODE_URL_42", "https://example.com/rpc");
        env::set_var("NODE_RETRIES_42", "-1");

        let err = chain_config_from_env(42).unwrap_err();
        assert!(matches!(err, FabricError::InvalidRetries(-1)));

        clear(&["NODE_URL_42", "NODE_RETRIES_42"]);
    }
}
