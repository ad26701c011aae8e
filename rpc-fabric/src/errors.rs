//! Utilities for turning internal failures into the one error type
//! consumers of this crate see out of [`crate::QuorumRouter::send`].

use derive_more::{Error, From};
use std::fmt;
use url::Url;

pub type FabricResult<T> = Result<T, FabricError>;

/// One upstream's outcome inside a single logical call, kept around so a
/// quorum failure can tell an operator "provider X is down" apart from
/// "provider X is lying".
#[derive(Debug, Clone)]
pub struct ProviderOutcome {
    pub host: String,
    pub detail: String,
}

impl fmt::Display for ProviderOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.host, self.detail)
    }
}

pub(crate) fn host_of(url: &Url) -> String {
    url.host_str().unwrap_or("<unknown-host>").to_string()
}

/// A value that disagreed with the quorum-forming majority.
#[derive(Debug, Clone)]
pub struct Disagreement {
    pub host: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Error, From)]
pub enum FabricError {
    // -- construction errors (fatal, raised while building a QuorumRouter) --
    #[error(ignore)]
    #[from(ignore)]
    MissingUrls { chain_id: u64 },

    #[error(ignore)]
    #[from(ignore)]
    MissingReorgDistance { chain_id: u64 },

    #[error(ignore)]
    #[from(ignore)]
    InvalidQuorumThreshold { threshold: i64, num_endpoints: usize },

    #[error(ignore)]
    #[from(ignore)]
    InvalidRetries(i64),

    #[error(ignore)]
    #[from(ignore)]
    InvalidRetryDelay(i64),

    #[error(ignore)]
    Config(anyhow::Error),

    // -- input errors (surfaced to the caller of `send`) --
    #[error(ignore)]
    #[from(ignore)]
    InvalidBlockRange { from: u64, to: u64 },

    // -- upstream errors, only seen after rate-limit backoff and retry are exhausted --
    #[error(ignore)]
    Http(reqwest::Error),

    #[error(ignore)]
    #[from(ignore)]
    Timeout { host: String },

    #[error(ignore)]
    #[from(ignore)]
    JsonRpc {
        host: String,
        code: i64,
        message: String,
    },

    #[error(ignore)]
    #[from(ignore)]
    MalformedResponse { host: String, detail: String },

    #[error(ignore)]
    Cache(kv_cache::CacheError),

    // -- quorum errors (surfaced to the caller of `send`) --
    #[error(ignore)]
    #[from(ignore)]
    NotEnoughProviders {
        succeeded: Vec<ProviderOutcome>,
        failed: Vec<ProviderOutcome>,
    },

    #[error(ignore)]
    #[from(ignore)]
    QuorumNotMet {
        required: usize,
        disagreeing: Vec<Disagreement>,
    },
}

impl fmt::Display for FabricError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingUrls { chain_id } => {
                write!(f, "no NODE_URL(S) configured for chain {chain_id}")
            }
            Self::MissingReorgDistance { chain_id } => {
                write!(f, "no MAX_REORG_DISTANCE entry for chain {chain_id}")
            }
            Self::InvalidQuorumThreshold {
                threshold,
                num_endpoints,
            } => write!(
                f,
                "nodeQuorumThreshold must be between 1 and the endpoint count ({num_endpoints}), got {threshold}"
            ),
            Self::InvalidRetries(r) => write!(f, "retries must be >= 0, got {r}"),
            Self::InvalidRetryDelay(d) => write!(f, "retryDelay must be >= 0, got {d}"),
            Self::Config(err) => write!(f, "invalid environment configuration: {err}"),
            Self::InvalidBlockRange { from, to } => write!(
                f,
                "cacheable call has fromBlock {from:#x} > toBlock {to:#x}"
            ),
            Self::Http(err) => write!(f, "http error: {err}"),
            Self::Timeout { host } => write!(f, "request to {host} timed out"),
            Self::JsonRpc {
                host,
                code,
                message,
            } => write!(f, "json-rpc error {code} from {host}: {message}"),
            Self::MalformedResponse { host, detail } => {
                write!(f, "malformed json-rpc response from {host}: {detail}")
            }
            Self::Cache(err) => write!(f, "cache backend error: {err}"),
            Self::NotEnoughProviders { succeeded, failed } => write!(
                f,
                "not enough providers succeeded: {} of {} required; succeeded=[{}], failed=[{}]",
                succeeded.len(),
                succeeded.len() + failed.len(),
                fmt_list(succeeded),
                fmt_list(failed),
            ),
            Self::QuorumNotMet {
                required,
                disagreeing,
            } => write!(
                f,
                "quorum not met: needed {required} matching responses; disagreeing=[{}]",
                fmt_disagreements(disagreeing),
            ),
        }
    }
}

fn fmt_list(items: &[ProviderOutcome]) -> String {
    items
        .iter()
        .map(|o| o.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn fmt_disagreements(items: &[Disagreement]) -> String {
    items
        .iter()
        .map(|d| format!("{}={}", d.host, d.value))
        .collect::<Vec<_>>()
        .join(", ")
}
