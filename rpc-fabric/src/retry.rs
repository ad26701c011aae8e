//! A flat-delay retry loop around a [`CachingEndpoint`] (spec §4.3).
//!
//! This is a distinct retry budget from the rate-limit backoff inside
//! [`crate::endpoint::RateLimitedEndpoint`]; the two compose (spec §9,
//! "double-budgeted retries are intentional") rather than one subsuming
//! the other, since they exist for different failure classes: rate-limit
//! backoff handles a *signal* from the endpoint, this loop handles
//! everything else (connection resets, transient timeouts, malformed
//! responses) by simply trying the whole call again after a flat delay.

use crate::caching::CachingEndpoint;
use crate::errors::FabricResult;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

#[derive(Debug, Clone)]
pub struct RetryingCaller {
    retries: u32,
    retry_delay: Duration,
}

impl RetryingCaller {
    pub fn new(retries: u32, retry_delay: Duration) -> Self {
        Self {
            retries,
            retry_delay,
        }
    }

    /// Calls `endpoint.send(method, params)`, retrying up to `retries`
    /// additional times (so `retries = 0` means exactly one attempt) with a
    /// flat delay between attempts. Returns the last error if every attempt
    /// fails.
    pub async fn call(
        &self,
        endpoint: &CachingEndpoint,
        method: &str,
        params: &Value,
    ) -> FabricResult<Value> {
        let mut last_err = None;

        for attempt in 0..=self.retries {
            match endpoint.send(method, params).await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    debug!(
                        host = endpoint.endpoint.host(),
                        attempt,
                        retries = self.retries,
                        %err,
                        "call attempt failed"
                    );
                    last_err = Some(err);

                    if attempt < self.retries {
                        tokio::time::sleep(self.retry_delay).await;
                    }
                }
            }
        }

        Err(last_err.expect("loop runs at least once since retries + 1 >= 1"))
    }
}
