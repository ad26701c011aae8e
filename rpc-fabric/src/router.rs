//! The quorum-forming dispatcher (spec §4.4) — the component the other four
//! exist to support.
//!
//! Dispatch is a "slot machine": `required_quorum(method, params)` concurrent
//! slots each pull an endpoint off a shared, order-preserving queue, try it,
//! and on failure pull the next one, until the slot succeeds or the queue
//! runs dry. Slots race independently, so a required endpoint that's down
//! doesn't block the ones behind it in the queue from being tried by some
//! other slot. Once every slot has settled, results are grouped by
//! [`results_equal`][crate::value::results_equal]; if the largest group
//! already meets quorum we're done. If not — too few slots succeeded, or
//! they disagree — whatever endpoints the slot machine never got to are
//! dispatched as a second, single-shot wave and the grouping is redone
//! before finally giving up.

use crate::caching::CachingEndpoint;
use crate::errors::{Disagreement, FabricError, FabricResult, ProviderOutcome};
use crate::retry::RetryingCaller;
use crate::value::{group_by_equality, required_quorum};
use futures::future::join_all;
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinSet;
use tracing::warn;

/// The fan-out target for a single chain: a fixed set of endpoints plus the
/// retry policy to apply to each. Built once per `(chain_id, cache_enabled)`
/// pair by [`crate::registry::EndpointRegistry`] and shared behind an `Arc`.
#[derive(Debug)]
pub struct QuorumRouter {
    chain_id: u64,
    endpoints: Vec<Arc<CachingEndpoint>>,
    caller: RetryingCaller,
    quorum_threshold: usize,
}

struct SlotOutcome {
    success: Option<(String, Value)>,
    failures: Vec<ProviderOutcome>,
}

impl QuorumRouter {
    pub fn new(
        chain_id: u64,
        endpoints: Vec<Arc<CachingEndpoint>>,
        caller: RetryingCaller,
        quorum_threshold: usize,
    ) -> Self {
        Self {
            chain_id,
            endpoints,
            caller,
            quorum_threshold,
        }
    }

    pub fn chain_id(&self) -> u64 {
        self.chain_id
    }

    pub fn endpoint_count(&self) -> usize {
        self.endpoints.len()
    }

    /// Performs a single logical JSON-RPC call, fanning it out across
    /// endpoints as needed to satisfy the quorum this method/params pair
    /// requires.
    pub async fn send(&self, method: &str, params: &Value) -> FabricResult<Value> {
        let required = required_quorum(method, params, self.quorum_threshold).max(1);
        let slots = required.min(self.endpoints.len());

        let queue: VecDeque<Arc<CachingEndpoint>> = self.endpoints.iter().cloned().collect();
        let queue = Arc::new(AsyncMutex::new(queue));

        let mut successes: Vec<(String, Value)> = Vec::new();
        let mut failures: Vec<ProviderOutcome> = Vec::new();

        let first_wave = self.run_slots(slots, queue.clone(), method, params).await;
        for outcome in first_wave {
            if let Some(s) = outcome.success {
                successes.push(s);
            }
            failures.extend(outcome.failures);
        }

        if let Some(value) = self.resolve(method, required, &successes, &failures) {
            return value;
        }

        // First wave didn't reach quorum: whatever's still in the queue was
        // never attempted (some slot succeeded before reaching it). Try the
        // rest, all at once, as a tie-break/coverage wave.
        let remaining: Vec<Arc<CachingEndpoint>> =
            queue.lock().await.drain(..).collect();

        if !remaining.is_empty() {
            let second_wave = self.dispatch_single_shot(remaining, method, params).await;
            for outcome in second_wave {
                match outcome {
                    Ok((host, value)) => successes.push((host, value)),
                    Err(outcome) => failures.push(outcome),
                }
            }
        }

        match self.resolve(method, required, &successes, &failures) {
            Some(value) => value,
            None => Err(self.terminal_error(required, successes, failures)),
        }
    }

    async fn run_slots(
        &self,
        slots: usize,
        queue: Arc<AsyncMutex<VecDeque<Arc<CachingEndpoint>>>>,
        method: &str,
        params: &Value,
    ) -> Vec<SlotOutcome> {
        let mut join_set = JoinSet::new();

        for _ in 0..slots {
            let queue = queue.clone();
            let caller = self.caller.clone();
            let method = method.to_string();
            let params = params.clone();

            join_set.spawn(async move { run_slot(queue, caller, method, params).await });
        }

        let mut outcomes = Vec::with_capacity(slots);
        while let Some(result) = join_set.join_next().await {
            if let Ok(outcome) = result {
                outcomes.push(outcome);
            }
        }

        outcomes
    }

    async fn dispatch_single_shot(
        &self,
        endpoints: Vec<Arc<CachingEndpoint>>,
        method: &str,
        params: &Value,
    ) -> Vec<Result<(String, Value), ProviderOutcome>> {
        let calls = endpoints.into_iter().map(|endpoint| {
            let caller = self.caller.clone();
            async move {
                let host = endpoint.endpoint.host().to_string();
                match caller.call(&endpoint, method, params).await {
                    Ok(value) => Ok((host, value)),
                    Err(err) => Err(ProviderOutcome {
                        host,
                        detail: err.to_string(),
                    }),
                }
            }
        });

        join_all(calls).await
    }

    /// Groups `successes` and, if the largest group already meets `required`,
    /// returns the resolved `send` outcome (logging a disagreement warning
    /// when other, smaller groups exist). Returns `None` when quorum isn't
    /// yet met, so the caller can try another wave of endpoints first.
    fn resolve(
        &self,
        method: &str,
        required: usize,
        successes: &[(String, Value)],
        _failures: &[ProviderOutcome],
    ) -> Option<FabricResult<Value>> {
        let groups = group_by_equality(method, successes);
        let winner = groups.first()?;

        if winner.1.len() < required {
            return None;
        }

        if groups.len() > 1 {
            let disagreeing: Vec<Disagreement> = groups[1..]
                .iter()
                .flat_map(|(value, hosts)| {
                    hosts.iter().map(move |host| Disagreement {
                        host: host.clone(),
                        value: value.clone(),
                    })
                })
                .collect();

            warn!(
                chain_id = self.chain_id,
                method,
                required,
                agreeing_hosts = %winner.1.join(","),
                agreed_value = %winner.0,
                disagreeing = %disagreeing
                    .iter()
                    .map(|d| format!("{}={}", d.host, d.value))
                    .collect::<Vec<_>>()
                    .join(", "),
                "quorum met with disagreeing responses"
            );
        }

        Some(Ok(winner.0.clone()))
    }

    fn terminal_error(
        &self,
        required: usize,
        successes: Vec<(String, Value)>,
        failures: Vec<ProviderOutcome>,
    ) -> FabricError {
        if successes.len() < required {
            let succeeded = successes
                .into_iter()
                .map(|(host, value)| ProviderOutcome {
                    host,
                    detail: format!("responded: {value}"),
                })
                .collect();

            FabricError::NotEnoughProviders {
                succeeded,
                failed: failures,
            }
        } else {
            let disagreeing = successes
                .into_iter()
                .map(|(host, value)| Disagreement { host, value })
                .collect();

            FabricError::QuorumNotMet {
                required,
                disagreeing,
            }
        }
    }
}

async fn run_slot(
    queue: Arc<AsyncMutex<VecDeque<Arc<CachingEndpoint>>>>,
    caller: RetryingCaller,
    method: String,
    params: Value,
) -> SlotOutcome {
    let mut failures = Vec::new();

    loop {
        let endpoint = { queue.lock().await.pop_front() };

        let endpoint = match endpoint {
            Some(e) => e,
            None => return SlotOutcome {
                success: None,
                failures,
            },
        };

        let host = endpoint.endpoint.host().to_string();

        match caller.call(&endpoint, &method, &params).await {
            Ok(value) => {
                return SlotOutcome {
                    success: Some((host, value)),
                    failures,
                }
            }
            Err(err) => failures.push(ProviderOutcome {
                host,
                detail: err.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::endpoint::RateLimitedEndpoint;
    use serde_json::json;
    use std::time::Duration;
    use url::Url;
    use wiremock::matchers::method as http_method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn endpoint_against(server: &MockServer) -> Arc<CachingEndpoint> {
        let rl = Arc::new(
            RateLimitedEndpoint::new(
                Url::parse(&server.uri()).unwrap(),
                1,
                Duration::from_secs(1),
                4,
                2,
                100,
            )
            .unwrap(),
        );

        Arc::new(CachingEndpoint::new(
            rl,
            None,
            "ns".to_string(),
            Duration::from_secs(60),
            64,
            Duration::from_secs(2),
        ))
    }

    fn ok_response(result: Value) -> ResponseTemplate {
        ResponseTemplate::new(200).set_body_json(json!({
            "jsonrpc": "2.0",
            "id": 1,
            "result": result
        }))
    }

    #[test_log::test(tokio::test)]
    async fn single_endpoint_quorum_one_succeeds() {
        let server = MockServer::start().await;
        Mock::given(http_method("POST"))
            .respond_with(ok_response(json!("0x10")))
            .mount(&server)
            .await;

        let endpoints = vec![endpoint_against(&server).await];
        let router = QuorumRouter::new(
            1,
            endpoints,
            RetryingCaller::new(0, Duration::from_millis(1)),
            1,
        );

        let result = router.send("eth_chainId", &json!([])).await.unwrap();
        assert_eq!(result, json!("0x10"));
    }

    #[test_log::test(tokio::test)]
    async fn agreeing_endpoints_meet_quorum() {
        let a = MockServer::start().await;
        let b = MockServer::start().await;
        let c = MockServer::start().await;

        for server in [&a, &b, &c] {
            Mock::given(http_method("POST"))
                .respond_with(ok_response(json!("0x64")))
                .mount(server)
                .await;
        }

        let endpoints = vec![
            endpoint_against(&a).await,
            endpoint_against(&b).await,
            endpoint_against(&c).await,
        ];
        let router = QuorumRouter::new(
            1,
            endpoints,
            RetryingCaller::new(0, Duration::from_millis(1)),
            3,
        );

        let result = router
            .send("eth_getLogs", &json!([{"fromBlock": "0x1", "toBlock": "0x2"}]))
            .await
            .unwrap();

        assert_eq!(result, json!("0x64"));
    }

    #[test_log::test(tokio::test)]
    async fn disagreement_below_quorum_is_an_error() {
        let a = MockServer::start().await;
        let b = MockServer::start().await;
        let c = MockServer::start().await;

        Mock::given(http_method("POST"))
            .respond_with(ok_response(json!("0x1")))
            .mount(&a)
            .await;
        Mock::given(http_method("POST"))
            .respond_with(ok_response(json!("0x2")))
            .mount(&b)
            .await;
        Mock::given(http_method("POST"))
            .respond_with(ok_response(json!("0x3")))
            .mount(&c)
            .await;

        let endpoints = vec![
            endpoint_against(&a).await,
            endpoint_against(&b).await,
            endpoint_against(&c).await,
        ];
        let router = QuorumRouter::new(
            1,
            endpoints,
            RetryingCaller::new(0, Duration::from_millis(1)),
            3,
        );

        let err = router
            .send("eth_getLogs", &json!([{"fromBlock": "0x1", "toBlock": "0x2"}]))
            .await
            .unwrap_err();

        assert!(matches!(err, FabricError::QuorumNotMet { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn all_endpoints_down_is_not_enough_providers() {
        let a = MockServer::start().await;
        Mock::given(http_method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&a)
            .await;

        let endpoints = vec![endpoint_against(&a).await];
        let router = QuorumRouter::new(
            1,
            endpoints,
            RetryingCaller::new(0, Duration::from_millis(1)),
            1,
        );

        let err = router.send("eth_chainId", &json!([])).await.unwrap_err();
        assert!(matches!(err, FabricError::NotEnoughProviders { .. }));
    }

    #[test_log::test(tokio::test)]
    async fn a_down_required_endpoint_falls_back_to_the_next_in_queue() {
        let down = MockServer::start().await;
        Mock::given(http_method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&down)
            .await;

        let up = MockServer::start().await;
        Mock::given(http_method("POST"))
            .respond_with(ok_response(json!("0x99")))
            .mount(&up)
            .await;

        let endpoints = vec![endpoint_against(&down).await, endpoint_against(&up).await];
        let router = QuorumRouter::new(
            1,
            endpoints,
            RetryingCaller::new(0, Duration::from_millis(1)),
            1,
        );

        let result = router.send("eth_chainId", &json!([])).await.unwrap();
        assert_eq!(result, json!("0x99"));
    }
}
