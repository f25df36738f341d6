//! Substrate JSON-RPC client with rate limiting and bounded retry.
//!
//! Provides a thin wrapper around a node's HTTP JSON-RPC endpoint with:
//! - Rate limiting and a cap on in-flight requests
//! - Exponential backoff on transient failures, up to a configured attempt count
//! - Batch request support
//! - Storage queries pinned to a block hash

use crate::config::RateLimitConfig;
use governor::{Quota, RateLimiter};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tracing::{debug, warn};

/// Upper bound on keys requested per `state_getKeysPaged` call
const KEYS_PAGE_SIZE: u32 = 1000;

#[derive(Error, Debug)]
pub enum RpcError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON-RPC error: code={code}, message={message}")]
    JsonRpc { code: i64, message: String },

    #[error("Deserialization error: {0}")]
    Deserialize(#[from] serde_json::Error),

    #[error("{method} still failing after {attempts} attempts: {last_error}")]
    RetriesExhausted {
        method: String,
        attempts: u32,
        last_error: String,
    },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

/// JSON-RPC request structure
#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a, P: Serialize> {
    jsonrpc: &'static str,
    method: &'a str,
    params: P,
    id: u64,
}

/// JSON-RPC response structure. `result` is kept raw because `null` is a
/// legitimate answer for storage queries.
#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: serde_json::Value,
    error: Option<JsonRpcError>,
    #[serde(default)]
    id: u64,
}

#[derive(Debug, Deserialize)]
struct JsonRpcError {
    code: i64,
    message: String,
}

/// One entry of a `state_queryStorageAt` response
#[derive(Debug, Deserialize)]
pub struct StorageChangeSet {
    pub block: String,
    pub changes: Vec<(String, Option<String>)>,
}

/// Outcome of one HTTP round trip, before retry handling
enum Attempt<T> {
    Done(Result<T, RpcError>),
    Retry(String),
}

/// Rate-limited Substrate RPC client.
pub struct SubstrateRpcClient {
    client: reqwest::Client,
    url: String,
    rate_limiter: RateLimiter<
        governor::state::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    semaphore: Semaphore,
    config: RateLimitConfig,
    request_id: AtomicU64,
}

impl SubstrateRpcClient {
    pub fn new(url: String, config: RateLimitConfig) -> Result<Self, RpcError> {
        let quota = Quota::per_second(NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN));
        let rate_limiter = RateLimiter::direct(quota);

        // Concurrent request limit
        let semaphore = Semaphore::new(config.max_in_flight.max(1));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .pool_max_idle_per_host(20)
            .tcp_keepalive(Duration::from_secs(30))
            .build()?;

        Ok(Self {
            client,
            url,
            rate_limiter,
            semaphore,
            config,
            request_id: AtomicU64::new(1),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    fn next_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Determine if a JSON-RPC error is transient (should be retried).
    fn is_transient_error(code: i64, message: &str) -> bool {
        // -32999 = substrate "too many requests" on rate-limited public nodes
        // -32603 = internal JSON-RPC error
        // -32000 = server error (often transient)
        let message = message.to_lowercase();
        matches!(code, -32999 | -32603 | -32000)
            || message.contains("rate")
            || message.contains("limit")
            || message.contains("capacity")
            || message.contains("temporarily")
            || message.contains("timeout")
    }

    /// Send one request body and classify the outcome.
    async fn send_once<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        body: &B,
    ) -> Attempt<T> {
        self.rate_limiter.until_ready().await;

        let _permit = match self.semaphore.acquire().await {
            Ok(permit) => permit,
            Err(e) => return Attempt::Done(Err(RpcError::InvalidResponse(e.to_string()))),
        };

        let response = match self.client.post(&self.url).json(body).send().await {
            Ok(resp) => resp,
            // Network errors are always transient
            Err(e) => return Attempt::Retry(format!("network error: {}", e)),
        };

        let status = response.status();
        if status.as_u16() == 429 || status.is_server_error() {
            return Attempt::Retry(format!("HTTP {}", status));
        }
        if !status.is_success() {
            return Attempt::Done(Err(RpcError::InvalidResponse(format!("HTTP {}", status))));
        }

        match response.json::<T>().await {
            Ok(parsed) => Attempt::Done(Ok(parsed)),
            Err(e) => Attempt::Retry(format!("failed to parse body: {}", e)),
        }
    }

    /// Run `attempt` until it succeeds, fails permanently, or the retry
    /// budget is spent.
    async fn with_retry<T, F, Fut>(&self, method: &str, mut attempt: F) -> Result<T, RpcError>
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = Attempt<T>>,
    {
        let mut delay = Duration::from_millis(self.config.base_delay_ms);
        let max_delay = Duration::from_secs(30);
        let max_attempts = self.config.max_retries + 1;

        for attempt_no in 1..=max_attempts {
            match attempt().await {
                Attempt::Done(result) => return result,
                Attempt::Retry(reason) if attempt_no < max_attempts => {
                    warn!(
                        "[attempt {}] {} on {}, retrying in {:?}",
                        attempt_no, reason, method, delay
                    );
                    tokio::time::sleep(delay).await;
                    delay = (delay * 2).min(max_delay);
                }
                Attempt::Retry(reason) => {
                    return Err(RpcError::RetriesExhausted {
                        method: method.to_string(),
                        attempts: attempt_no,
                        last_error: reason,
                    });
                }
            }
        }

        unreachable!("retry loop always returns")
    }

    /// Make a single RPC call, retrying transient failures.
    pub async fn call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params: P,
    ) -> Result<R, RpcError> {
        let params = &params;
        let response: JsonRpcResponse = self
            .with_retry(method, move || async move {
                let request = JsonRpcRequest {
                    jsonrpc: "2.0",
                    method,
                    params,
                    id: self.next_id(),
                };
                match self.send_once::<_, JsonRpcResponse>(&request).await {
                    Attempt::Done(Ok(resp)) => {
                        let transient = resp
                            .error
                            .as_ref()
                            .filter(|e| Self::is_transient_error(e.code, &e.message))
                            .map(|e| {
                                format!("transient RPC error code={} msg={}", e.code, e.message)
                            });
                        match transient {
                            Some(reason) => Attempt::Retry(reason),
                            None => Attempt::Done(Ok(resp)),
                        }
                    }
                    other => other,
                }
            })
            .await?;

        if let Some(error) = response.error {
            return Err(RpcError::JsonRpc {
                code: error.code,
                message: error.message,
            });
        }

        Ok(serde_json::from_value(response.result)?)
    }

    /// Batch RPC calls. Results come back in the order of `params_list`; any
    /// failed item fails the whole batch.
    pub async fn batch_call<P: Serialize, R: DeserializeOwned>(
        &self,
        method: &str,
        params_list: Vec<P>,
    ) -> Result<Vec<R>, RpcError> {
        let mut results = Vec::with_capacity(params_list.len());

        for chunk in params_list.chunks(self.config.batch_size.max(1)) {
            let mut responses: Vec<JsonRpcResponse> = self
                .with_retry(method, move || async move {
                    let requests: Vec<JsonRpcRequest<'_, &P>> = chunk
                        .iter()
                        .enumerate()
                        .map(|(i, p)| JsonRpcRequest {
                            jsonrpc: "2.0",
                            method,
                            params: p,
                            id: i as u64,
                        })
                        .collect();
                    self.send_once(&requests).await
                })
                .await?;

            if responses.len() != chunk.len() {
                return Err(RpcError::InvalidResponse(format!(
                    "batch {} returned {} of {} responses",
                    method,
                    responses.len(),
                    chunk.len()
                )));
            }

            responses.sort_by_key(|r| r.id);

            for resp in responses {
                if let Some(error) = resp.error {
                    return Err(RpcError::JsonRpc {
                        code: error.code,
                        message: error.message,
                    });
                }
                results.push(serde_json::from_value(resp.result)?);
            }
        }

        Ok(results)
    }

    /// Chain name reported by the node
    pub async fn system_chain(&self) -> Result<String, RpcError> {
        self.call("system_chain", ()).await
    }

    /// Node implementation name
    pub async fn system_name(&self) -> Result<String, RpcError> {
        self.call("system_name", ()).await
    }

    /// Node implementation version
    pub async fn system_version(&self) -> Result<String, RpcError> {
        self.call("system_version", ()).await
    }

    /// Hash of the latest finalized block
    pub async fn finalized_head(&self) -> Result<String, RpcError> {
        self.call("chain_getFinalizedHead", ()).await
    }

    /// Read one storage value (hex-encoded SCALE) at `at`
    pub async fn get_storage(&self, key: &[u8], at: &str) -> Result<Option<String>, RpcError> {
        self.call("state_getStorage", (hex_key(key), at)).await
    }

    /// Read several storage values in one JSON-RPC batch, in input order
    pub async fn batch_get_storage(
        &self,
        keys: &[Vec<u8>],
        at: &str,
    ) -> Result<Vec<Option<String>>, RpcError> {
        let params: Vec<(String, &str)> = keys.iter().map(|k| (hex_key(k), at)).collect();
        self.batch_call("state_getStorage", params).await
    }

    /// List every storage key under `prefix` at `at`, following pagination.
    pub async fn get_keys(&self, prefix: &[u8], at: &str) -> Result<Vec<String>, RpcError> {
        let prefix_hex = hex_key(prefix);
        let mut all_keys: Vec<String> = Vec::new();

        loop {
            let start_key = all_keys.last().cloned();
            let page: Vec<String> = self
                .call(
                    "state_getKeysPaged",
                    (&prefix_hex, KEYS_PAGE_SIZE, start_key, at),
                )
                .await?;

            let page_len = page.len();
            all_keys.extend(page);

            if page_len < KEYS_PAGE_SIZE as usize {
                break;
            }
            debug!(
                "Prefix {} page complete ({} keys so far)",
                prefix_hex,
                all_keys.len()
            );
        }

        Ok(all_keys)
    }

    /// Fetch the values of `keys` at `at`. Keys with no value are returned
    /// with `None`.
    pub async fn query_storage_at(
        &self,
        keys: &[String],
        at: &str,
    ) -> Result<Vec<(String, Option<String>)>, RpcError> {
        let mut values = Vec::with_capacity(keys.len());

        for chunk in keys.chunks(self.config.batch_size.max(1)) {
            let change_sets: Vec<StorageChangeSet> =
                self.call("state_queryStorageAt", (chunk, at)).await?;
            for set in change_sets {
                values.extend(set.changes);
            }
        }

        Ok(values)
    }
}

fn hex_key(key: &[u8]) -> String {
    format!("0x{}", hex::encode(key))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_transient_error() {
        assert!(SubstrateRpcClient::is_transient_error(-32999, "Too many requests"));
        assert!(SubstrateRpcClient::is_transient_error(-32603, "internal error"));
        assert!(SubstrateRpcClient::is_transient_error(0, "Rate limit reached"));
        assert!(!SubstrateRpcClient::is_transient_error(-32602, "invalid params"));
    }

    #[test]
    fn test_null_result_decodes_as_none() {
        let resp: JsonRpcResponse =
            serde_json::from_str(r#"{"jsonrpc":"2.0","result":null,"id":3}"#).unwrap();
        assert!(resp.error.is_none());
        let value: Option<String> = serde_json::from_value(resp.result).unwrap();
        assert_eq!(value, None);
    }

    #[test]
    fn test_error_response() {
        let resp: JsonRpcResponse = serde_json::from_str(
            r#"{"jsonrpc":"2.0","error":{"code":-32602,"message":"bad"},"id":1}"#,
        )
        .unwrap();
        assert_eq!(resp.error.map(|e| e.code), Some(-32602));
    }

    #[test]
    fn test_change_set_shape() {
        let sets: Vec<StorageChangeSet> = serde_json::from_str(
            r#"[{"block":"0xab","changes":[["0x01","0x0203"],["0x02",null]]}]"#,
        )
        .unwrap();
        assert_eq!(sets[0].changes.len(), 2);
        assert_eq!(sets[0].changes[1].1, None);
    }

    #[test]
    fn test_hex_key() {
        assert_eq!(hex_key(&[0x5f, 0x3e]), "0x5f3e");
    }
}
