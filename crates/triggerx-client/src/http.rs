//! Wire-format client for the performer `/execute` and `/status`
//! endpoints, and for HTTP-JSON condition value sources (spec.md §6).

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerError};
use crate::error::{ClientError, Result};
use crate::retry::{retry_with_backoff, DeliveryOutcome, RetryPolicy};

#[derive(Debug, Clone, Serialize)]
pub struct TaskTarget {
    pub chain_id: String,
    pub contract: String,
    pub function: String,
    pub abi: String,
    pub arg_type: String,
    pub arguments: Vec<serde_json::Value>,
    pub dynamic_args_url: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TaskEnvelope {
    pub task_id: i64,
    pub job_id: i64,
    pub definition_id: i32,
    pub target: TaskTarget,
    pub deadline_unix_ms: i64,
    pub trace_id: Uuid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecuteResponse {
    pub success: bool,
    pub cost_opx: f64,
    pub reason: String,
    pub tx_hash: String,
}

#[derive(Debug, Clone, Deserialize)]
struct StatusResponse {
    #[allow(dead_code)]
    status: String,
}

/// Thin wrapper over `reqwest` adding the spec's retry/circuit-breaking
/// behavior around outbound calls (grounded on the teacher's
/// `engine::dispatcher`/`engine::retry` pairing).
pub struct HttpClient {
    inner: reqwest::Client,
    retry_policy: RetryPolicy,
}

impl HttpClient {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        HttpClient {
            inner: reqwest::Client::new(),
            retry_policy,
        }
    }

    /// POSTs the task envelope to the performer's `/execute` endpoint,
    /// retrying delivery (never execution) per spec.md §4.7 step 3.
    pub async fn deliver_task(
        &self,
        endpoint: &str,
        envelope: &TaskEnvelope,
        circuit: &CircuitBreaker,
        timeout: Duration,
    ) -> Result<ExecuteResponse> {
        let url = format!("{}/execute", endpoint.trim_end_matches('/'));
        let outcome = circuit
            .execute(|| {
                retry_with_backoff(
                    &self.retry_policy,
                    "deliver_task",
                    |e: &ClientError| match e.retry_budget() {
                        Some(max_attempts) => DeliveryOutcome::Retry { max_attempts },
                        None => DeliveryOutcome::GiveUp,
                    },
                    || self.post_execute(&url, envelope, timeout),
                )
            })
            .await;

        match outcome {
            Ok(resp) => Ok(resp),
            Err(CircuitBreakerError::Open) => Err(ClientError::CircuitOpen {
                target: endpoint.to_string(),
            }),
            Err(CircuitBreakerError::Inner(e)) => Err(e),
        }
    }

    async fn post_execute(
        &self,
        url: &str,
        envelope: &TaskEnvelope,
        timeout: Duration,
    ) -> Result<ExecuteResponse> {
        let response = self
            .inner
            .post(url)
            .timeout(timeout)
            .json(envelope)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ClientError::Remote {
                status: status.as_u16(),
                body,
            });
        }

        response
            .json::<ExecuteResponse>()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))
    }

    /// Pings the performer's `/status` endpoint (spec.md §4.6). A
    /// non-200 response or any transport error is a probe failure.
    pub async fn probe_status(&self, endpoint: &str, timeout: Duration) -> bool {
        let url = format!("{}/status", endpoint.trim_end_matches('/'));
        match self.inner.get(&url).timeout(timeout).send().await {
            Ok(resp) if resp.status().is_success() => {
                debug!(endpoint, "health probe succeeded");
                resp.json::<StatusResponse>().await.is_ok()
            }
            Ok(resp) => {
                debug!(endpoint, status = %resp.status(), "health probe rejected");
                false
            }
            Err(e) => {
                debug!(endpoint, error = %e, "health probe transport error");
                false
            }
        }
    }

    /// Fetches a numeric condition value from an HTTP-JSON value
    /// source (spec.md §4.4). The response is parsed as a bare JSON
    /// number or `{"value": <number>}`.
    pub async fn fetch_value(&self, url: &str, timeout: Duration) -> Result<f64> {
        let response = self.inner.get(url).timeout(timeout).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::Remote {
                status: status.as_u16(),
                body: String::new(),
            });
        }
        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| ClientError::Decode(e.to_string()))?;

        if let Some(n) = body.as_f64() {
            return Ok(n);
        }
        if let Some(n) = body.get("value").and_then(|v| v.as_f64()) {
            return Ok(n);
        }
        Err(ClientError::Decode(
            "value source response was not a number".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn envelope() -> TaskEnvelope {
        TaskEnvelope {
            task_id: 1,
            job_id: 1,
            definition_id: 1,
            target: TaskTarget {
                chain_id: "1".into(),
                contract: "0xabc".into(),
                function: "fire".into(),
                abi: "[]".into(),
                arg_type: "tuple".into(),
                arguments: vec![],
                dynamic_args_url: String::new(),
            },
            deadline_unix_ms: 0,
            trace_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn delivers_task_on_first_success() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "cost_opx": 1.5, "reason": "", "tx_hash": "0x1"
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(RetryPolicy::default());
        let circuit = CircuitBreaker::new(Default::default());
        let resp = client
            .deliver_task(&server.uri(), &envelope(), &circuit, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(resp.success);
        assert_eq!(resp.cost_opx, 1.5);
    }

    #[tokio::test]
    async fn retries_once_on_5xx_then_succeeds() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(503))
            .up_to_n_times(1)
            .mount(&server)
            .await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "success": true, "cost_opx": 0.0, "reason": "", "tx_hash": ""
            })))
            .mount(&server)
            .await;

        let client = HttpClient::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        });
        let circuit = CircuitBreaker::new(Default::default());
        let resp = client
            .deliver_task(&server.uri(), &envelope(), &circuit, Duration::from_secs(1))
            .await
            .unwrap();
        assert!(resp.success);
    }

    #[tokio::test]
    async fn does_not_retry_a_second_5xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(503))
            .expect(2)
            .mount(&server)
            .await;

        let client = HttpClient::new(RetryPolicy {
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(2),
            ..RetryPolicy::default()
        });
        let circuit = CircuitBreaker::new(Default::default());
        let result = client
            .deliver_task(&server.uri(), &envelope(), &circuit, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn never_retries_4xx() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/execute"))
            .respond_with(ResponseTemplate::new(400))
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpClient::new(RetryPolicy::default());
        let circuit = CircuitBreaker::new(Default::default());
        let result = client
            .deliver_task(&server.uri(), &envelope(), &circuit, Duration::from_secs(1))
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn fetch_value_parses_bare_number_and_wrapped_object() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/bare"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!(101.5)))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/wrapped"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"value": 42.0})),
            )
            .mount(&server)
            .await;

        let client = HttpClient::new(RetryPolicy::default());
        let bare = client
            .fetch_value(&format!("{}/bare", server.uri()), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(bare, 101.5);

        let wrapped = client
            .fetch_value(&format!("{}/wrapped", server.uri()), Duration::from_secs(1))
            .await
            .unwrap();
        assert_eq!(wrapped, 42.0);
    }
}
