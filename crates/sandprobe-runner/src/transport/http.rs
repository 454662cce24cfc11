//! HTTP transport for execution services that expose a JSON endpoint.
//!
//! Request: `POST {endpoint}` with `{"command", "args", "env"}`.
//! Response: `{"stdout", "stderr", "exit_code"}`.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tracing::debug;

use sandprobe_core::{CommandSpec, HarnessError, RawResult, Result, TransportFault};

use crate::invoke::TargetInvoker;

#[derive(Debug, Serialize)]
struct ExecuteRequest<'a> {
    command: &'a str,
    args: &'a [String],
    env: &'a BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    working_dir: Option<&'a PathBuf>,
}

#[derive(Debug, Deserialize)]
struct ExecuteResponse {
    #[serde(default)]
    stdout: String,
    #[serde(default)]
    stderr: String,
    exit_code: i32,
}

pub struct HttpTransport {
    endpoint: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("sandprobe/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| HarnessError::TransportSetup(format!("http client: {e}")))?;
        Ok(Self {
            endpoint: endpoint.into(),
            api_key,
            http_client,
        })
    }
}

fn send_fault(e: &reqwest::Error, timeout: Duration) -> TransportFault {
    if e.is_timeout() {
        TransportFault::Timeout {
            limit_ms: timeout.as_millis() as u64,
        }
    } else if e.is_decode() || e.is_body() {
        TransportFault::Protocol {
            reason: e.to_string(),
        }
    } else {
        TransportFault::Unreachable {
            reason: e.to_string(),
        }
    }
}

#[async_trait]
impl TargetInvoker for HttpTransport {
    fn name(&self) -> &str {
        "http"
    }

    async fn invoke(&self, spec: &CommandSpec, timeout: Duration) -> RawResult {
        let start = Instant::now();
        let body = ExecuteRequest {
            command: &spec.program,
            args: &spec.args,
            env: &spec.env,
            working_dir: spec.working_dir.as_ref(),
        };

        let mut request = self
            .http_client
            .post(&self.endpoint)
            .timeout(timeout)
            .json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = match request.send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(endpoint = %self.endpoint, error = %e, "request failed");
                return RawResult::faulted(send_fault(&e, timeout), start.elapsed());
            }
        };

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return RawResult::faulted(
                TransportFault::Protocol {
                    reason: format!("HTTP {status}"),
                },
                start.elapsed(),
            )
            .with_partial_output("", text);
        }

        match response.json::<ExecuteResponse>().await {
            Ok(body) => {
                RawResult::completed(body.stdout, body.stderr, body.exit_code, start.elapsed())
            }
            Err(e) if e.is_timeout() => RawResult::faulted(
                TransportFault::Timeout {
                    limit_ms: timeout.as_millis() as u64,
                },
                start.elapsed(),
            ),
            Err(e) => RawResult::faulted(
                TransportFault::Protocol {
                    reason: format!("malformed response: {e}"),
                },
                start.elapsed(),
            ),
        }
    }
}
