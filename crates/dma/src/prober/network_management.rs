//! Prober backed by the Network Management REST API (v1).
//!
//! Create, rerun and delete return a long-running operation that is polled
//! at a fixed cadence until it is done or the poll budget runs out.

use async_trait::async_trait;
use reqwest::header::RETRY_AFTER;
use reqwest::{Client, Method};
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use super::{ConnectivityProber, ProbeEndpoints, ProbeOperation, ProbeResult, ProbeStatus};
use crate::config::ProberSettings;
use crate::error::{Error, Result};
use crate::retry::{with_retry, RetryConfig};

/// HTTP timeout for a single API call.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Long-running operation resource.
#[derive(Debug, Deserialize)]
struct Operation {
    name: String,
    #[serde(default)]
    done: bool,
    error: Option<ApiStatus>,
    response: Option<ConnectivityTest>,
}

#[derive(Debug, Deserialize)]
struct ApiStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ConnectivityTest {
    reachability_details: Option<ReachabilityDetails>,
}

#[derive(Debug, Default, Deserialize)]
struct ReachabilityDetails {
    result: Option<String>,
    error: Option<ApiStatus>,
    #[serde(default)]
    traces: Vec<Trace>,
}

#[derive(Debug, Deserialize)]
struct Trace {
    #[serde(default)]
    steps: Vec<Step>,
}

#[derive(Debug, Deserialize)]
struct Step {
    #[serde(default)]
    description: String,
    #[serde(default)]
    state: String,
}

impl ReachabilityDetails {
    /// One line per trace, naming where the trace ended.
    fn summaries(&self) -> Vec<String> {
        let mut details: Vec<String> = self
            .error
            .iter()
            .map(|status| status.message.clone())
            .collect();
        for trace in &self.traces {
            if let Some(step) = trace.steps.last() {
                details.push(match (step.state.is_empty(), step.description.is_empty()) {
                    (false, false) => format!("{}: {}", step.state, step.description),
                    (false, true) => step.state.clone(),
                    _ => step.description.clone(),
                });
            }
        }
        details
    }
}

/// Network Management API client.
pub struct NetworkManagementProber {
    client: Client,
    base_url: String,
    access_token: String,
    requests: RetryConfig,
    polling: RetryConfig,
}

impl NetworkManagementProber {
    /// Creates a prober authenticating with a bearer `access_token`.
    pub fn new(settings: &ProberSettings, access_token: impl Into<String>) -> Self {
        let client = Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            base_url: settings.base_url.trim_end_matches('/').to_string(),
            access_token: access_token.into(),
            requests: RetryConfig::for_rate_limits(),
            polling: RetryConfig::for_operation_polling(
                Duration::from_millis(settings.poll_interval_ms),
                settings.max_polls,
            ),
        }
    }

    /// Overrides the retry policy for individual API calls.
    #[must_use]
    pub fn with_request_retry(mut self, config: RetryConfig) -> Self {
        self.requests = config;
        self
    }

    fn tests_url(&self, project: &str) -> String {
        format!(
            "{}/projects/{project}/locations/global/connectivityTests",
            self.base_url
        )
    }

    fn test_url(&self, project: &str, test_id: &str) -> String {
        format!("{}/{test_id}", self.tests_url(project))
    }

    async fn send(&self, method: Method, url: &str, body: Option<&Value>) -> Result<Value> {
        let mut request = self
            .client
            .request(method, url)
            .bearer_auth(&self.access_token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request.send().await?;
        let status = response.status();
        if status.is_success() {
            let text = response.text().await?;
            if text.trim().is_empty() {
                return Ok(Value::Null);
            }
            return Ok(serde_json::from_str(&text)?);
        }

        let retry_after = response
            .headers()
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse().ok())
            .unwrap_or(60);
        let text = response.text().await.unwrap_or_default();
        Err(match status.as_u16() {
            401 | 403 => Error::Authentication(format!(
                "network management API rejected the access token: {}",
                api_message(&text)
            )),
            429 => Error::RateLimit(retry_after),
            code => Error::Prober(format!("HTTP {code}: {}", api_message(&text))),
        })
    }

    async fn call(
        &self,
        operation_name: &str,
        method: Method,
        url: String,
        body: Option<Value>,
    ) -> Result<Value> {
        let url = url.as_str();
        let body = body.as_ref();
        with_retry(&self.requests, operation_name, move || {
            self.send(method.clone(), url, body)
        })
        .await
    }

    async fn start(&self, operation_name: &str, method: Method, url: String, body: Option<Value>) -> Result<Operation> {
        let value = self.call(operation_name, method, url, body).await?;
        Ok(serde_json::from_value(value)?)
    }

    /// Polls until done. `None` means the poll budget ran out first.
    async fn wait(&self, mut operation: Operation) -> Result<Option<Operation>> {
        let budget = self.polling.max_retries + 1;
        let mut polls = 0;
        while !operation.done {
            if polls >= budget {
                warn!(operation = %operation.name, polls, "Operation still running, giving up");
                return Ok(None);
            }
            polls += 1;
            sleep(self.polling.delay_for_attempt(polls)).await;
            debug!(operation = %operation.name, poll = polls, "Polling operation");
            let url = format!("{}/{}", self.base_url, operation.name);
            let value = self.call("poll operation", Method::GET, url, None).await?;
            operation = serde_json::from_value(value)?;
        }

        if let Some(status) = operation.error.take() {
            return Err(Error::Prober(format!(
                "operation {} failed: {}",
                operation.name, status.message
            )));
        }
        Ok(Some(operation))
    }

    /// Waits for `operation` and reads the analysis it produced.
    async fn analysis(
        &self,
        test_id: &str,
        project: &str,
        kind: ProbeOperation,
        operation: Operation,
    ) -> Result<ProbeResult> {
        let name = operation.name.clone();
        let Some(mut finished) = self.wait(operation).await? else {
            return Ok(pending(test_id, kind, name));
        };

        let details = match finished
            .response
            .take()
            .and_then(|test| test.reachability_details)
        {
            Some(details) => details,
            None => {
                let value = self
                    .call("get connectivity test", Method::GET, self.test_url(project, test_id), None)
                    .await?;
                serde_json::from_value::<ConnectivityTest>(value)?
                    .reachability_details
                    .unwrap_or_default()
            }
        };

        let status = ProbeStatus::from_api(details.result.as_deref().unwrap_or_default());
        info!(test_id, %status, "Connectivity analysis finished");
        Ok(ProbeResult {
            test_id: test_id.to_string(),
            operation: kind,
            status,
            operation_name: None,
            details: details.summaries(),
        })
    }
}

#[async_trait]
impl ConnectivityProber for NetworkManagementProber {
    async fn create(
        &self,
        test_id: &str,
        project: &str,
        endpoints: ProbeEndpoints,
    ) -> Result<ProbeResult> {
        info!(
            test_id,
            project,
            target = %endpoints.target_ip,
            source = %endpoints.source_ip,
            port = endpoints.source_port,
            "Creating connectivity test"
        );
        let body = json!({
            "name": format!("projects/{project}/locations/global/connectivityTests/{test_id}"),
            "source": { "ipAddress": endpoints.target_ip.to_string() },
            "destination": {
                "ipAddress": endpoints.source_ip.to_string(),
                "port": endpoints.source_port,
            },
            "protocol": "TCP",
            "description": "Reachability from the migration target to the source database",
        });
        let url = format!("{}?testId={test_id}", self.tests_url(project));
        let operation = self
            .start("create connectivity test", Method::POST, url, Some(body))
            .await?;
        self.analysis(test_id, project, ProbeOperation::Create, operation)
            .await
    }

    async fn rerun(&self, test_id: &str, project: &str) -> Result<ProbeResult> {
        info!(test_id, project, "Rerunning connectivity test");
        let url = format!("{}:rerun", self.test_url(project, test_id));
        let operation = self
            .start("rerun connectivity test", Method::POST, url, Some(json!({})))
            .await?;
        self.analysis(test_id, project, ProbeOperation::Rerun, operation)
            .await
    }

    async fn delete(&self, test_id: &str, project: &str) -> Result<ProbeResult> {
        info!(test_id, project, "Deleting connectivity test");
        let operation = self
            .start(
                "delete connectivity test",
                Method::DELETE,
                self.test_url(project, test_id),
                None,
            )
            .await?;
        let name = operation.name.clone();
        Ok(match self.wait(operation).await? {
            Some(_) => ProbeResult {
                test_id: test_id.to_string(),
                operation: ProbeOperation::Delete,
                status: ProbeStatus::Deleted,
                operation_name: None,
                details: Vec::new(),
            },
            None => pending(test_id, ProbeOperation::Delete, name),
        })
    }
}

fn pending(test_id: &str, operation: ProbeOperation, operation_name: String) -> ProbeResult {
    ProbeResult {
        test_id: test_id.to_string(),
        operation,
        status: ProbeStatus::Pending,
        operation_name: Some(operation_name),
        details: Vec::new(),
    }
}

/// Extracts `error.message` from a Google API error body.
fn api_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| v["error"]["message"].as_str().map(str::to_string))
        .unwrap_or_else(|| body.trim().to_string())
}

#[cfg(test)]
#[path = "network_management_tests.rs"]
mod tests;
