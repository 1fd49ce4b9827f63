//! Network reachability tests between the migration target and the source.
//!
//! During a migration the managed target opens connections to the source,
//! so a probe always runs from the target IP to the source IP and port.

pub mod network_management;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use crate::error::{Error, Result};

pub use network_management::NetworkManagementProber;

/// Operation requested from the prober.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeOperation {
    /// Creates the test and runs it once.
    #[default]
    Create,
    /// Runs an existing test again.
    Rerun,
    /// Removes the test.
    Delete,
}

impl fmt::Display for ProbeOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Create => "create",
            Self::Rerun => "rerun",
            Self::Delete => "delete",
        })
    }
}

impl FromStr for ProbeOperation {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "create" => Ok(Self::Create),
            "rerun" => Ok(Self::Rerun),
            "delete" => Ok(Self::Delete),
            other => Err(Error::Config(format!(
                "invalid operation type '{other}': expected create, rerun or delete"
            ))),
        }
    }
}

/// Outcome of a reachability test.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeStatus {
    /// The source accepts traffic from the target.
    Reachable,
    /// Traffic is dropped somewhere on the path.
    Unreachable,
    /// Some paths deliver and others drop.
    Ambiguous,
    /// The analysis could not reach a conclusion.
    Undetermined,
    /// The operation did not finish within the poll budget.
    Pending,
    /// The test was deleted.
    Deleted,
}

impl ProbeStatus {
    /// Maps the API's `reachabilityDetails.result`.
    pub fn from_api(result: &str) -> Self {
        match result {
            "REACHABLE" => Self::Reachable,
            "UNREACHABLE" => Self::Unreachable,
            "AMBIGUOUS" => Self::Ambiguous,
            _ => Self::Undetermined,
        }
    }

    /// True for the statuses that mean the path is not known to work.
    pub fn is_failure(&self) -> bool {
        matches!(self, Self::Unreachable | Self::Ambiguous | Self::Undetermined)
    }
}

impl fmt::Display for ProbeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Reachable => "reachable",
            Self::Unreachable => "unreachable",
            Self::Ambiguous => "ambiguous",
            Self::Undetermined => "undetermined",
            Self::Pending => "pending",
            Self::Deleted => "deleted",
        })
    }
}

/// Result of one prober operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    /// Test the operation acted on.
    pub test_id: String,
    /// Operation performed.
    pub operation: ProbeOperation,
    /// Final status.
    pub status: ProbeStatus,
    /// Long-running operation name, kept for `pending` results.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_name: Option<String>,
    /// Human-readable details from the analysis.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub details: Vec<String>,
}

/// Parameters of a connectivity check.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProbeRequest {
    /// Test resource id.
    pub test_id: String,
    /// Cloud project owning the test.
    pub project: String,
    /// Migration target IP; the probe source.
    pub target_ip: Option<String>,
    /// Source database IP; the probe destination.
    pub source_ip: Option<String>,
    /// Source database port.
    pub source_port: Option<u16>,
    /// Operation to perform.
    pub operation: ProbeOperation,
}

/// Endpoints of a create request after validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProbeEndpoints {
    /// Migration target IP.
    pub target_ip: IpAddr,
    /// Source database IP.
    pub source_ip: IpAddr,
    /// Source database port.
    pub source_port: u16,
}

impl ProbeRequest {
    /// Checks the identifiers and, for `create`, the endpoints.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] naming the first invalid value.
    pub fn validate(&self) -> Result<()> {
        validate_test_id(&self.test_id)?;
        if self.project.trim().is_empty() {
            return Err(Error::Config("gcp project is required".to_string()));
        }
        if self.operation == ProbeOperation::Create {
            self.endpoints()?;
        }
        Ok(())
    }

    /// Parses the endpoints required by `create`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::Config`] if an endpoint is missing or malformed.
    pub fn endpoints(&self) -> Result<ProbeEndpoints> {
        let target_ip = parse_ip("target-db-ip", self.target_ip.as_deref())?;
        let source_ip = parse_ip("source-db-ip", self.source_ip.as_deref())?;
        let source_port = match self.source_port {
            Some(0) => return Err(Error::Config("source-db-port must be greater than 0".to_string())),
            Some(port) => port,
            None => return Err(Error::Config("source-db-port is required for create".to_string())),
        };
        Ok(ProbeEndpoints {
            target_ip,
            source_ip,
            source_port,
        })
    }
}

fn parse_ip(flag: &str, value: Option<&str>) -> Result<IpAddr> {
    let value = value
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| Error::Config(format!("{flag} is required for create")))?;
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{flag} '{value}' is not an IP address")))
}

/// Test ids are resource ids: a lowercase letter, then up to 62 lowercase
/// letters, digits or hyphens, not ending in a hyphen.
fn validate_test_id(test_id: &str) -> Result<()> {
    let valid = !test_id.is_empty()
        && test_id.len() <= 63
        && test_id.starts_with(|c: char| c.is_ascii_lowercase())
        && !test_id.ends_with('-')
        && test_id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-');
    if valid {
        Ok(())
    } else {
        Err(Error::Config(format!(
            "invalid test id '{test_id}': use lowercase letters, digits and hyphens"
        )))
    }
}

/// Runs reachability tests against a network management service.
#[async_trait]
pub trait ConnectivityProber: Send + Sync {
    /// Creates `test_id` probing from the target to the source and waits
    /// for the first analysis.
    async fn create(
        &self,
        test_id: &str,
        project: &str,
        endpoints: ProbeEndpoints,
    ) -> Result<ProbeResult>;

    /// Runs an existing test again.
    async fn rerun(&self, test_id: &str, project: &str) -> Result<ProbeResult>;

    /// Deletes a test.
    async fn delete(&self, test_id: &str, project: &str) -> Result<ProbeResult>;
}

/// Validates `request` and dispatches it to `prober`.
///
/// # Errors
///
/// Returns [`Error::Config`] for an invalid request, otherwise whatever the
/// prober returns.
pub async fn execute(prober: &dyn ConnectivityProber, request: &ProbeRequest) -> Result<ProbeResult> {
    request.validate()?;
    match request.operation {
        ProbeOperation::Create => {
            prober
                .create(&request.test_id, &request.project, request.endpoints()?)
                .await
        }
        ProbeOperation::Rerun => prober.rerun(&request.test_id, &request.project).await,
        ProbeOperation::Delete => prober.delete(&request.test_id, &request.project).await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn create_request() -> ProbeRequest {
        ProbeRequest {
            test_id: "dma-orders".to_string(),
            project: "acme-prod".to_string(),
            target_ip: Some("10.20.0.3".to_string()),
            source_ip: Some("192.168.1.40".to_string()),
            source_port: Some(5432),
            operation: ProbeOperation::Create,
        }
    }

    #[derive(Default)]
    struct RecordingProber {
        calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl ConnectivityProber for RecordingProber {
        async fn create(&self, test_id: &str, _: &str, endpoints: ProbeEndpoints) -> Result<ProbeResult> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("create {test_id} {}", endpoints.source_port));
            Ok(result(test_id, ProbeOperation::Create, ProbeStatus::Reachable))
        }

        async fn rerun(&self, test_id: &str, _: &str) -> Result<ProbeResult> {
            self.calls.lock().unwrap().push(format!("rerun {test_id}"));
            Ok(result(test_id, ProbeOperation::Rerun, ProbeStatus::Unreachable))
        }

        async fn delete(&self, test_id: &str, _: &str) -> Result<ProbeResult> {
            self.calls.lock().unwrap().push(format!("delete {test_id}"));
            Ok(result(test_id, ProbeOperation::Delete, ProbeStatus::Deleted))
        }
    }

    fn result(test_id: &str, operation: ProbeOperation, status: ProbeStatus) -> ProbeResult {
        ProbeResult {
            test_id: test_id.to_string(),
            operation,
            status,
            operation_name: None,
            details: Vec::new(),
        }
    }

    #[test]
    fn test_operation_from_str() {
        assert_eq!("create".parse::<ProbeOperation>().unwrap(), ProbeOperation::Create);
        assert_eq!("RERUN".parse::<ProbeOperation>().unwrap(), ProbeOperation::Rerun);
        assert_eq!(" delete ".parse::<ProbeOperation>().unwrap(), ProbeOperation::Delete);
        assert!("list".parse::<ProbeOperation>().is_err());
        assert_eq!(ProbeOperation::default(), ProbeOperation::Create);
    }

    #[test]
    fn test_status_from_api() {
        assert_eq!(ProbeStatus::from_api("REACHABLE"), ProbeStatus::Reachable);
        assert_eq!(ProbeStatus::from_api("UNREACHABLE"), ProbeStatus::Unreachable);
        assert_eq!(ProbeStatus::from_api("AMBIGUOUS"), ProbeStatus::Ambiguous);
        assert_eq!(ProbeStatus::from_api("RESULT_UNSPECIFIED"), ProbeStatus::Undetermined);
        assert!(ProbeStatus::Undetermined.is_failure());
        assert!(!ProbeStatus::Pending.is_failure());
        assert!(!ProbeStatus::Reachable.is_failure());
    }

    #[test]
    fn test_validate_create_request() {
        assert!(create_request().validate().is_ok());

        let mut request = create_request();
        request.source_port = None;
        assert!(matches!(request.validate(), Err(Error::Config(_))));

        let mut request = create_request();
        request.target_ip = Some("db.internal".to_string());
        let err = request.validate().unwrap_err();
        assert!(err.to_string().contains("target-db-ip"));
    }

    #[test]
    fn test_rerun_needs_no_endpoints() {
        let request = ProbeRequest {
            test_id: "dma-orders".to_string(),
            project: "acme-prod".to_string(),
            operation: ProbeOperation::Rerun,
            ..Default::default()
        };
        assert!(request.validate().is_ok());
    }

    #[test]
    fn test_invalid_test_ids() {
        for id in ["", "Orders", "9orders", "orders-", "orders_db"] {
            assert!(validate_test_id(id).is_err(), "{id} should be rejected");
        }
        assert!(validate_test_id("orders-db-1").is_ok());
    }

    #[tokio::test]
    async fn test_execute_dispatches_by_operation() {
        // Arrange
        let prober = RecordingProber::default();
        let mut request = create_request();

        // Act
        let created = execute(&prober, &request).await.unwrap();
        request.operation = ProbeOperation::Delete;
        let deleted = execute(&prober, &request).await.unwrap();

        // Assert
        assert_eq!(created.status, ProbeStatus::Reachable);
        assert_eq!(deleted.status, ProbeStatus::Deleted);
        assert_eq!(
            *prober.calls.lock().unwrap(),
            vec!["create dma-orders 5432", "delete dma-orders"]
        );
    }

    #[tokio::test]
    async fn test_execute_rejects_invalid_request_before_calling() {
        let prober = RecordingProber::default();
        let mut request = create_request();
        request.project = String::new();

        assert!(execute(&prober, &request).await.is_err());
        assert!(prober.calls.lock().unwrap().is_empty());
    }
}
