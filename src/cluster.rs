//! Cluster-control-plane collaborator.
//!
//! Remediation actions reach the cluster through the narrow [`ClusterOps`]
//! trait; [`GatewayClient`] is the HTTP implementation against the platform
//! gateway service that fronts the actual control plane.

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info};

use crate::config::{env_or, env_parse};

/// Outcome status reported by the control-plane collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OpStatus {
    Success,
    Error,
}

/// Response from a control-plane operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpOutcome {
    pub status: OpStatus,
    /// Operation that was attempted
    pub action: String,
    /// Resource the operation targeted
    pub target: String,
    /// Detail text: the error when status is `Error`, or an advisory note
    /// (escalations carry a requires-manual-action marker here)
    #[serde(default)]
    pub message: Option<String>,
}

impl OpOutcome {
    #[must_use]
    pub fn success(action: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            status: OpStatus::Success,
            action: action.into(),
            target: target.into(),
            message: None,
        }
    }

    #[must_use]
    pub fn error(
        action: impl Into<String>,
        target: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            status: OpStatus::Error,
            action: action.into(),
            target: target.into(),
            message: Some(message.into()),
        }
    }

    /// Whether this outcome carries the collaborator's error marker.
    #[must_use]
    pub fn is_error(&self) -> bool {
        self.status == OpStatus::Error
    }
}

/// Cluster-state-changing operations consumed by the remediation executor.
#[async_trait]
pub trait ClusterOps: Send + Sync {
    /// Delete a pod (its controller restarts it).
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<OpOutcome>;

    /// Trigger a rolling restart of a deployment.
    async fn rollout_restart(&self, deployment: &str, namespace: &str) -> Result<OpOutcome>;

    /// Scale a deployment to the given replica count.
    async fn scale_deployment(&self, name: &str, namespace: &str, replicas: i32)
        -> Result<OpOutcome>;
}

/// Configuration for the gateway client
#[derive(Debug, Clone)]
pub struct GatewayConfig {
    /// Base URL of the gateway service
    pub base_url: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            base_url: env_or("MENDER_GATEWAY_URL", "http://localhost:8080"),
            timeout_secs: env_parse("MENDER_GATEWAY_TIMEOUT_SECS", 30),
        }
    }
}

#[derive(Debug, Deserialize)]
struct GatewayResponse {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// HTTP client for the platform gateway fronting the control plane.
#[derive(Debug, Clone)]
pub struct GatewayClient {
    config: GatewayConfig,
    client: reqwest::Client,
}

impl GatewayClient {
    /// Create a new gateway client.
    ///
    /// # Panics
    /// Panics if the HTTP client cannot be created.
    #[must_use]
    pub fn new(config: GatewayConfig) -> Self {
        let client = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(config.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");
        Self { config, client }
    }

    /// Create a new client with default configuration.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::new(GatewayConfig::default())
    }

    async fn post_action(
        &self,
        action: &str,
        target: &str,
        body: serde_json::Value,
    ) -> Result<OpOutcome> {
        let url = format!(
            "{}/api/v1/actions/{action}",
            self.config.base_url.trim_end_matches('/')
        );
        debug!(action, target, "Dispatching gateway action");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .with_context(|| format!("Failed to send {action} to gateway"))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Ok(OpOutcome::error(
                action,
                target,
                format!("gateway returned {status}: {text}"),
            ));
        }

        let parsed: GatewayResponse = response
            .json()
            .await
            .context("Failed to parse gateway response")?;

        if parsed.status == "success" {
            info!(action, target, "Gateway action succeeded");
            Ok(OpOutcome::success(action, target))
        } else {
            Ok(OpOutcome::error(
                action,
                target,
                parsed.message.unwrap_or_else(|| "unknown gateway error".to_string()),
            ))
        }
    }
}

#[async_trait]
impl ClusterOps for GatewayClient {
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<OpOutcome> {
        self.post_action(
            "delete_pod",
            name,
            json!({ "name": name, "namespace": namespace }),
        )
        .await
    }

    async fn rollout_restart(&self, deployment: &str, namespace: &str) -> Result<OpOutcome> {
        self.post_action(
            "rollout_restart",
            deployment,
            json!({ "deployment": deployment, "namespace": namespace }),
        )
        .await
    }

    async fn scale_deployment(
        &self,
        name: &str,
        namespace: &str,
        replicas: i32,
    ) -> Result<OpOutcome> {
        self.post_action(
            "scale_deployment",
            name,
            json!({ "name": name, "namespace": namespace, "replicas": replicas }),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_constructors() {
        let ok = OpOutcome::success("delete_pod", "web-1");
        assert!(!ok.is_error());
        assert!(ok.message.is_none());

        let err = OpOutcome::error("scale_deployment", "web", "forbidden");
        assert!(err.is_error());
        assert_eq!(err.message.as_deref(), Some("forbidden"));
    }

    #[test]
    fn test_gateway_config_default() {
        let config = GatewayConfig::default();
        assert_eq!(config.timeout_secs, 30);
    }

    #[test]
    fn test_gateway_response_parses_error_marker() {
        let body = r#"{"status": "error", "message": "pod not found"}"#;
        let parsed: GatewayResponse = serde_json::from_str(body).expect("valid response");
        assert_eq!(parsed.status, "error");
        assert_eq!(parsed.message.as_deref(), Some("pod not found"));
    }
}
