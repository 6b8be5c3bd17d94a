//! Remediation action execution against the cluster control plane.
//!
//! `execute` never returns an error: failures are captured on the
//! [`ActionResult`] so the agent can audit them uniformly with successes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{error, info};

use crate::cluster::{ClusterOps, OpOutcome};
use crate::signals::IncidentCandidate;

/// Lifecycle of an action. Transitions are monotonic: pending, executing,
/// then exactly one terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionStatus {
    Pending,
    Executing,
    Completed,
    Failed,
    /// Post-action verification confirmed the fix took effect
    Verified,
}

/// Result of one remediation action.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionResult {
    pub action: String,
    pub status: ActionStatus,
    /// Control-plane outcome, when the action reached the cluster
    pub outcome: Option<OpOutcome>,
    /// Failure detail when status is `Failed`
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl ActionResult {
    /// Placeholder for an action that is queued but not yet dispatched.
    #[must_use]
    pub fn pending(action: &str) -> Self {
        Self {
            action: action.to_string(),
            status: ActionStatus::Pending,
            outcome: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn executing(action: &str) -> Self {
        Self {
            action: action.to_string(),
            status: ActionStatus::Executing,
            outcome: None,
            error: None,
            started_at: Utc::now(),
            completed_at: None,
        }
    }

    fn complete(&mut self, outcome: Option<OpOutcome>) {
        self.status = ActionStatus::Completed;
        self.outcome = outcome;
        self.completed_at = Some(Utc::now());
    }

    fn fail(&mut self, error: String) {
        self.status = ActionStatus::Failed;
        self.error = Some(error);
        self.completed_at = Some(Utc::now());
    }
}

#[derive(Debug, Error)]
enum ActionError {
    #[error("cluster operations not available")]
    NoCluster,
    #[error("cannot restart node for disk_full")]
    DiskFullRestart,
    #[error("unknown action: {0}")]
    UnknownAction(String),
    #[error("{0}")]
    OpFailed(String),
    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

/// Executes remediation actions through a [`ClusterOps`] collaborator.
pub struct RemediationExecutor {
    cluster: Option<Arc<dyn ClusterOps>>,
}

impl RemediationExecutor {
    #[must_use]
    pub fn new(cluster: Option<Arc<dyn ClusterOps>>) -> Self {
        Self { cluster }
    }

    /// Execute an action for an incident. Failures land on the result, not
    /// in an `Err`.
    pub async fn execute(&self, action: &str, incident: &IncidentCandidate) -> ActionResult {
        info!(action, id = %incident.id, "Executing remediation");
        let mut result = ActionResult::executing(action);

        // Escalation is a no-op toward the cluster; the audit trail and the
        // humans it notifies are the actual effect. The outcome message marks
        // the incident as still needing a human.
        if action == "escalate" {
            let mut outcome = OpOutcome::success(
                "escalate",
                format!("{} on {}", incident.incident_type, incident.source),
            );
            outcome.message = Some(format!(
                "Escalated: {} on {} - requires manual action",
                incident.incident_type, incident.source
            ));
            result.complete(Some(outcome));
            return result;
        }

        match self.dispatch(action, incident).await {
            Ok(outcome) => {
                info!(action, id = %incident.id, "Remediation completed");
                result.complete(Some(outcome));
            }
            Err(err) => {
                error!(action, id = %incident.id, error = %err, "Remediation failed");
                result.fail(err.to_string());
            }
        }
        result
    }

    async fn dispatch(
        &self,
        action: &str,
        incident: &IncidentCandidate,
    ) -> Result<OpOutcome, ActionError> {
        let cluster = self.cluster.as_ref().ok_or(ActionError::NoCluster)?;

        let outcome = match action {
            "restart_pod" | "delete_pod" => {
                // Disk pressure is a node problem; killing the pod on it
                // resolves nothing and loses workload.
                if incident.incident_type == "disk_full" {
                    return Err(ActionError::DiskFullRestart);
                }
                cluster.delete_pod(&incident.source, &incident.namespace).await?
            }
            "rollout_restart" => {
                let deployment = extract_deployment_name(&incident.source);
                cluster.rollout_restart(deployment, &incident.namespace).await?
            }
            "scale_deployment" => {
                let deployment = extract_deployment_name(&incident.source);
                // Fixed scale-to-2; adaptive sizing is a later concern.
                cluster
                    .scale_deployment(deployment, &incident.namespace, 2)
                    .await?
            }
            other => return Err(ActionError::UnknownAction(other.to_string())),
        };

        if outcome.is_error() {
            let message = outcome
                .message
                .clone()
                .unwrap_or_else(|| "unknown cluster error".to_string());
            return Err(ActionError::OpFailed(message));
        }
        Ok(outcome)
    }
}

/// Derive the deployment name from a pod name by stripping the ReplicaSet
/// hash and pod suffix (`web-7d4b9c-x2x1z` -> `web`). Names without both
/// suffixes are returned unchanged.
fn extract_deployment_name(pod_name: &str) -> &str {
    let mut cut = pod_name.len();
    for _ in 0..2 {
        match pod_name[..cut].rfind('-') {
            Some(idx) => cut = idx,
            None => return pod_name,
        }
    }
    &pod_name[..cut]
}
