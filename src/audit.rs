//! Audit trail sink.
//!
//! Every executed or queued remediation is reported to an append-only sink.
//! The sink is write-only from the core's perspective and never consulted
//! for decisions; persistence is an external concern.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use tracing::info;
use uuid::Uuid;

/// Actor name recorded for autonomous actions.
pub const AGENT_ACTOR: &str = "mender-agent";

/// One append-only audit record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Unique record id
    pub id: Uuid,
    /// Action that was taken or queued
    pub action: String,
    /// Who initiated it (the agent, or an approving human)
    pub actor: String,
    /// Resource the action targeted
    pub target: String,
    /// Free-form detail (reasoning, incident id)
    pub details: String,
    /// Terminal outcome string
    pub result: String,
    /// Extra context
    pub metadata: HashMap<String, Value>,
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    #[must_use]
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        target: impl Into<String>,
        details: impl Into<String>,
        result: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            action: action.into(),
            actor: actor.into(),
            target: target.into(),
            details: details.into(),
            result: result.into(),
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Append-only audit collaborator.
#[async_trait]
pub trait AuditSink: Send + Sync {
    /// Append a record. Failures are the sink's problem; the core treats the
    /// write as best-effort.
    async fn record(&self, record: AuditRecord);
}

/// Sink that emits audit records to the structured log stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAuditSink;

#[async_trait]
impl AuditSink for LogAuditSink {
    async fn record(&self, record: AuditRecord) {
        info!(
            id = %record.id,
            action = %record.action,
            actor = %record.actor,
            target = %record.target,
            result = %record.result,
            details = %record.details,
            "audit"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_log_sink_accepts_records() {
        let sink = LogAuditSink;
        sink.record(AuditRecord::new(
            "delete_pod",
            AGENT_ACTOR,
            "web-1",
            "INC-1",
            "completed",
        ))
        .await;
    }

    #[test]
    fn test_record_serializes() {
        let record = AuditRecord::new("escalate", AGENT_ACTOR, "svc-a", "d", "completed");
        let json = serde_json::to_string(&record).expect("serializable");
        assert!(json.contains("escalate"));
    }
}
