//! End-to-end pipeline: detection through decision to cluster action.

use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use serde_json::json;

use mender::agent::Agent;
use mender::audit::{AuditRecord, AuditSink};
use mender::cluster::{ClusterOps, OpOutcome};
use mender::config::{DecisionConfig, RcaConfig};
use mender::decision::{ActionStatus, DecisionTree, DecisionType, RemediationExecutor};
use mender::detectors::Detector;
use mender::rca::RcaAnalyzer;
use mender::signals::{Signal, SignalCorrelator, SignalSeverity, SignalType};

/// Detector that replays canned signals under a fixed incident type.
struct CannedDetector {
    incident_type: String,
    correlator: SignalCorrelator,
    signals: Vec<Signal>,
}

#[async_trait]
impl Detector for CannedDetector {
    fn incident_type(&self) -> &str {
        &self.incident_type
    }
    fn correlator(&self) -> &SignalCorrelator {
        &self.correlator
    }
    async fn collect_signals(&self, _namespace: Option<&str>) -> Result<Vec<Signal>> {
        Ok(self.signals.clone())
    }
}

#[derive(Default)]
struct RecordingCluster {
    calls: Mutex<Vec<String>>,
}

#[async_trait]
impl ClusterOps for RecordingCluster {
    async fn delete_pod(&self, name: &str, namespace: &str) -> Result<OpOutcome> {
        self.calls.lock().unwrap().push(format!("delete_pod {namespace}/{name}"));
        Ok(OpOutcome::success("delete_pod", name))
    }
    async fn rollout_restart(&self, deployment: &str, namespace: &str) -> Result<OpOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("rollout_restart {namespace}/{deployment}"));
        Ok(OpOutcome::success("rollout_restart", deployment))
    }
    async fn scale_deployment(&self, name: &str, namespace: &str, replicas: i32) -> Result<OpOutcome> {
        self.calls
            .lock()
            .unwrap()
            .push(format!("scale_deployment {namespace}/{name} to {replicas}"));
        Ok(OpOutcome::success("scale_deployment", name))
    }
}

#[derive(Default)]
struct RecordingAudit {
    records: Mutex<Vec<AuditRecord>>,
}

#[async_trait]
impl AuditSink for RecordingAudit {
    async fn record(&self, record: AuditRecord) {
        self.records.lock().unwrap().push(record);
    }
}

fn build_agent(
    detector: CannedDetector,
    cluster: Arc<RecordingCluster>,
    audit: Arc<RecordingAudit>,
) -> Agent {
    Agent::new(
        vec![Arc::new(detector)],
        RcaAnalyzer::new(&RcaConfig::default(), None),
        DecisionTree::new(DecisionConfig::default()),
        RemediationExecutor::new(Some(cluster)),
        audit,
    )
}

fn signal(
    signal_type: SignalType,
    name: &str,
    value: serde_json::Value,
    severity: SignalSeverity,
) -> Signal {
    Signal::new(signal_type, "web-7d4b9c-x2x1z", "prod", name, value, severity)
}

#[tokio::test]
async fn restart_loop_is_auto_fixed_by_pod_deletion() {
    let cluster = Arc::new(RecordingCluster::default());
    let audit = Arc::new(RecordingAudit::default());
    // Two warning-level restart signals: rule confidence 0.8, low risk,
    // restart_pod is a safe action, so this auto-fixes.
    let agent = build_agent(
        CannedDetector {
            incident_type: "pod_restart".to_string(),
            correlator: SignalCorrelator::new(5),
            signals: vec![
                signal(SignalType::Metric, "restart_spike", json!(2), SignalSeverity::Warning),
                signal(SignalType::Log, "process_killed", json!("killed"), SignalSeverity::Warning),
            ],
        },
        cluster.clone(),
        audit.clone(),
    );

    let candidates = agent.run_detection_cycle(None).await;
    assert_eq!(candidates.len(), 1);
    let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;

    assert_eq!(report.decision.decision_type, DecisionType::AutoFix);
    assert!(report.decision.auto_approved);
    assert_eq!(
        report.action_result.as_ref().map(|a| a.status),
        Some(ActionStatus::Completed)
    );
    assert_eq!(
        cluster.calls.lock().unwrap().as_slice(),
        ["delete_pod prod/web-7d4b9c-x2x1z"]
    );

    let records = audit.records.lock().unwrap();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].action, "restart_pod");
    assert_eq!(records[0].result, "completed");
}

#[tokio::test]
async fn disk_pressure_escalates_without_touching_the_cluster() {
    let cluster = Arc::new(RecordingCluster::default());
    let audit = Arc::new(RecordingAudit::default());
    let agent = build_agent(
        CannedDetector {
            incident_type: "disk_full".to_string(),
            correlator: SignalCorrelator::new(5),
            signals: vec![
                signal(
                    SignalType::Log,
                    "disk_full",
                    json!("No space left on device"),
                    SignalSeverity::Critical,
                ),
                signal(SignalType::Metric, "disk_usage", json!(99.0), SignalSeverity::Critical),
            ],
        },
        cluster.clone(),
        audit.clone(),
    );

    let candidates = agent.run_detection_cycle(None).await;
    let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;

    assert_eq!(report.decision.decision_type, DecisionType::Escalate);
    assert_eq!(report.decision.action.as_deref(), Some("escalate"));
    // Escalation completes as a no-op; no cluster calls happen.
    assert_eq!(
        report.action_result.as_ref().map(|a| a.status),
        Some(ActionStatus::Completed)
    );
    assert!(cluster.calls.lock().unwrap().is_empty());
    assert_eq!(audit.records.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn oom_approval_flow_scales_after_human_sign_off() {
    let cluster = Arc::new(RecordingCluster::default());
    let audit = Arc::new(RecordingAudit::default());
    let agent = build_agent(
        CannedDetector {
            incident_type: "memory_leak".to_string(),
            correlator: SignalCorrelator::new(5),
            signals: vec![
                signal(
                    SignalType::Event,
                    "OOMKilled",
                    json!("Container killed"),
                    SignalSeverity::Critical,
                ),
                signal(SignalType::Metric, "high_memory", json!(98.0), SignalSeverity::Critical),
            ],
        },
        cluster.clone(),
        audit.clone(),
    );

    let candidates = agent.run_detection_cycle(None).await;
    let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;

    // OOM rule recommends scaling; critical severity forces approval.
    assert_eq!(report.decision.decision_type, DecisionType::Approval);
    assert!(cluster.calls.lock().unwrap().is_empty());
    assert_eq!(agent.pending_approvals().await.len(), 1);

    let result = agent
        .approve(&report.incident.id, "oncall-engineer")
        .await
        .expect("pending approval exists");
    assert_eq!(result.status, ActionStatus::Completed);
    assert_eq!(
        cluster.calls.lock().unwrap().as_slice(),
        ["scale_deployment prod/web to 2"]
    );

    let records = audit.records.lock().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].result, "queued_for_approval");
    assert_eq!(records[1].actor, "oncall-engineer");
    assert_eq!(records[1].result, "completed");
}

#[tokio::test]
async fn repeated_oom_kills_saturate_confidence_and_queue_approval() {
    let cluster = Arc::new(RecordingCluster::default());
    let audit = Arc::new(RecordingAudit::default());
    // Three critical log lines from the same pod: base 0.45 + one type 0.1
    // + criticals 0.45 clamps confidence at 1.0.
    let agent = build_agent(
        CannedDetector {
            incident_type: "memory_leak".to_string(),
            correlator: SignalCorrelator::new(5),
            signals: vec![
                signal(
                    SignalType::Log,
                    "process_killed",
                    json!("Process OOMKilled by kernel"),
                    SignalSeverity::Critical,
                );
                3
            ],
        },
        cluster.clone(),
        audit.clone(),
    );

    let candidates = agent.run_detection_cycle(None).await;
    assert_eq!(candidates.len(), 1);
    assert!((candidates[0].confidence - 1.0).abs() < 1e-9);

    let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;
    // The OOM rule fires on the log text; critical severity with three
    // signals is medium risk, so scaling waits for approval.
    assert_eq!(report.rca.confidence, 0.95);
    assert_eq!(report.rca.recommended_action, "scale_deployment");
    assert_eq!(report.decision.decision_type, DecisionType::Approval);
    assert!(report.decision.requires_approval);
    assert!(cluster.calls.lock().unwrap().is_empty());
}

#[tokio::test]
async fn weak_single_signal_incident_is_rejected() {
    let cluster = Arc::new(RecordingCluster::default());
    let audit = Arc::new(RecordingAudit::default());
    let agent = build_agent(
        CannedDetector {
            incident_type: "pod_restart".to_string(),
            correlator: SignalCorrelator::new(5),
            signals: vec![signal(
                SignalType::Metric,
                "restart_spike",
                json!(1),
                SignalSeverity::Warning,
            )],
        },
        cluster.clone(),
        audit.clone(),
    );

    let candidates = agent.run_detection_cycle(None).await;
    assert_eq!(candidates.len(), 1);
    let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;

    assert_eq!(report.decision.decision_type, DecisionType::Reject);
    assert!(report.decision.action.is_none());
    assert!(report.action_result.is_none());
    assert!(cluster.calls.lock().unwrap().is_empty());
    assert!(audit.records.lock().unwrap().is_empty());
}
