//! Incident response agent.
//!
//! Orchestrates the full workflow: detectors produce incident candidates,
//! the RCA layer explains them, the decision tree picks a course of action,
//! and the executor carries it out. Approval-gated actions are queued and
//! only run once `approve` is called; every executed or queued action lands
//! in the audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{error, info};

use crate::audit::{AuditRecord, AuditSink, AGENT_ACTOR};
use crate::decision::{ActionResult, Decision, DecisionTree, DecisionType, RemediationExecutor};
use crate::detectors::Detector;
use crate::rca::{RcaAnalyzer, RcaResult};
use crate::signals::IncidentCandidate;

/// Complete record of one incident's journey through the pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub incident: IncidentCandidate,
    pub rca: RcaResult,
    pub decision: Decision,
    /// Present once the action has been queued or executed
    pub action_result: Option<ActionResult>,
    pub verified: bool,
    pub created_at: DateTime<Utc>,
}

/// The orchestrating agent.
pub struct Agent {
    detectors: Vec<Arc<dyn Detector>>,
    analyzer: RcaAnalyzer,
    tree: DecisionTree,
    executor: RemediationExecutor,
    audit: Arc<dyn AuditSink>,
    incidents: Mutex<Vec<IncidentReport>>,
    running: AtomicBool,
}

impl Agent {
    #[must_use]
    pub fn new(
        detectors: Vec<Arc<dyn Detector>>,
        analyzer: RcaAnalyzer,
        tree: DecisionTree,
        executor: RemediationExecutor,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            detectors,
            analyzer,
            tree,
            executor,
            audit,
            incidents: Mutex::new(Vec::new()),
            running: AtomicBool::new(false),
        }
    }

    /// All incident reports processed so far.
    pub async fn incidents(&self) -> Vec<IncidentReport> {
        self.incidents.lock().await.clone()
    }

    /// Reports whose action is queued awaiting human approval.
    pub async fn pending_approvals(&self) -> Vec<IncidentReport> {
        self.incidents
            .lock()
            .await
            .iter()
            .filter(|r| {
                r.decision.requires_approval
                    && r.action_result
                        .as_ref()
                        .is_some_and(|a| a.status == crate::decision::ActionStatus::Pending)
            })
            .cloned()
            .collect()
    }

    /// Run one detection cycle across all detectors. A failing detector is
    /// logged and skipped; the others still report.
    pub async fn run_detection_cycle(&self, namespace: Option<&str>) -> Vec<IncidentCandidate> {
        let mut candidates = Vec::new();
        for detector in &self.detectors {
            match detector.detect(namespace).await {
                Ok(found) => candidates.extend(found),
                Err(err) => {
                    error!(
                        incident_type = detector.incident_type(),
                        error = %err,
                        "Detector failed"
                    );
                }
            }
        }
        candidates
    }

    /// Process one incident through analysis, decision, and execution.
    pub async fn process_incident(&self, incident: IncidentCandidate) -> IncidentReport {
        info!(id = %incident.id, incident_type = %incident.incident_type, "Processing incident");

        let rca = self.analyzer.analyze(&incident).await;
        info!(
            id = %incident.id,
            root_cause = %rca.root_cause,
            confidence = rca.confidence,
            "RCA complete"
        );

        let decision = self.tree.decide(&incident, &rca);
        info!(id = %incident.id, decision = ?decision.decision_type, reasoning = %decision.reasoning, "Decision made");

        let mut report = IncidentReport {
            incident,
            rca,
            decision,
            action_result: None,
            verified: false,
            created_at: Utc::now(),
        };

        match report.decision.decision_type {
            DecisionType::Reject => {}
            DecisionType::Approval => {
                if let Some(action) = &report.decision.action {
                    report.action_result = Some(ActionResult::pending(action));
                    self.audit
                        .record(AuditRecord::new(
                            action.clone(),
                            AGENT_ACTOR,
                            &report.incident.source,
                            format!("{}: {}", report.incident.id, report.decision.reasoning),
                            "queued_for_approval",
                        ))
                        .await;
                }
            }
            DecisionType::AutoFix | DecisionType::Escalate => {
                if let Some(action) = report.decision.action.clone() {
                    let result = self.executor.execute(&action, &report.incident).await;
                    self.audit
                        .record(AuditRecord::new(
                            action,
                            AGENT_ACTOR,
                            &report.incident.source,
                            format!("{}: {}", report.incident.id, report.decision.reasoning),
                            format!("{:?}", result.status).to_lowercase(),
                        ))
                        .await;
                    report.action_result = Some(result);
                }
            }
        }

        self.incidents.lock().await.push(report.clone());
        report
    }

    /// Approve and execute a queued action. Returns `None` when no pending
    /// approval matches the incident id.
    pub async fn approve(&self, incident_id: &str, approver: &str) -> Option<ActionResult> {
        // Claim the pending slot under the lock so a concurrent approval of
        // the same incident cannot dispatch twice.
        let (incident, action) = {
            let mut incidents = self.incidents.lock().await;
            let report = incidents.iter_mut().find(|r| {
                r.incident.id == incident_id
                    && r.decision.requires_approval
                    && r.action_result
                        .as_ref()
                        .is_some_and(|a| a.status == crate::decision::ActionStatus::Pending)
            })?;
            let action = report.decision.action.clone()?;
            let mut claimed = ActionResult::pending(&action);
            claimed.status = crate::decision::ActionStatus::Executing;
            report.action_result = Some(claimed);
            (report.incident.clone(), action)
        };

        info!(id = %incident_id, action = %action, approver, "Approval granted");
        let result = self.executor.execute(&action, &incident).await;

        self.audit
            .record(AuditRecord::new(
                action,
                approver,
                &incident.source,
                format!("approved execution for {incident_id}"),
                format!("{:?}", result.status).to_lowercase(),
            ))
            .await;

        let mut incidents = self.incidents.lock().await;
        if let Some(report) = incidents.iter_mut().find(|r| r.incident.id == incident_id) {
            report.action_result = Some(result.clone());
        }
        Some(result)
    }

    /// Continuous monitoring loop. Returns when [`Agent::stop`] is called.
    pub async fn run_forever(&self, namespace: Option<&str>, interval: Duration) {
        self.running.store(true, Ordering::SeqCst);
        info!(interval_secs = interval.as_secs(), "Starting continuous monitoring");

        while self.running.load(Ordering::SeqCst) {
            let candidates = self.run_detection_cycle(namespace).await;
            if !candidates.is_empty() {
                info!(count = candidates.len(), "Detected incident candidates");
            }
            for candidate in candidates {
                self.process_incident(candidate).await;
            }
            tokio::time::sleep(interval).await;
        }
        info!("Monitoring stopped");
    }

    /// Signal the monitoring loop to stop after the current cycle.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::LogAuditSink;
    use crate::cluster::{ClusterOps, OpOutcome};
    use crate::config::{DecisionConfig, RcaConfig};
    use crate::decision::ActionStatus;
    use crate::signals::{Signal, SignalCorrelator, SignalSeverity, SignalType};
    use anyhow::Result;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Mutex as StdMutex;

    struct FakeDetector {
        correlator: SignalCorrelator,
        signals: Vec<Signal>,
        fail: bool,
    }

    #[async_trait]
    impl Detector for FakeDetector {
        fn incident_type(&self) -> &str {
            "memory_leak"
        }
        fn correlator(&self) -> &SignalCorrelator {
            &self.correlator
        }
        async fn collect_signals(&self, _namespace: Option<&str>) -> Result<Vec<Signal>> {
            if self.fail {
                anyhow::bail!("telemetry down");
            }
            Ok(self.signals.clone())
        }
    }

    #[derive(Default)]
    struct RecordingCluster {
        calls: StdMutex<Vec<String>>,
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
        async fn scale_deployment(
            &self,
            name: &str,
            namespace: &str,
            replicas: i32,
        ) -> Result<OpOutcome> {
            self.calls
                .lock()
                .unwrap()
                .push(format!("scale_deployment {namespace}/{name} to {replicas}"));
            Ok(OpOutcome::success("scale_deployment", name))
        }
    }

    fn oom_signals() -> Vec<Signal> {
        vec![
            Signal::new(
                SignalType::Event,
                "web-7d4b9c-x2x1z",
                "prod",
                "OOMKilled",
                json!("Container killed"),
                SignalSeverity::Critical,
            ),
            Signal::new(
                SignalType::Metric,
                "web-7d4b9c-x2x1z",
                "prod",
                "high_memory",
                json!(97.0),
                SignalSeverity::Critical,
            ),
        ]
    }

    fn agent_with(detectors: Vec<Arc<dyn Detector>>, cluster: Arc<RecordingCluster>) -> Agent {
        Agent::new(
            detectors,
            RcaAnalyzer::new(&RcaConfig::default(), None),
            DecisionTree::new(DecisionConfig::default()),
            RemediationExecutor::new(Some(cluster)),
            Arc::new(LogAuditSink),
        )
    }

    #[tokio::test]
    async fn test_oom_incident_queues_scale_for_approval() {
        let cluster = Arc::new(RecordingCluster::default());
        let agent = agent_with(
            vec![Arc::new(FakeDetector {
                correlator: SignalCorrelator::new(5),
                signals: oom_signals(),
                fail: false,
            })],
            cluster.clone(),
        );

        let candidates = agent.run_detection_cycle(None).await;
        assert_eq!(candidates.len(), 1);

        let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;
        // OOMKilled rule: confidence 0.95, scale_deployment. Critical
        // severity makes it medium risk, so it queues for approval.
        assert_eq!(report.rca.recommended_action, "scale_deployment");
        assert_eq!(report.decision.decision_type, DecisionType::Approval);
        assert_eq!(
            report.action_result.as_ref().map(|a| a.status),
            Some(ActionStatus::Pending)
        );
        // Nothing touched the cluster yet.
        assert!(cluster.calls.lock().unwrap().is_empty());
        assert_eq!(agent.pending_approvals().await.len(), 1);
    }

    #[tokio::test]
    async fn test_approve_executes_queued_action_once() {
        let cluster = Arc::new(RecordingCluster::default());
        let agent = agent_with(
            vec![Arc::new(FakeDetector {
                correlator: SignalCorrelator::new(5),
                signals: oom_signals(),
                fail: false,
            })],
            cluster.clone(),
        );

        let candidates = agent.run_detection_cycle(None).await;
        let report = agent.process_incident(candidates.into_iter().next().unwrap()).await;
        let id = report.incident.id.clone();

        let result = agent.approve(&id, "oncall").await.expect("approved");
        assert_eq!(result.status, ActionStatus::Completed);
        assert_eq!(
            cluster.calls.lock().unwrap().as_slice(),
            ["scale_deployment prod/web to 2"]
        );
        // The queue is drained and a second approval is refused.
        assert!(agent.pending_approvals().await.is_empty());
        assert!(agent.approve(&id, "oncall").await.is_none());
    }

    #[tokio::test]
    async fn test_approve_unknown_incident() {
        let agent = agent_with(Vec::new(), Arc::new(RecordingCluster::default()));
        assert!(agent.approve("INC-nope", "oncall").await.is_none());
    }

    #[tokio::test]
    async fn test_failing_detector_does_not_sink_the_cycle() {
        let cluster = Arc::new(RecordingCluster::default());
        let agent = agent_with(
            vec![
                Arc::new(FakeDetector {
                    correlator: SignalCorrelator::new(5),
                    signals: Vec::new(),
                    fail: true,
                }),
                Arc::new(FakeDetector {
                    correlator: SignalCorrelator::new(5),
                    signals: oom_signals(),
                    fail: false,
                }),
            ],
            cluster,
        );

        let candidates = agent.run_detection_cycle(None).await;
        assert_eq!(candidates.len(), 1);
    }

    #[tokio::test]
    async fn test_stop_ends_run_forever() {
        let agent = Arc::new(agent_with(Vec::new(), Arc::new(RecordingCluster::default())));
        let handle = {
            let agent = agent.clone();
            tokio::spawn(async move {
                agent.run_forever(None, Duration::from_millis(5)).await;
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        agent.stop();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("loop stops")
            .expect("task joins");
    }
}
