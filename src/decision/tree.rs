//! Decision tree mapping (incident, RCA) to a course of action.
//!
//! Guard order is fixed and earlier guards win:
//!
//! 1. False-positive rejection
//! 2. Escalate-only incident types (disk pressure)
//! 3. Approval-only incident types (ML early warnings)
//! 4. Risk assessment, then auto-fix / approval / escalate by confidence

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::DecisionConfig;
use crate::rca::RcaResult;
use crate::signals::{IncidentCandidate, SignalSeverity};

/// Actions safe enough to execute unattended.
const SAFE_ACTIONS: &[&str] = &["restart_pod", "delete_pod"];

/// Actions that always need a human sign-off.
const APPROVAL_ACTIONS: &[&str] = &["scale_deployment", "rollout_restart"];

/// Incident types that are never auto-fixed.
const ESCALATE_ONLY_TYPES: &[&str] = &["disk_full"];

/// Incident types routed to human review regardless of confidence.
const APPROVAL_ONLY_TYPES: &[&str] = &["early_warning"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionType {
    /// False positive, no action
    Reject,
    AutoFix,
    Approval,
    Escalate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

/// Outcome of the decision tree for one incident.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: DecisionType,
    /// Remediation action; `None` exactly when the incident is rejected
    pub action: Option<String>,
    pub risk_level: RiskLevel,
    pub reasoning: String,
    pub requires_approval: bool,
    pub auto_approved: bool,
}

/// Stateless decision engine.
#[derive(Debug, Clone)]
pub struct DecisionTree {
    config: DecisionConfig,
}

impl DecisionTree {
    #[must_use]
    pub fn new(config: DecisionConfig) -> Self {
        Self { config }
    }

    /// Decide what to do about an incident given its root cause analysis.
    #[must_use]
    pub fn decide(&self, incident: &IncidentCandidate, rca: &RcaResult) -> Decision {
        info!(id = %incident.id, "Making decision");

        if Self::is_false_positive(incident, rca) {
            return Decision {
                decision_type: DecisionType::Reject,
                action: None,
                risk_level: RiskLevel::Low,
                reasoning: "Rejected as false positive: insufficient evidence or low confidence"
                    .to_string(),
                requires_approval: false,
                auto_approved: false,
            };
        }

        if ESCALATE_ONLY_TYPES.contains(&incident.incident_type.as_str()) {
            return Decision {
                decision_type: DecisionType::Escalate,
                action: Some("escalate".to_string()),
                risk_level: RiskLevel::High,
                reasoning: format!(
                    "{} incidents always require human intervention",
                    incident.incident_type
                ),
                requires_approval: false,
                auto_approved: false,
            };
        }

        if APPROVAL_ONLY_TYPES.contains(&incident.incident_type.as_str()) {
            let action = if rca.recommended_action.is_empty() {
                "investigate".to_string()
            } else {
                rca.recommended_action.clone()
            };
            return Decision {
                decision_type: DecisionType::Approval,
                action: Some(action),
                risk_level: RiskLevel::Medium,
                reasoning: format!("ML early warning: {}", rca.root_cause),
                requires_approval: true,
                auto_approved: false,
            };
        }

        let risk = Self::assess_risk(incident, rca);

        if risk == RiskLevel::Low
            && rca.confidence >= self.config.auto_fix_confidence_threshold
            && SAFE_ACTIONS.contains(&rca.recommended_action.as_str())
        {
            return Decision {
                decision_type: DecisionType::AutoFix,
                action: Some(rca.recommended_action.clone()),
                risk_level: risk,
                reasoning: format!(
                    "High confidence ({:.2}) and low risk. Auto-fixing: {}",
                    rca.confidence, rca.recommended_action
                ),
                requires_approval: false,
                auto_approved: true,
            };
        }

        if risk <= RiskLevel::Medium && rca.confidence >= self.config.approval_confidence_threshold
        {
            return Decision {
                decision_type: DecisionType::Approval,
                action: Some(rca.recommended_action.clone()),
                risk_level: risk,
                reasoning: format!(
                    "Confidence: {:.2}, Risk: {risk:?}. Requires human approval.",
                    rca.confidence
                ),
                requires_approval: true,
                auto_approved: false,
            };
        }

        Decision {
            decision_type: DecisionType::Escalate,
            action: Some("escalate".to_string()),
            risk_level: RiskLevel::High,
            reasoning: format!(
                "Low confidence ({:.2}) or high risk. Escalating for human investigation.",
                rca.confidence
            ),
            requires_approval: false,
            auto_approved: false,
        }
    }

    fn is_false_positive(incident: &IncidentCandidate, rca: &RcaResult) -> bool {
        if rca.confidence < 0.3 {
            return true;
        }
        // A single non-critical signal with weak detection confidence.
        if incident.signals.len() == 1
            && incident.signals[0].severity != SignalSeverity::Critical
            && incident.confidence < 0.5
        {
            return true;
        }
        false
    }

    fn assess_risk(incident: &IncidentCandidate, rca: &RcaResult) -> RiskLevel {
        if incident.severity == SignalSeverity::Critical {
            if incident.signals.len() > 3 {
                return RiskLevel::High;
            }
            return RiskLevel::Medium;
        }
        if SAFE_ACTIONS.contains(&rca.recommended_action.as_str()) {
            return RiskLevel::Low;
        }
        if APPROVAL_ACTIONS.contains(&rca.recommended_action.as_str()) {
            return RiskLevel::Medium;
        }
        RiskLevel::High
    }
}

impl Default for DecisionTree {
    fn default() -> Self {
        Self::new(DecisionConfig::default())
    }
}
