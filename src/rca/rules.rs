//! Rule table for canonical cluster failure signatures.
//!
//! Well-understood failures (OOM kills, crash loops, image pull failures)
//! have a known cause and a known remediation; routing them to an LLM would
//! burn quota to rediscover the obvious. Patterns are substring-matched
//! case-insensitively against the incident type, the source, and every
//! signal's name and string value. Table order is match priority: first
//! hit wins.

use tracing::info;

use super::RcaResult;
use crate::signals::IncidentCandidate;

struct Rule {
    pattern: &'static str,
    root_cause: &'static str,
    confidence: f64,
    evidence: &'static [&'static str],
    contributing_factors: &'static [&'static str],
    recommended_action: &'static str,
    rollback_guidance: &'static str,
    reasoning: &'static str,
}

const RULES: &[Rule] = &[
    Rule {
        pattern: "oomkilled",
        root_cause: "Container killed due to Out of Memory (OOMKilled)",
        confidence: 0.95,
        evidence: &["OOMKilled event detected"],
        contributing_factors: &["Memory limit too low", "Memory leak in application"],
        recommended_action: "scale_deployment",
        rollback_guidance: "Reduce memory usage or increase limits",
        reasoning: "OOMKilled is a definitive signal - container exceeded memory limits.",
    },
    Rule {
        pattern: "crashloopbackoff",
        root_cause: "Pod in CrashLoopBackOff - repeated crash cycles",
        confidence: 0.9,
        evidence: &["CrashLoopBackOff status detected"],
        contributing_factors: &[
            "Application startup failure",
            "Missing dependencies",
            "Configuration error",
        ],
        recommended_action: "escalate",
        rollback_guidance: "Check pod logs for startup errors, verify config and dependencies",
        reasoning: "CrashLoopBackOff requires investigation of logs to determine specific cause.",
    },
    Rule {
        pattern: "imagepullbackoff",
        root_cause: "Failed to pull container image",
        confidence: 0.95,
        evidence: &["ImagePullBackOff status detected"],
        contributing_factors: &[
            "Image not found",
            "Registry authentication failed",
            "Network issue",
        ],
        recommended_action: "escalate",
        rollback_guidance: "Verify image name, registry credentials, and network connectivity",
        reasoning: "Image pull failures are configuration issues requiring manual intervention.",
    },
    Rule {
        pattern: "high_memory",
        root_cause: "High memory utilization detected",
        confidence: 0.85,
        evidence: &["Memory usage exceeds threshold"],
        contributing_factors: &["Memory leak", "Increased load", "Insufficient resources"],
        recommended_action: "scale_deployment",
        rollback_guidance: "Monitor after scaling, investigate if issue persists",
        reasoning: "High memory typically requires scaling before deeper investigation.",
    },
    Rule {
        pattern: "high_cpu",
        root_cause: "High CPU utilization detected",
        confidence: 0.85,
        evidence: &["CPU usage exceeds threshold"],
        contributing_factors: &["Increased load", "Inefficient code", "Insufficient resources"],
        recommended_action: "scale_deployment",
        rollback_guidance: "Monitor after scaling, optimize if issue persists",
        reasoning: "High CPU typically requires scaling before deeper investigation.",
    },
    Rule {
        pattern: "pod_restart",
        root_cause: "Pod experiencing frequent restarts",
        confidence: 0.8,
        evidence: &["Multiple pod restarts detected"],
        contributing_factors: &[
            "Application crash",
            "Resource limits",
            "Liveness probe failures",
        ],
        recommended_action: "restart_pod",
        rollback_guidance: "Check pod logs and events for specific failure reason",
        reasoning: "Frequent restarts indicate instability requiring investigation.",
    },
];

impl Rule {
    fn to_result(&self) -> RcaResult {
        RcaResult {
            root_cause: self.root_cause.to_string(),
            confidence: self.confidence,
            evidence: self.evidence.iter().map(ToString::to_string).collect(),
            contributing_factors: self
                .contributing_factors
                .iter()
                .map(ToString::to_string)
                .collect(),
            recommended_action: self.recommended_action.to_string(),
            rollback_guidance: self.rollback_guidance.to_string(),
            reasoning: self.reasoning.to_string(),
        }
    }
}

/// Match an incident against the rule table. Returns the first hit.
#[must_use]
pub fn match_rules(incident: &IncidentCandidate) -> Option<RcaResult> {
    let mut parts = vec![
        incident.incident_type.to_lowercase(),
        incident.source.to_lowercase(),
    ];
    for signal in &incident.signals {
        parts.push(signal.name.to_lowercase());
        if let Some(text) = signal.value.as_str() {
            parts.push(text.to_lowercase());
        }
    }
    let combined = parts.join(" ");

    for rule in RULES {
        if combined.contains(rule.pattern) {
            info!(pattern = rule.pattern, id = %incident.id, "Rule-based match");
            return Some(rule.to_result());
        }
    }
    None
}
