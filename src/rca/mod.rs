//! Root-cause analysis.
//!
//! Produces a structured explanation for an incident candidate through an
//! ordered resolver chain, each stage short-circuiting on a hit:
//!
//! 1. TTL cache keyed by incident fingerprint
//! 2. Rule table of canonical cluster failure signatures
//! 3. Confidence gate (low-confidence incidents never reach the LLM)
//! 4. External LLM call with retry/backoff
//!
//! The order is mandatory: every stage's precondition assumes the prior
//! stage missed. `analyze` is infallible by design - every failure mode
//! degrades to a fallback result instead of propagating an error.

pub mod cache;
pub mod llm;
pub mod rules;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::RcaConfig;
use crate::signals::IncidentCandidate;
use cache::RcaCache;
use llm::{LlmClient, LlmError};

/// Structured root cause analysis result. Produced once per incident and
/// never mutated afterward.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RcaResult {
    pub root_cause: String,
    pub confidence: f64,
    pub evidence: Vec<String>,
    pub contributing_factors: Vec<String>,
    pub recommended_action: String,
    pub rollback_guidance: String,
    pub reasoning: String,
}

/// First few signal names, used as evidence in synthesized fallbacks.
fn signal_evidence(incident: &IncidentCandidate) -> Vec<String> {
    incident.signals.iter().take(3).map(|s| s.name.clone()).collect()
}

/// Root-cause analyzer with the call-avoidance pipeline.
pub struct RcaAnalyzer {
    cache: RcaCache,
    llm: Option<LlmClient>,
    min_confidence_for_llm: f64,
}

impl RcaAnalyzer {
    /// Create an analyzer. Passing `None` for the LLM client leaves stages
    /// 1-3 functional; stage 4 degrades to the generic fallback.
    #[must_use]
    pub fn new(config: &RcaConfig, llm: Option<LlmClient>) -> Self {
        Self {
            cache: RcaCache::new(std::time::Duration::from_secs(config.cache_ttl_secs)),
            llm,
            min_confidence_for_llm: config.min_confidence_for_llm,
        }
    }

    /// Access the cache (tests and cache-priming callers).
    #[must_use]
    pub fn cache(&self) -> &RcaCache {
        &self.cache
    }

    /// Analyze an incident. Never fails: external-call and parse failures
    /// resolve to degraded fallback results.
    pub async fn analyze(&self, incident: &IncidentCandidate) -> RcaResult {
        info!(id = %incident.id, "Running RCA");

        // Stage 1: cache
        if let Some(cached) = self.cache.get(incident) {
            info!(id = %incident.id, "RCA cache hit - skipping analysis");
            return cached;
        }

        // Stage 2: rule table
        if let Some(rule_result) = rules::match_rules(incident) {
            info!(id = %incident.id, "RCA rule match - skipping LLM");
            self.cache.set(incident, rule_result.clone());
            return rule_result;
        }

        // Stage 3: confidence gate. Not cached: more signals may arrive and
        // push the same fingerprint over the threshold.
        if incident.confidence < self.min_confidence_for_llm {
            info!(
                id = %incident.id,
                confidence = incident.confidence,
                threshold = self.min_confidence_for_llm,
                "Below LLM confidence threshold"
            );
            return RcaResult {
                root_cause: format!("Low-confidence detection: {}", incident.incident_type),
                confidence: incident.confidence,
                evidence: signal_evidence(incident),
                contributing_factors: vec!["Insufficient signal correlation".to_string()],
                recommended_action: "escalate".to_string(),
                rollback_guidance: "Monitor and gather more data before action".to_string(),
                reasoning: format!(
                    "Detection confidence ({:.2}) below threshold ({:.2}). Requires more data.",
                    incident.confidence, self.min_confidence_for_llm
                ),
            };
        }

        // Stage 4: external LLM call
        let Some(llm) = &self.llm else {
            warn!(id = %incident.id, "No LLM client configured");
            return self.failure_fallback(incident, "analysis service not configured");
        };

        match llm.request_analysis(incident).await {
            Ok(result) => {
                info!(id = %incident.id, "LLM analysis complete - caching result");
                self.cache.set(incident, result.clone());
                result
            }
            Err(LlmError::RateLimitExhausted) => {
                warn!(id = %incident.id, "LLM rate limit exhausted");
                RcaResult {
                    root_cause: "Analysis Service Busy (Rate Limit)".to_string(),
                    confidence: 0.3,
                    evidence: signal_evidence(incident),
                    contributing_factors: vec!["High API Load".to_string()],
                    recommended_action: "escalate".to_string(),
                    rollback_guidance: "Manual investigation required".to_string(),
                    reasoning:
                        "Automated analysis unavailable due to API rate limits. Investigate manually."
                            .to_string(),
                }
            }
            Err(err) => {
                warn!(id = %incident.id, error = %err, "LLM analysis failed");
                self.failure_fallback(incident, &err.to_string())
            }
        }
    }

    /// Generic failure fallback carrying a truncated error description.
    fn failure_fallback(&self, incident: &IncidentCandidate, error: &str) -> RcaResult {
        let truncated: String = error.chars().take(100).collect();
        RcaResult {
            root_cause: "Analysis Failed".to_string(),
            confidence: 0.3,
            evidence: signal_evidence(incident),
            contributing_factors: Vec::new(),
            recommended_action: "escalate".to_string(),
            rollback_guidance: "Manual investigation required".to_string(),
            reasoning: format!("LLM analysis failed: {truncated}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RcaConfig;
    use crate::signals::{Signal, SignalSeverity, SignalType};
    use serde_json::json;

    fn incident(incident_type: &str, names: &[&str], severity: SignalSeverity) -> IncidentCandidate {
        let mut candidate = IncidentCandidate::new("INC-1", incident_type, "svc-a", "ns1");
        for name in names {
            candidate.add_signal(Signal::new(
                SignalType::Log,
                "svc-a",
                "ns1",
                *name,
                json!("line"),
                severity,
            ));
        }
        candidate
    }

    fn analyzer() -> RcaAnalyzer {
        RcaAnalyzer::new(&RcaConfig::default(), None)
    }

    #[tokio::test]
    async fn test_rule_match_is_cached() {
        let analyzer = analyzer();
        let incident = incident("memory_leak", &["oomkilled", "oomkilled"], SignalSeverity::Critical);

        let first = analyzer.analyze(&incident).await;
        assert_eq!(first.confidence, 0.95);
        assert_eq!(first.recommended_action, "scale_deployment");

        // Second call must come from the cache, not a fresh rule scan.
        assert!(analyzer.cache().get(&incident).is_some());
        let second = analyzer.analyze(&incident).await;
        assert_eq!(second.root_cause, first.root_cause);
    }

    #[tokio::test]
    async fn test_confidence_gate_blocks_llm() {
        let analyzer = analyzer();
        // One warning signal named nothing rule-worthy: confidence 0.25.
        let incident = incident("api_timeout", &["slow_request"], SignalSeverity::Warning);
        assert!(incident.confidence < 0.6);

        let result = analyzer.analyze(&incident).await;
        assert!(result.root_cause.starts_with("Low-confidence detection"));
        assert_eq!(result.recommended_action, "escalate");
        assert_eq!(result.confidence, incident.confidence);
        // Gate results are never cached.
        assert!(analyzer.cache().get(&incident).is_none());
    }

    #[tokio::test]
    async fn test_missing_llm_degrades_to_fallback() {
        let analyzer = analyzer();
        // High confidence, no rule match: reaches stage 4 without a client.
        let incident = incident(
            "api_latency",
            &["slow_request", "slow_request", "slow_request", "slow_request", "slow_request"],
            SignalSeverity::Critical,
        );
        assert!(incident.confidence >= 0.6);

        let result = analyzer.analyze(&incident).await;
        assert_eq!(result.root_cause, "Analysis Failed");
        assert_eq!(result.confidence, 0.3);
        assert_eq!(result.recommended_action, "escalate");
    }
}
