//! Configuration for the incident-response engine.
//!
//! Every component carries its own small config struct with env-driven
//! defaults; [`MenderConfig`] aggregates them so `main` can build the whole
//! agent from one place instead of each component reading the environment on
//! its own.

use crate::cluster::GatewayConfig;
use crate::rca::llm::LlmConfig;
use crate::telemetry::TelemetryConfig;

/// Read an env var and parse it, falling back to a default.
pub(crate) fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

/// Read an env var as a string, falling back to a default.
pub(crate) fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Thresholds and tuning for signal correlation and detection.
#[derive(Debug, Clone)]
pub struct DetectionConfig {
    /// Sliding time window for signal correlation, in minutes
    pub correlation_window_minutes: i64,
    /// Minimum candidate confidence kept by the false-positive filter
    pub min_confidence: f64,
    /// Minimum corroborating signals (a single critical signal always passes)
    pub min_signals: usize,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        Self {
            correlation_window_minutes: env_parse("MENDER_CORRELATION_WINDOW_MINUTES", 5),
            min_confidence: env_parse("MENDER_MIN_CONFIDENCE", 0.15),
            min_signals: env_parse("MENDER_MIN_SIGNALS", 1),
        }
    }
}

/// Thresholds for the decision tree.
#[derive(Debug, Clone)]
pub struct DecisionConfig {
    /// Minimum RCA confidence for an unattended auto-fix
    pub auto_fix_confidence_threshold: f64,
    /// Minimum RCA confidence for queueing a human approval
    pub approval_confidence_threshold: f64,
}

impl Default for DecisionConfig {
    fn default() -> Self {
        Self {
            auto_fix_confidence_threshold: env_parse("MENDER_AUTO_FIX_CONFIDENCE", 0.8),
            approval_confidence_threshold: env_parse("MENDER_APPROVAL_CONFIDENCE", 0.6),
        }
    }
}

/// Tuning for the RCA layer's call-avoidance pipeline.
#[derive(Debug, Clone)]
pub struct RcaConfig {
    /// TTL for cached RCA results, in seconds
    pub cache_ttl_secs: u64,
    /// Incidents below this confidence never reach the LLM
    pub min_confidence_for_llm: f64,
}

impl Default for RcaConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: env_parse("MENDER_RCA_CACHE_TTL_SECS", 300),
            min_confidence_for_llm: env_parse("MENDER_RCA_MIN_CONFIDENCE_FOR_LLM", 0.6),
        }
    }
}

/// Top-level configuration assembled from the environment.
#[derive(Debug, Clone, Default)]
pub struct MenderConfig {
    pub telemetry: TelemetryConfig,
    pub gateway: GatewayConfig,
    pub llm: LlmConfig,
    pub detection: DetectionConfig,
    pub decision: DecisionConfig,
    pub rca: RcaConfig,
}

impl MenderConfig {
    /// Load configuration from the environment.
    #[must_use]
    pub fn from_env() -> Self {
        Self::default()
    }
}
