//! Signal normalizer.
//!
//! Converts raw metric observations, log lines, and cluster events into
//! uniform [`Signal`] records with a severity classification. Signals are
//! immutable once created; severity is never downgraded after construction.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::HashMap;

/// Kind of telemetry a signal was derived from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalType {
    Metric,
    Log,
    Event,
}

impl SignalType {
    /// Stable name used in cache fingerprints and prompts.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Metric => "metric",
            Self::Log => "log",
            Self::Event => "event",
        }
    }
}

/// Severity classification of a signal. Ordered: info < warning < critical.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSeverity {
    Info,
    Warning,
    Critical,
}

impl SignalSeverity {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warning => "warning",
            Self::Critical => "critical",
        }
    }
}

/// A normalized, severity-tagged observation derived from raw telemetry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Signal {
    /// Kind of telemetry this signal came from
    pub signal_type: SignalType,
    /// Pod, deployment, or node the signal concerns
    pub source: String,
    /// Namespace of the source
    pub namespace: String,
    /// Metric name, log pattern, or event reason
    pub name: String,
    /// Observed value (number for metrics, line text for logs, message for events)
    pub value: Value,
    /// Severity classification, fixed at creation
    pub severity: SignalSeverity,
    /// When the observation was made
    pub timestamp: DateTime<Utc>,
    /// Extra context carried alongside the signal
    pub metadata: HashMap<String, Value>,
}

impl Signal {
    /// Create a signal timestamped now with empty metadata.
    #[must_use]
    pub fn new(
        signal_type: SignalType,
        source: impl Into<String>,
        namespace: impl Into<String>,
        name: impl Into<String>,
        value: Value,
        severity: SignalSeverity,
    ) -> Self {
        Self {
            signal_type,
            source: source.into(),
            namespace: namespace.into(),
            name: name.into(),
            value,
            severity,
            timestamp: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Attach a metadata entry, builder-style.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// A cluster event record, validated at the boundary rather than passed
/// around as loose JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterEvent {
    /// Event type ("Normal" or "Warning")
    #[serde(default = "default_event_type")]
    pub event_type: String,
    /// Machine-readable reason code (e.g. "OOMKilled")
    #[serde(default)]
    pub reason: String,
    /// Human-readable message
    #[serde(default)]
    pub message: String,
    /// Namespace of the involved object
    #[serde(default = "default_namespace")]
    pub namespace: String,
    /// Name of the involved object
    #[serde(default = "default_unknown")]
    pub object_name: String,
    /// Kind of the involved object
    #[serde(default)]
    pub object_kind: String,
    /// Occurrence count
    #[serde(default = "default_count")]
    pub count: u32,
}

fn default_event_type() -> String {
    "Normal".to_string()
}
fn default_namespace() -> String {
    "default".to_string()
}
fn default_unknown() -> String {
    "unknown".to_string()
}
fn default_count() -> u32 {
    1
}

/// Ordered first-match rules for log-line classification.
///
/// Only the first matching rule applies to a line; more specific patterns
/// come before generic ones.
const LOG_RULES: &[(&str, SignalSeverity, &str)] = &[
    ("OOM", SignalSeverity::Critical, "out_of_memory"),
    ("OutOfMemory", SignalSeverity::Critical, "out_of_memory"),
    ("No space left", SignalSeverity::Critical, "disk_full"),
    ("disk full", SignalSeverity::Critical, "disk_full"),
    ("killed", SignalSeverity::Critical, "process_killed"),
    ("timeout", SignalSeverity::Warning, "timeout"),
    ("Timeout", SignalSeverity::Warning, "timeout"),
    ("connection refused", SignalSeverity::Warning, "connection_refused"),
    ("error", SignalSeverity::Warning, "error"),
    ("Error", SignalSeverity::Warning, "error"),
    ("failed", SignalSeverity::Warning, "failure"),
    ("Failed", SignalSeverity::Warning, "failure"),
];

/// Event reasons that force critical severity regardless of event type.
const CRITICAL_EVENT_REASONS: &[&str] =
    &["OOMKilled", "OOMKilling", "FailedMount", "FailedScheduling"];

/// Normalizes raw telemetry into signals.
#[derive(Debug, Clone, Copy, Default)]
pub struct SignalNormalizer;

impl SignalNormalizer {
    #[must_use]
    pub fn new() -> Self {
        Self
    }

    /// Normalize a metric observation into a signal.
    ///
    /// Severity is critical when the value exceeds the threshold, warning
    /// above 80% of it, otherwise info. Without a threshold the signal is
    /// always info.
    #[must_use]
    pub fn normalize_metric(
        &self,
        metric_name: &str,
        value: f64,
        labels: &HashMap<String, String>,
        threshold: Option<f64>,
    ) -> Signal {
        let pod = labels
            .get("pod")
            .or_else(|| labels.get("container"))
            .cloned()
            .unwrap_or_else(|| "unknown".to_string());
        let namespace = labels
            .get("namespace")
            .cloned()
            .unwrap_or_else(|| "default".to_string());

        let severity = match threshold {
            Some(t) if value > t => SignalSeverity::Critical,
            Some(t) if value > t * 0.8 => SignalSeverity::Warning,
            _ => SignalSeverity::Info,
        };

        Signal::new(
            SignalType::Metric,
            pod,
            namespace,
            metric_name,
            json!(value),
            severity,
        )
        .with_metadata("labels", json!(labels))
        .with_metadata("threshold", json!(threshold))
    }

    /// Normalize a batch of log lines into zero-or-one signal per line.
    ///
    /// Each line is scanned against the ordered rule list; the first matching
    /// substring determines the signal name and severity.
    #[must_use]
    pub fn normalize_logs(&self, log_lines: &[String], pod: &str, namespace: &str) -> Vec<Signal> {
        let mut signals = Vec::new();

        for line in log_lines {
            for (pattern, severity, signal_name) in LOG_RULES {
                if line.contains(pattern) {
                    signals.push(
                        Signal::new(
                            SignalType::Log,
                            pod,
                            namespace,
                            *signal_name,
                            json!(line),
                            *severity,
                        )
                        .with_metadata("pattern", json!(pattern)),
                    );
                    break;
                }
            }
        }

        signals
    }

    /// Normalize a cluster event into a signal.
    ///
    /// A "Warning" event type maps to warning severity; a fixed set of reason
    /// codes forces critical regardless of event type.
    #[must_use]
    pub fn normalize_event(&self, event: &ClusterEvent) -> Signal {
        let mut severity = SignalSeverity::Info;
        if event.event_type == "Warning" {
            severity = SignalSeverity::Warning;
        }
        if CRITICAL_EVENT_REASONS.contains(&event.reason.as_str()) {
            severity = SignalSeverity::Critical;
        }

        Signal::new(
            SignalType::Event,
            event.object_name.clone(),
            event.namespace.clone(),
            event.reason.clone(),
            json!(event.message),
            severity,
        )
        .with_metadata("count", json!(event.count))
        .with_metadata("object_kind", json!(event.object_kind))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels(pod: &str, ns: &str) -> HashMap<String, String> {
        let mut m = HashMap::new();
        m.insert("pod".to_string(), pod.to_string());
        m.insert("namespace".to_string(), ns.to_string());
        m
    }

    #[test]
    fn test_metric_severity_from_threshold() {
        let n = SignalNormalizer::new();
        let l = labels("web-1", "prod");

        let critical = n.normalize_metric("memory_usage_percent", 92.0, &l, Some(90.0));
        assert_eq!(critical.severity, SignalSeverity::Critical);

        let warning = n.normalize_metric("memory_usage_percent", 75.0, &l, Some(90.0));
        assert_eq!(warning.severity, SignalSeverity::Warning);

        let info = n.normalize_metric("memory_usage_percent", 40.0, &l, Some(90.0));
        assert_eq!(info.severity, SignalSeverity::Info);
    }

    #[test]
    fn test_metric_without_threshold_is_info() {
        let n = SignalNormalizer::new();
        let signal = n.normalize_metric("requests_total", 1e9, &labels("web-1", "prod"), None);
        assert_eq!(signal.severity, SignalSeverity::Info);
    }

    #[test]
    fn test_metric_source_falls_back_to_container() {
        let n = SignalNormalizer::new();
        let mut l = HashMap::new();
        l.insert("container".to_string(), "sidecar".to_string());
        let signal = n.normalize_metric("cpu", 1.0, &l, None);
        assert_eq!(signal.source, "sidecar");
        assert_eq!(signal.namespace, "default");
    }

    #[test]
    fn test_log_first_match_wins() {
        let n = SignalNormalizer::new();
        // "OOM" and "killed" both appear; only the first rule should fire.
        let lines = vec!["process OOM killed by kernel".to_string()];
        let signals = n.normalize_logs(&lines, "svc-a", "ns1");
        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].name, "out_of_memory");
        assert_eq!(signals[0].severity, SignalSeverity::Critical);
    }

    #[test]
    fn test_log_unmatched_lines_produce_nothing() {
        let n = SignalNormalizer::new();
        let lines = vec!["all quiet".to_string(), "request served in 2ms".to_string()];
        assert!(n.normalize_logs(&lines, "svc-a", "ns1").is_empty());
    }

    #[test]
    fn test_log_warning_rules() {
        let n = SignalNormalizer::new();
        let lines = vec![
            "upstream timeout after 5s".to_string(),
            "connection refused by 10.0.0.1".to_string(),
            "request failed with 500".to_string(),
        ];
        let signals = n.normalize_logs(&lines, "svc-a", "ns1");
        assert_eq!(signals.len(), 3);
        assert!(signals.iter().all(|s| s.severity == SignalSeverity::Warning));
        assert_eq!(signals[0].name, "timeout");
        assert_eq!(signals[1].name, "connection_refused");
        assert_eq!(signals[2].name, "failure");
    }

    #[test]
    fn test_event_warning_type() {
        let n = SignalNormalizer::new();
        let event = ClusterEvent {
            event_type: "Warning".to_string(),
            reason: "BackOff".to_string(),
            message: "Back-off restarting failed container".to_string(),
            namespace: "prod".to_string(),
            object_name: "web-1".to_string(),
            object_kind: "Pod".to_string(),
            count: 4,
        };
        let signal = n.normalize_event(&event);
        assert_eq!(signal.severity, SignalSeverity::Warning);
        assert_eq!(signal.name, "BackOff");
    }

    #[test]
    fn test_event_critical_reason_overrides_type() {
        let n = SignalNormalizer::new();
        let event = ClusterEvent {
            event_type: "Normal".to_string(),
            reason: "OOMKilled".to_string(),
            message: "container killed".to_string(),
            namespace: "prod".to_string(),
            object_name: "web-1".to_string(),
            object_kind: "Pod".to_string(),
            count: 1,
        };
        assert_eq!(n.normalize_event(&event).severity, SignalSeverity::Critical);
    }
}
