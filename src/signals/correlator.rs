//! Signal correlator.
//!
//! Groups signals by `namespace/source` within a sliding time window into
//! incident candidates, computes a confidence score per candidate, and
//! filters out likely false positives.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, info};

use super::normalizer::{Signal, SignalSeverity};

/// A time/source-correlated cluster of signals with a derived confidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentCandidate {
    /// Opaque identifier, unique within a process lifetime
    pub id: String,
    /// Incident type being detected (memory_leak, api_timeout, early_warning, ...)
    pub incident_type: String,
    /// Primary affected resource
    pub source: String,
    /// Namespace of the affected resource
    pub namespace: String,
    /// Corroborating signals, in append order
    pub signals: Vec<Signal>,
    /// Derived confidence in [0, 1], recomputed on every append
    pub confidence: f64,
    /// Highest severity among the signals
    pub severity: SignalSeverity,
    /// When the candidate was created
    pub detected_at: DateTime<Utc>,
    /// Extra context
    pub metadata: HashMap<String, Value>,
}

impl IncidentCandidate {
    /// Create an empty candidate. Callers append signals with [`add_signal`].
    ///
    /// [`add_signal`]: IncidentCandidate::add_signal
    #[must_use]
    pub fn new(
        id: impl Into<String>,
        incident_type: impl Into<String>,
        source: impl Into<String>,
        namespace: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            incident_type: incident_type.into(),
            source: source.into(),
            namespace: namespace.into(),
            signals: Vec::new(),
            confidence: 0.0,
            severity: SignalSeverity::Warning,
            detected_at: Utc::now(),
            metadata: HashMap::new(),
        }
    }

    /// Append a corroborating signal and recompute confidence and severity.
    pub fn add_signal(&mut self, signal: Signal) {
        self.signals.push(signal);
        self.recompute();
    }

    /// Confidence is a pure function of the current signal list, recomputed
    /// rather than accumulated so repeated updates cannot drift.
    fn recompute(&mut self) {
        let signal_count = self.signals.len();

        let distinct_types = self
            .signals
            .iter()
            .map(|s| s.signal_type)
            .collect::<std::collections::HashSet<_>>()
            .len();
        let type_boost = distinct_types as f64 * 0.1;

        let critical_count = self
            .signals
            .iter()
            .filter(|s| s.severity == SignalSeverity::Critical)
            .count();
        let critical_boost = critical_count as f64 * 0.15;

        let base = (signal_count as f64 * 0.15).min(0.5);

        self.confidence = (base + type_boost + critical_boost).min(1.0);

        if critical_count > 0 {
            self.severity = SignalSeverity::Critical;
        } else if self
            .signals
            .iter()
            .any(|s| s.severity == SignalSeverity::Warning)
        {
            self.severity = SignalSeverity::Warning;
        } else {
            self.severity = SignalSeverity::Info;
        }
    }

    /// Whether any signal carries critical severity.
    #[must_use]
    pub fn has_critical_signal(&self) -> bool {
        self.signals
            .iter()
            .any(|s| s.severity == SignalSeverity::Critical)
    }
}

/// Correlates signals by namespace, source, and time window into incident
/// candidates with confidence scores.
#[derive(Debug)]
pub struct SignalCorrelator {
    window: Duration,
    counter: AtomicU64,
}

impl Default for SignalCorrelator {
    fn default() -> Self {
        Self::new(5)
    }
}

impl SignalCorrelator {
    /// Create a correlator with the given sliding window in minutes.
    #[must_use]
    pub fn new(window_minutes: i64) -> Self {
        Self {
            window: Duration::minutes(window_minutes),
            counter: AtomicU64::new(0),
        }
    }

    fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed) + 1;
        format!("INC-{}-{seq:04}", Utc::now().format("%Y%m%d%H%M%S"))
    }

    /// Correlate signals into incident candidates.
    ///
    /// Signals are grouped by `namespace/source`; within each group only
    /// signals younger than the window survive. Groups with at least one
    /// recent signal each produce one candidate, in first-seen group order.
    #[must_use]
    pub fn correlate(&self, signals: &[Signal], incident_type: &str) -> Vec<IncidentCandidate> {
        if signals.is_empty() {
            return Vec::new();
        }

        let mut order: Vec<String> = Vec::new();
        let mut groups: HashMap<String, Vec<&Signal>> = HashMap::new();
        for signal in signals {
            let key = format!("{}/{}", signal.namespace, signal.source);
            if !groups.contains_key(&key) {
                order.push(key.clone());
            }
            groups.entry(key).or_default().push(signal);
        }

        let now = Utc::now();
        let mut candidates = Vec::new();

        for key in order {
            let group = &groups[&key];
            let recent: Vec<&Signal> = group
                .iter()
                .filter(|s| now - s.timestamp < self.window)
                .copied()
                .collect();

            if recent.is_empty() {
                continue;
            }

            let (namespace, source) = key.split_once('/').unwrap_or((&key, ""));
            let mut candidate =
                IncidentCandidate::new(self.next_id(), incident_type, source, namespace);
            for signal in recent {
                candidate.add_signal(signal.clone());
            }

            info!(
                id = %candidate.id,
                incident_type,
                key = %key,
                confidence = candidate.confidence,
                "Incident candidate"
            );
            candidates.push(candidate);
        }

        candidates
    }

    /// Drop candidates that look like false positives.
    ///
    /// A candidate is dropped when its confidence is below `min_confidence`,
    /// or when it has fewer than `min_signals` signals - unless at least one
    /// signal is critical, which is always sufficient evidence on its own.
    #[must_use]
    pub fn filter_false_positives(
        &self,
        candidates: Vec<IncidentCandidate>,
        min_confidence: f64,
        min_signals: usize,
    ) -> Vec<IncidentCandidate> {
        let total = candidates.len();
        let filtered: Vec<IncidentCandidate> = candidates
            .into_iter()
            .filter(|c| {
                if c.confidence < min_confidence {
                    debug!(id = %c.id, confidence = c.confidence, "Rejecting low-confidence candidate");
                    return false;
                }
                if c.signals.len() < min_signals && !c.has_critical_signal() {
                    debug!(id = %c.id, signals = c.signals.len(), "Rejecting under-corroborated candidate");
                    return false;
                }
                true
            })
            .collect();

        let rejected = total - filtered.len();
        if rejected > 0 {
            info!(rejected, "Filtered out false positive candidates");
        }

        filtered
    }
}
