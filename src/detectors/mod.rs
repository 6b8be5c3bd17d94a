//! Incident detectors.
//!
//! A detector collects normalized signals for one incident type; the shared
//! `detect` flow correlates them into candidates and filters the obvious
//! false positives.

pub mod early_warning;

pub use early_warning::EarlyWarningDetector;

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

use crate::signals::{IncidentCandidate, Signal, SignalCorrelator};

/// Confidence floor applied after correlation.
const FILTER_MIN_CONFIDENCE: f64 = 0.15;
/// Minimum corroborating signals (a lone critical signal still passes).
const FILTER_MIN_SIGNALS: usize = 1;

/// One incident detector.
#[async_trait]
pub trait Detector: Send + Sync {
    /// Incident type this detector produces.
    fn incident_type(&self) -> &str;

    /// Correlator used by the shared detection flow.
    fn correlator(&self) -> &SignalCorrelator;

    /// Confidence floor for the false-positive filter.
    fn min_confidence(&self) -> f64 {
        FILTER_MIN_CONFIDENCE
    }

    /// Minimum corroborating signals for the false-positive filter.
    fn min_signals(&self) -> usize {
        FILTER_MIN_SIGNALS
    }

    /// Collect and normalize signals, optionally scoped to one namespace.
    async fn collect_signals(&self, namespace: Option<&str>) -> Result<Vec<Signal>>;

    /// Run a detection pass: collect, correlate, filter.
    async fn detect(&self, namespace: Option<&str>) -> Result<Vec<IncidentCandidate>> {
        info!(incident_type = self.incident_type(), "Running detection");
        let signals = self.collect_signals(namespace).await?;
        info!(
            incident_type = self.incident_type(),
            count = signals.len(),
            "Collected signals"
        );
        if signals.is_empty() {
            return Ok(Vec::new());
        }

        let candidates = self.correlator().correlate(&signals, self.incident_type());
        let filtered = self.correlator().filter_false_positives(
            candidates,
            self.min_confidence(),
            self.min_signals(),
        );
        info!(
            incident_type = self.incident_type(),
            count = filtered.len(),
            "Detection complete"
        );
        Ok(filtered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::signals::{SignalSeverity, SignalType};
    use serde_json::json;

    struct StaticDetector {
        correlator: SignalCorrelator,
        signals: Vec<Signal>,
    }

    #[async_trait]
    impl Detector for StaticDetector {
        fn incident_type(&self) -> &str {
            "static_test"
        }

        fn correlator(&self) -> &SignalCorrelator {
            &self.correlator
        }

        async fn collect_signals(&self, _namespace: Option<&str>) -> Result<Vec<Signal>> {
            Ok(self.signals.clone())
        }
    }

    #[tokio::test]
    async fn test_default_detect_correlates_and_filters() {
        let detector = StaticDetector {
            correlator: SignalCorrelator::new(5),
            signals: vec![
                Signal::new(
                    SignalType::Metric,
                    "web-1",
                    "prod",
                    "high_memory",
                    json!(95.0),
                    SignalSeverity::Critical,
                ),
                Signal::new(
                    SignalType::Log,
                    "web-1",
                    "prod",
                    "out_of_memory",
                    json!("OOM"),
                    SignalSeverity::Critical,
                ),
            ],
        };

        let incidents = detector.detect(None).await.unwrap();
        assert_eq!(incidents.len(), 1);
        assert_eq!(incidents[0].incident_type, "static_test");
        assert_eq!(incidents[0].signals.len(), 2);
    }

    #[tokio::test]
    async fn test_no_signals_no_incidents() {
        let detector = StaticDetector {
            correlator: SignalCorrelator::new(5),
            signals: Vec::new(),
        };
        assert!(detector.detect(None).await.unwrap().is_empty());
    }
}
