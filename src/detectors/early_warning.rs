//! ML-based early warning detector.
//!
//! Watches resource metrics and logs for anomalies and trend breaches that
//! have not yet produced a hard failure. Everything it emits goes through
//! the decision layer as `early_warning`, which always routes to human
//! approval.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{Duration, Utc};
use serde_json::json;
use std::sync::{Arc, Mutex};
use tracing::{debug, warn};

use super::Detector;
use crate::config::DetectionConfig;
use crate::ml::{CombinedAnomalyDetector, FeatureExtractor, TrendPredictor};
use crate::signals::{Signal, SignalCorrelator, SignalSeverity, SignalType};
use crate::telemetry::TelemetrySource;

const MEMORY_QUERY: &str =
    r#"avg_over_time(container_memory_working_set_bytes{container!="", container!="POD"}[5m])"#;
const CPU_QUERY: &str =
    r#"rate(container_cpu_usage_seconds_total{container!="", container!="POD"}[5m]) * 100"#;
const RESTART_RATE_QUERY: &str = "increase(kube_pod_container_status_restarts_total[5m]) > 0";
const RESTARTED_PODS_QUERY: &str = "kube_pod_container_status_restarts_total > 0";

const LOG_TAIL_LINES: u32 = 100;
const LOG_WINDOW_SECONDS: f64 = 60.0;

fn pod_of(labels: &std::collections::HashMap<String, String>) -> &str {
    labels.get("pod").map_or("unknown", String::as_str)
}

fn namespace_of(labels: &std::collections::HashMap<String, String>) -> &str {
    labels.get("namespace").map_or("default", String::as_str)
}

/// Anomaly-score severity split: warning below 0.7, critical at or above.
fn score_severity(score: f64) -> SignalSeverity {
    if score < 0.7 {
        SignalSeverity::Warning
    } else {
        SignalSeverity::Critical
    }
}

/// Detector producing `early_warning` incidents from anomaly scores and
/// trend-breach predictions.
pub struct EarlyWarningDetector {
    telemetry: Arc<dyn TelemetrySource>,
    correlator: SignalCorrelator,
    config: DetectionConfig,
    // Stateful ML components; locks are never held across awaits.
    extractor: Mutex<FeatureExtractor>,
    anomaly: Mutex<CombinedAnomalyDetector>,
    predictor: TrendPredictor,
}

impl EarlyWarningDetector {
    #[must_use]
    pub fn new(telemetry: Arc<dyn TelemetrySource>, config: DetectionConfig) -> Self {
        Self {
            telemetry,
            correlator: SignalCorrelator::new(config.correlation_window_minutes),
            config,
            extractor: Mutex::new(FeatureExtractor::new()),
            anomaly: Mutex::new(CombinedAnomalyDetector::new()),
            predictor: TrendPredictor::new(),
        }
    }

    async fn analyze_memory_trends(&self, namespace: Option<&str>) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        let samples = self.telemetry.query_instant(MEMORY_QUERY).await?;

        for sample in samples {
            let pod = pod_of(&sample.labels).to_string();
            let ns = namespace_of(&sample.labels).to_string();
            if namespace.is_some_and(|n| n != ns) {
                continue;
            }

            let range_query = format!(
                r#"container_memory_working_set_bytes{{pod="{pod}",container!="",container!="POD"}}"#
            );
            let end = Utc::now();
            let start = end - Duration::minutes(5);
            let series = match self
                .telemetry
                .query_range(&range_query, start, end, "30s")
                .await
            {
                Ok(series) => series,
                Err(err) => {
                    debug!(pod = %pod, error = %err, "Memory range query failed");
                    continue;
                }
            };
            let Some(first) = series.first() else {
                continue;
            };
            if first.points.len() < 3 {
                continue;
            }

            let timestamps: Vec<f64> = first.points.iter().map(|(t, _)| *t).collect();
            let values: Vec<f64> = first.points.iter().map(|(_, v)| *v).collect();

            let (features, anomaly) = {
                let extractor = self
                    .extractor
                    .lock()
                    .map_err(|_| anyhow::anyhow!("feature extractor lock poisoned"))?;
                let features =
                    extractor.extract_metric_features("memory_usage", &values, &pod, &ns);
                let detector = self
                    .anomaly
                    .lock()
                    .map_err(|_| anyhow::anyhow!("anomaly detector lock poisoned"))?;
                let anomaly = detector.metric_detector.detect(&features);
                (features, anomaly)
            };

            if anomaly.is_anomaly {
                signals.push(
                    Signal::new(
                        SignalType::Metric,
                        &pod,
                        &ns,
                        "memory_anomaly",
                        json!(format!("Anomaly score: {:.2}", anomaly.anomaly_score)),
                        score_severity(anomaly.anomaly_score),
                    )
                    .with_metadata("anomaly_score", json!(anomaly.anomaly_score))
                    .with_metadata("contributing_factors", json!(anomaly.contributing_factors))
                    .with_metadata("rate_of_change", json!(features.rate_of_change))
                    .with_metadata("spike_count", json!(features.spike_count)),
                );
            }

            // Trend prediction works in GB for readable thresholds.
            let gb_values: Vec<f64> = values.iter().map(|v| v / 1e9).collect();
            let prediction = self.predictor.predict(
                "memory_usage_percent",
                &gb_values,
                &timestamps,
                &pod,
                &ns,
                None,
            );
            if prediction.will_breach {
                if let Some(minutes) = prediction.time_to_threshold {
                    signals.push(
                        Signal::new(
                            SignalType::Metric,
                            &pod,
                            &ns,
                            "memory_breach_prediction",
                            json!(format!("Predicted breach in {minutes:.1} min")),
                            SignalSeverity::Warning,
                        )
                        .with_metadata("trend_direction", json!(prediction.trend_direction))
                        .with_metadata("rate_per_minute", json!(prediction.rate_per_minute))
                        .with_metadata("confidence", json!(prediction.confidence)),
                    );
                }
            }
        }
        Ok(signals)
    }

    async fn analyze_cpu(&self, namespace: Option<&str>) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for sample in self.telemetry.query_instant(CPU_QUERY).await? {
            let pod = pod_of(&sample.labels);
            let ns = namespace_of(&sample.labels);
            if namespace.is_some_and(|n| n != ns) {
                continue;
            }

            let cpu_percent = sample.value;
            if cpu_percent > 80.0 {
                let severity = if cpu_percent > 95.0 {
                    SignalSeverity::Critical
                } else {
                    SignalSeverity::Warning
                };
                signals.push(
                    Signal::new(
                        SignalType::Metric,
                        pod,
                        ns,
                        "high_cpu_usage",
                        json!(format!("{cpu_percent:.1}% CPU")),
                        severity,
                    )
                    .with_metadata("cpu_percent", json!(cpu_percent)),
                );
            }
        }
        Ok(signals)
    }

    async fn analyze_restarts(&self, namespace: Option<&str>) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        for sample in self.telemetry.query_instant(RESTART_RATE_QUERY).await? {
            let pod = pod_of(&sample.labels);
            let ns = namespace_of(&sample.labels);
            if namespace.is_some_and(|n| n != ns) {
                continue;
            }

            let restart_rate = sample.value;
            if restart_rate >= 1.0 {
                let severity = if restart_rate >= 3.0 {
                    SignalSeverity::Critical
                } else {
                    SignalSeverity::Warning
                };
                signals.push(
                    Signal::new(
                        SignalType::Metric,
                        pod,
                        ns,
                        "restart_spike",
                        json!(format!("{restart_rate:.0} restarts in 5m")),
                        severity,
                    )
                    .with_metadata("restart_rate", json!(restart_rate)),
                );
            }
        }
        Ok(signals)
    }

    async fn analyze_logs(&self, namespace: Option<&str>) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();
        // Pods that have restarted at least once are the ones worth tailing.
        for sample in self.telemetry.query_instant(RESTARTED_PODS_QUERY).await? {
            let pod = pod_of(&sample.labels).to_string();
            let ns = namespace_of(&sample.labels).to_string();
            if namespace.is_some_and(|n| n != ns) {
                continue;
            }

            let logs = match self.telemetry.tail_logs(&pod, &ns, LOG_TAIL_LINES).await {
                Ok(logs) => logs,
                Err(err) => {
                    debug!(pod = %pod, error = %err, "Failed to tail logs");
                    continue;
                }
            };
            if logs.is_empty() {
                continue;
            }

            let (features, anomaly) = {
                let mut extractor = self
                    .extractor
                    .lock()
                    .map_err(|_| anyhow::anyhow!("feature extractor lock poisoned"))?;
                let features =
                    extractor.extract_log_features(&logs, &pod, &ns, LOG_WINDOW_SECONDS);
                let detector = self
                    .anomaly
                    .lock()
                    .map_err(|_| anyhow::anyhow!("anomaly detector lock poisoned"))?;
                let anomaly = detector.log_detector.detect(&features);
                (features, anomaly)
            };

            if anomaly.is_anomaly {
                signals.push(
                    Signal::new(
                        SignalType::Log,
                        &pod,
                        &ns,
                        "log_anomaly",
                        json!(format!("Log anomaly score: {:.2}", anomaly.anomaly_score)),
                        score_severity(anomaly.anomaly_score),
                    )
                    .with_metadata("anomaly_score", json!(anomaly.anomaly_score))
                    .with_metadata("contributing_factors", json!(anomaly.contributing_factors))
                    .with_metadata("error_count", json!(features.error_count))
                    .with_metadata("has_oom", json!(features.has_oom))
                    .with_metadata("has_crash", json!(features.has_crash)),
                );
            }
        }
        Ok(signals)
    }
}

#[async_trait]
impl Detector for EarlyWarningDetector {
    fn incident_type(&self) -> &str {
        "early_warning"
    }

    fn correlator(&self) -> &SignalCorrelator {
        &self.correlator
    }

    fn min_confidence(&self) -> f64 {
        self.config.min_confidence
    }

    fn min_signals(&self) -> usize {
        self.config.min_signals
    }

    /// Collect signals from all sub-analyses. A failing sub-analysis is
    /// logged and skipped so one broken query does not blind the rest.
    async fn collect_signals(&self, namespace: Option<&str>) -> Result<Vec<Signal>> {
        let mut signals = Vec::new();

        match self.analyze_memory_trends(namespace).await {
            Ok(s) => signals.extend(s),
            Err(err) => warn!(error = %err, "Failed to analyze memory trends"),
        }
        match self.analyze_cpu(namespace).await {
            Ok(s) => signals.extend(s),
            Err(err) => warn!(error = %err, "Failed to analyze CPU"),
        }
        match self.analyze_restarts(namespace).await {
            Ok(s) => signals.extend(s),
            Err(err) => warn!(error = %err, "Failed to analyze restarts"),
        }
        match self.analyze_logs(namespace).await {
            Ok(s) => signals.extend(s),
            Err(err) => warn!(error = %err, "Failed to analyze logs"),
        }

        Ok(signals)
    }
}
