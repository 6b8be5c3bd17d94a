//! Anomaly scoring over extracted features.
//!
//! The metric path scores a feature vector through a trained outlier model
//! once enough samples have accumulated, and falls back to a deterministic
//! heuristic until then. The log path is purely heuristic against configured
//! baselines. A combiner fuses per-source scores with a corroboration bonus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::features::{LogFeatures, MetricFeatures};

/// Which path produced an anomaly result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AnomalyKind {
    Metric,
    Log,
    Combined,
}

/// Result of anomaly detection for one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalyResult {
    pub source: String,
    pub namespace: String,
    /// 0-1, higher is more anomalous
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub anomaly_type: AnomalyKind,
    pub contributing_factors: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl AnomalyResult {
    fn quiet(source: &str, namespace: &str, kind: AnomalyKind) -> Self {
        Self {
            source: source.to_string(),
            namespace: namespace.to_string(),
            anomaly_score: 0.0,
            is_anomaly: false,
            anomaly_type: kind,
            contributing_factors: Vec::new(),
            timestamp: Utc::now(),
        }
    }
}

/// Standardized z-score outlier model over fixed-size feature vectors.
///
/// Fitting records per-feature mean and standard deviation from the training
/// matrix. The decision value is positive for typical vectors and drops
/// toward (and below) zero as the mean absolute z-score grows, matching the
/// sign convention the score mapping expects.
#[derive(Debug, Clone)]
struct OutlierModel {
    means: Vec<f64>,
    stds: Vec<f64>,
}

impl OutlierModel {
    fn fit(samples: &[Vec<f64>]) -> Self {
        let dims = samples.first().map_or(0, Vec::len);
        let n = samples.len() as f64;
        let mut means = vec![0.0; dims];
        for sample in samples {
            for (i, v) in sample.iter().enumerate() {
                means[i] += v;
            }
        }
        for m in &mut means {
            *m /= n;
        }
        let mut stds = vec![0.0; dims];
        for sample in samples {
            for (i, v) in sample.iter().enumerate() {
                stds[i] += (v - means[i]).powi(2);
            }
        }
        for s in &mut stds {
            *s = (*s / n).sqrt();
        }
        Self { means, stds }
    }

    /// Decision value: 0.5 at the training centroid, 0 at an average
    /// z-score of 3, negative beyond.
    fn decision_value(&self, vector: &[f64]) -> f64 {
        if vector.len() != self.means.len() {
            return 0.5;
        }
        let mut total = 0.0;
        for (i, v) in vector.iter().enumerate() {
            let z = if self.stds[i] > 0.0 {
                ((v - self.means[i]) / self.stds[i]).abs()
            } else if (v - self.means[i]).abs() > f64::EPSILON {
                6.0
            } else {
                0.0
            };
            total += z.min(6.0);
        }
        let mean_abs_z = total / self.means.len() as f64;
        0.5 * (1.0 - mean_abs_z / 3.0)
    }
}

/// Outlier-model-based anomaly detector for metric features, with a
/// deterministic heuristic fallback while untrained.
#[derive(Debug)]
pub struct MetricAnomalyDetector {
    model: Option<OutlierModel>,
    training_data: Vec<Vec<f64>>,
    min_training_samples: usize,
}

impl Default for MetricAnomalyDetector {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricAnomalyDetector {
    #[must_use]
    pub fn new() -> Self {
        Self {
            model: None,
            training_data: Vec::new(),
            min_training_samples: 10,
        }
    }

    /// Whether the outlier model has been fit.
    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.model.is_some()
    }

    /// Accumulate a training sample; fits the model automatically once
    /// enough samples exist.
    pub fn add_training_sample(&mut self, features: &MetricFeatures) {
        self.training_data.push(features.to_vector());
        if self.training_data.len() >= self.min_training_samples && self.model.is_none() {
            self.train();
        }
    }

    /// Fit the outlier model on the accumulated samples.
    pub fn train(&mut self) {
        if self.training_data.len() < self.min_training_samples {
            warn!(
                samples = self.training_data.len(),
                required = self.min_training_samples,
                "Not enough training data"
            );
            return;
        }
        self.model = Some(OutlierModel::fit(&self.training_data));
        info!(samples = self.training_data.len(), "Trained metric outlier model");
    }

    /// Score metric features for anomaly.
    #[must_use]
    pub fn detect(&self, features: &MetricFeatures) -> AnomalyResult {
        let Some(model) = &self.model else {
            return self.heuristic_detect(features);
        };

        let raw = model.decision_value(&features.to_vector());
        let anomaly_score = ((0.5 - raw) / 0.5).clamp(0.0, 1.0);

        let mut factors = Vec::new();
        if features.rate_of_change > 0.1 {
            factors.push(format!("High rate of change: {:.3}", features.rate_of_change));
        }
        if features.spike_count > 0 {
            factors.push(format!("Detected {} spikes", features.spike_count));
        }
        if features.std > features.mean * 0.5 {
            factors.push(format!("High variance (std={:.2})", features.std));
        }
        if features.p99 > features.p50 * 2.0 {
            factors.push(format!(
                "P99 ({:.1}) >> P50 ({:.1})",
                features.p99, features.p50
            ));
        }

        AnomalyResult {
            source: features.pod.clone(),
            namespace: features.namespace.clone(),
            anomaly_score,
            is_anomaly: anomaly_score > 0.6,
            anomaly_type: AnomalyKind::Metric,
            contributing_factors: factors,
            timestamp: Utc::now(),
        }
    }

    /// Deterministic fallback used until the model is trained.
    fn heuristic_detect(&self, features: &MetricFeatures) -> AnomalyResult {
        let mut score: f64 = 0.0;
        let mut factors = Vec::new();

        if features.rate_of_change.abs() > 0.1 {
            score += 0.3;
            factors.push(format!("High rate of change: {:.3}", features.rate_of_change));
        }
        if features.spike_count > 2 {
            score += 0.2;
            factors.push(format!("Multiple spikes: {}", features.spike_count));
        }
        if features.mean > 0.0 && features.std > features.mean * 0.3 {
            score += 0.2;
            factors.push(format!(
                "High variance: std/mean = {:.2}",
                features.std / features.mean
            ));
        }
        if features.p50 > 0.0 && features.p99 > features.p50 * 3.0 {
            score += 0.3;
            factors.push(format!(
                "Tail latency: p99/p50 = {:.1}",
                features.p99 / features.p50
            ));
        }

        let score = score.min(1.0_f64);
        AnomalyResult {
            source: features.pod.clone(),
            namespace: features.namespace.clone(),
            anomaly_score: score,
            is_anomaly: score > 0.5,
            anomaly_type: AnomalyKind::Metric,
            contributing_factors: factors,
            timestamp: Utc::now(),
        }
    }
}

/// Heuristic log anomaly detector against configurable baselines.
#[derive(Debug, Clone)]
pub struct LogAnomalyDetector {
    baseline_error_rate: f64,
    baseline_logs_per_second: f64,
}

impl Default for LogAnomalyDetector {
    fn default() -> Self {
        Self {
            baseline_error_rate: 0.05,
            baseline_logs_per_second: 1.0,
        }
    }
}

impl LogAnomalyDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Override the baselines used for comparison.
    pub fn set_baseline(&mut self, error_rate: f64, logs_per_second: f64) {
        self.baseline_error_rate = error_rate;
        self.baseline_logs_per_second = logs_per_second;
    }

    /// Score log features for anomaly.
    #[must_use]
    pub fn detect(&self, features: &LogFeatures) -> AnomalyResult {
        let mut score: f64 = 0.0;
        let mut factors = Vec::new();

        if features.error_rate > self.baseline_error_rate * 2.0 {
            score += 0.3;
            factors.push(format!(
                "Error rate {:.1}% > baseline {:.1}%",
                features.error_rate * 100.0,
                self.baseline_error_rate * 100.0
            ));
        }

        if self.baseline_logs_per_second > 0.0 {
            let volume_ratio = features.logs_per_second / self.baseline_logs_per_second;
            if volume_ratio > 3.0 {
                score += 0.2;
                factors.push(format!("Log volume {volume_ratio:.1}x normal"));
            }
        }

        if features.new_patterns > 3 {
            score += 0.2;
            factors.push(format!("{} new log patterns detected", features.new_patterns));
        }

        if features.has_oom {
            score += 0.4;
            factors.push("OOM/memory keywords detected".to_string());
        }
        if features.has_crash {
            score += 0.3;
            factors.push("Crash/panic keywords detected".to_string());
        }
        if features.has_timeout {
            score += 0.2;
            factors.push("Timeout keywords detected".to_string());
        }
        if features.has_connection_error {
            score += 0.2;
            factors.push("Connection error keywords detected".to_string());
        }

        let score = score.min(1.0_f64);
        AnomalyResult {
            source: features.pod.clone(),
            namespace: features.namespace.clone(),
            anomaly_score: score,
            is_anomaly: score > 0.5,
            anomaly_type: AnomalyKind::Log,
            contributing_factors: factors,
            timestamp: Utc::now(),
        }
    }
}

/// Fuses metric and log anomaly scores for one source.
#[derive(Debug, Default)]
pub struct CombinedAnomalyDetector {
    pub metric_detector: MetricAnomalyDetector,
    pub log_detector: LogAnomalyDetector,
}

impl CombinedAnomalyDetector {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Combined detection: max of the available scores, with a +0.2
    /// corroboration bonus when at least two sources each score above 0.3.
    #[must_use]
    pub fn detect(
        &self,
        metric_features: Option<&MetricFeatures>,
        log_features: Option<&LogFeatures>,
    ) -> AnomalyResult {
        let mut scores = Vec::new();
        let mut factors = Vec::new();
        let mut source = "unknown".to_string();
        let mut namespace = "default".to_string();

        if let Some(features) = metric_features {
            let result = self.metric_detector.detect(features);
            scores.push(result.anomaly_score);
            factors.extend(result.contributing_factors.into_iter().map(|f| format!("[metric] {f}")));
            source = features.pod.clone();
            namespace = features.namespace.clone();
        }

        if let Some(features) = log_features {
            let result = self.log_detector.detect(features);
            scores.push(result.anomaly_score);
            factors.extend(result.contributing_factors.into_iter().map(|f| format!("[log] {f}")));
            source = features.pod.clone();
            namespace = features.namespace.clone();
        }

        if scores.is_empty() {
            return AnomalyResult::quiet(&source, &namespace, AnomalyKind::Combined);
        }

        let mut combined = scores.iter().copied().fold(0.0_f64, f64::max);
        if scores.len() > 1 && scores.iter().all(|s| *s > 0.3) {
            combined = (combined + 0.2).min(1.0);
            factors.push("Multiple anomaly sources corroborate".to_string());
        }

        AnomalyResult {
            source,
            namespace,
            anomaly_score: combined,
            is_anomaly: combined > 0.5,
            anomaly_type: AnomalyKind::Combined,
            contributing_factors: factors,
            timestamp: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ml::features::FeatureExtractor;

    fn metric_features(values: &[f64]) -> MetricFeatures {
        FeatureExtractor::new().extract_metric_features("m", values, "web-1", "prod")
    }

    fn log_features(logs: &[&str]) -> LogFeatures {
        let lines: Vec<String> = logs.iter().map(|s| (*s).to_string()).collect();
        FeatureExtractor::new().extract_log_features(&lines, "web-1", "prod", 60.0)
    }

    #[test]
    fn test_heuristic_flat_series_not_anomalous() {
        let detector = MetricAnomalyDetector::new();
        let result = detector.detect(&metric_features(&[5.0, 5.0, 5.0, 5.0, 5.0]));
        assert!(!result.is_anomaly);
        assert_eq!(result.anomaly_score, 0.0);
    }

    #[test]
    fn test_heuristic_rising_noisy_series_is_anomalous() {
        let detector = MetricAnomalyDetector::new();
        // Steep slope plus heavy tail: rate + tail-latency rules both fire.
        let values = vec![1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 50.0];
        let result = detector.detect(&metric_features(&values));
        assert!(result.anomaly_score > 0.5);
        assert!(result.is_anomaly);
        assert!(!result.contributing_factors.is_empty());
    }

    #[test]
    fn test_trained_model_scores_training_centroid_low() {
        let mut detector = MetricAnomalyDetector::new();
        for i in 0..12 {
            let base = 10.0 + f64::from(i % 3);
            detector.add_training_sample(&metric_features(&[base, base + 1.0, base + 2.0, base + 1.0]));
        }
        assert!(detector.is_trained());

        let normal = detector.detect(&metric_features(&[11.0, 12.0, 13.0, 12.0]));
        assert!(normal.anomaly_score < 0.6, "score={}", normal.anomaly_score);
    }

    #[test]
    fn test_trained_model_flags_outlier() {
        let mut detector = MetricAnomalyDetector::new();
        for i in 0..12 {
            let base = 10.0 + f64::from(i % 3);
            detector.add_training_sample(&metric_features(&[base, base + 1.0, base + 2.0, base + 1.0]));
        }

        let outlier = detector.detect(&metric_features(&[5000.0, 9000.0, 100.0, 8000.0]));
        assert!(outlier.anomaly_score > 0.6, "score={}", outlier.anomaly_score);
        assert!(outlier.is_anomaly);
    }

    #[test]
    fn test_untrained_below_minimum_uses_heuristic() {
        let mut detector = MetricAnomalyDetector::new();
        for _ in 0..5 {
            detector.add_training_sample(&metric_features(&[1.0, 2.0, 3.0]));
        }
        assert!(!detector.is_trained());
    }

    #[test]
    fn test_log_detector_oom_and_crash() {
        let detector = LogAnomalyDetector::new();
        let features = log_features(&["OOMKilled: memory limit reached", "panic: fatal crash"]);
        let result = detector.detect(&features);
        // 0.4 OOM + 0.3 crash + 0.3 error-rate spike
        assert!(result.anomaly_score > 0.5);
        assert!(result.is_anomaly);
    }

    #[test]
    fn test_log_detector_quiet_logs() {
        let detector = LogAnomalyDetector::new();
        let features = log_features(&["request served", "healthy"]);
        let result = detector.detect(&features);
        assert!(!result.is_anomaly);
    }

    #[test]
    fn test_combined_takes_max_and_corroborates() {
        let combiner = CombinedAnomalyDetector::new();
        let metric = metric_features(&[1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 50.0]);
        let log = log_features(&["OOM error detected"]);

        let result = combiner.detect(Some(&metric), Some(&log));
        let metric_only = combiner.detect(Some(&metric), None);
        assert!(result.anomaly_score >= metric_only.anomaly_score);
        assert!(result
            .contributing_factors
            .iter()
            .any(|f| f.contains("corroborate")));
        assert_eq!(result.anomaly_type, AnomalyKind::Combined);
    }

    #[test]
    fn test_combined_no_features() {
        let combiner = CombinedAnomalyDetector::new();
        let result = combiner.detect(None, None);
        assert_eq!(result.anomaly_score, 0.0);
        assert!(!result.is_anomaly);
    }
}
