//! Feature extraction for anomaly detection.
//!
//! Reduces a metric time series or a log batch into a fixed-size numeric
//! summary. The extractor keeps process-lifetime memory of normalized log
//! patterns so novel patterns can be counted; that memory grows append-only
//! and is cleared only by an explicit [`FeatureExtractor::reset_patterns`].

use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

const ERROR_KEYWORDS: &[&str] = &["error", "fail", "exception", "crash", "panic"];
const WARNING_KEYWORDS: &[&str] = &["warn", "warning", "deprecated", "slow"];
const OOM_KEYWORDS: &[&str] = &["oom", "out of memory", "oomkilled", "memory limit"];
const TIMEOUT_KEYWORDS: &[&str] = &["timeout", "timed out", "deadline exceeded"];
const CONNECTION_KEYWORDS: &[&str] = &["connection refused", "connection reset", "no route to host"];
const CRASH_KEYWORDS: &[&str] = &["crash", "segfault", "sigsegv", "panic", "fatal"];

/// Statistical summary of a metric time series.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricFeatures {
    pub name: String,
    pub pod: String,
    pub namespace: String,

    pub mean: f64,
    /// Population standard deviation
    pub std: f64,
    pub min_val: f64,
    pub max_val: f64,

    /// Slope of a least-squares fit over index position vs value
    pub rate_of_change: f64,
    /// Variance of the second half minus variance of the first half
    pub variance_change: f64,

    pub p50: f64,
    pub p90: f64,
    pub p99: f64,

    /// Points deviating more than two standard deviations from the mean
    pub spike_count: u32,

    pub timestamp: DateTime<Utc>,
}

impl MetricFeatures {
    fn empty(name: &str, pod: &str, namespace: &str) -> Self {
        Self {
            name: name.to_string(),
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            mean: 0.0,
            std: 0.0,
            min_val: 0.0,
            max_val: 0.0,
            rate_of_change: 0.0,
            variance_change: 0.0,
            p50: 0.0,
            p90: 0.0,
            p99: 0.0,
            spike_count: 0,
            timestamp: Utc::now(),
        }
    }

    /// Fixed-order feature vector for the outlier model.
    #[must_use]
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.mean,
            self.std,
            self.min_val,
            self.max_val,
            self.rate_of_change,
            self.variance_change,
            self.p50,
            self.p90,
            self.p99,
            f64::from(self.spike_count),
        ]
    }
}

/// Summary of a log batch over a time window.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogFeatures {
    pub pod: String,
    pub namespace: String,

    pub total_logs: usize,
    pub error_count: usize,
    pub warning_count: usize,

    /// Distinct normalized patterns within this batch
    pub unique_patterns: usize,
    /// Patterns never seen before by this extractor instance
    pub new_patterns: usize,

    pub logs_per_second: f64,
    pub error_rate: f64,

    pub has_oom: bool,
    pub has_timeout: bool,
    pub has_connection_error: bool,
    pub has_crash: bool,

    pub timestamp: DateTime<Utc>,
}

impl LogFeatures {
    fn empty(pod: &str, namespace: &str) -> Self {
        Self {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            total_logs: 0,
            error_count: 0,
            warning_count: 0,
            unique_patterns: 0,
            new_patterns: 0,
            logs_per_second: 0.0,
            error_rate: 0.0,
            has_oom: false,
            has_timeout: false,
            has_connection_error: false,
            has_crash: false,
            timestamp: Utc::now(),
        }
    }

    /// Fixed-order feature vector for the outlier model.
    #[must_use]
    pub fn to_vector(&self) -> Vec<f64> {
        vec![
            self.total_logs as f64,
            self.error_count as f64,
            self.warning_count as f64,
            self.unique_patterns as f64,
            self.new_patterns as f64,
            self.logs_per_second,
            self.error_rate,
            f64::from(u8::from(self.has_oom)),
            f64::from(u8::from(self.has_timeout)),
            f64::from(u8::from(self.has_connection_error)),
            f64::from(u8::from(self.has_crash)),
        ]
    }
}

/// Extracts numeric features from raw metrics and logs.
#[derive(Debug)]
pub struct FeatureExtractor {
    known_patterns: HashSet<String>,
    uuid_re: Regex,
    ip_re: Regex,
    num_re: Regex,
}

impl Default for FeatureExtractor {
    fn default() -> Self {
        Self::new()
    }
}

impl FeatureExtractor {
    #[must_use]
    pub fn new() -> Self {
        Self {
            known_patterns: HashSet::new(),
            uuid_re: Regex::new(
                r"(?i)[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}",
            )
            .expect("valid uuid regex"),
            ip_re: Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").expect("valid ip regex"),
            num_re: Regex::new(r"\d+").expect("valid number regex"),
        }
    }

    /// Extract statistical features from a metric time series.
    #[must_use]
    pub fn extract_metric_features(
        &self,
        name: &str,
        values: &[f64],
        pod: &str,
        namespace: &str,
    ) -> MetricFeatures {
        if values.is_empty() {
            return MetricFeatures::empty(name, pod, namespace);
        }

        let n = values.len();
        let mean = values.iter().sum::<f64>() / n as f64;
        let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
        let std = variance.sqrt();

        let min_val = values.iter().copied().fold(f64::INFINITY, f64::min);
        let max_val = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);

        let mut sorted = values.to_vec();
        sorted.sort_by(f64::total_cmp);
        let p50 = percentile(&sorted, 50.0);
        let p90 = percentile(&sorted, 90.0);
        let p99 = percentile(&sorted, 99.0);

        let rate_of_change = if n > 1 {
            index_slope(values)
        } else {
            0.0
        };

        let variance_change = if n >= 4 {
            let mid = n / 2;
            population_variance(&values[mid..]) - population_variance(&values[..mid])
        } else {
            0.0
        };

        let spike_count = if std > 0.0 {
            values.iter().filter(|v| (**v - mean).abs() > 2.0 * std).count() as u32
        } else {
            0
        };

        MetricFeatures {
            name: name.to_string(),
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            mean,
            std,
            min_val,
            max_val,
            rate_of_change,
            variance_change,
            p50,
            p90,
            p99,
            spike_count,
            timestamp: Utc::now(),
        }
    }

    /// Extract frequency and pattern features from a log batch.
    ///
    /// Pattern memory is shared across calls, so `new_patterns` counts lines
    /// whose normalized shape this extractor instance has never seen.
    pub fn extract_log_features(
        &mut self,
        logs: &[String],
        pod: &str,
        namespace: &str,
        time_window_seconds: f64,
    ) -> LogFeatures {
        if logs.is_empty() {
            return LogFeatures::empty(pod, namespace);
        }

        let mut error_count = 0;
        let mut warning_count = 0;
        let mut patterns: HashSet<String> = HashSet::new();
        let mut new_patterns = 0;
        let mut has_oom = false;
        let mut has_timeout = false;
        let mut has_connection_error = false;
        let mut has_crash = false;

        for log in logs {
            let lower = log.to_lowercase();

            if ERROR_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                error_count += 1;
            } else if WARNING_KEYWORDS.iter().any(|kw| lower.contains(kw)) {
                warning_count += 1;
            }

            let pattern = self.normalize_pattern(log);
            if self.known_patterns.insert(pattern.clone()) {
                new_patterns += 1;
            }
            patterns.insert(pattern);

            has_oom |= OOM_KEYWORDS.iter().any(|kw| lower.contains(kw));
            has_timeout |= TIMEOUT_KEYWORDS.iter().any(|kw| lower.contains(kw));
            has_connection_error |= CONNECTION_KEYWORDS.iter().any(|kw| lower.contains(kw));
            has_crash |= CRASH_KEYWORDS.iter().any(|kw| lower.contains(kw));
        }

        let total_logs = logs.len();
        let logs_per_second = if time_window_seconds > 0.0 {
            total_logs as f64 / time_window_seconds
        } else {
            0.0
        };
        let error_rate = error_count as f64 / total_logs as f64;

        LogFeatures {
            pod: pod.to_string(),
            namespace: namespace.to_string(),
            total_logs,
            error_count,
            warning_count,
            unique_patterns: patterns.len(),
            new_patterns,
            logs_per_second,
            error_rate,
            has_oom,
            has_timeout,
            has_connection_error,
            has_crash,
            timestamp: Utc::now(),
        }
    }

    /// Normalize a log line into a comparable pattern: take the first 100
    /// chars and replace UUIDs, IPv4 addresses, and numbers with
    /// placeholders. Identifiers go first so digit replacement cannot break
    /// the wider matches.
    fn normalize_pattern(&self, log: &str) -> String {
        let head: String = log.chars().take(100).collect();
        let pattern = self.uuid_re.replace_all(&head, "<UUID>");
        let pattern = self.ip_re.replace_all(&pattern, "<IP>");
        let pattern = self.num_re.replace_all(&pattern, "<NUM>");
        pattern.trim().to_string()
    }

    /// Clear pattern memory (for retraining).
    pub fn reset_patterns(&mut self) {
        self.known_patterns.clear();
    }
}

/// Percentile with linear interpolation over an already sorted slice.
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    if sorted.len() == 1 {
        return sorted[0];
    }
    let rank = q / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f64;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}

/// Least-squares slope of values against their index positions.
fn index_slope(values: &[f64]) -> f64 {
    let n = values.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = values.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

fn population_variance(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mean = values.iter().sum::<f64>() / values.len() as f64;
    values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / values.len() as f64
}
