//! Trend prediction via least-squares linear fit.
//!
//! Fits `value = slope * minutes + intercept` over a metric's recent history
//! and forecasts threshold-breach time. Useful for catching memory leaks and
//! disk fill-up before the hard failure arrives.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Direction of a fitted trend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrendDirection {
    Rising,
    Falling,
    Stable,
    /// Not enough data to fit a trend
    Unknown,
}

/// Forecast for one metric on one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrendPrediction {
    pub metric_name: String,
    pub source: String,
    pub namespace: String,

    pub current_value: f64,
    pub trend_direction: TrendDirection,
    /// Fitted change per minute
    pub rate_per_minute: f64,

    pub predicted_1m: f64,
    pub predicted_5m: f64,
    pub predicted_15m: f64,

    pub threshold: Option<f64>,
    /// Minutes until the threshold is crossed, if the trend reaches it
    pub time_to_threshold: Option<f64>,
    pub will_breach: bool,

    /// Coefficient of determination of the fit, clamped to [0, 1]
    pub confidence: f64,
    pub timestamp: DateTime<Utc>,
}

/// Horizon (minutes) within which a projected breach counts as imminent.
const BREACH_HORIZON_MINUTES: f64 = 15.0;

/// Predicts future metric values using linear regression.
#[derive(Debug, Clone)]
pub struct TrendPredictor {
    thresholds: HashMap<String, f64>,
}

impl Default for TrendPredictor {
    fn default() -> Self {
        let mut thresholds = HashMap::new();
        thresholds.insert("memory_usage_percent".to_string(), 95.0);
        thresholds.insert("cpu_usage_percent".to_string(), 90.0);
        thresholds.insert("disk_usage_percent".to_string(), 90.0);
        thresholds.insert("restart_count".to_string(), 5.0);
        thresholds.insert("error_rate".to_string(), 0.1);
        Self { thresholds }
    }
}

impl TrendPredictor {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Fit a trend over parallel value/timestamp series and forecast.
    ///
    /// Timestamps are unix seconds; they are normalized to minutes since the
    /// first sample before fitting. With fewer than two points an unknown
    /// prediction with confidence 0 is returned.
    #[must_use]
    pub fn predict(
        &self,
        metric_name: &str,
        values: &[f64],
        timestamps: &[f64],
        source: &str,
        namespace: &str,
        threshold: Option<f64>,
    ) -> TrendPrediction {
        if values.len() < 2 || timestamps.len() != values.len() {
            return Self::empty_prediction(metric_name, source, namespace);
        }

        let t0 = timestamps[0];
        let x: Vec<f64> = timestamps.iter().map(|t| (t - t0) / 60.0).collect();
        let (slope, intercept) = least_squares(&x, values);

        // R-squared as fit confidence; zero when the series has no variance.
        let mean_y = values.iter().sum::<f64>() / values.len() as f64;
        let ss_res: f64 = x
            .iter()
            .zip(values)
            .map(|(xi, yi)| (yi - (slope * xi + intercept)).powi(2))
            .sum();
        let ss_tot: f64 = values.iter().map(|y| (y - mean_y).powi(2)).sum();
        let confidence = if ss_tot > 0.0 {
            (1.0 - ss_res / ss_tot).clamp(0.0, 1.0)
        } else {
            0.0
        };

        let current_value = values[values.len() - 1];
        let rate_per_minute = slope;

        let trend_direction = if rate_per_minute.abs() < 0.01 * (current_value.abs() + 0.1) {
            TrendDirection::Stable
        } else if rate_per_minute > 0.0 {
            TrendDirection::Rising
        } else {
            TrendDirection::Falling
        };

        let current_time_min = x[x.len() - 1];
        let forecast = |ahead: f64| intercept + slope * (current_time_min + ahead);

        let threshold = threshold.or_else(|| self.thresholds.get(metric_name).copied());
        let mut time_to_threshold = None;
        let mut will_breach = false;
        if let Some(t) = threshold {
            if current_value >= t {
                will_breach = true;
                time_to_threshold = Some(0.0);
            } else if slope > 0.0 {
                let minutes = (t - current_value) / slope;
                time_to_threshold = Some(minutes);
                will_breach = minutes <= BREACH_HORIZON_MINUTES;
            }
        }

        TrendPrediction {
            metric_name: metric_name.to_string(),
            source: source.to_string(),
            namespace: namespace.to_string(),
            current_value,
            trend_direction,
            rate_per_minute,
            predicted_1m: forecast(1.0),
            predicted_5m: forecast(5.0),
            predicted_15m: forecast(15.0),
            threshold,
            time_to_threshold,
            will_breach,
            confidence,
            timestamp: Utc::now(),
        }
    }

    /// Forecast time-to-OOM from memory growth against 95% of the limit.
    #[must_use]
    pub fn predict_oom_time(
        &self,
        memory_values: &[f64],
        timestamps: &[f64],
        memory_limit: f64,
        source: &str,
        namespace: &str,
    ) -> TrendPrediction {
        self.predict(
            "memory_for_oom",
            memory_values,
            timestamps,
            source,
            namespace,
            Some(memory_limit * 0.95),
        )
    }

    fn empty_prediction(metric_name: &str, source: &str, namespace: &str) -> TrendPrediction {
        TrendPrediction {
            metric_name: metric_name.to_string(),
            source: source.to_string(),
            namespace: namespace.to_string(),
            current_value: 0.0,
            trend_direction: TrendDirection::Unknown,
            rate_per_minute: 0.0,
            predicted_1m: 0.0,
            predicted_5m: 0.0,
            predicted_15m: 0.0,
            threshold: None,
            time_to_threshold: None,
            will_breach: false,
            confidence: 0.0,
            timestamp: Utc::now(),
        }
    }
}

/// Least-squares fit returning (slope, intercept).
fn least_squares(x: &[f64], y: &[f64]) -> (f64, f64) {
    let n = x.len() as f64;
    let mean_x = x.iter().sum::<f64>() / n;
    let mean_y = y.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (xi, yi) in x.iter().zip(y) {
        num += (xi - mean_x) * (yi - mean_y);
        den += (xi - mean_x).powi(2);
    }
    let slope = if den == 0.0 { 0.0 } else { num / den };
    (slope, mean_y - slope * mean_x)
}
