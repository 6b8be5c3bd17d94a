//! Statistical/ML layer: feature extraction, anomaly scoring, and trend
//! forecasting over metric time series and log batches.

pub mod anomaly;
pub mod features;
pub mod predictor;

pub use anomaly::{AnomalyKind, AnomalyResult, CombinedAnomalyDetector};
pub use features::{FeatureExtractor, LogFeatures, MetricFeatures};
pub use predictor::{TrendDirection, TrendPrediction, TrendPredictor};
