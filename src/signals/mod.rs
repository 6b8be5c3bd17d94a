//! Signal model: normalization of raw telemetry and correlation into
//! incident candidates.

pub mod correlator;
pub mod normalizer;

pub use correlator::{IncidentCandidate, SignalCorrelator};
pub use normalizer::{ClusterEvent, Signal, SignalNormalizer, SignalSeverity, SignalType};
