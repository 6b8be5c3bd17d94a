//! Mender - autonomous incident-response engine for a container cluster.
//!
//! Turns raw telemetry (metrics, logs, events) into scored signals, correlates
//! signals into incident candidates, enriches them with a root-cause analysis,
//! decides whether to auto-remediate, require approval, or escalate, and
//! dispatches the chosen remediation against the cluster gateway.
//!
//! The pipeline flows strictly downward:
//! detectors -> correlator -> RCA -> decision tree -> executor, driven by the
//! [`agent::Agent`] on a timer or on demand.

pub mod agent;
pub mod audit;
pub mod cluster;
pub mod config;
pub mod decision;
pub mod detectors;
pub mod ml;
pub mod rca;
pub mod signals;
pub mod telemetry;
