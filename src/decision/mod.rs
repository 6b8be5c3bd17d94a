//! Decision making and remediation execution.

pub mod executor;
pub mod tree;

pub use executor::{ActionResult, ActionStatus, RemediationExecutor};
pub use tree::{Decision, DecisionTree, DecisionType, RiskLevel};
