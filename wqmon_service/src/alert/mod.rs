//! Alerting: index thresholds, the per-node alert lifecycle, and reading
//! freshness.
//!
//! Submodules:
//! - `thresholds`: index → GREEN / AMBER / RED.
//! - `lifecycle`: create / resolve / replace decisions, one active alert
//!   per node.
//! - `staleness`: flags nodes whose latest reading has gone quiet.

pub mod lifecycle;
pub mod staleness;
pub mod thresholds;

pub use lifecycle::{AlertAction, AlertLifecycleManager, AlertState};
