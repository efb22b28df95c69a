//! Aggregation engine modules.
//!
//! The full engine builds drill-down rollups, error patterns and root
//! causes; the quick path computes cheap distributions and heuristic
//! clusters without any LLM involvement.

pub mod aggregator;
pub mod classifier;
pub mod quick;

pub use aggregator::{Aggregation, Aggregator};
pub use quick::{ErrorCluster, QuickStats};
