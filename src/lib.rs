//! GradePulse analysis core.
//!
//! A priority job scheduler drives the analysis pipeline for evaluation
//! tasks. The aggregation engine rolls grading errors up into a subject,
//! book, page and question hierarchy, the cache layer reuses LLM deep
//! analyses while the underlying data is unchanged, and the anomaly
//! detector compares task accuracy against recent history.

pub mod analysis;
pub mod anomaly;
pub mod cache;
pub mod cli;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod report;
pub mod scheduler;
pub mod store;

pub use error::{AnalysisError, Result};
