//! Statistical anomaly detection on task accuracy.
//!
//! A task's accuracy is compared against the accuracies of the tasks that
//! precede it. Deviations beyond `threshold_sigma` standard deviations are
//! recorded in the anomaly log. Repeated detections of the same condition
//! are appended again; nothing is deduplicated.

use crate::error::{AnalysisError, Result};
use crate::models::{Anomaly, AnomalyType, Severity};
use crate::store::{AnomalyLog, SnapshotStore};
use chrono::Utc;
use futures::future::try_join_all;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Allowed range for the sigma threshold.
pub const THRESHOLD_RANGE: std::ops::RangeInclusive<f64> = 1.0..=5.0;

/// Detector settings.
#[derive(Debug, Clone)]
pub struct AnomalyConfig {
    pub threshold_sigma: f64,
    /// Minimum baseline samples for a verdict.
    pub min_samples: usize,
    /// Number of preceding tasks forming the baseline.
    pub window: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            threshold_sigma: 2.0,
            min_samples: 5,
            window: 10,
        }
    }
}

/// Severity of an accuracy drop, by percentage points lost.
pub fn drop_severity(drop: f64) -> Severity {
    if drop >= 0.5 {
        Severity::Critical
    } else if drop >= 0.2 {
        Severity::High
    } else if drop >= 0.1 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Population mean and standard deviation.
fn mean_stdev(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, variance.sqrt())
}

/// Accuracy anomaly detector.
pub struct AnomalyDetector {
    snapshots: Arc<dyn SnapshotStore>,
    log: Arc<dyn AnomalyLog>,
    threshold_bits: AtomicU64,
    min_samples: usize,
    window: usize,
}

impl AnomalyDetector {
    /// Create a detector. The configured threshold is validated.
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        log: Arc<dyn AnomalyLog>,
        config: AnomalyConfig,
    ) -> Result<Self> {
        validate_threshold(config.threshold_sigma)?;
        if config.min_samples == 0 {
            return Err(AnalysisError::Validation(
                "min_samples must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            snapshots,
            log,
            threshold_bits: AtomicU64::new(config.threshold_sigma.to_bits()),
            min_samples: config.min_samples,
            window: config.window,
        })
    }

    /// Current sigma threshold.
    pub fn threshold(&self) -> f64 {
        f64::from_bits(self.threshold_bits.load(Ordering::Relaxed))
    }

    /// Change the sigma threshold. Must lie in [1, 5].
    pub fn set_threshold(&self, threshold_sigma: f64) -> Result<()> {
        validate_threshold(threshold_sigma)?;
        self.threshold_bits
            .store(threshold_sigma.to_bits(), Ordering::Relaxed);
        info!("Anomaly threshold set to {:.2} sigma", threshold_sigma);
        Ok(())
    }

    /// Compare `current` against `baseline`. `None` when within threshold
    /// or when there is not enough history.
    pub fn check_accuracy(&self, baseline: &[f64], current: f64) -> Option<Anomaly> {
        match self.score(baseline, current) {
            Ok(anomaly) => anomaly,
            Err(e) => {
                debug!("No anomaly verdict: {}", e);
                None
            }
        }
    }

    fn score(&self, baseline: &[f64], current: f64) -> Result<Option<Anomaly>> {
        if baseline.is_empty() || baseline.len() < self.min_samples {
            return Err(AnalysisError::InsufficientData {
                required: self.min_samples.max(1),
                available: baseline.len(),
            });
        }

        let threshold = self.threshold();
        let (mean, stdev) = mean_stdev(baseline);
        if stdev < 1e-12 {
            return Ok(None);
        }

        let z = (current - mean) / stdev;
        if z.abs() <= threshold {
            return Ok(None);
        }

        let (anomaly_type, severity, message) = if z < 0.0 {
            (
                AnomalyType::AccuracyDrop,
                drop_severity(mean - current),
                format!(
                    "Accuracy dropped to {:.1}% (baseline {:.1}%, {:.1} sigma below)",
                    current * 100.0,
                    mean * 100.0,
                    z.abs()
                ),
            )
        } else {
            (
                AnomalyType::AccuracySpike,
                Severity::Low,
                format!(
                    "Accuracy rose to {:.1}% (baseline {:.1}%, {:.1} sigma above)",
                    current * 100.0,
                    mean * 100.0,
                    z
                ),
            )
        };

        Ok(Some(Anomaly {
            anomaly_id: uuid::Uuid::new_v4().to_string(),
            task_id: None,
            anomaly_type,
            severity,
            expected_value: mean,
            actual_value: current,
            deviation: z.abs(),
            threshold,
            message,
            acknowledged: false,
            detected_at: Utc::now(),
        }))
    }

    /// Detect an accuracy anomaly for a stored task and log it.
    pub async fn detect_anomaly(&self, task_id: &str) -> Result<Option<Anomaly>> {
        let snapshot = self
            .snapshots
            .load(task_id)
            .await?
            .ok_or_else(|| AnalysisError::NotFound(format!("task {}", task_id)))?;

        let Some(current) = snapshot.accuracy() else {
            debug!("Task {} has no graded questions", task_id);
            return Ok(None);
        };

        let baseline = self.baseline_for(task_id).await?;
        let Some(mut anomaly) = self.check_accuracy(&baseline, current) else {
            return Ok(None);
        };

        anomaly.task_id = Some(task_id.to_string());
        warn!("Anomaly on task {}: {}", task_id, anomaly.message);
        self.log.append(anomaly.clone()).await?;

        Ok(Some(anomaly))
    }

    /// Accuracies of up to `window` tasks preceding `task_id`.
    async fn baseline_for(&self, task_id: &str) -> Result<Vec<f64>> {
        let tasks = self.snapshots.list_tasks().await?;
        let preceding: Vec<&String> = match tasks.iter().position(|t| t == task_id) {
            Some(pos) => tasks[..pos].iter().collect(),
            None => tasks.iter().collect(),
        };
        let start = preceding.len().saturating_sub(self.window);

        let loads = preceding[start..]
            .iter()
            .map(|id| self.snapshots.load(id.as_str()));
        let snapshots = try_join_all(loads).await?;

        Ok(snapshots
            .into_iter()
            .flatten()
            .filter_map(|s| s.accuracy())
            .collect())
    }

    /// Acknowledge a logged anomaly.
    pub async fn acknowledge(&self, anomaly_id: &str) -> Result<()> {
        if self.log.acknowledge(anomaly_id).await? {
            Ok(())
        } else {
            Err(AnalysisError::NotFound(format!("anomaly {}", anomaly_id)))
        }
    }

    /// All logged anomalies, oldest first.
    pub async fn anomalies(&self) -> Result<Vec<Anomaly>> {
        Ok(self.log.list().await?)
    }
}

fn validate_threshold(threshold_sigma: f64) -> Result<()> {
    if THRESHOLD_RANGE.contains(&threshold_sigma) {
        Ok(())
    } else {
        Err(AnalysisError::Validation(format!(
            "threshold must be between {} and {} sigma, got {}",
            THRESHOLD_RANGE.start(),
            THRESHOLD_RANGE.end(),
            threshold_sigma
        )))
    }
}
