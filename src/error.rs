//! Error taxonomy for the analysis core.
//!
//! Control calls (enqueue, cancel, threshold changes) return these errors
//! directly to the caller. Errors raised inside a running job are recorded
//! on the failed report and never reach the scheduler.

use thiserror::Error;

/// Errors surfaced by the scheduler, cache layer and anomaly detector.
#[derive(Debug, Error)]
pub enum AnalysisError {
    /// A control call received an out-of-range or malformed value.
    #[error("validation failed: {0}")]
    Validation(String),

    /// Unknown task or job identifier.
    #[error("not found: {0}")]
    NotFound(String),

    /// Cancel was requested for a job that already started.
    #[error("job {job_id} is already running and cannot be cancelled")]
    NotCancellable { job_id: String },

    /// The snapshot store, report store or LLM failed.
    #[error("collaborator failure: {0}")]
    Collaborator(#[from] anyhow::Error),

    /// Not enough history to reach a verdict.
    #[error("insufficient data: need {required} samples, have {available}")]
    InsufficientData { required: usize, available: usize },
}

pub type Result<T> = std::result::Result<T, AnalysisError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages() {
        let err = AnalysisError::NotCancellable {
            job_id: "job-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "job job-1 is already running and cannot be cancelled"
        );

        let err = AnalysisError::InsufficientData {
            required: 5,
            available: 2,
        };
        assert!(err.to_string().contains("need 5"));
    }

    #[test]
    fn test_collaborator_from_anyhow() {
        let err: AnalysisError = anyhow::anyhow!("disk unavailable").into();
        assert!(matches!(err, AnalysisError::Collaborator(_)));
        assert!(err.to_string().contains("disk unavailable"));
    }
}
