//! Data models for the grading analysis core.
//!
//! This module contains the records that flow between the scheduler, the
//! aggregation engine, the cache layer and the anomaly detector, plus the
//! snapshot input shape loaded from the snapshot store.

use crate::error::AnalysisError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Severity level shared by error patterns and anomalies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low severity - marginal share or small deviation
    Low,
    /// Medium severity - noticeable share or deviation
    Medium,
    /// High severity - dominant share or large deviation
    High,
    /// Critical severity - accuracy collapse
    Critical,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Severity::Low => write!(f, "Low"),
            Severity::Medium => write!(f, "Medium"),
            Severity::High => write!(f, "High"),
            Severity::Critical => write!(f, "Critical"),
        }
    }
}

impl Severity {
    /// Returns an emoji representation of the severity.
    pub fn emoji(&self) -> &'static str {
        match self {
            Severity::Low => "🟢",
            Severity::Medium => "🟡",
            Severity::High => "🟠",
            Severity::Critical => "🔴",
        }
    }
}

/// Scheduling priority of an analysis job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Queue rank: lower ranks are dispatched first.
    pub fn rank(&self) -> u8 {
        match self {
            Priority::High => 0,
            Priority::Medium => 1,
            Priority::Low => 2,
        }
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Priority::High => write!(f, "high"),
            Priority::Medium => write!(f, "medium"),
            Priority::Low => write!(f, "low"),
        }
    }
}

impl FromStr for Priority {
    type Err = AnalysisError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "high" => Ok(Priority::High),
            "medium" => Ok(Priority::Medium),
            "low" => Ok(Priority::Low),
            other => Err(AnalysisError::Validation(format!(
                "invalid priority '{}': expected high, medium or low",
                other
            ))),
        }
    }
}

/// Lifecycle state of a job while the scheduler owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    Queued,
    Running,
}

/// A scheduled execution of the analysis pipeline for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    /// Unique job identifier.
    pub job_id: String,
    /// Evaluation task the job analyzes.
    pub task_id: String,
    /// Scheduling priority.
    pub priority: Priority,
    /// When the job entered the waiting list.
    pub enqueued_at: DateTime<Utc>,
    /// Current state.
    pub status: JobState,
    /// Progress percentage (0-100), only meaningful while running.
    pub progress: u8,
    /// Human-readable label of the current step.
    pub step: String,
    /// When the job started running.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    /// Creates a freshly queued job with a new identifier.
    pub fn new(task_id: impl Into<String>, priority: Priority) -> Self {
        Self {
            job_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            priority,
            enqueued_at: Utc::now(),
            status: JobState::Queued,
            progress: 0,
            step: "queued".to_string(),
            started_at: None,
        }
    }
}

/// Status of a persisted analysis report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ReportStatus {
    Analyzing,
    Completed,
    Failed,
}

impl fmt::Display for ReportStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReportStatus::Analyzing => write!(f, "analyzing"),
            ReportStatus::Completed => write!(f, "completed"),
            ReportStatus::Failed => write!(f, "failed"),
        }
    }
}

/// One node of a drill-down level (subject, book, page or question).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregationNode {
    /// Key within the parent level.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Number of erroneous questions under this node.
    pub error_count: u64,
    /// Number of questions under this node.
    pub total: u64,
    /// `error_count / total`, or 0 when `total` is 0.
    pub error_rate: f64,
    /// Whether the error rate crosses the focus threshold.
    pub is_focus: bool,
    /// Next drill-down level, sorted by error count descending.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<AggregationNode>,
}

/// A group of errors sharing the same error type.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorPattern {
    pub error_type: String,
    pub count: u64,
    /// Share of all errors (0.0 - 1.0).
    pub percentage: f64,
    pub severity: Severity,
    /// Up to three truncated sample descriptions.
    pub examples: Vec<String>,
}

/// Fixed root-cause categories an error type can be attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CauseCategory {
    OcrIssue,
    ScoringLogicIssue,
    AnswerIssue,
    DataIssue,
}

impl CauseCategory {
    /// Human-readable label.
    pub fn label(&self) -> &'static str {
        match self {
            CauseCategory::OcrIssue => "OCR recognition issue",
            CauseCategory::ScoringLogicIssue => "Scoring logic issue",
            CauseCategory::AnswerIssue => "Reference answer issue",
            CauseCategory::DataIssue => "Data quality issue",
        }
    }
}

impl fmt::Display for CauseCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A named sub-cause with its allocated share of the parent count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubCause {
    pub name: String,
    pub count: u64,
}

/// Tally for one root-cause category.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RootCause {
    pub cause: CauseCategory,
    pub count: u64,
    pub percentage: f64,
    /// Whether this cause accounts for a dominant share of errors.
    pub is_main: bool,
    pub sub_causes: Vec<SubCause>,
}

/// Headline figures of an aggregation run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnalysisSummary {
    pub total_errors: u64,
    pub total_questions: u64,
    pub error_rate: f64,
    /// Up to three natural-language statements of the main issues.
    pub main_issues: Vec<String>,
}

/// One insight extracted from an LLM deep analysis.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Insight {
    pub title: String,
    pub detail: String,
    #[serde(default)]
    pub suggestion: String,
}

/// Result of the LLM deep-analysis step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LlmAnalysis {
    /// Model that produced the analysis.
    pub model: String,
    /// Structured insights parsed from the response.
    pub insights: Vec<Insight>,
    /// Raw response text, kept when no structured insight could be parsed.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub raw: String,
}

/// The persisted outcome of analyzing one task. Upserted per task id.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub report_id: String,
    pub task_id: String,
    pub status: ReportStatus,
    #[serde(default)]
    pub summary: AnalysisSummary,
    /// Subject-level nodes with nested book, page and question levels.
    #[serde(default)]
    pub drill_down: Vec<AggregationNode>,
    #[serde(default)]
    pub error_patterns: Vec<ErrorPattern>,
    #[serde(default)]
    pub root_causes: Vec<RootCause>,
    #[serde(default)]
    pub suggestions: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub llm_analysis: Option<LlmAnalysis>,
    /// Wall-clock duration of the job in seconds.
    pub duration_seconds: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl AnalysisReport {
    /// Creates the placeholder report written when a job starts.
    pub fn analyzing(task_id: impl Into<String>) -> Self {
        Self {
            report_id: uuid::Uuid::new_v4().to_string(),
            task_id: task_id.into(),
            status: ReportStatus::Analyzing,
            summary: AnalysisSummary::default(),
            drill_down: Vec::new(),
            error_patterns: Vec::new(),
            root_causes: Vec::new(),
            suggestions: Vec::new(),
            llm_analysis: None,
            duration_seconds: 0.0,
            error_message: None,
            updated_at: Utc::now(),
        }
    }

    /// Turns this report into a failed one carrying the error message.
    pub fn into_failed(mut self, error: impl Into<String>, duration_seconds: f64) -> Self {
        self.status = ReportStatus::Failed;
        self.error_message = Some(error.into());
        self.duration_seconds = duration_seconds;
        self.updated_at = Utc::now();
        self
    }
}

/// Status of a cached deep-analysis entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryStatus {
    Pending,
    Analyzing,
    Completed,
}

/// Cached deep-analysis payload keyed by (analysis_type, target_id, task_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub analysis_type: String,
    pub target_id: String,
    pub task_id: String,
    /// Hash of the quick stats the payload was computed from.
    pub data_hash: String,
    pub status: EntryStatus,
    pub payload: serde_json::Value,
    pub updated_at: DateTime<Utc>,
}

/// Kind of statistical anomaly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnomalyType {
    AccuracyDrop,
    AccuracySpike,
}

impl fmt::Display for AnomalyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnomalyType::AccuracyDrop => write!(f, "accuracy_drop"),
            AnomalyType::AccuracySpike => write!(f, "accuracy_spike"),
        }
    }
}

/// A detected anomaly. Append-only apart from the acknowledgement flag.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Anomaly {
    pub anomaly_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task_id: Option<String>,
    pub anomaly_type: AnomalyType,
    pub severity: Severity,
    /// Baseline mean.
    pub expected_value: f64,
    pub actual_value: f64,
    /// Deviation in standard deviations (z-score).
    pub deviation: f64,
    /// Sigma threshold in effect at detection time.
    pub threshold: f64,
    pub message: String,
    pub acknowledged: bool,
    pub detected_at: DateTime<Utc>,
}

/// A single grading error recorded in a homework evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationError {
    pub question_index: u32,
    pub error_type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub explanation: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_answer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ai_answer: Option<String>,
}

impl EvaluationError {
    /// Short description of the error used as a pattern example.
    pub fn describe(&self) -> String {
        if let Some(ref explanation) = self.explanation {
            if !explanation.trim().is_empty() {
                return explanation.trim().to_string();
            }
        }
        match (&self.base_answer, &self.ai_answer) {
            (Some(base), Some(ai)) => format!(
                "Q{}: expected '{}', graded '{}'",
                self.question_index, base, ai
            ),
            _ => format!("Q{}: {}", self.question_index, self.error_type),
        }
    }
}

/// Comparison of AI grading against the reference for one homework.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Evaluation {
    #[serde(default)]
    pub total_questions: u64,
    #[serde(default)]
    pub correct_count: u64,
    #[serde(default)]
    pub errors: Vec<EvaluationError>,
}

/// One graded homework inside a task snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HomeworkItem {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homework_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub book_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_num: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub evaluation: Option<Evaluation>,
}

/// Immutable evaluation task snapshot.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub task_id: String,
    #[serde(default)]
    pub items: Vec<HomeworkItem>,
}

impl Snapshot {
    /// Overall accuracy (`correct / total`), `None` when nothing was graded.
    pub fn accuracy(&self) -> Option<f64> {
        let (correct, total) = self
            .items
            .iter()
            .filter_map(|item| item.evaluation.as_ref())
            .fold((0u64, 0u64), |(c, t), eval| {
                (c + eval.correct_count, t + eval.total_questions)
            });

        if total == 0 {
            None
        } else {
            Some(correct as f64 / total as f64)
        }
    }
}
