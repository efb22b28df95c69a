//! Heuristic classifiers used by the aggregation engine.
//!
//! Subject inference and root-cause attribution are plain string lookups.
//! They sit behind small traits so the engine can be driven by other
//! classifiers in tests or future deployments.

use crate::models::{CauseCategory, SubCause};

/// Resolves a subject for homework items that carry none.
pub trait SubjectClassifier: Send + Sync {
    /// Infer a subject id from a book name. First keyword match wins.
    fn infer_subject(&self, book_name: &str) -> Option<u32>;

    /// Display name for a subject id.
    fn subject_name(&self, subject_id: u32) -> String;
}

/// Attributes error types to root-cause categories.
pub trait RootCauseClassifier: Send + Sync {
    /// Cause category for an error type.
    fn classify(&self, error_type: &str) -> CauseCategory;

    /// Named sub-causes of a category, in allocation order.
    fn sub_causes(&self, cause: CauseCategory) -> &[&'static str];
}

/// Known subjects: (id, display name, keywords).
const SUBJECTS: &[(u32, &str, &[&str])] = &[
    (0, "English", &["english", "英语"]),
    (1, "Chinese", &["语文", "chinese"]),
    (2, "Math", &["math", "数学"]),
    (3, "Physics", &["physics", "物理"]),
    (4, "Chemistry", &["chemistry", "化学"]),
    (5, "Biology", &["biology", "生物"]),
    (6, "History", &["history", "历史"]),
    (7, "Geography", &["geography", "地理"]),
    (8, "Politics", &["politics", "政治", "道德与法治"]),
];

/// Keyword-table subject inference over the book name.
#[derive(Debug, Clone, Default)]
pub struct KeywordSubjectClassifier;

impl SubjectClassifier for KeywordSubjectClassifier {
    fn infer_subject(&self, book_name: &str) -> Option<u32> {
        let haystack = book_name.to_lowercase();

        SUBJECTS
            .iter()
            .find(|(_, _, keywords)| keywords.iter().any(|kw| haystack.contains(kw)))
            .map(|(id, _, _)| *id)
    }

    fn subject_name(&self, subject_id: u32) -> String {
        SUBJECTS
            .iter()
            .find(|(id, _, _)| *id == subject_id)
            .map(|(_, name, _)| name.to_string())
            .unwrap_or_else(|| format!("Subject {}", subject_id))
    }
}

/// Error type → cause lookup. Unknown types fall through to `DataIssue`.
const ROOT_CAUSE_TABLE: &[(&str, CauseCategory)] = &[
    ("recognition_error", CauseCategory::OcrIssue),
    ("ocr_error", CauseCategory::OcrIssue),
    ("hallucination", CauseCategory::OcrIssue),
    ("识别错误-判断错误", CauseCategory::OcrIssue),
    ("AI识别幻觉", CauseCategory::OcrIssue),
    ("judgment_error", CauseCategory::ScoringLogicIssue),
    ("scoring_error", CauseCategory::ScoringLogicIssue),
    ("识别正确-判断错误", CauseCategory::ScoringLogicIssue),
    ("answer_mismatch", CauseCategory::AnswerIssue),
    ("standard_answer_error", CauseCategory::AnswerIssue),
    ("答案不匹配", CauseCategory::AnswerIssue),
    ("missing_question", CauseCategory::DataIssue),
    ("extra_question", CauseCategory::DataIssue),
    ("index_mismatch", CauseCategory::DataIssue),
    ("缺失题目", CauseCategory::DataIssue),
];

const OCR_SUB_CAUSES: &[&str] = &["handwriting_unclear", "image_quality", "complex_layout"];
const SCORING_SUB_CAUSES: &[&str] = &["rule_too_strict", "rule_too_loose", "semantic_misjudgment"];
const ANSWER_SUB_CAUSES: &[&str] = &[
    "reference_answer_wrong",
    "multiple_valid_answers",
    "format_mismatch",
];
const DATA_SUB_CAUSES: &[&str] = &["question_missing", "index_misaligned", "incomplete_record"];

/// Fixed lookup-table root-cause attribution.
#[derive(Debug, Clone, Default)]
pub struct StaticRootCauseClassifier;

impl RootCauseClassifier for StaticRootCauseClassifier {
    fn classify(&self, error_type: &str) -> CauseCategory {
        ROOT_CAUSE_TABLE
            .iter()
            .find(|(name, _)| *name == error_type)
            .map(|(_, cause)| *cause)
            .unwrap_or(CauseCategory::DataIssue)
    }

    fn sub_causes(&self, cause: CauseCategory) -> &[&'static str] {
        match cause {
            CauseCategory::OcrIssue => OCR_SUB_CAUSES,
            CauseCategory::ScoringLogicIssue => SCORING_SUB_CAUSES,
            CauseCategory::AnswerIssue => ANSWER_SUB_CAUSES,
            CauseCategory::DataIssue => DATA_SUB_CAUSES,
        }
    }
}

/// Split `count` evenly across `names`; the last name absorbs the remainder.
pub fn allocate_sub_causes(count: u64, names: &[&str]) -> Vec<SubCause> {
    if names.is_empty() {
        return Vec::new();
    }

    let share = count / names.len() as u64;
    let last = names.len() - 1;

    names
        .iter()
        .enumerate()
        .map(|(i, name)| SubCause {
            name: name.to_string(),
            count: if i == last {
                count - share * last as u64
            } else {
                share
            },
        })
        .collect()
}
