//! Hierarchical aggregation of grading errors.
//!
//! Turns one task snapshot into subject → book → page → question rollups,
//! error-pattern summaries and root-cause tallies. The engine is pure: the
//! same snapshot always yields structurally identical output.

use crate::analysis::classifier::{
    allocate_sub_causes, KeywordSubjectClassifier, RootCauseClassifier, StaticRootCauseClassifier,
    SubjectClassifier,
};
use crate::models::{
    AggregationNode, AnalysisSummary, CauseCategory, ErrorPattern, EvaluationError, HomeworkItem,
    RootCause, Severity, Snapshot,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Error rate above which a node is flagged for attention.
pub const FOCUS_THRESHOLD: f64 = 0.2;

/// Patterns kept after ranking.
const MAX_PATTERNS: usize = 5;

/// Examples attached to each pattern.
const MAX_EXAMPLES: usize = 3;

/// Maximum length of a pattern example, in characters.
const MAX_EXAMPLE_CHARS: usize = 100;

/// Root causes above this share are marked as main causes.
const MAIN_CAUSE_SHARE: f64 = 0.3;

/// Main-issue statements in the summary.
const MAX_MAIN_ISSUES: usize = 3;

/// Question nodes created per item. Error-free questions past this index
/// only count at page level.
const MAX_QUESTION_NODES: u64 = 200;

/// `errors / total`, 0 when there is nothing to divide by.
pub fn error_rate(errors: u64, total: u64) -> f64 {
    if total > 0 {
        errors as f64 / total as f64
    } else {
        0.0
    }
}

/// Severity bucket for a pattern's share of all errors.
pub fn pattern_severity(percentage: f64) -> Severity {
    if percentage > 0.3 {
        Severity::High
    } else if percentage > 0.15 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Fixed remediation advice for a root cause.
pub fn cause_suggestion(cause: CauseCategory) -> &'static str {
    match cause {
        CauseCategory::OcrIssue => {
            "Improve image capture guidance and review OCR output for handwritten answers."
        }
        CauseCategory::ScoringLogicIssue => {
            "Review the scoring rules and prompts for questions with semantic equivalence."
        }
        CauseCategory::AnswerIssue => {
            "Audit the reference answers and add accepted alternative answers."
        }
        CauseCategory::DataIssue => {
            "Check question indexing and completeness of the homework records."
        }
    }
}

/// Full output of one aggregation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregation {
    pub summary: AnalysisSummary,
    pub drill_down: Vec<AggregationNode>,
    pub error_patterns: Vec<ErrorPattern>,
    pub root_causes: Vec<RootCause>,
    pub suggestions: Vec<String>,
}

/// Counter tree node that remembers child discovery order.
#[derive(Debug, Default)]
pub(crate) struct Counter {
    name: String,
    pub(crate) error_count: u64,
    pub(crate) total: u64,
    children: Vec<(String, Counter)>,
    index: HashMap<String, usize>,
}

impl Counter {
    fn named(name: String) -> Self {
        Self {
            name,
            ..Default::default()
        }
    }

    pub(crate) fn child(&mut self, key: &str, name: impl FnOnce() -> String) -> &mut Counter {
        let idx = match self.index.get(key) {
            Some(&idx) => idx,
            None => {
                self.children.push((key.to_string(), Counter::named(name())));
                let idx = self.children.len() - 1;
                self.index.insert(key.to_string(), idx);
                idx
            }
        };
        &mut self.children[idx].1
    }

    pub(crate) fn add(&mut self, error_count: u64, total: u64) {
        self.error_count += error_count;
        self.total += total;
    }

    fn into_node(self, id: String, depth: Option<usize>) -> AggregationNode {
        let rate = error_rate(self.error_count, self.total);
        let children = match depth {
            Some(0) => Vec::new(),
            _ => {
                let next = depth.map(|d| d - 1);
                sorted_nodes(self.children, next)
            }
        };

        AggregationNode {
            id,
            name: self.name,
            error_count: self.error_count,
            total: self.total,
            error_rate: rate,
            is_focus: rate > FOCUS_THRESHOLD,
            children,
        }
    }

    /// Converts the children into nodes, keeping `depth` further levels
    /// (`None` keeps everything).
    pub(crate) fn into_levels(self, depth: Option<usize>) -> Vec<AggregationNode> {
        sorted_nodes(self.children, depth)
    }
}

/// Stable sort by error count descending: ties keep discovery order.
fn sorted_nodes(children: Vec<(String, Counter)>, depth: Option<usize>) -> Vec<AggregationNode> {
    let mut nodes: Vec<AggregationNode> = children
        .into_iter()
        .map(|(key, counter)| counter.into_node(key, depth))
        .collect();
    nodes.sort_by(|a, b| b.error_count.cmp(&a.error_count));
    nodes
}

/// Running tally of one error type.
struct PatternAcc<'a> {
    error_type: &'a str,
    count: u64,
    examples: Vec<String>,
}

/// The aggregation engine.
#[derive(Clone)]
pub struct Aggregator {
    subjects: Arc<dyn SubjectClassifier>,
    causes: Arc<dyn RootCauseClassifier>,
}

impl Default for Aggregator {
    fn default() -> Self {
        Self::new(
            Arc::new(KeywordSubjectClassifier),
            Arc::new(StaticRootCauseClassifier),
        )
    }
}

impl std::fmt::Debug for Aggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Aggregator").finish_non_exhaustive()
    }
}

impl Aggregator {
    /// Create an engine with the given classifiers.
    pub fn new(
        subjects: Arc<dyn SubjectClassifier>,
        causes: Arc<dyn RootCauseClassifier>,
    ) -> Self {
        Self { subjects, causes }
    }

    /// Subject of an item: explicit id, else inferred from the book name.
    pub fn resolve_subject(&self, item: &HomeworkItem) -> Option<u32> {
        item.subject_id.or_else(|| {
            item.book_name
                .as_deref()
                .and_then(|book| self.subjects.infer_subject(book))
        })
    }

    pub(crate) fn subject_name(&self, subject_id: u32) -> String {
        self.subjects.subject_name(subject_id)
    }

    /// Accumulate one item into the subject → book → page → question tree.
    ///
    /// With `with_pages` false only the subject and book levels are touched.
    pub(crate) fn accumulate(
        &self,
        root: &mut Counter,
        subject_id: u32,
        item: &HomeworkItem,
        with_pages: bool,
    ) {
        let Some(eval) = item.evaluation.as_ref() else {
            return;
        };
        let errors = eval.errors.len() as u64;
        let total = eval.total_questions;

        let subject = root.child(&subject_id.to_string(), || self.subject_name(subject_id));
        subject.add(errors, total);

        let book_name = item.book_name.as_deref().unwrap_or("Unknown book");
        let book = subject.child(book_name, || book_name.to_string());
        book.add(errors, total);

        if !with_pages {
            return;
        }

        let (page_key, page_label) = match item.page_num {
            Some(page) => (page.to_string(), format!("Page {}", page)),
            None => ("unknown".to_string(), "Unknown page".to_string()),
        };
        let page = book.child(&page_key, || page_label);
        page.add(errors, total);

        // A question counts once however many errors it carries.
        let mut wrong: Vec<u64> = Vec::new();
        for error in &eval.errors {
            let index = u64::from(error.question_index);
            if !wrong.contains(&index) {
                wrong.push(index);
            }
        }

        let tracked = total.min(MAX_QUESTION_NODES);
        for question in 1..=tracked {
            let errors = u64::from(wrong.contains(&question));
            page.child(&question.to_string(), || format!("Question {}", question))
                .add(errors, 1);
        }
        for &index in wrong.iter().filter(|&&index| index == 0 || index > tracked) {
            page.child(&index.to_string(), || format!("Question {}", index))
                .add(1, 1);
        }
    }

    /// Run the full aggregation over a snapshot.
    pub fn analyze(&self, snapshot: &Snapshot) -> Aggregation {
        let mut root = Counter::default();
        let mut total_errors = 0u64;
        let mut total_questions = 0u64;
        let mut patterns: Vec<PatternAcc<'_>> = Vec::new();
        let mut pattern_index: HashMap<&str, usize> = HashMap::new();
        let mut all_errors: Vec<&EvaluationError> = Vec::new();

        for item in &snapshot.items {
            let Some(eval) = item.evaluation.as_ref() else {
                continue;
            };

            total_errors += eval.errors.len() as u64;
            total_questions += eval.total_questions;

            if let Some(subject_id) = self.resolve_subject(item) {
                self.accumulate(&mut root, subject_id, item, true);
            }

            for error in &eval.errors {
                let idx = *pattern_index
                    .entry(error.error_type.as_str())
                    .or_insert_with(|| {
                        patterns.push(PatternAcc {
                            error_type: error.error_type.as_str(),
                            count: 0,
                            examples: Vec::new(),
                        });
                        patterns.len() - 1
                    });
                let acc = &mut patterns[idx];
                acc.count += 1;
                if acc.examples.len() < MAX_EXAMPLES {
                    acc.examples.push(truncate_chars(&error.describe(), MAX_EXAMPLE_CHARS));
                }
                all_errors.push(error);
            }
        }

        let drill_down = root.into_levels(None);
        let error_patterns = rank_patterns(patterns, total_errors);
        let root_causes = self.root_causes(&all_errors, total_errors);
        let suggestions = suggestions_for(&root_causes);

        let summary = AnalysisSummary {
            total_errors,
            total_questions,
            error_rate: error_rate(total_errors, total_questions),
            main_issues: main_issues(&error_patterns, &root_causes, &drill_down),
        };

        Aggregation {
            summary,
            drill_down,
            error_patterns,
            root_causes,
            suggestions,
        }
    }

    /// Tally errors per cause category, ranked by count.
    fn root_causes(&self, errors: &[&EvaluationError], total_errors: u64) -> Vec<RootCause> {
        let mut tallies: Vec<(CauseCategory, u64)> = Vec::new();

        for error in errors {
            let cause = self.causes.classify(&error.error_type);
            match tallies.iter_mut().find(|(c, _)| *c == cause) {
                Some((_, count)) => *count += 1,
                None => tallies.push((cause, 1)),
            }
        }

        tallies.sort_by(|a, b| b.1.cmp(&a.1));

        tallies
            .into_iter()
            .map(|(cause, count)| {
                let percentage = error_rate(count, total_errors);
                RootCause {
                    cause,
                    count,
                    percentage,
                    is_main: percentage > MAIN_CAUSE_SHARE,
                    sub_causes: allocate_sub_causes(count, self.causes.sub_causes(cause)),
                }
            })
            .collect()
    }
}

fn rank_patterns(mut patterns: Vec<PatternAcc<'_>>, total_errors: u64) -> Vec<ErrorPattern> {
    patterns.sort_by(|a, b| b.count.cmp(&a.count));
    patterns.truncate(MAX_PATTERNS);

    patterns
        .into_iter()
        .map(|acc| {
            let percentage = error_rate(acc.count, total_errors);
            ErrorPattern {
                error_type: acc.error_type.to_string(),
                count: acc.count,
                percentage,
                severity: pattern_severity(percentage),
                examples: acc.examples,
            }
        })
        .collect()
}

fn suggestions_for(root_causes: &[RootCause]) -> Vec<String> {
    let mut suggestions: Vec<String> = root_causes
        .iter()
        .filter(|rc| rc.is_main)
        .map(|rc| cause_suggestion(rc.cause).to_string())
        .collect();

    if suggestions.is_empty() {
        if let Some(top) = root_causes.first() {
            suggestions.push(cause_suggestion(top.cause).to_string());
        }
    }

    suggestions
}

fn main_issues(
    patterns: &[ErrorPattern],
    root_causes: &[RootCause],
    drill_down: &[AggregationNode],
) -> Vec<String> {
    let mut issues = Vec::new();

    if let Some(pattern) = patterns.first() {
        issues.push(format!(
            "'{}' accounts for {:.1}% of grading errors ({} cases)",
            pattern.error_type,
            pattern.percentage * 100.0,
            pattern.count
        ));
    }

    if let Some(cause) = root_causes.first() {
        issues.push(format!(
            "{} is the leading root cause ({:.1}% of errors)",
            cause.cause.label(),
            cause.percentage * 100.0
        ));
    }

    let worst_book = drill_down
        .iter()
        .flat_map(|subject| subject.children.iter())
        .filter(|book| book.is_focus)
        .max_by(|a, b| {
            a.error_rate
                .partial_cmp(&b.error_rate)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
    if let Some(book) = worst_book {
        issues.push(format!(
            "Book '{}' needs attention with a {:.1}% error rate",
            book.name,
            book.error_rate * 100.0
        ));
    }

    issues.truncate(MAX_MAIN_ISSUES);
    issues
}

/// Truncate to at most `max` characters on a char boundary.
pub fn truncate_chars(text: &str, max: usize) -> String {
    text.chars().take(max).collect()
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::{Evaluation, EvaluationError};

    pub(crate) fn error(index: u32, error_type: &str) -> EvaluationError {
        EvaluationError {
            question_index: index,
            error_type: error_type.to_string(),
            explanation: None,
            base_answer: None,
            ai_answer: None,
        }
    }

    pub(crate) fn item(
        subject_id: Option<u32>,
        book: &str,
        page: u32,
        total: u64,
        errors: Vec<EvaluationError>,
    ) -> HomeworkItem {
        HomeworkItem {
            homework_id: None,
            subject_id,
            book_name: Some(book.to_string()),
            page_num: Some(page),
            evaluation: Some(Evaluation {
                total_questions: total,
                correct_count: total - errors.len() as u64,
                errors,
            }),
        }
    }

    pub(crate) fn sample_snapshot() -> Snapshot {
        Snapshot {
            task_id: "task-1".to_string(),
            items: vec![
                item(
                    Some(2),
                    "Math Workbook",
                    12,
                    10,
                    vec![
                        error(1, "recognition_error"),
                        error(4, "recognition_error"),
                        error(7, "judgment_error"),
                    ],
                ),
                item(None, "English Reader", 3, 10, vec![error(2, "answer_mismatch")]),
                item(
                    Some(2),
                    "Math Workbook",
                    13,
                    10,
                    vec![error(1, "recognition_error"), error(3, "judgment_error")],
                ),
                item(None, "Unlabelled binder", 1, 5, vec![error(5, "missing_question")]),
            ],
        }
    }

    #[test]
    fn test_error_rate_guards_zero_total() {
        assert_eq!(error_rate(3, 0), 0.0);
        assert_eq!(error_rate(1, 4), 0.25);
    }

    #[test]
    fn test_pattern_severity_buckets() {
        assert_eq!(pattern_severity(0.31), Severity::High);
        assert_eq!(pattern_severity(0.3), Severity::Medium);
        assert_eq!(pattern_severity(0.16), Severity::Medium);
        assert_eq!(pattern_severity(0.15), Severity::Low);
    }

    #[test]
    fn test_drill_down_hierarchy() {
        let aggregation = Aggregator::default().analyze(&sample_snapshot());

        // The unlabelled item has no subject and stays out of the rollup
        assert_eq!(aggregation.drill_down.len(), 2);

        let math = &aggregation.drill_down[0];
        assert_eq!(math.name, "Math");
        assert_eq!(math.error_count, 5);
        assert_eq!(math.total, 20);
        assert!(math.is_focus);

        let book = &math.children[0];
        assert_eq!(book.name, "Math Workbook");
        assert_eq!(book.children.len(), 2);
        assert_eq!(book.children[0].id, "12");
        assert_eq!(book.children[0].error_count, 3);

        let page = &book.children[0];
        assert_eq!(page.children.len(), 10);
        assert_eq!(page.children[0].id, "1");
        assert_eq!(page.children[0].error_count, 1);
        assert_eq!(page.children[0].total, 1);

        let english = &aggregation.drill_down[1];
        assert_eq!(english.name, "English");
        assert_eq!(english.error_count, 1);
        assert!(!english.is_focus);
    }

    #[test]
    fn test_question_nodes_stay_within_bounds() {
        let snapshot = Snapshot {
            task_id: "t".to_string(),
            items: vec![
                item(
                    Some(2),
                    "Math",
                    1,
                    3,
                    vec![
                        error(2, "recognition_error"),
                        error(2, "judgment_error"),
                        error(7, "missing_question"),
                    ],
                ),
                item(Some(2), "Math", 2, 100_000, vec![error(150_000, "judgment_error")]),
            ],
        };

        let aggregation = Aggregator::default().analyze(&snapshot);
        let book = &aggregation.drill_down[0].children[0];
        let page = |id: &str| book.children.iter().find(|node| node.id == id).unwrap();

        let first = &page("1").children;
        assert_eq!(first.len(), 4);
        assert_eq!(first[0].id, "2");
        assert_eq!((first[0].error_count, first[0].total), (1, 1));
        assert_eq!(first[1].id, "7");
        assert_eq!((first[1].error_count, first[1].total), (1, 1));
        for node in first {
            assert!(node.total > 0);
            assert!(node.error_rate <= 1.0);
        }

        let second = &page("2").children;
        assert_eq!(second.len(), MAX_QUESTION_NODES as usize + 1);
        assert_eq!(second[0].id, "150000");
        assert_eq!(aggregation.summary.total_questions, 100_003);
    }

    #[test]
    fn test_summary_counts_unresolved_items() {
        let aggregation = Aggregator::default().analyze(&sample_snapshot());

        assert_eq!(aggregation.summary.total_errors, 7);
        assert_eq!(aggregation.summary.total_questions, 35);
        assert!(!aggregation.summary.main_issues.is_empty());
        assert!(aggregation.summary.main_issues.len() <= 3);
        assert!(aggregation.summary.main_issues[0].contains("recognition_error"));
    }

    #[test]
    fn test_error_patterns_ranked_and_capped() {
        let mut snapshot = sample_snapshot();
        snapshot.items.push(item(
            Some(2),
            "Math Workbook",
            14,
            10,
            vec![
                error(1, "a"),
                error(2, "b"),
                error(3, "c"),
                error(4, "d"),
                error(5, "recognition_error"),
            ],
        ));

        let aggregation = Aggregator::default().analyze(&snapshot);
        let patterns = &aggregation.error_patterns;

        assert_eq!(patterns.len(), 5);
        assert_eq!(patterns[0].error_type, "recognition_error");
        assert_eq!(patterns[0].count, 4);
        assert_eq!(patterns[0].examples.len(), 3);
        assert_eq!(patterns[0].severity, Severity::High);
        assert_eq!(patterns[1].error_type, "judgment_error");
        // Ties keep first-seen order
        assert_eq!(patterns[2].error_type, "answer_mismatch");
        assert_eq!(patterns[4].error_type, "a");
    }

    #[test]
    fn test_examples_truncated() {
        let mut long = error(1, "judgment_error");
        long.explanation = Some("x".repeat(250));
        let snapshot = Snapshot {
            task_id: "t".to_string(),
            items: vec![item(Some(2), "Math", 1, 5, vec![long])],
        };

        let aggregation = Aggregator::default().analyze(&snapshot);
        assert_eq!(aggregation.error_patterns[0].examples[0].chars().count(), 100);
    }

    #[test]
    fn test_root_causes_and_suggestions() {
        let aggregation = Aggregator::default().analyze(&sample_snapshot());
        let causes = &aggregation.root_causes;

        assert_eq!(causes[0].cause, CauseCategory::OcrIssue);
        assert_eq!(causes[0].count, 3);
        assert!(causes[0].is_main);
        let split: Vec<u64> = causes[0].sub_causes.iter().map(|s| s.count).collect();
        assert_eq!(split, vec![1, 1, 1]);

        assert!(causes.iter().skip(1).all(|c| !c.is_main));
        assert_eq!(aggregation.suggestions.len(), 1);
    }

    #[test]
    fn test_aggregation_is_deterministic() {
        let aggregator = Aggregator::default();
        let snapshot = sample_snapshot();

        let first = aggregator.analyze(&snapshot);
        let second = aggregator.analyze(&snapshot);
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_snapshot() {
        let aggregation = Aggregator::default().analyze(&Snapshot::default());
        assert_eq!(aggregation.summary.error_rate, 0.0);
        assert!(aggregation.drill_down.is_empty());
        assert!(aggregation.error_patterns.is_empty());
        assert!(aggregation.suggestions.is_empty());
        assert!(aggregation.summary.main_issues.is_empty());
    }
}
