//! Fast-path statistics and heuristic clustering.
//!
//! `quick_stats` never talks to the LLM and is recomputed on every cache
//! lookup. Its hash decides whether a cached deep analysis is still valid.

use crate::analysis::aggregator::{error_rate, truncate_chars, Aggregator, Counter};
use crate::models::{AggregationNode, Snapshot};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

/// Pages per coarse cluster bucket.
const PAGE_BUCKET: u32 = 10;

/// Samples kept per cluster.
const MAX_CLUSTER_SAMPLES: usize = 5;

/// Cheap summary of a snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuickStats {
    pub task_id: String,
    pub total_items: usize,
    pub total_errors: u64,
    pub total_questions: u64,
    pub error_rate: f64,
    /// Subject-level rollup (no deeper levels).
    pub subjects: Vec<AggregationNode>,
    pub error_type_distribution: BTreeMap<String, u64>,
    pub subject_distribution: BTreeMap<String, u64>,
    pub book_distribution: BTreeMap<String, u64>,
    pub clusters_count: usize,
    pub duration_ms: f64,
}

impl QuickStats {
    /// Stable hash over the fields that invalidate a deep analysis.
    pub fn data_hash(&self) -> String {
        let input = serde_json::json!({
            "total_errors": self.total_errors,
            "error_type_distribution": self.error_type_distribution,
            "clusters_count": self.clusters_count,
        });

        let mut hasher = Sha256::new();
        hasher.update(input.to_string().as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// One sample inside a heuristic cluster.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterSample {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub homework_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub page_num: Option<u32>,
    pub question_index: u32,
    pub description: String,
}

/// Errors grouped by (error type, book, page range).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ErrorCluster {
    pub cluster_id: String,
    pub error_type: String,
    pub book_name: String,
    pub page_range: String,
    pub sample_count: u64,
    pub samples: Vec<ClusterSample>,
}

/// Bucket label for a page: 1-10, 11-20, ...
pub fn page_range(page: Option<u32>) -> String {
    match page {
        Some(page) if page > 0 => {
            let start = (page - 1) / PAGE_BUCKET * PAGE_BUCKET + 1;
            format!("{}-{}", start, start + PAGE_BUCKET - 1)
        }
        Some(_) => format!("0-{}", PAGE_BUCKET - 1),
        None => "unknown".to_string(),
    }
}

impl Aggregator {
    /// Subject inference, subject/book counters, focus flags and simple
    /// distributions. No LLM, no per-question drill-down.
    pub fn quick_stats(&self, snapshot: &Snapshot) -> QuickStats {
        let started = Instant::now();
        let mut root = Counter::default();
        let mut total_errors = 0u64;
        let mut total_questions = 0u64;
        let mut error_types: BTreeMap<String, u64> = BTreeMap::new();
        let mut subjects: BTreeMap<String, u64> = BTreeMap::new();
        let mut books: BTreeMap<String, u64> = BTreeMap::new();

        for item in &snapshot.items {
            let Some(eval) = item.evaluation.as_ref() else {
                continue;
            };
            let errors = eval.errors.len() as u64;
            total_errors += errors;
            total_questions += eval.total_questions;

            for error in &eval.errors {
                *error_types.entry(error.error_type.clone()).or_default() += 1;
            }

            if let Some(book) = item.book_name.as_deref() {
                *books.entry(book.to_string()).or_default() += errors;
            }

            if let Some(subject_id) = self.resolve_subject(item) {
                *subjects.entry(self.subject_name(subject_id)).or_default() += errors;
                self.accumulate(&mut root, subject_id, item, false);
            }
        }

        let clusters_count = self.coarse_clusters(snapshot).len();

        QuickStats {
            task_id: snapshot.task_id.clone(),
            total_items: snapshot.items.len(),
            total_errors,
            total_questions,
            error_rate: error_rate(total_errors, total_questions),
            subjects: root.into_levels(Some(0)),
            error_type_distribution: error_types,
            subject_distribution: subjects,
            book_distribution: books,
            clusters_count,
            duration_ms: started.elapsed().as_secs_f64() * 1000.0,
        }
    }

    /// Deterministic stand-in for AI clustering, largest clusters first.
    pub fn coarse_clusters(&self, snapshot: &Snapshot) -> Vec<ErrorCluster> {
        let mut clusters: Vec<ErrorCluster> = Vec::new();
        let mut index: HashMap<(String, String, String), usize> = HashMap::new();

        for item in &snapshot.items {
            let Some(eval) = item.evaluation.as_ref() else {
                continue;
            };
            let book = item.book_name.clone().unwrap_or_else(|| "unknown".to_string());
            let range = page_range(item.page_num);

            for error in &eval.errors {
                let key = (error.error_type.clone(), book.clone(), range.clone());
                let idx = *index.entry(key).or_insert_with(|| {
                    clusters.push(ErrorCluster {
                        cluster_id: format!("{}|{}|{}", error.error_type, book, range),
                        error_type: error.error_type.clone(),
                        book_name: book.clone(),
                        page_range: range.clone(),
                        sample_count: 0,
                        samples: Vec::new(),
                    });
                    clusters.len() - 1
                });

                let cluster = &mut clusters[idx];
                cluster.sample_count += 1;
                if cluster.samples.len() < MAX_CLUSTER_SAMPLES {
                    cluster.samples.push(ClusterSample {
                        homework_id: item.homework_id.clone(),
                        page_num: item.page_num,
                        question_index: error.question_index,
                        description: truncate_chars(&error.describe(), 100),
                    });
                }
            }
        }

        clusters.sort_by(|a, b| b.sample_count.cmp(&a.sample_count));
        clusters
    }
}
