//! The analysis pipeline run for each scheduled job.
//!
//! Steps: load snapshot, aggregate, consult the cache, run the LLM deep
//! analysis on a miss, store the result. The scheduler turns the outcome
//! into a persisted report.

use crate::analysis::{Aggregation, Aggregator, ErrorCluster};
use crate::cache::{CacheLayer, TASK_ANALYSIS};
use crate::llm::{run_deep_analysis, LlmClient};
use crate::models::LlmAnalysis;
use crate::store::SnapshotStore;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

type ProgressFn = dyn Fn(u8, &str) + Send + Sync;

/// Handle given to a running job for progress reporting.
#[derive(Clone)]
pub struct JobContext {
    pub job_id: String,
    pub task_id: String,
    reporter: Arc<ProgressFn>,
}

impl JobContext {
    pub fn new(
        job_id: impl Into<String>,
        task_id: impl Into<String>,
        reporter: Arc<ProgressFn>,
    ) -> Self {
        Self {
            job_id: job_id.into(),
            task_id: task_id.into(),
            reporter,
        }
    }

    /// A context whose progress updates go nowhere.
    pub fn detached(task_id: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self::new(format!("detached-{}", task_id), task_id, Arc::new(|_: u8, _: &str| {}))
    }

    /// Report progress (clamped to 100) and the current step label.
    pub fn progress(&self, percent: u8, step: &str) {
        debug!("[{}] {}% {}", self.task_id, percent.min(100), step);
        (self.reporter)(percent.min(100), step);
    }
}

impl fmt::Debug for JobContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobContext")
            .field("job_id", &self.job_id)
            .field("task_id", &self.task_id)
            .finish_non_exhaustive()
    }
}

/// What a successful job produced.
#[derive(Debug, Clone, PartialEq)]
pub struct AnalysisOutcome {
    pub aggregation: Aggregation,
    pub llm_analysis: Option<LlmAnalysis>,
    /// Whether the deep analysis came from the cache.
    pub cache_hit: bool,
}

/// Body of a scheduled job.
#[async_trait]
pub trait JobRunner: Send + Sync {
    async fn run(&self, ctx: &JobContext) -> Result<AnalysisOutcome>;
}

/// Cached deep-analysis payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeepAnalysis {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_analysis: Option<LlmAnalysis>,
    #[serde(default)]
    pub clusters: Vec<ErrorCluster>,
}

/// LLM settings for the deep-analysis step.
#[derive(Clone)]
pub struct LlmSettings {
    pub client: Arc<dyn LlmClient>,
    pub model: String,
    pub timeout: Duration,
}

/// Default job body.
#[derive(Clone)]
pub struct AnalysisPipeline {
    snapshots: Arc<dyn SnapshotStore>,
    cache: CacheLayer,
    aggregator: Aggregator,
    llm: Option<LlmSettings>,
}

impl AnalysisPipeline {
    pub fn new(
        snapshots: Arc<dyn SnapshotStore>,
        cache: CacheLayer,
        aggregator: Aggregator,
        llm: Option<LlmSettings>,
    ) -> Self {
        Self {
            snapshots,
            cache,
            aggregator,
            llm,
        }
    }

    async fn deep_analysis(
        &self,
        aggregation: &Aggregation,
        clusters: Vec<ErrorCluster>,
    ) -> Result<DeepAnalysis> {
        let llm_analysis = match self.llm {
            Some(ref llm) => Some(
                run_deep_analysis(
                    llm.client.as_ref(),
                    &llm.model,
                    llm.timeout,
                    aggregation,
                    &clusters,
                )
                .await
                .context("Deep analysis failed")?,
            ),
            None => None,
        };

        Ok(DeepAnalysis {
            llm_analysis,
            clusters,
        })
    }
}

#[async_trait]
impl JobRunner for AnalysisPipeline {
    async fn run(&self, ctx: &JobContext) -> Result<AnalysisOutcome> {
        let task_id = ctx.task_id.as_str();

        ctx.progress(10, "loading snapshot");
        let snapshot = self
            .snapshots
            .load(task_id)
            .await
            .with_context(|| format!("Failed to load snapshot for {}", task_id))?
            .ok_or_else(|| anyhow!("Snapshot not found for task {}", task_id))?;

        ctx.progress(30, "aggregating");
        let mut aggregation = self.aggregator.analyze(&snapshot);

        ctx.progress(50, "checking cache");
        let cached = self.cache.lookup(&snapshot, TASK_ANALYSIS, task_id).await?;

        let reusable = match cached.llm_analysis {
            Some(payload) if cached.cache_hit => {
                let deep: DeepAnalysis = serde_json::from_value(payload)
                    .context("Cached deep analysis is malformed")?;
                // A clusters-only entry does not satisfy a run that has a model.
                if self.llm.is_some() && deep.llm_analysis.is_none() {
                    debug!("Cached entry for {} has no LLM analysis, recomputing", task_id);
                    None
                } else {
                    Some(deep)
                }
            }
            _ => None,
        };

        let (deep, cache_hit) = match reusable {
            Some(deep) => {
                info!("Reusing cached deep analysis for {}", task_id);
                (deep, true)
            }
            None => {
                ctx.progress(60, "deep analysis");
                let clusters = self.aggregator.coarse_clusters(&snapshot);
                let deep = self.deep_analysis(&aggregation, clusters).await?;

                ctx.progress(85, "saving cache");
                let payload = serde_json::to_value(&deep)?;
                self.cache
                    .save(task_id, TASK_ANALYSIS, task_id, payload, &cached.data_hash)
                    .await?;
                (deep, false)
            }
        };

        ctx.progress(95, "finalizing");
        if let Some(ref llm) = deep.llm_analysis {
            for insight in &llm.insights {
                let suggestion = insight.suggestion.trim();
                if !suggestion.is_empty() && !aggregation.suggestions.iter().any(|s| s == suggestion)
                {
                    aggregation.suggestions.push(suggestion.to_string());
                }
            }
        }

        Ok(AnalysisOutcome {
            aggregation,
            llm_analysis: deep.llm_analysis,
            cache_hit,
        })
    }
}
