//! Deep analysis prompt construction and response parsing.

use super::LlmClient;
use crate::analysis::{Aggregation, ErrorCluster};
use crate::models::{Insight, LlmAnalysis};
use anyhow::Result;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

/// Clusters included in the prompt.
const PROMPT_CLUSTERS: usize = 8;

/// Build the deep-analysis prompt from aggregated figures.
pub fn build_prompt(aggregation: &Aggregation, clusters: &[ErrorCluster]) -> String {
    let summary = &aggregation.summary;
    let mut prompt = String::new();

    prompt.push_str("Analyze the following AI grading error statistics.\n\n");
    prompt.push_str(&format!(
        "Total questions: {}\nTotal grading errors: {}\nError rate: {:.1}%\n\n",
        summary.total_questions,
        summary.total_errors,
        summary.error_rate * 100.0
    ));

    prompt.push_str("=== ERROR PATTERNS ===\n");
    for pattern in &aggregation.error_patterns {
        prompt.push_str(&format!(
            "- {}: {} cases ({:.1}%)\n",
            pattern.error_type,
            pattern.count,
            pattern.percentage * 100.0
        ));
        for example in &pattern.examples {
            prompt.push_str(&format!("    e.g. {}\n", example));
        }
    }

    prompt.push_str("\n=== ROOT CAUSES ===\n");
    for cause in &aggregation.root_causes {
        prompt.push_str(&format!(
            "- {}: {} cases ({:.1}%)\n",
            cause.cause.label(),
            cause.count,
            cause.percentage * 100.0
        ));
    }

    prompt.push_str("\n=== ERROR CLUSTERS ===\n");
    for cluster in clusters.iter().take(PROMPT_CLUSTERS) {
        prompt.push_str(&format!(
            "- {} in '{}' pages {}: {} cases\n",
            cluster.error_type, cluster.book_name, cluster.page_range, cluster.sample_count
        ));
    }

    prompt.push_str("\nFor each insight, output it in this exact JSON format:\n");
    prompt.push_str(
        r#"{"title": "Short title", "detail": "What is going wrong and where", "suggestion": "How to fix it"}"#,
    );
    prompt.push_str("\n\nOutput one JSON object per line. Only output JSON, no other text.");

    prompt
}

/// Parse insights from a JSON-lines response.
pub fn parse_insights(response: &str) -> Vec<Insight> {
    let mut insights = Vec::new();

    for line in response.lines() {
        let line = line.trim();
        if line.is_empty() || !line.starts_with('{') {
            continue;
        }

        if let Ok(json) = serde_json::from_str::<Value>(line) {
            if let Some(insight) = json_to_insight(&json) {
                insights.push(insight);
            }
        }
    }

    insights
}

fn json_to_insight(json: &Value) -> Option<Insight> {
    Some(Insight {
        title: json["title"].as_str()?.to_string(),
        detail: json["detail"].as_str().unwrap_or("").to_string(),
        suggestion: json["suggestion"].as_str().unwrap_or("").to_string(),
    })
}

/// Ask the LLM for insights on an aggregation.
pub async fn run_deep_analysis(
    client: &dyn LlmClient,
    model: &str,
    timeout: Duration,
    aggregation: &Aggregation,
    clusters: &[ErrorCluster],
) -> Result<LlmAnalysis> {
    let prompt = build_prompt(aggregation, clusters);
    debug!("Deep analysis prompt is {} chars", prompt.len());

    let response = client.complete(&prompt, model, timeout).await?;
    let insights = parse_insights(&response);
    info!("Parsed {} insights from {}", insights.len(), model);

    let raw = if insights.is_empty() {
        response
    } else {
        String::new()
    };

    Ok(LlmAnalysis {
        model: model.to_string(),
        insights,
        raw,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::aggregator::tests::sample_snapshot;
    use crate::analysis::Aggregator;
    use async_trait::async_trait;

    struct CannedClient(&'static str);

    #[async_trait]
    impl LlmClient for CannedClient {
        async fn complete(&self, _prompt: &str, _model: &str, _timeout: Duration) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    #[test]
    fn test_prompt_mentions_patterns_and_clusters() {
        let aggregator = Aggregator::default();
        let snapshot = sample_snapshot();
        let aggregation = aggregator.analyze(&snapshot);
        let clusters = aggregator.coarse_clusters(&snapshot);

        let prompt = build_prompt(&aggregation, &clusters);
        assert!(prompt.contains("recognition_error: 3 cases"));
        assert!(prompt.contains("OCR recognition issue"));
        assert!(prompt.contains("'Math Workbook' pages 11-20"));
    }

    #[test]
    fn test_parse_insights_skips_noise() {
        let response = r#"Here you go:
{"title": "Handwritten fractions", "detail": "OCR confuses 4 and 7", "suggestion": "Retrain"}
not json
{"detail": "missing title is dropped"}
{"title": "Equivalent answers"}"#;

        let insights = parse_insights(response);
        assert_eq!(insights.len(), 2);
        assert_eq!(insights[0].title, "Handwritten fractions");
        assert_eq!(insights[1].suggestion, "");
    }

    #[tokio::test]
    async fn test_run_deep_analysis_keeps_raw_when_unstructured() {
        let aggregation = Aggregator::default().analyze(&sample_snapshot());
        let client = CannedClient("The grader struggles with handwriting.");

        let analysis = run_deep_analysis(&client, "m", Duration::from_secs(1), &aggregation, &[])
            .await
            .unwrap();
        assert!(analysis.insights.is_empty());
        assert_eq!(analysis.raw, "The grader struggles with handwriting.");
        assert_eq!(analysis.model, "m");
    }
}
