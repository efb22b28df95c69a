//! Markdown report generation.
//!
//! Renders a persisted `AnalysisReport` as a Markdown document or as
//! pretty-printed JSON.

use crate::cli::OutputFormat;
use crate::models::{
    AggregationNode, AnalysisReport, AnalysisSummary, ErrorPattern, LlmAnalysis, ReportStatus,
    RootCause,
};
use anyhow::{Context, Result};
use std::path::{Path, PathBuf};

/// Rendering options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReportOptions {
    /// Drill-down levels rendered (1 = subjects only).
    pub drill_depth: usize,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self { drill_depth: 2 }
    }
}

/// Generate a complete Markdown report.
pub fn generate_markdown_report(report: &AnalysisReport, options: &ReportOptions) -> String {
    let mut output = String::new();

    output.push_str(&format!("# Grading Analysis: {}\n\n", report.task_id));
    output.push_str(&generate_metadata_section(report));

    if report.status == ReportStatus::Failed {
        output.push_str(&generate_failure_section(report));
        output.push_str(&generate_footer());
        return output;
    }

    output.push_str(&generate_table_of_contents(report));
    output.push_str(&generate_summary_section(&report.summary));
    output.push_str(&generate_drill_down_section(&report.drill_down, options.drill_depth));
    output.push_str(&generate_patterns_section(&report.error_patterns));
    output.push_str(&generate_root_cause_section(&report.root_causes));
    if let Some(ref llm) = report.llm_analysis {
        output.push_str(&generate_insights_section(llm));
    }
    output.push_str(&generate_recommendations_section(&report.suggestions));
    output.push_str(&generate_footer());

    output
}

/// Generate the metadata section.
fn generate_metadata_section(report: &AnalysisReport) -> String {
    let mut section = String::new();

    section.push_str("## Metadata\n\n");
    section.push_str(&format!("- **Task:** `{}`\n", report.task_id));
    section.push_str(&format!("- **Report ID:** `{}`\n", report.report_id));
    section.push_str(&format!("- **Status:** {}\n", report.status));
    section.push_str(&format!(
        "- **Updated:** {}\n",
        report.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    if let Some(ref llm) = report.llm_analysis {
        section.push_str(&format!("- **Model Used:** `{}`\n", llm.model));
    }
    section.push_str(&format!(
        "- **Analysis Duration:** {:.1}s\n",
        report.duration_seconds
    ));
    section.push('\n');

    section
}

fn generate_failure_section(report: &AnalysisReport) -> String {
    let mut section = String::new();

    section.push_str("## Failure\n\n");
    section.push_str(&format!(
        "> ⛔ {}\n\n",
        report.error_message.as_deref().unwrap_or("unknown error")
    ));

    section
}

/// Generate the table of contents.
fn generate_table_of_contents(report: &AnalysisReport) -> String {
    let mut toc = String::new();

    toc.push_str("## Table of Contents\n\n");
    toc.push_str("- [Metadata](#metadata)\n");
    toc.push_str("- [Summary](#summary)\n");
    toc.push_str("- [Drill-down](#drill-down)\n");
    toc.push_str("- [Error Patterns](#error-patterns)\n");
    toc.push_str("- [Root Causes](#root-causes)\n");
    if report.llm_analysis.is_some() {
        toc.push_str("- [Insights](#insights)\n");
    }
    if !report.suggestions.is_empty() {
        toc.push_str("- [Recommendations](#recommendations)\n");
    }
    toc.push('\n');

    toc
}

/// Generate the summary section.
fn generate_summary_section(summary: &AnalysisSummary) -> String {
    let mut section = String::new();

    section.push_str("## Summary\n\n");
    section.push_str("| Questions | Errors | Error Rate |\n");
    section.push_str("|:---:|:---:|:---:|\n");
    section.push_str(&format!(
        "| {} | {} | {:.1}% |\n\n",
        summary.total_questions,
        summary.total_errors,
        summary.error_rate * 100.0
    ));

    if !summary.main_issues.is_empty() {
        section.push_str("### Main Issues\n\n");
        for issue in &summary.main_issues {
            section.push_str(&format!("- {}\n", issue));
        }
        section.push('\n');
    }

    section
}

/// Generate the drill-down section as nested lists.
fn generate_drill_down_section(nodes: &[AggregationNode], depth: usize) -> String {
    let mut section = String::new();

    section.push_str("## Drill-down\n\n");
    if nodes.is_empty() {
        section.push_str("No errors could be attributed to a subject.\n\n");
        return section;
    }

    section.push_str("| Subject | Errors | Questions | Error Rate |\n");
    section.push_str("|:---|:---:|:---:|:---:|\n");
    for node in nodes {
        section.push_str(&format!(
            "| {}{} | {} | {} | {:.1}% |\n",
            node.name,
            focus_marker(node),
            node.error_count,
            node.total,
            node.error_rate * 100.0
        ));
    }
    section.push('\n');

    if depth > 1 {
        for node in nodes.iter().filter(|n| !n.children.is_empty()) {
            section.push_str(&format!("### {}\n\n", node.name));
            push_nodes(&mut section, &node.children, 0, depth - 1);
            section.push('\n');
        }
    }

    section
}

fn push_nodes(out: &mut String, nodes: &[AggregationNode], indent: usize, remaining: usize) {
    for node in nodes {
        out.push_str(&format!(
            "{}- {}{}: {}/{} ({:.1}%)\n",
            "  ".repeat(indent),
            node.name,
            focus_marker(node),
            node.error_count,
            node.total,
            node.error_rate * 100.0
        ));
        if remaining > 1 {
            push_nodes(out, &node.children, indent + 1, remaining - 1);
        }
    }
}

fn focus_marker(node: &AggregationNode) -> &'static str {
    if node.is_focus {
        " ⚠️"
    } else {
        ""
    }
}

/// Generate the error pattern table.
fn generate_patterns_section(patterns: &[ErrorPattern]) -> String {
    let mut section = String::new();

    section.push_str("## Error Patterns\n\n");
    if patterns.is_empty() {
        section.push_str("No grading errors were recorded. 🎉\n\n");
        return section;
    }

    section.push_str("| Severity | Error Type | Count | Share |\n");
    section.push_str("|:---:|:---|:---:|:---:|\n");
    for pattern in patterns {
        section.push_str(&format!(
            "| {} {} | `{}` | {} | {:.1}% |\n",
            pattern.severity.emoji(),
            pattern.severity,
            pattern.error_type,
            pattern.count,
            pattern.percentage * 100.0
        ));
    }
    section.push('\n');

    for pattern in patterns.iter().filter(|p| !p.examples.is_empty()) {
        section.push_str(&format!(
            "<details>\n<summary>Examples of {}</summary>\n\n",
            pattern.error_type
        ));
        for example in &pattern.examples {
            section.push_str(&format!("- {}\n", example));
        }
        section.push_str("</details>\n\n");
    }

    section
}

/// Generate the root cause section.
fn generate_root_cause_section(causes: &[RootCause]) -> String {
    let mut section = String::new();

    section.push_str("## Root Causes\n\n");
    for cause in causes {
        let badge = if cause.is_main { " **(main)**" } else { "" };
        section.push_str(&format!(
            "### {}{}\n\n{} errors, {:.1}% of total\n\n",
            cause.cause.label(),
            badge,
            cause.count,
            cause.percentage * 100.0
        ));
        for sub in &cause.sub_causes {
            section.push_str(&format!("- {}: {}\n", sub.name, sub.count));
        }
        section.push('\n');
    }

    section
}

fn generate_insights_section(llm: &LlmAnalysis) -> String {
    let mut section = String::new();

    section.push_str("## Insights\n\n");
    if llm.insights.is_empty() {
        if llm.raw.is_empty() {
            section.push_str("The model returned no insights.\n\n");
        } else {
            section.push_str(&llm.raw);
            section.push_str("\n\n");
        }
        return section;
    }

    for insight in &llm.insights {
        section.push_str(&format!("#### {}\n\n", insight.title));
        if !insight.detail.is_empty() {
            section.push_str(&format!("{}\n\n", insight.detail));
        }
        if !insight.suggestion.is_empty() {
            section.push_str(&format!("> 💡 **Suggestion:** {}\n\n", insight.suggestion));
        }
    }

    section
}

/// Generate the recommendations section.
fn generate_recommendations_section(recommendations: &[String]) -> String {
    if recommendations.is_empty() {
        return String::new();
    }

    let mut section = String::new();

    section.push_str("## Recommendations\n\n");
    for (i, rec) in recommendations.iter().enumerate() {
        section.push_str(&format!("{}. {}\n", i + 1, rec));
    }
    section.push('\n');

    section
}

/// Generate the report footer.
fn generate_footer() -> String {
    format!("---\n\n*Report generated by gradepulse v{}*\n", env!("CARGO_PKG_VERSION"))
}

/// Generate a JSON report.
pub fn generate_json_report(report: &AnalysisReport) -> Result<String> {
    serde_json::to_string_pretty(report).map_err(Into::into)
}

/// File name used for a task's report.
pub fn report_file_name(task_id: &str, format: OutputFormat) -> String {
    let stem: String = task_id
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    match format {
        OutputFormat::Markdown => format!("{}.md", stem),
        OutputFormat::Json => format!("{}.json", stem),
    }
}

/// Render a report into `dir`, returning the written path.
pub fn write_report(
    report: &AnalysisReport,
    dir: &Path,
    format: OutputFormat,
    options: &ReportOptions,
) -> Result<PathBuf> {
    let content = match format {
        OutputFormat::Markdown => generate_markdown_report(report, options),
        OutputFormat::Json => generate_json_report(report)?,
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;
    let path = dir.join(report_file_name(&report.task_id, format));
    std::fs::write(&path, content)
        .with_context(|| format!("Failed to write report to {}", path.display()))?;

    Ok(path)
}
