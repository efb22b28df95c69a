//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::anomaly::THRESHOLD_RANGE;
use crate::models::Priority;
use clap::{Parser, Subcommand};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// GradePulse - analysis of AI-graded homework
///
/// Aggregates grading errors per subject, book, page and question, caches
/// LLM deep analyses and flags accuracy anomalies.
///
/// Examples:
///   gradepulse run --priority high 2024-03-01-math
///   gradepulse stats 2024-03-01-math --clusters
///   gradepulse anomaly 2024-03-02-math --threshold 2.5
///   gradepulse init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Path to configuration file
    ///
    /// If not specified, looks for .gradepulse.toml in the current directory
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Directory of task snapshots (<task_id>.json)
    #[arg(long, global = true, value_name = "DIR", env = "GRADEPULSE_DATA_DIR")]
    pub data_dir: Option<PathBuf>,

    /// Ollama model used for deep analysis
    #[arg(short, long, global = true, env = "GRADEPULSE_MODEL")]
    pub model: Option<String>,

    /// Ollama API endpoint URL
    #[arg(long, global = true, env = "OLLAMA_URL")]
    pub ollama_url: Option<String>,

    /// Temperature for LLM responses (0.0 - 1.0)
    #[arg(long, global = true)]
    pub temperature: Option<f32>,

    /// LLM request timeout in seconds
    #[arg(long, global = true, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Skip the LLM deep analysis, cache coarse clusters only
    #[arg(long, global = true)]
    pub no_llm: bool,

    /// Enable verbose logging output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug, Clone)]
pub enum Command {
    /// Analyze tasks through the job scheduler and write reports
    Run {
        /// Task ids to analyze; all snapshots when omitted
        tasks: Vec<String>,

        /// Scheduling priority (high, medium, low)
        #[arg(short, long, default_value = "medium", value_parser = parse_priority)]
        priority: Priority,

        /// Override scheduler.max_concurrent
        #[arg(long, value_name = "NUM")]
        max_concurrent: Option<usize>,

        /// Report output directory
        #[arg(short, long, value_name = "DIR")]
        output: Option<PathBuf>,

        /// Output format (markdown, json)
        #[arg(long, value_name = "FORMAT")]
        format: Option<OutputFormat>,
    },

    /// Print quick statistics for a task as JSON
    Stats {
        task_id: String,

        /// Include coarse error clusters
        #[arg(long)]
        clusters: bool,
    },

    /// Show the cached deep analysis for a task
    Cached {
        task_id: String,

        /// Analysis type of the cache entry
        #[arg(long, default_value = "task")]
        analysis_type: String,

        /// Target id of the cache entry (defaults to the task id)
        #[arg(long)]
        target_id: Option<String>,
    },

    /// Check a task's accuracy against the preceding tasks
    Anomaly {
        task_id: String,

        /// Deviation threshold in standard deviations (1.0 - 5.0)
        #[arg(long, value_name = "SIGMA")]
        threshold: Option<f64>,
    },

    /// Generate a default .gradepulse.toml configuration file
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Output format for the report.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

fn parse_priority(value: &str) -> Result<Priority, String> {
    value.parse::<Priority>().map_err(|e| e.to_string())
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref url) = self.ollama_url {
            if !url.starts_with("http://") && !url.starts_with("https://") {
                return Err("Ollama URL must start with 'http://' or 'https://'".to_string());
            }
        }

        if let Some(temperature) = self.temperature {
            if !(0.0..=1.0).contains(&temperature) {
                return Err("Temperature must be between 0.0 and 1.0".to_string());
            }
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if let Some(ref dir) = self.data_dir {
            if !dir.is_dir() {
                return Err(format!("Data directory does not exist: {}", dir.display()));
            }
        }

        match self.command {
            Command::Run {
                max_concurrent: Some(0),
                ..
            } => return Err("Max concurrent must be at least 1".to_string()),
            Command::Anomaly {
                threshold: Some(threshold),
                ..
            } if !THRESHOLD_RANGE.contains(&threshold) => {
                return Err(format!(
                    "Threshold must be between {} and {} sigma",
                    THRESHOLD_RANGE.start(),
                    THRESHOLD_RANGE.end()
                ));
            }
            _ => {}
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    pub fn log_level(&self) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Args {
        Args::try_parse_from(std::iter::once("gradepulse").chain(args.iter().copied())).unwrap()
    }

    #[test]
    fn test_run_defaults() {
        let args = parse(&["run", "t1", "t2"]);
        match &args.command {
            Command::Run {
                tasks,
                priority,
                max_concurrent,
                ..
            } => {
                assert_eq!(*tasks, vec!["t1", "t2"]);
                assert_eq!(*priority, Priority::Medium);
                assert_eq!(*max_concurrent, None);
            }
            other => panic!("unexpected command {:?}", other),
        }
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_invalid_priority_is_rejected() {
        let result = Args::try_parse_from(["gradepulse", "run", "--priority", "urgent"]);
        assert!(result.is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let args = parse(&["-v", "-q", "stats", "t1"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_threshold_range() {
        assert!(parse(&["anomaly", "t1", "--threshold", "5.5"]).validate().is_err());
        assert!(parse(&["anomaly", "t1", "--threshold", "2.5"]).validate().is_ok());
        assert!(parse(&["run", "--max-concurrent", "0"]).validate().is_err());
    }

    #[test]
    fn test_validation_invalid_url() {
        let args = parse(&["--ollama-url", "localhost:11434", "stats", "t1"]);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_log_level() {
        let mut args = parse(&["stats", "t1"]);
        assert_eq!(args.log_level(), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(), tracing::Level::ERROR);
    }
}
