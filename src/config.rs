//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.gradepulse.toml` files.

use crate::anomaly::{AnomalyConfig, THRESHOLD_RANGE};
use crate::cli::{Args, OutputFormat};
use crate::report::ReportOptions;
use crate::scheduler::SchedulerConfig;
use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Default configuration file name.
pub const CONFIG_FILE: &str = ".gradepulse.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Scheduler settings.
    #[serde(default)]
    pub scheduler: SchedulerSection,

    /// Model settings.
    #[serde(default)]
    pub model: ModelConfig,

    /// Anomaly detection settings.
    #[serde(default)]
    pub anomaly: AnomalySection,

    /// Storage settings.
    #[serde(default)]
    pub storage: StorageConfig,

    /// Report settings.
    #[serde(default)]
    pub report: ReportConfig,
}

/// Job scheduler settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerSection {
    /// Number of analysis jobs allowed to run at once.
    #[serde(default = "default_max_concurrent")]
    pub max_concurrent: usize,

    /// Finished jobs remembered per outcome.
    #[serde(default = "default_history_size")]
    pub history_size: usize,
}

impl Default for SchedulerSection {
    fn default() -> Self {
        Self {
            max_concurrent: default_max_concurrent(),
            history_size: default_history_size(),
        }
    }
}

fn default_max_concurrent() -> usize {
    2
}

fn default_history_size() -> usize {
    10
}

/// LLM model settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelConfig {
    /// Model used for deep analysis.
    #[serde(default = "default_model")]
    pub name: String,

    /// Ollama API URL.
    #[serde(default = "default_ollama_url")]
    pub ollama_url: String,

    /// Temperature for generation.
    #[serde(default = "default_temperature")]
    pub temperature: f32,

    /// Request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Run the LLM deep analysis. When false only coarse clusters are cached.
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            name: default_model(),
            ollama_url: default_ollama_url(),
            temperature: default_temperature(),
            timeout_seconds: default_timeout(),
            enabled: true,
        }
    }
}

fn default_model() -> String {
    "llama3.2:latest".to_string()
}

fn default_ollama_url() -> String {
    "http://localhost:11434".to_string()
}

fn default_temperature() -> f32 {
    0.1
}

fn default_timeout() -> u64 {
    300
}

fn default_true() -> bool {
    true
}

/// Anomaly detector settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnomalySection {
    /// Deviation threshold in standard deviations, within [1, 5].
    #[serde(default = "default_threshold_sigma")]
    pub threshold_sigma: f64,

    /// Minimum baseline samples before a verdict is given.
    #[serde(default = "default_min_samples")]
    pub min_samples: usize,

    /// Number of preceding tasks forming the baseline.
    #[serde(default = "default_window")]
    pub window: usize,
}

impl Default for AnomalySection {
    fn default() -> Self {
        Self {
            threshold_sigma: default_threshold_sigma(),
            min_samples: default_min_samples(),
            window: default_window(),
        }
    }
}

fn default_threshold_sigma() -> f64 {
    2.0
}

fn default_min_samples() -> usize {
    5
}

fn default_window() -> usize {
    10
}

/// Snapshot storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory of `<task_id>.json` snapshots.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
        }
    }
}

fn default_data_dir() -> PathBuf {
    PathBuf::from("snapshots")
}

/// Report generation settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportConfig {
    /// Directory reports are written to.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    /// Output format (markdown, json).
    #[serde(default)]
    pub format: OutputFormat,

    /// Drill-down levels rendered in Markdown.
    #[serde(default = "default_drill_depth")]
    pub drill_depth: usize,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            format: OutputFormat::default(),
            drill_depth: default_drill_depth(),
        }
    }
}

fn default_output_dir() -> PathBuf {
    PathBuf::from("gradepulse_reports")
}

fn default_drill_depth() -> usize {
    2
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence, but only when explicitly provided.
    pub fn merge_with_args(&mut self, args: &Args) {
        if let Some(ref model) = args.model {
            self.model.name = model.clone();
        }
        if let Some(ref url) = args.ollama_url {
            self.model.ollama_url = url.clone();
        }
        if let Some(temperature) = args.temperature {
            self.model.temperature = temperature;
        }
        if let Some(timeout) = args.timeout {
            self.model.timeout_seconds = timeout;
        }
        if args.no_llm {
            self.model.enabled = false;
        }
        if let Some(ref dir) = args.data_dir {
            self.storage.data_dir = dir.clone();
        }
    }

    /// Check values that serde cannot.
    pub fn validate(&self) -> Result<()> {
        if self.scheduler.max_concurrent == 0 {
            bail!("scheduler.max_concurrent must be at least 1");
        }
        if !THRESHOLD_RANGE.contains(&self.anomaly.threshold_sigma) {
            bail!(
                "anomaly.threshold_sigma must be between {} and {}",
                THRESHOLD_RANGE.start(),
                THRESHOLD_RANGE.end()
            );
        }
        if self.anomaly.min_samples == 0 {
            bail!("anomaly.min_samples must be at least 1");
        }
        if self.anomaly.window == 0 {
            bail!("anomaly.window must be at least 1");
        }
        Ok(())
    }

    pub fn scheduler_config(&self) -> SchedulerConfig {
        SchedulerConfig {
            max_concurrent: self.scheduler.max_concurrent,
            history_size: self.scheduler.history_size,
        }
    }

    pub fn anomaly_config(&self) -> AnomalyConfig {
        AnomalyConfig {
            threshold_sigma: self.anomaly.threshold_sigma,
            min_samples: self.anomaly.min_samples,
            window: self.anomaly.window,
        }
    }

    pub fn report_options(&self) -> ReportOptions {
        ReportOptions {
            drill_depth: self.report.drill_depth.max(1),
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}
