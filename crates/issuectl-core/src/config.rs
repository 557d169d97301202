use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Top-level configuration loaded from `./issuectl.toml` (or a path passed
/// on the command line).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub github: GitHubConfig,
    #[serde(default)]
    pub rate_budget: RateBudgetConfig,
    #[serde(default)]
    pub detector: DetectorConfig,
    #[serde(default)]
    pub planner: PlannerConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub webhook: WebhookConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            general: GeneralConfig::default(),
            store: StoreConfig::default(),
            github: GitHubConfig::default(),
            rate_budget: RateBudgetConfig::default(),
            detector: DetectorConfig::default(),
            planner: PlannerConfig::default(),
            executor: ExecutorConfig::default(),
            webhook: WebhookConfig::default(),
        }
    }
}

impl Config {
    /// Load config from `./issuectl.toml`, falling back to defaults when
    /// the file does not exist.
    pub fn load() -> Result<Self, ConfigError> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(path)
        } else {
            Ok(Config::default())
        }
    }

    /// Load from a specific path.
    pub fn load_from(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let path = path.into();
        let text = std::fs::read_to_string(&path).map_err(|e| ConfigError::Io(e.to_string()))?;
        let cfg: Config = toml::from_str(&text).map_err(|e| ConfigError::Parse(e.to_string()))?;
        Ok(cfg)
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self).map_err(|e| ConfigError::Parse(e.to_string()))
    }

    fn default_path() -> PathBuf {
        PathBuf::from("./issuectl.toml")
    }
}

// ---------------------------------------------------------------------------
// Error
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("io: {0}")]
    Io(String),
    #[error("parse: {0}")]
    Parse(String),
}

// ---------------------------------------------------------------------------
// Section structs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,
    #[serde(default = "default_log_format")]
    pub log_format: String,
    /// Repositories the scheduler runs periodic cycles against.
    #[serde(default)]
    pub repositories: Vec<RepoRef>,
    #[serde(default = "default_cycle_interval_seconds")]
    pub cycle_interval_seconds: u64,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: default_log_format(),
            repositories: Vec::new(),
            cycle_interval_seconds: default_cycle_interval_seconds(),
        }
    }
}

fn default_log_level() -> String {
    "info".into()
}
fn default_log_format() -> String {
    "pretty".into()
}
fn default_cycle_interval_seconds() -> u64 {
    900
}

/// A single `(owner, name)` repository reference, as read from
/// `[[general.repositories]]` in TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_database_path")]
    pub database_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            database_path: default_database_path(),
        }
    }
}

fn default_database_path() -> String {
    "./issuectl.db".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubConfig {
    /// Read from `GITHUB_TOKEN`/`ISSUECTL_GITHUB_TOKEN` when unset here.
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default = "default_http_timeout_seconds")]
    pub http_timeout_seconds: u64,
}

impl Default for GitHubConfig {
    fn default() -> Self {
        Self {
            token: None,
            http_timeout_seconds: default_http_timeout_seconds(),
        }
    }
}

fn default_http_timeout_seconds() -> u64 {
    60
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RateBudgetConfig {
    #[serde(default = "default_safety_reserve")]
    pub safety_reserve_fraction: f64,
    #[serde(default = "default_safety_reserve_min")]
    pub safety_reserve_min: i64,
}

impl Default for RateBudgetConfig {
    fn default() -> Self {
        Self {
            safety_reserve_fraction: default_safety_reserve(),
            safety_reserve_min: default_safety_reserve_min(),
        }
    }
}

fn default_safety_reserve() -> f64 {
    0.05
}
fn default_safety_reserve_min() -> i64 {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    #[serde(default = "default_code_weight")]
    pub code_evidence_weight: f64,
    #[serde(default = "default_test_weight")]
    pub test_evidence_weight: f64,
    #[serde(default = "default_commit_weight")]
    pub commit_evidence_weight: f64,
    #[serde(default = "default_doc_weight")]
    pub doc_evidence_weight: f64,
    #[serde(default = "default_lifecycle_weight")]
    pub lifecycle_evidence_weight: f64,
    #[serde(default = "default_analysis_version")]
    pub analysis_version: String,
    #[serde(default = "default_lifecycle_window_hours")]
    pub lifecycle_window_hours: i64,
    #[serde(default = "default_hold_window_hours")]
    pub assignee_hold_window_hours: i64,
    /// Files a typical feature of this shape touches, used as the
    /// denominator for `code_evidence` when the detector has no
    /// per-issue estimate of its own.
    #[serde(default = "default_expected_files")]
    pub expected_files_default: usize,
    /// How far back a reopen event still counts as "recent" for the
    /// false-positive signal.
    #[serde(default = "default_reopen_lookback_hours")]
    pub reopen_lookback_hours: i64,
    /// Commits examined per issue when gathering evidence, to bound the
    /// number of per-commit file-list calls against the core bucket.
    #[serde(default = "default_max_commits_examined")]
    pub max_commits_examined: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            code_evidence_weight: default_code_weight(),
            test_evidence_weight: default_test_weight(),
            commit_evidence_weight: default_commit_weight(),
            doc_evidence_weight: default_doc_weight(),
            lifecycle_evidence_weight: default_lifecycle_weight(),
            analysis_version: default_analysis_version(),
            lifecycle_window_hours: default_lifecycle_window_hours(),
            assignee_hold_window_hours: default_hold_window_hours(),
            expected_files_default: default_expected_files(),
            reopen_lookback_hours: default_reopen_lookback_hours(),
            max_commits_examined: default_max_commits_examined(),
        }
    }
}

fn default_code_weight() -> f64 {
    0.35
}
fn default_test_weight() -> f64 {
    0.25
}
fn default_commit_weight() -> f64 {
    0.20
}
fn default_doc_weight() -> f64 {
    0.10
}
fn default_lifecycle_weight() -> f64 {
    0.10
}
fn default_analysis_version() -> String {
    "1.0.0".into()
}
fn default_lifecycle_window_hours() -> i64 {
    24
}
fn default_hold_window_hours() -> i64 {
    24
}
fn default_expected_files() -> usize {
    3
}
fn default_reopen_lookback_hours() -> i64 {
    72
}
fn default_max_commits_examined() -> usize {
    20
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlannerConfig {
    #[serde(default = "default_true")]
    pub enable_auto_close: bool,
    #[serde(default = "default_true")]
    pub enable_auto_label: bool,
    #[serde(default = "default_true")]
    pub enable_auto_comment: bool,
    #[serde(default = "default_min_confidence_auto_close")]
    pub min_confidence_auto_close: f64,
    #[serde(default = "default_min_confidence_auto_label")]
    pub min_confidence_auto_label: f64,
    #[serde(default = "default_max_actions_per_run")]
    pub max_actions_per_run: u32,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Threaded onto every action this planner emits as `Action::max_attempts`,
    /// mirroring `ExecutorConfig::action_max_attempts` (the executor, not the
    /// planner, is what actually retries against this ceiling).
    #[serde(default = "default_action_max_attempts")]
    pub action_max_attempts: i64,
}

impl Default for PlannerConfig {
    fn default() -> Self {
        Self {
            enable_auto_close: true,
            enable_auto_label: true,
            enable_auto_comment: true,
            min_confidence_auto_close: default_min_confidence_auto_close(),
            min_confidence_auto_label: default_min_confidence_auto_label(),
            max_actions_per_run: default_max_actions_per_run(),
            batch_size: default_batch_size(),
            action_max_attempts: default_action_max_attempts(),
        }
    }
}

fn default_true() -> bool {
    true
}
fn default_min_confidence_auto_close() -> f64 {
    0.80
}
fn default_min_confidence_auto_label() -> f64 {
    0.60
}
fn default_max_actions_per_run() -> u32 {
    100
}
fn default_batch_size() -> usize {
    10
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default = "default_max_concurrent_actions")]
    pub max_concurrent_actions: usize,
    #[serde(default = "default_action_max_attempts")]
    pub action_max_attempts: i64,
    #[serde(default = "default_backoff_base_seconds")]
    pub backoff_base_seconds: u64,
    #[serde(default = "default_backoff_cap_seconds")]
    pub backoff_cap_seconds: u64,
    #[serde(default = "default_rate_limit_wait_ceiling_seconds")]
    pub rate_limit_wait_ceiling_seconds: u64,
    #[serde(default = "default_cycle_deadline_seconds")]
    pub cycle_deadline_seconds: u64,
    #[serde(default = "default_full_scan_window_hours")]
    pub full_scan_window_hours: i64,
    /// How long an action may sit `in_progress` before the reaper treats
    /// its owning worker as dead and requeues it as `pending`.
    #[serde(default = "default_stuck_action_ceiling_seconds")]
    pub stuck_action_ceiling_seconds: u64,
    /// Window after a completed `close_issue` action during which a
    /// webhook-observed reopen of the same issue automatically triggers
    /// a rollback, rather than requiring a manual rollback call.
    #[serde(default = "default_rollback_window_seconds")]
    pub rollback_window_seconds: i64,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            max_concurrent_actions: default_max_concurrent_actions(),
            action_max_attempts: default_action_max_attempts(),
            backoff_base_seconds: default_backoff_base_seconds(),
            backoff_cap_seconds: default_backoff_cap_seconds(),
            rate_limit_wait_ceiling_seconds: default_rate_limit_wait_ceiling_seconds(),
            cycle_deadline_seconds: default_cycle_deadline_seconds(),
            full_scan_window_hours: default_full_scan_window_hours(),
            stuck_action_ceiling_seconds: default_stuck_action_ceiling_seconds(),
            rollback_window_seconds: default_rollback_window_seconds(),
        }
    }
}

fn default_max_concurrent_actions() -> usize {
    10
}
fn default_action_max_attempts() -> i64 {
    3
}
fn default_backoff_base_seconds() -> u64 {
    2
}
fn default_backoff_cap_seconds() -> u64 {
    60
}
fn default_rate_limit_wait_ceiling_seconds() -> u64 {
    300
}
fn default_cycle_deadline_seconds() -> u64 {
    1800
}
fn default_full_scan_window_hours() -> i64 {
    24
}
fn default_stuck_action_ceiling_seconds() -> u64 {
    3600
}
fn default_rollback_window_seconds() -> i64 {
    600
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WebhookConfig {
    #[serde(default = "default_webhook_bind_addr")]
    pub bind_addr: String,
    /// Read from `ISSUECTL_WEBHOOK_SECRET` when unset here.
    #[serde(default)]
    pub secret: Option<String>,
    #[serde(default = "default_webhook_event_timeout_seconds")]
    pub event_timeout_seconds: u64,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_webhook_bind_addr(),
            secret: None,
            event_timeout_seconds: default_webhook_event_timeout_seconds(),
        }
    }
}

fn default_webhook_bind_addr() -> String {
    "0.0.0.0:8787".into()
}
fn default_webhook_event_timeout_seconds() -> u64 {
    30
}
