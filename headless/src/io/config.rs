//! Engine configuration: optional `headless.toml`, overlaid by environment.

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Config file picked up from the working directory when `--config` is absent.
pub const DEFAULT_CONFIG_FILE: &str = "headless.toml";

pub const MIN_TIMEOUT_MINUTES: u64 = 1;
pub const MAX_TIMEOUT_MINUTES: u64 = 120;
pub const MAX_GITHUB_POLL_MINUTES: u64 = 24 * 60;

/// Engine configuration (TOML + environment).
///
/// Missing fields default to the values the engine has always shipped with.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct HeadlessConfig {
    /// Repository the agent works in.
    pub project_dir: PathBuf,

    /// Explicit agent binary; falls back to well-known install locations.
    pub agent_path: Option<PathBuf>,

    /// Wall-clock budget for one agent invocation.
    pub timeout_minutes: u64,

    /// Pause between polls of the trigger (and after each task).
    pub poll_interval_ms: u64,

    /// Pause after a cycle fails unexpectedly.
    pub error_backoff_ms: u64,

    pub file: FileTriggerConfig,
    pub webhook: WebhookConfig,
    pub github: GithubConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct FileTriggerConfig {
    /// JSON task queue, relative to the process working directory.
    pub tasks_file: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct WebhookConfig {
    pub port: u16,
    /// Shared secret expected in the `x-webhook-secret` header.
    pub secret: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct GithubConfig {
    pub token: Option<String>,
    /// `owner/repo`.
    pub repo: Option<String>,
    pub label: String,
    pub poll_minutes: u64,
    pub api_url: String,
}

impl Default for HeadlessConfig {
    fn default() -> Self {
        Self {
            project_dir: PathBuf::from("."),
            agent_path: None,
            timeout_minutes: 30,
            poll_interval_ms: 10_000,
            error_backoff_ms: 60_000,
            file: FileTriggerConfig::default(),
            webhook: WebhookConfig::default(),
            github: GithubConfig::default(),
        }
    }
}

impl Default for FileTriggerConfig {
    fn default() -> Self {
        Self {
            tasks_file: PathBuf::from("tasks.json"),
        }
    }
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            secret: None,
        }
    }
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            token: None,
            repo: None,
            label: "claude-ready".to_string(),
            poll_minutes: 5,
            api_url: "https://api.github.com".to_string(),
        }
    }
}

impl HeadlessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_minutes.saturating_mul(60))
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn error_backoff(&self) -> Duration {
        Duration::from_millis(self.error_backoff_ms)
    }

    /// Overlay environment variables on top of file/default values.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        if let Some(dir) = get("PROJECT_DIR") {
            self.project_dir = PathBuf::from(dir);
        }
        if let Some(path) = get("CLAUDE_PATH") {
            self.agent_path = Some(PathBuf::from(path));
        }
        if let Some(raw) = get("CLAUDE_TIMEOUT_MINUTES") {
            self.timeout_minutes = parse_var("CLAUDE_TIMEOUT_MINUTES", &raw)?;
        }
        if let Some(raw) = get("POLL_INTERVAL_MS") {
            self.poll_interval_ms = parse_var("POLL_INTERVAL_MS", &raw)?;
        }
        if let Some(raw) = get("ERROR_BACKOFF_MS") {
            self.error_backoff_ms = parse_var("ERROR_BACKOFF_MS", &raw)?;
        }
        if let Some(path) = get("TASKS_FILE") {
            self.file.tasks_file = PathBuf::from(path);
        }
        if let Some(raw) = get("WEBHOOK_PORT") {
            self.webhook.port = parse_var("WEBHOOK_PORT", &raw)?;
        }
        if let Some(secret) = get("WEBHOOK_SECRET") {
            self.webhook.secret = Some(secret);
        }
        if let Some(token) = get("GITHUB_TOKEN") {
            self.github.token = Some(token);
        }
        if let Some(repo) = get("GITHUB_REPO") {
            self.github.repo = Some(repo);
        }
        if let Some(label) = get("GITHUB_LABEL") {
            self.github.label = label;
        }
        if let Some(raw) = get("GITHUB_POLL_MINUTES") {
            self.github.poll_minutes = parse_var("GITHUB_POLL_MINUTES", &raw)?;
        }
        Ok(())
    }

    /// Every configuration problem found, in a stable order.
    pub fn problems(&self) -> Vec<String> {
        let mut problems = Vec::new();
        if !self.project_dir.is_dir() {
            problems.push(format!(
                "PROJECT_DIR does not exist: {}",
                self.project_dir.display()
            ));
        }
        if let Some(path) = &self.agent_path
            && !path.exists()
        {
            problems.push(format!("CLAUDE_PATH does not exist: {}", path.display()));
        }
        if !(MIN_TIMEOUT_MINUTES..=MAX_TIMEOUT_MINUTES).contains(&self.timeout_minutes) {
            problems.push(format!(
                "CLAUDE_TIMEOUT_MINUTES must be between {MIN_TIMEOUT_MINUTES} and {MAX_TIMEOUT_MINUTES}"
            ));
        }
        if self.poll_interval_ms == 0 {
            problems.push("POLL_INTERVAL_MS must be > 0".to_string());
        }
        if self.github.poll_minutes > MAX_GITHUB_POLL_MINUTES {
            problems.push(format!(
                "GITHUB_POLL_MINUTES must be at most {MAX_GITHUB_POLL_MINUTES}"
            ));
        }
        problems
    }

    pub fn validate(&self) -> Result<()> {
        let problems = self.problems();
        if !problems.is_empty() {
            bail!("invalid configuration:\n- {}", problems.join("\n- "));
        }
        Ok(())
    }
}

fn parse_var<T>(key: &str, raw: &str) -> Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    raw.trim()
        .parse()
        .with_context(|| format!("parse {key}={raw:?}"))
}

/// Load `.env` and `.env.local` from the working directory.
///
/// Variables already set in the process environment win.
pub fn load_dotenv() {
    for name in [".env", ".env.local"] {
        match dotenvy::from_filename(name) {
            Ok(path) => debug!(path = %path.display(), "loaded env file"),
            Err(err) if err.not_found() => {}
            Err(err) => debug!(file = name, err = %err, "skipping env file"),
        }
    }
}

/// Read config from a TOML file, overlay the process environment, validate.
///
/// An explicit `path` must exist; without one, `headless.toml` is used when
/// present and defaults otherwise.
pub fn load_config(path: Option<&Path>) -> Result<HeadlessConfig> {
    let mut cfg = match path {
        Some(path) => read_config_file(path)?,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_FILE);
            if default_path.exists() {
                read_config_file(default_path)?
            } else {
                HeadlessConfig::default()
            }
        }
    };
    cfg.apply_env(|key| std::env::var(key).ok())?;
    cfg.validate()?;
    Ok(cfg)
}

pub fn read_config_file(path: &Path) -> Result<HeadlessConfig> {
    let contents = fs::read_to_string(path).with_context(|| format!("read {}", path.display()))?;
    let cfg: HeadlessConfig =
        toml::from_str(&contents).with_context(|| format!("parse {}", path.display()))?;
    debug!(path = %path.display(), "config file loaded");
    Ok(cfg)
}
