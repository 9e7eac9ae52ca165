//! Labeled GitHub issues as a task source.
//!
//! Open issues carrying the configured label become tasks. When a task
//! finishes, the issue gets a summary comment and loses the label so it is
//! not picked up again by a later process.

use std::collections::HashSet;
use std::time::{Duration, Instant};

use anyhow::{Context, Result, anyhow, bail};
use minijinja::{Environment, context};
use reqwest::Url;
use reqwest::blocking::{Client, RequestBuilder};
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{debug, error, info, instrument, warn};

use crate::core::types::{Task, TaskResult};
use crate::io::config::GithubConfig;
use crate::triggers::Trigger;

const ISSUE_TEMPLATE: &str = include_str!("prompts/github_issue.md");
const ISSUE_TEMPLATE_NAME: &str = "github_issue.md";
const TASK_ID_PREFIX: &str = "github-issue-";
const USER_AGENT: &str = concat!("headless/", env!("CARGO_PKG_VERSION"));

/// Issue fields read from the GitHub API.
#[derive(Debug, Clone, Deserialize)]
pub struct Issue {
    pub number: u64,
    pub title: String,
    #[serde(default)]
    pub body: Option<String>,
    #[serde(default)]
    pub html_url: String,
    /// Present when the "issue" is actually a pull request.
    #[serde(default)]
    pub pull_request: Option<Value>,
}

pub struct GithubTrigger {
    client: Client,
    api_url: String,
    token: String,
    repo: String,
    label: String,
    poll_interval: Duration,
    last_poll: Option<Instant>,
    handed_out: HashSet<u64>,
    templates: Environment<'static>,
}

impl GithubTrigger {
    /// Build from configuration. Token and repository are required.
    pub fn from_config(config: &GithubConfig) -> Result<Self> {
        let token = config
            .token
            .clone()
            .filter(|t| !t.trim().is_empty())
            .ok_or_else(|| anyhow!("GITHUB_TOKEN is required"))?;
        let repo = config
            .repo
            .clone()
            .filter(|r| r.contains('/'))
            .ok_or_else(|| anyhow!("GITHUB_REPO is required (format: owner/repo)"))?;

        let client = Client::builder()
            .user_agent(USER_AGENT)
            .connect_timeout(Duration::from_secs(15))
            .timeout(Duration::from_secs(60))
            .build()
            .context("build GitHub HTTP client")?;

        let mut templates = Environment::new();
        templates
            .add_template(ISSUE_TEMPLATE_NAME, ISSUE_TEMPLATE)
            .context("load issue prompt template")?;

        Ok(Self {
            client,
            api_url: config.api_url.trim_end_matches('/').to_string(),
            token,
            repo,
            label: config.label.clone(),
            poll_interval: Duration::from_secs(config.poll_minutes.saturating_mul(60)),
            last_poll: None,
            handed_out: HashSet::new(),
            templates,
        })
    }

    /// Override the minimum time between API polls.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    fn url(&self, segments: &[&str]) -> Result<Url> {
        let mut url = Url::parse(&self.api_url)
            .with_context(|| format!("parse GitHub API url {}", self.api_url))?;
        url.path_segments_mut()
            .map_err(|()| anyhow!("GitHub API url cannot be a base: {}", self.api_url))?
            .pop_if_empty()
            .push("repos")
            .extend(self.repo.split('/'))
            .extend(segments);
        Ok(url)
    }

    fn authorized(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Accept", "application/vnd.github.v3+json")
            .bearer_auth(&self.token)
    }

    #[instrument(skip_all, fields(repo = %self.repo, label = %self.label))]
    fn fetch_issues(&self) -> Result<Vec<Issue>> {
        let url = self.url(&["issues"])?;
        let response = self
            .authorized(self.client.get(url))
            .query(&[("labels", self.label.as_str()), ("state", "open")])
            .send()
            .context("request issues")?;
        let status = response.status();
        if !status.is_success() {
            bail!("GitHub API error: {status}");
        }
        response.json().context("parse issues response")
    }

    fn comment(&self, number: u64, body: &str) -> Result<()> {
        let url = self.url(&["issues", &number.to_string(), "comments"])?;
        let response = self
            .authorized(self.client.post(url))
            .json(&json!({ "body": body }))
            .send()
            .context("post comment")?;
        if !response.status().is_success() {
            bail!("comment on issue #{number} failed: {}", response.status());
        }
        Ok(())
    }

    fn remove_label(&self, number: u64) -> Result<()> {
        let url = self.url(&["issues", &number.to_string(), "labels", &self.label])?;
        let response = self
            .authorized(self.client.delete(url))
            .send()
            .context("remove label")?;
        if !response.status().is_success() {
            bail!(
                "removing label from issue #{number} failed: {}",
                response.status()
            );
        }
        Ok(())
    }

    fn render_prompt(&self, issue: &Issue) -> Result<String> {
        let template = self.templates.get_template(ISSUE_TEMPLATE_NAME)?;
        let body = issue.body.as_deref().map(str::trim).filter(|b| !b.is_empty());
        let rendered = template.render(context! {
            number => issue.number,
            title => issue.title.trim(),
            body => body,
        })?;
        Ok(rendered)
    }
}

impl Trigger for GithubTrigger {
    fn name(&self) -> &'static str {
        "github"
    }

    fn next_task(&mut self) -> Result<Option<Task>> {
        if let Some(last) = self.last_poll
            && last.elapsed() < self.poll_interval
        {
            return Ok(None);
        }
        self.last_poll = Some(Instant::now());

        debug!(label = %self.label, "checking for labeled issues");
        let issues = match self.fetch_issues() {
            Ok(issues) => issues,
            Err(err) => {
                error!(err = %format!("{err:#}"), "failed to fetch issues");
                return Ok(None);
            }
        };

        let Some(issue) = next_issue(&issues, &self.handed_out) else {
            return Ok(None);
        };
        self.handed_out.insert(issue.number);
        info!(issue = issue.number, title = %issue.title, "picked up issue");

        let prompt = self.render_prompt(issue)?;
        Ok(Some(
            Task::new(task_id(issue.number), prompt)
                .with_metadata("issueNumber", issue.number)
                .with_metadata("issueUrl", issue.html_url.clone()),
        ))
    }

    fn on_task_complete(&mut self, result: &TaskResult) -> Result<()> {
        let Some(number) = issue_number(&result.task_id) else {
            warn!(task_id = %result.task_id, "result does not belong to an issue");
            return Ok(());
        };

        // Each update is attempted on its own so a failed comment still
        // unlabels the issue.
        let commented = self.comment(number, &completion_comment(result));
        if let Err(err) = &commented {
            error!(issue = number, err = %format!("{err:#}"), "failed to comment on issue");
        }
        let unlabeled = self.remove_label(number);
        if let Err(err) = &unlabeled {
            error!(issue = number, err = %format!("{err:#}"), "failed to remove issue label");
        }
        if commented.is_ok() && unlabeled.is_ok() {
            info!(issue = number, "updated issue");
        }
        Ok(())
    }

    fn on_startup(&mut self) -> Result<()> {
        info!(
            repo = %self.repo,
            label = %self.label,
            poll_secs = self.poll_interval.as_secs(),
            "watching for labeled issues"
        );
        Ok(())
    }
}

/// First open issue (not a pull request) not yet handed out.
pub fn next_issue<'a>(issues: &'a [Issue], handed_out: &HashSet<u64>) -> Option<&'a Issue> {
    issues
        .iter()
        .filter(|issue| issue.pull_request.is_none())
        .find(|issue| !handed_out.contains(&issue.number))
}

pub fn task_id(number: u64) -> String {
    format!("{TASK_ID_PREFIX}{number}")
}

pub fn issue_number(task_id: &str) -> Option<u64> {
    task_id.strip_prefix(TASK_ID_PREFIX)?.parse().ok()
}

/// Markdown comment summarizing a finished task.
pub fn completion_comment(result: &TaskResult) -> String {
    if result.success {
        format!(
            "## Task completed\n\n**Status:** {}\n**Commit:** {}\n\n**Summary:**\n{}\n\n---\n*Automated by headless*",
            result.status,
            result.commit_hash.as_deref().unwrap_or("N/A"),
            result.ai_note
        )
    } else {
        format!(
            "## Unable to complete this task\n\n**Status:** {}\n\n**Notes:**\n{}\n\n---\n*Automated by headless*",
            result.status, result.ai_note
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::types::TaskStatus;

    fn issue(number: u64, body: Option<&str>) -> Issue {
        Issue {
            number,
            title: format!("Issue {number}"),
            body: body.map(str::to_string),
            html_url: format!("https://github.com/acme/widgets/issues/{number}"),
            pull_request: None,
        }
    }

    fn config() -> GithubConfig {
        GithubConfig {
            token: Some("ghp_test".to_string()),
            repo: Some("acme/widgets".to_string()),
            ..GithubConfig::default()
        }
    }

    #[test]
    fn requires_token_and_repo() {
        let err = GithubTrigger::from_config(&GithubConfig::default())
            .err()
            .expect("missing token");
        assert!(err.to_string().contains("GITHUB_TOKEN"));

        let err = GithubTrigger::from_config(&GithubConfig {
            repo: Some("no-slash".to_string()),
            ..config()
        })
        .err()
        .expect("bad repo");
        assert!(err.to_string().contains("owner/repo"));
    }

    #[test]
    fn huge_poll_interval_saturates() {
        let trigger = GithubTrigger::from_config(&GithubConfig {
            poll_minutes: u64::MAX,
            ..config()
        })
        .expect("trigger");
        assert_eq!(trigger.poll_interval, Duration::from_secs(u64::MAX));
    }

    #[test]
    fn skips_pull_requests_and_handed_out_issues() {
        let mut pr = issue(1, None);
        pr.pull_request = Some(json!({"url": "x"}));
        let issues = vec![pr, issue(2, None), issue(3, None)];

        let handed_out = HashSet::from([2]);
        assert_eq!(next_issue(&issues, &handed_out).map(|i| i.number), Some(3));
        assert!(next_issue(&issues, &HashSet::from([2, 3])).is_none());
    }

    #[test]
    fn prompt_includes_issue_and_verdict_instructions() {
        let trigger = GithubTrigger::from_config(&config()).expect("trigger");
        let prompt = trigger
            .render_prompt(&issue(42, Some("Login fails on Safari")))
            .expect("render");
        assert!(prompt.starts_with("You are working on GitHub issue #42."));
        assert!(prompt.contains("Issue 42"));
        assert!(prompt.contains("Login fails on Safari"));
        assert!(prompt.contains("Fix #42: <description>"));
        assert!(prompt.contains(r#"{"success": true, "aiNote""#));

        let prompt = trigger.render_prompt(&issue(7, Some("  "))).expect("render");
        assert!(prompt.contains("No description provided."));
    }

    #[test]
    fn task_ids_round_trip_issue_numbers() {
        assert_eq!(task_id(12), "github-issue-12");
        assert_eq!(issue_number("github-issue-12"), Some(12));
        assert_eq!(issue_number("task-12"), None);
        assert_eq!(issue_number("github-issue-x"), None);
    }

    #[test]
    fn comment_reflects_outcome() {
        let mut result = TaskResult {
            task_id: task_id(5),
            success: true,
            status: TaskStatus::Completed,
            commit_hash: Some("abc1234".to_string()),
            ai_note: "Fixed the login form".to_string(),
            error: None,
        };
        let comment = completion_comment(&result);
        assert!(comment.contains("**Status:** completed"));
        assert!(comment.contains("**Commit:** abc1234"));
        assert!(comment.contains("Fixed the login form"));

        result.success = false;
        result.status = TaskStatus::Denied;
        result.commit_hash = None;
        let comment = completion_comment(&result);
        assert!(comment.contains("Unable to complete"));
        assert!(comment.contains("**Status:** denied"));
        assert!(!comment.contains("Commit"));
    }

    #[test]
    fn api_urls_encode_label() {
        let trigger = GithubTrigger::from_config(&GithubConfig {
            label: "ai ready".to_string(),
            ..config()
        })
        .expect("trigger");
        let url = trigger
            .url(&["issues", "9", "labels", &trigger.label])
            .expect("url");
        assert_eq!(
            url.as_str(),
            "https://api.github.com/repos/acme/widgets/issues/9/labels/ai%20ready"
        );
    }
}
