//! Unattended coding agent runner.
//!
//! Polls a task source, runs the agent against the project repository and
//! keeps the repository in sync with its remote between tasks.

use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use tracing::info;

use headless::core::outcome::task_result;
use headless::exit_codes;
use headless::io::agent::{Agent, ClaudeAgent, ExecRequest, resolve_agent_binary};
use headless::io::config::{HeadlessConfig, load_config, load_dotenv};
use headless::io::git::Git;
use headless::logging;
use headless::scheduler::{LoopSettings, Scheduler};
use headless::shutdown::{ShutdownToken, install_signal_handler};
use headless::triggers::file::FileTrigger;
use headless::triggers::github::GithubTrigger;
use headless::triggers::webhook::WebhookTrigger;
use headless::triggers::{Trigger, TriggerKind};
use headless::ui::{self, Console};

#[derive(Parser)]
#[command(
    name = "headless",
    version,
    about = "Unattended coding agent runner"
)]
struct Cli {
    /// TOML config file (default: ./headless.toml when present).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Poll a task source and run each task until interrupted.
    Run {
        /// Where tasks come from.
        #[arg(value_enum)]
        trigger: TriggerKind,
    },
    /// Run a single prompt through the agent, without git sync.
    Exec {
        /// Prompt text; read from stdin when omitted.
        #[arg(long)]
        prompt: Option<String>,
    },
    /// Validate configuration and show the resolved agent binary.
    Check,
}

fn main() {
    load_dotenv();
    logging::init();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("{err:#}");
            std::process::exit(exit_codes::INVALID);
        }
    }
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    match cli.command {
        Command::Run { trigger } => cmd_run(&config, trigger),
        Command::Exec { prompt } => cmd_exec(&config, prompt),
        Command::Check => cmd_check(&config),
    }
}

fn agent_binary(config: &HeadlessConfig) -> PathBuf {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    resolve_agent_binary(config.agent_path.as_deref(), home.as_deref())
}

fn cmd_run(config: &HeadlessConfig, kind: TriggerKind) -> Result<i32> {
    let console = Console::terminal();
    console.print(&ui::banner());

    let token = ShutdownToken::new();
    install_signal_handler(&token)?;

    let agent = ClaudeAgent::new(agent_binary(config), console.clone());
    info!(
        project_dir = %config.project_dir.display(),
        agent = %agent.binary().display(),
        timeout_minutes = config.timeout_minutes,
        "starting scheduler"
    );

    match kind {
        TriggerKind::File => {
            let trigger = FileTrigger::new(&config.file.tasks_file, console.clone());
            run_scheduler(config, trigger, agent, console, token)
        }
        TriggerKind::Webhook => {
            let trigger = WebhookTrigger::new(config.webhook.port, config.webhook.secret.clone());
            run_scheduler(config, trigger, agent, console, token)
        }
        TriggerKind::Github => {
            let trigger = GithubTrigger::from_config(&config.github)?;
            run_scheduler(config, trigger, agent, console, token)
        }
    }
}

fn run_scheduler<T: Trigger>(
    config: &HeadlessConfig,
    trigger: T,
    agent: ClaudeAgent,
    console: Console,
    token: ShutdownToken,
) -> Result<i32> {
    let settings = LoopSettings {
        poll_interval: config.poll_interval(),
        error_backoff: config.error_backoff(),
        ..LoopSettings::new(&config.project_dir, config.timeout())
    };
    let repo = Git::new(&config.project_dir);
    let mut scheduler = Scheduler::new(trigger, agent, repo, settings, console, token);
    let outcome = scheduler.run()?;
    println!(
        "Stopped after {} task(s), {} succeeded.",
        outcome.tasks_run, outcome.tasks_succeeded
    );
    Ok(exit_codes::OK)
}

fn cmd_exec(config: &HeadlessConfig, prompt: Option<String>) -> Result<i32> {
    let prompt = match prompt {
        Some(prompt) => prompt,
        None => read_stdin()?,
    };
    if prompt.trim().is_empty() {
        bail!("prompt is empty");
    }

    let console = Console::terminal();
    let agent = ClaudeAgent::new(agent_binary(config), console.clone());
    let outcome = agent.execute(&ExecRequest {
        workdir: config.project_dir.clone(),
        prompt,
        timeout: config.timeout(),
    });
    let result = task_result("exec", outcome, None);
    console.print(&ui::result_block(result.success, &result.ai_note));

    Ok(if result.success {
        exit_codes::OK
    } else {
        exit_codes::TASK_FAILED
    })
}

fn read_stdin() -> Result<String> {
    let mut prompt = String::new();
    std::io::stdin()
        .read_to_string(&mut prompt)
        .context("read prompt from stdin")?;
    Ok(prompt)
}

fn cmd_check(config: &HeadlessConfig) -> Result<i32> {
    let binary = agent_binary(config);
    println!("project_dir: {}", display_dir(&config.project_dir));
    println!("agent: {}", binary.display());
    println!("timeout: {} minute(s)", config.timeout_minutes);
    println!("poll interval: {} ms", config.poll_interval_ms);
    Ok(exit_codes::OK)
}

fn display_dir(dir: &Path) -> String {
    dir.canonicalize()
        .unwrap_or_else(|_| dir.to_path_buf())
        .display()
        .to_string()
}
