//! Thin clap-derived CLI surface exercising the orchestrator end-to-end.
//! Intentionally small: the command set is just enough to drive a task
//! through its full lifecycle from a shell.

use std::env;
use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand};

use crate::agent::AgentsConfig;
use crate::cmd::Cmd;
use crate::config;
use crate::error::CrewError;
use crate::orchestrator::{Orchestrator, StartConfig};
use crate::status::CloseReason;
use crate::store::TaskFilter;
use crate::worktree::WorktreeSetupConfig;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
#[command(name = "crew")]
#[command(about = "Orchestrates git worktrees and tmux sessions for coding agents")]
struct Cli {
    /// Task namespace; defaults to "crew".
    #[arg(long, global = true)]
    namespace: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the task store in the current repository
    Init,

    /// Create (if needed) and start a task
    Start {
        /// Existing task id to resume; omit to create a new task from --title
        id: Option<u64>,

        /// Title for a newly created task
        #[arg(long)]
        title: Option<String>,

        /// Agent to run, as named in the agent config
        #[arg(long)]
        agent: String,

        /// GitHub issue number this task addresses
        #[arg(long, default_value_t = 0)]
        issue: i64,

        /// Base branch/commit to branch from (defaults to the current branch)
        #[arg(long)]
        base: Option<String>,
    },

    /// List tasks, optionally filtered by label
    List {
        #[arg(long)]
        label: Vec<String>,
    },

    /// Show a single task
    Show {
        id: u64,
    },

    /// Stop a task's running session
    Stop {
        id: u64,
    },

    /// Close a task (valid from any non-terminal status)
    Close {
        id: u64,

        /// merged | abandoned | none
        #[arg(long, default_value = "none")]
        reason: String,
    },

    /// Send text to a task's session (no trailing newline unless --enter)
    Send {
        id: u64,
        text: String,

        #[arg(long)]
        enter: bool,
    },

    /// Capture the last N lines of a task's session output
    Peek {
        id: u64,

        #[arg(short = 'n', long, default_value_t = 200)]
        lines: u16,
    },

    /// Run the completion gate and move a task to for_review
    Complete {
        id: u64,

        /// Shell command that must exit 0, run inside the worktree
        #[arg(long, default_value = "")]
        gate: String,
    },
}

fn parse_close_reason(s: &str) -> Result<CloseReason> {
    match s {
        "none" => Ok(CloseReason::None),
        "merged" => Ok(CloseReason::Merged),
        "abandoned" => Ok(CloseReason::Abandoned),
        other => Err(anyhow!("unknown close reason: {other}")),
    }
}

fn current_branch(repo_root: &std::path::Path) -> Result<String> {
    Cmd::new("git")
        .workdir(repo_root)
        .args(&["rev-parse", "--abbrev-ref", "HEAD"])
        .run_and_capture_stdout()
        .context("failed to determine current branch")
}

fn global_agents_path() -> PathBuf {
    home::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("crew")
        .join("agents.yaml")
}

fn project_agents_path(repo_root: &std::path::Path) -> PathBuf {
    repo_root.join(".crew.yaml")
}

pub fn run() -> Result<()> {
    let cli = Cli::parse();
    let repo_root = env::current_dir().context("failed to determine current directory")?;
    let git_dir = config::git_common_dir(&repo_root)?;
    let namespace = cli
        .namespace
        .unwrap_or_else(|| config::DEFAULT_NAMESPACE.to_string());

    let orch = Orchestrator::new(&repo_root, &git_dir, &namespace);

    match cli.command {
        Commands::Init => {
            orch.store().initialize()?;
            println!("initialized namespace '{}'", namespace);
            Ok(())
        }
        Commands::Start {
            id,
            title,
            agent,
            issue,
            base,
        } => {
            if !orch.store().is_initialized()? {
                return Err(CrewError::NotInitialized.into());
            }

            let mut task = match id {
                Some(id) => orch
                    .store()
                    .get(id)?
                    .ok_or(CrewError::TaskNotFound(id))?,
                None => {
                    let title = title.ok_or_else(|| anyhow!("--title is required for a new task"))?;
                    if title.trim().is_empty() {
                        return Err(CrewError::EmptyTitle.into());
                    }
                    let new_id = orch.store().next_id()?;
                    let mut task = crate::store::task::Task::new(new_id, &namespace, title, now());
                    task.issue = issue;
                    task
                }
            };

            let agents_config = AgentsConfig::load(&global_agents_path(), &project_agents_path(&repo_root))?;
            let agents = agents_config.resolved()?;
            let spec = agents.get(&agent).ok_or(CrewError::NoAgent)?;

            let base_branch = match base {
                Some(b) => b,
                None => current_branch(&repo_root)?,
            };

            let worktree_setup = WorktreeSetupConfig {
                copy: Vec::new(),
                setup_command: spec.worktree_setup_script.clone(),
                exclude_patterns: spec.exclude_patterns.clone(),
            };

            let cfg = StartConfig {
                agents: &agents,
                default_system_prompt: "",
                default_prompt: "",
                base_branch: &base_branch,
                worktree_setup: &worktree_setup,
                disabled_agents: &agents_config.disabled_agents,
                flags: Default::default(),
            };

            orch.start(&mut task, &agent, &cfg)?;
            println!("started task {} ({})", task.id, task.session);
            Ok(())
        }
        Commands::List { label } => {
            orch.reconcile()?;
            let filter = TaskFilter {
                parent_id: None,
                labels: label,
            };
            for task in orch.store().list(&filter)? {
                println!(
                    "{:>5}  {:<12}  {}",
                    task.id,
                    task.status.display(),
                    task.title
                );
            }
            Ok(())
        }
        Commands::Show { id } => {
            orch.reconcile()?;
            let task = orch.store().get(id)?.ok_or(CrewError::TaskNotFound(id))?;
            println!("{:#?}", task);
            Ok(())
        }
        Commands::Stop { id } => {
            let mut task = orch.store().get(id)?.ok_or(CrewError::TaskNotFound(id))?;
            orch.stop(&mut task)?;
            println!("stopped task {}", id);
            Ok(())
        }
        Commands::Close { id, reason } => {
            let mut task = orch.store().get(id)?.ok_or(CrewError::TaskNotFound(id))?;
            orch.close(&mut task, parse_close_reason(&reason)?)?;
            println!("closed task {}", id);
            Ok(())
        }
        Commands::Send { id, text, enter } => {
            let task = orch.store().get(id)?.ok_or(CrewError::TaskNotFound(id))?;
            if task.session.is_empty() {
                return Err(CrewError::NoSession(id.to_string()).into());
            }
            let sessions = crate::session::SessionCoordinator::new(
                crate::naming::crew_dir(&git_dir),
            );
            sessions.send(&task.session, &text)?;
            if enter {
                sessions.send_enter(&task.session)?;
            }
            Ok(())
        }
        Commands::Peek { id, lines } => {
            let task = orch.store().get(id)?.ok_or(CrewError::TaskNotFound(id))?;
            if task.session.is_empty() {
                return Err(CrewError::NoSession(id.to_string()).into());
            }
            let sessions = crate::session::SessionCoordinator::new(
                crate::naming::crew_dir(&git_dir),
            );
            print!("{}", sessions.peek(&task.session, lines, false)?);
            Ok(())
        }
        Commands::Complete { id, gate } => {
            let mut task = orch.store().get(id)?.ok_or(CrewError::TaskNotFound(id))?;
            orch.complete(&mut task, &gate)?;
            println!("task {} is now for_review", id);
            Ok(())
        }
    }
}

fn now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
