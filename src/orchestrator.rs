//! Task orchestrator (C8): ties the state machine, template renderer, task
//! store, worktree coordinator and session coordinator together into the
//! five operations a caller actually drives a task through — start, stop,
//! reconcile, complete, close — mirroring the way `src/workflow/create.rs`
//! sequences preflight checks, worktree creation and environment setup
//! behind one function, erroring out of the middle with `.context()` rather
//! than unwinding through an explicit rollback stack.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::agent::{AgentSpec, CommandData, is_agent_disabled};
use crate::cmd::Cmd;
use crate::error::CrewError;
use crate::naming;
use crate::session::{SessionCoordinator, StartOptions};
use crate::status::{CloseReason, Status};
use crate::store::GitTaskStore;
use crate::store::task::Task;
use crate::template;
use crate::worktree::{WorktreeCoordinator, WorktreeSetupConfig};

/// Everything the orchestrator needs to know about an agent roster and
/// default prompts that isn't already on the task itself.
pub struct StartConfig<'a> {
    pub agents: &'a BTreeMap<String, AgentSpec>,
    pub default_system_prompt: &'a str,
    pub default_prompt: &'a str,
    pub base_branch: &'a str,
    pub worktree_setup: &'a WorktreeSetupConfig,
    /// Shell-style glob patterns disabling agents by name; see
    /// [`crate::agent::is_agent_disabled`].
    pub disabled_agents: &'a [String],
    /// Extra `{{if .Flag}}` booleans, e.g. `Continue` when resuming a task
    /// that already has a session history.
    pub flags: BTreeMap<String, bool>,
}

pub struct Orchestrator {
    store: GitTaskStore,
    worktrees: WorktreeCoordinator,
    sessions: SessionCoordinator,
    repo_root: PathBuf,
    crew_dir: PathBuf,
    git_dir: PathBuf,
}

impl Orchestrator {
    pub fn new(
        repo_root: impl Into<PathBuf>,
        git_dir: impl Into<PathBuf>,
        namespace: &str,
    ) -> Self {
        let repo_root = repo_root.into();
        let git_dir = git_dir.into();
        let crew_dir = naming::crew_dir(&git_dir);
        Self {
            store: GitTaskStore::new(&repo_root, namespace),
            worktrees: WorktreeCoordinator::new(&repo_root, &crew_dir),
            sessions: SessionCoordinator::new(&crew_dir),
            repo_root,
            crew_dir,
            git_dir,
        }
    }

    pub fn store(&self) -> &GitTaskStore {
        &self.store
    }

    fn command_data(&self, task: &Task, branch: &str, worktree: &Path, model: &str) -> CommandData {
        CommandData {
            git_dir: self.git_dir.to_string_lossy().into_owned(),
            repo_root: self.repo_root.to_string_lossy().into_owned(),
            worktree: worktree.to_string_lossy().into_owned(),
            title: task.title.clone(),
            description: task.description.clone(),
            branch: branch.to_string(),
            model: model.to_string(),
            issue: task.issue,
            task_id: task.id,
            flags: BTreeMap::new(),
        }
    }

    /// Resolves or creates the task's worktree, renders the agent's command
    /// and prompt, writes both to `scripts/`, starts the session, and
    /// advances the task to `in_progress`. On any failure after the
    /// worktree has been created, the worktree and any partial script
    /// output are left on disk for inspection rather than torn down —
    /// callers may retry `start` once the underlying problem is fixed.
    pub fn start(&self, task: &mut Task, agent_name: &str, cfg: &StartConfig) -> Result<()> {
        if !task.status.can_start() {
            return Err(CrewError::InvalidTransition {
                from: format!("{:?}", task.status),
                to: "in_progress".to_string(),
            }
            .into());
        }

        if is_agent_disabled(agent_name, cfg.disabled_agents) {
            return Err(CrewError::AgentDisabled(agent_name.to_string()).into());
        }

        let agent = cfg
            .agents
            .get(agent_name)
            .ok_or(CrewError::NoAgent)?;

        let branch = naming::branch_name(task.id, task.issue);
        let worktree_path = if self.worktrees.exists(&branch)? {
            self.worktrees.resolve(&branch)?
        } else {
            let path = self
                .worktrees
                .create(task.id, &branch, cfg.base_branch)
                .context("failed to create worktree")?;
            self.worktrees
                .set_worktree_meta(&task.id.to_string(), "base", cfg.base_branch)?;
            path
        };

        let mut data = self.command_data(task, &branch, &worktree_path, &agent.model);
        data.flags = cfg.flags.clone();

        let (command_line, prompt_body) = template::render(
            agent,
            &data,
            "\"$PROMPT\"",
            cfg.default_system_prompt,
            cfg.default_prompt,
        )
        .context("failed to render agent command")?;

        std::fs::create_dir_all(naming::scripts_dir(&self.crew_dir))
            .context("failed to create scripts directory")?;
        let prompt_path = naming::task_prompt_path(&self.crew_dir, task.id);
        std::fs::write(&prompt_path, &prompt_body)
            .with_context(|| format!("failed to write {}", prompt_path.display()))?;

        let script_path = naming::task_script_path(&self.crew_dir, task.id);
        let script = format!(
            "#!/bin/sh\nPROMPT=\"$(cat {})\"\n{}\n",
            shell_quote(&prompt_path.to_string_lossy()),
            command_line
        );
        std::fs::write(&script_path, &script)
            .with_context(|| format!("failed to write {}", script_path.display()))?;

        if !worktree_setup_already_done(&self.worktrees, &task.id.to_string()) {
            self.worktrees
                .setup_worktree(&worktree_path, &data, cfg.worktree_setup)
                .context("failed to set up worktree")?;
            self.worktrees
                .set_worktree_meta(&task.id.to_string(), "setup_done", "1")?;
        }

        let session_name = naming::session_name(task.id, false);
        let script_arg = format!("sh {}", script_path.display());
        self.sessions
            .start(&StartOptions {
                name: &session_name,
                dir: &worktree_path,
                command: &script_arg,
                task_title: &task.title,
                task_agent: agent_name,
                task_id: task.id,
            })
            .context("failed to start session")?;

        task.agent = agent_name.to_string();
        task.session = session_name;
        task.base_branch = cfg.base_branch.to_string();
        task.status = Status::InProgress;
        self.store.save(task)?;

        Ok(())
    }

    /// Stops the task's session (absent sessions are a no-op) and transitions
    /// to `stopped`.
    pub fn stop(&self, task: &mut Task) -> Result<()> {
        if !task.status.can_transition_to(Status::Stopped) {
            return Err(CrewError::InvalidTransition {
                from: format!("{:?}", task.status),
                to: "stopped".to_string(),
            }
            .into());
        }
        if !task.session.is_empty() {
            self.sessions.stop(&task.session)?;
        }
        task.session = String::new();
        task.status = Status::Stopped;
        self.store.save(task)?;
        Ok(())
    }

    /// Observes every `in_progress` task whose session has died out from
    /// under it and transitions it to `error`. Tasks whose session is still
    /// running, or that have no session at all, are left untouched.
    pub fn reconcile(&self) -> Result<Vec<u64>> {
        let tasks = self.store.list(&Default::default())?;
        let mut transitioned = Vec::new();
        for mut task in tasks {
            if task.status != Status::InProgress || task.session.is_empty() {
                continue;
            }
            if !self.sessions.is_running(&task.session)? {
                task.status = Status::Error;
                task.block_reason = format!("session {} is no longer running", task.session);
                self.store.save(&task)?;
                transitioned.push(task.id);
            }
        }
        Ok(transitioned)
    }

    /// The completion gate: the task must be able to reach `for_review`, the
    /// worktree must have no uncommitted changes, and — if `gate_command` is
    /// non-empty — it must exit 0 inside the worktree.
    pub fn complete(&self, task: &mut Task, gate_command: &str) -> Result<()> {
        if !task.status.can_transition_to(Status::ForReview) {
            return Err(CrewError::InvalidTransition {
                from: format!("{:?}", task.status),
                to: "for_review".to_string(),
            }
            .into());
        }

        let branch = naming::branch_name(task.id, task.issue);
        let worktree_path = self.worktrees.resolve(&branch)?;

        let status_output = Cmd::new("git")
            .workdir(&worktree_path)
            .args(&["status", "--porcelain"])
            .run_and_capture_stdout()
            .context("failed to check worktree status")?;
        if !status_output.is_empty() {
            return Err(CrewError::UncommittedChanges.into());
        }

        let merge_head = worktree_path.join(".git").join("MERGE_HEAD");
        if merge_head.exists() {
            return Err(CrewError::MergeConflict.into());
        }

        if !gate_command.is_empty() {
            let status = std::process::Command::new("sh")
                .arg("-c")
                .arg(gate_command)
                .current_dir(&worktree_path)
                .status()
                .context("failed to run completion gate command")?;
            if !status.success() {
                return Err(anyhow!(
                    "completion gate command exited with status {:?}",
                    status.code()
                ));
            }
        }

        task.status = Status::ForReview;
        self.store.save(task)?;
        Ok(())
    }

    /// Valid from any non-terminal status. Stops the session and removes the
    /// worktree on a best-effort basis (failures there never block the
    /// status transition), then marks the task `closed`.
    pub fn close(&self, task: &mut Task, reason: CloseReason) -> Result<()> {
        if !task.status.can_transition_to(Status::Closed) {
            return Err(CrewError::InvalidTransition {
                from: format!("{:?}", task.status),
                to: "closed".to_string(),
            }
            .into());
        }

        if !task.session.is_empty() {
            let _ = self.sessions.stop(&task.session);
        }
        let branch = naming::branch_name(task.id, task.issue);
        let _ = self.worktrees.remove(&branch);

        task.session = String::new();
        task.status = Status::Closed;
        task.close_reason = reason;
        self.store.save(task)?;
        Ok(())
    }
}

fn worktree_setup_already_done(worktrees: &WorktreeCoordinator, handle: &str) -> bool {
    worktrees
        .get_worktree_meta(handle, "setup_done")
        .as_deref()
        == Some("1")
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentSpec;
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-q", "-b", "main"],
            vec!["config", "user.email", "t@example.com"],
            vec!["config", "user.name", "t"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README"), "hello").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "init"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    fn echo_agent() -> AgentSpec {
        AgentSpec {
            command: "true".to_string(),
            command_template: "{{.Command}}".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn start_rejects_a_task_that_cannot_start() {
        let repo = init_repo();
        let git_dir = repo.path().join(".git");
        let orch = Orchestrator::new(repo.path(), &git_dir, "crew");
        orch.store.initialize().unwrap();

        let mut task = Task::new(1, "crew", "x", 0);
        task.status = Status::InProgress;

        let mut agents = BTreeMap::new();
        agents.insert("echo".to_string(), echo_agent());
        let cfg = StartConfig {
            agents: &agents,
            default_system_prompt: "",
            default_prompt: "",
            base_branch: "main",
            worktree_setup: &WorktreeSetupConfig::default(),
            disabled_agents: &[],
            flags: BTreeMap::new(),
        };

        let err = orch.start(&mut task, "echo", &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrewError>(),
            Some(CrewError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn start_with_unknown_agent_fails() {
        let repo = init_repo();
        let git_dir = repo.path().join(".git");
        let orch = Orchestrator::new(repo.path(), &git_dir, "crew");
        orch.store.initialize().unwrap();

        let mut task = Task::new(1, "crew", "x", 0);
        let agents = BTreeMap::new();
        let cfg = StartConfig {
            agents: &agents,
            default_system_prompt: "",
            default_prompt: "",
            base_branch: "main",
            worktree_setup: &WorktreeSetupConfig::default(),
            disabled_agents: &[],
            flags: BTreeMap::new(),
        };

        let err = orch.start(&mut task, "ghost", &cfg).unwrap_err();
        assert!(matches!(err.downcast_ref::<CrewError>(), Some(CrewError::NoAgent)));
    }

    #[test]
    fn start_with_disabled_agent_fails() {
        let repo = init_repo();
        let git_dir = repo.path().join(".git");
        let orch = Orchestrator::new(repo.path(), &git_dir, "crew");
        orch.store.initialize().unwrap();

        let mut task = Task::new(1, "crew", "x", 0);
        let mut agents = BTreeMap::new();
        agents.insert("echo".to_string(), echo_agent());
        let disabled_agents = vec!["echo".to_string()];
        let cfg = StartConfig {
            agents: &agents,
            default_system_prompt: "",
            default_prompt: "",
            base_branch: "main",
            worktree_setup: &WorktreeSetupConfig::default(),
            disabled_agents: &disabled_agents,
            flags: BTreeMap::new(),
        };

        let err = orch.start(&mut task, "echo", &cfg).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrewError>(),
            Some(CrewError::AgentDisabled(name)) if name == "echo"
        ));
    }

    #[test]
    fn close_is_valid_from_todo_and_stops_nothing() {
        let repo = init_repo();
        let git_dir = repo.path().join(".git");
        let orch = Orchestrator::new(repo.path(), &git_dir, "crew");
        orch.store.initialize().unwrap();

        let mut task = Task::new(1, "crew", "x", 0);
        orch.close(&mut task, CloseReason::Abandoned).unwrap();
        assert_eq!(task.status, Status::Closed);
        assert_eq!(task.close_reason, CloseReason::Abandoned);
    }

    #[test]
    fn complete_rejects_dirty_worktree() {
        let repo = init_repo();
        let git_dir = repo.path().join(".git");
        let orch = Orchestrator::new(repo.path(), &git_dir, "crew");
        orch.store.initialize().unwrap();

        let mut task = Task::new(1, "crew", "x", 0);
        task.status = Status::InProgress;
        let branch = naming::branch_name(task.id, task.issue);
        let worktree_path = orch.worktrees.create(task.id, &branch, "main").unwrap();
        std::fs::write(worktree_path.join("dirty.txt"), "x").unwrap();

        let err = orch.complete(&mut task, "").unwrap_err();
        assert!(matches!(
            err.downcast_ref::<CrewError>(),
            Some(CrewError::UncommittedChanges)
        ));
    }

    #[test]
    fn reconcile_errors_tasks_whose_session_died() {
        let repo = init_repo();
        let git_dir = repo.path().join(".git");
        let orch = Orchestrator::new(repo.path(), &git_dir, "crew");
        orch.store.initialize().unwrap();

        let mut task = Task::new(1, "crew", "x", 0);
        task.status = Status::InProgress;
        task.session = "crew-1".to_string();
        orch.store.save(&task).unwrap();

        let transitioned = orch.reconcile().unwrap();
        assert_eq!(transitioned, vec![1]);
        let reloaded = orch.store.get(1).unwrap().unwrap();
        assert_eq!(reloaded.status, Status::Error);
    }
}
