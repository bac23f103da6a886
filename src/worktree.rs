//! Worktree coordinator (C6): one worktree per task branch, materialized
//! via `git worktree` plumbing rather than a library, in the same style as
//! `src/git/worktree.rs`'s `Cmd`-based helpers.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};

use crate::agent::CommandData;
use crate::cmd::Cmd;
use crate::error::CrewError;
use crate::naming;
use crate::template;

/// What `setupWorktree` should do to a freshly created worktree.
#[derive(Debug, Clone, Default)]
pub struct WorktreeSetupConfig {
    /// Relative paths to copy from the main repo root, preserving structure.
    pub copy: Vec<String>,
    /// Shell command expanded against `CommandData` and run in the worktree.
    pub setup_command: String,
    /// Patterns appended to the worktree's local git-ignore exclude file.
    pub exclude_patterns: Vec<String>,
}

pub struct WorktreeCoordinator {
    repo_root: PathBuf,
    crew_dir: PathBuf,
}

impl WorktreeCoordinator {
    pub fn new(repo_root: impl Into<PathBuf>, crew_dir: impl Into<PathBuf>) -> Self {
        Self {
            repo_root: repo_root.into(),
            crew_dir: crew_dir.into(),
        }
    }

    fn git(&self) -> Cmd<'_> {
        Cmd::new("git").workdir(&self.repo_root)
    }

    fn parse_porcelain(output: &str) -> Vec<(PathBuf, String)> {
        let mut worktrees = Vec::new();
        for block in output.trim().split("\n\n") {
            let mut path: Option<PathBuf> = None;
            let mut branch: Option<String> = None;
            for line in block.lines() {
                if let Some(p) = line.strip_prefix("worktree ") {
                    path = Some(PathBuf::from(p));
                } else if let Some(b) = line.strip_prefix("branch refs/heads/") {
                    branch = Some(b.to_string());
                } else if line.trim() == "detached" {
                    branch = Some("(detached)".to_string());
                }
            }
            if let (Some(p), Some(b)) = (path, branch) {
                worktrees.push((p, b));
            }
        }
        worktrees
    }

    fn list_porcelain(&self) -> Result<Vec<(PathBuf, String)>> {
        let output = self
            .git()
            .args(&["worktree", "list", "--porcelain"])
            .run_and_capture_stdout()
            .context("failed to list worktrees")?;
        Ok(Self::parse_porcelain(&output))
    }

    pub fn exists(&self, branch: &str) -> Result<bool> {
        Ok(self
            .list_porcelain()?
            .iter()
            .any(|(_, b)| b == branch))
    }

    pub fn resolve(&self, branch: &str) -> Result<PathBuf> {
        self.list_porcelain()?
            .into_iter()
            .find(|(_, b)| b == branch)
            .map(|(p, _)| p)
            .ok_or_else(|| CrewError::WorktreeNotFound(branch.to_string()).into())
    }

    /// Creates a worktree at `worktrees/<id>`, creating `branch` from
    /// `base_branch` if it does not already exist. Fails if a worktree for
    /// `branch` already exists.
    pub fn create(&self, id: u64, branch: &str, base_branch: &str) -> Result<PathBuf> {
        if self.exists(branch)? {
            return Err(anyhow!("worktree for branch {} already exists", branch));
        }

        let path = naming::worktree_path(&self.crew_dir, id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create worktrees directory")?;
        }

        let path_str = path
            .to_str()
            .ok_or_else(|| anyhow!("invalid worktree path"))?;

        let branch_exists = self
            .git()
            .args(&["rev-parse", "--verify", "--quiet", branch])
            .run_as_check()
            .unwrap_or(false);

        let mut cmd = self.git().arg("worktree").arg("add");
        if branch_exists {
            cmd = cmd.arg(path_str).arg(branch);
        } else {
            cmd = cmd.arg("-b").arg(branch).arg(path_str).arg(base_branch);
        }
        cmd.run().context("failed to create worktree")?;

        Ok(path)
    }

    /// Copies `cfg.copy` entries, runs `cfg.setup_command`, and appends
    /// exclude patterns. Callers should `remove(branch)` on any failure so a
    /// partially set up worktree is never left registered.
    pub fn setup_worktree(&self, path: &Path, data: &CommandData, cfg: &WorktreeSetupConfig) -> Result<()> {
        for rel in &cfg.copy {
            let src = self.repo_root.join(rel);
            if !src.exists() {
                continue;
            }
            let dst = path.join(rel);
            if let Some(parent) = dst.parent() {
                fs::create_dir_all(parent)
                    .with_context(|| format!("failed to create {}", parent.display()))?;
            }
            copy_recursive(&src, &dst)
                .with_context(|| format!("failed to copy {} into worktree", rel))?;
        }

        if !cfg.setup_command.is_empty() {
            let scope = template::TemplateScope::from(data);
            let expanded = template::expand(&cfg.setup_command, &scope)?;
            let status = std::process::Command::new("sh")
                .arg("-c")
                .arg(&expanded)
                .current_dir(path)
                .status()
                .context("failed to run worktree setup command")?;
            if !status.success() {
                return Err(anyhow!(
                    "worktree setup command exited with status {:?}",
                    status.code()
                ));
            }
        }

        if !cfg.exclude_patterns.is_empty() {
            let exclude_path = path.join(".git").join("info").join("exclude");
            if let Some(parent) = exclude_path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut contents = fs::read_to_string(&exclude_path).unwrap_or_default();
            if !contents.ends_with('\n') && !contents.is_empty() {
                contents.push('\n');
            }
            for pattern in &cfg.exclude_patterns {
                contents.push_str(pattern);
                contents.push('\n');
            }
            fs::write(&exclude_path, contents).context("failed to update exclude file")?;
        }

        Ok(())
    }

    /// Best-effort; absent worktrees succeed.
    pub fn remove(&self, branch: &str) -> Result<()> {
        if let Ok(path) = self.resolve(branch) {
            let _ = self
                .git()
                .args(&["worktree", "remove", "--force"])
                .arg(path.to_str().unwrap_or_default())
                .run();
        }
        let _ = self.git().args(&["worktree", "prune"]).run();
        self.remove_worktree_meta(branch);
        Ok(())
    }

    pub fn list(&self) -> Result<Vec<(PathBuf, String)>> {
        self.list_porcelain()
    }

    pub fn set_worktree_meta(&self, handle: &str, key: &str, value: &str) -> Result<()> {
        self.git()
            .args(&[
                "config",
                "--local",
                &format!("crew.worktree.{}.{}", handle, key),
                value,
            ])
            .run()
            .with_context(|| format!("failed to set worktree metadata {}.{}", handle, key))?;
        Ok(())
    }

    pub fn get_worktree_meta(&self, handle: &str, key: &str) -> Option<String> {
        self.git()
            .args(&[
                "config",
                "--local",
                "--get",
                &format!("crew.worktree.{}.{}", handle, key),
            ])
            .run_and_capture_stdout()
            .ok()
            .filter(|s| !s.is_empty())
    }

    fn remove_worktree_meta(&self, handle: &str) {
        let _ = self
            .git()
            .args(&[
                "config",
                "--local",
                "--remove-section",
                &format!("crew.worktree.{}", handle),
            ])
            .run();
    }
}

fn copy_recursive(src: &Path, dst: &Path) -> Result<()> {
    if src.is_dir() {
        fs::create_dir_all(dst)?;
        for entry in fs::read_dir(src)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &dst.join(entry.file_name()))?;
        }
    } else {
        fs::copy(src, dst)?;
    }
    Ok(())
}
