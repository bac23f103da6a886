//! Session coordinator (C7): detached terminal-multiplexer sessions, one per
//! task. Uses `tmux` directly through the `Cmd` shell-out builder the same
//! way `src/multiplexer/tmux.rs` does, scoped down to the narrower contract
//! this system needs: start/stop/attach/peek/send/isRunning/getPaneProcesses.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use anyhow::{Context, Result, anyhow};

use crate::cmd::Cmd;
use crate::error::CrewError;
use crate::naming;

#[derive(Debug, Clone)]
pub struct StartOptions<'a> {
    pub name: &'a str,
    pub dir: &'a Path,
    pub command: &'a str,
    pub task_title: &'a str,
    pub task_agent: &'a str,
    pub task_id: u64,
}

#[derive(Debug, Clone)]
pub struct PaneProcess {
    pub pid: u32,
    pub ppid: u32,
    pub state: String,
    pub command: String,
}

pub struct SessionCoordinator {
    crew_dir: PathBuf,
    socket: PathBuf,
}

impl SessionCoordinator {
    pub fn new(crew_dir: impl Into<PathBuf>) -> Self {
        let crew_dir = crew_dir.into();
        let socket = naming::tmux_socket_path(&crew_dir);
        Self { crew_dir, socket }
    }

    fn tmux(&self) -> Cmd<'_> {
        Cmd::new("tmux").args(&["-S"]).arg(
            self.socket
                .to_str()
                .expect("crew socket path is valid utf-8"),
        )
    }

    pub fn is_running(&self, name: &str) -> Result<bool> {
        self.tmux()
            .args(&["has-session", "-t", name])
            .run_as_check()
    }

    /// Starts a new detached session. Fails with `ErrSessionRunning` if a
    /// session of the same name already exists.
    pub fn start(&self, opts: &StartOptions) -> Result<()> {
        if self.is_running(opts.name)? {
            return Err(CrewError::SessionRunning(opts.name.to_string()).into());
        }

        let log_path = naming::session_log_path(&self.crew_dir, opts.name);
        if let Some(parent) = log_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create logs directory")?;
        }

        let dir_str = opts
            .dir
            .to_str()
            .ok_or_else(|| anyhow!("invalid worktree path"))?;

        self.tmux()
            .args(&[
                "new-session",
                "-d",
                "-s",
                opts.name,
                "-c",
                dir_str,
                opts.command,
            ])
            .run()
            .with_context(|| format!("failed to start session {}", opts.name))?;

        tracing::info!(
            session = opts.name,
            task_id = opts.task_id,
            agent = opts.task_agent,
            title = opts.task_title,
            "session started"
        );

        Ok(())
    }

    /// Terminates the session. Absent sessions are a no-op.
    pub fn stop(&self, name: &str) -> Result<()> {
        if !self.is_running(name)? {
            return Ok(());
        }
        self.tmux()
            .args(&["kill-session", "-t", name])
            .run()
            .with_context(|| format!("failed to stop session {}", name))?;
        Ok(())
    }

    /// Connects the calling terminal to the session. Replaces the current
    /// process image, mirroring an interactive `tmux attach`.
    pub fn attach(&self, name: &str) -> Result<()> {
        if !self.is_running(name)? {
            return Err(CrewError::NoSession(name.to_string()).into());
        }
        let status = std::process::Command::new("tmux")
            .args(["-S"])
            .arg(&self.socket)
            .args(["attach-session", "-t", name])
            .status()
            .context("failed to attach to session")?;
        if !status.success() {
            return Err(anyhow!("tmux attach-session exited with {:?}", status.code()));
        }
        Ok(())
    }

    /// Captures the last `lines` of pane output. When `escape` is true, ANSI
    /// control sequences are preserved verbatim; otherwise they are stripped.
    pub fn peek(&self, name: &str, lines: u16, escape: bool) -> Result<String> {
        let start = format!("-{}", lines);
        let mut cmd = self.tmux().args(&["capture-pane", "-p"]);
        if escape {
            cmd = cmd.arg("-e");
        }
        let output = cmd
            .args(&["-S", &start, "-t", name])
            .run_and_capture_stdout()
            .with_context(|| format!("failed to peek session {}", name))?;
        Ok(output)
    }

    /// Injects `keys` into the session's input stream. A bare text send does
    /// not imply a newline; callers must send `"Enter"` explicitly via
    /// [`SessionCoordinator::send_enter`] when one is wanted.
    pub fn send(&self, name: &str, keys: &str) -> Result<()> {
        self.tmux()
            .args(&["send-keys", "-t", name, "-l", keys])
            .run()
            .with_context(|| format!("failed to send keys to session {}", name))?;
        Ok(())
    }

    pub fn send_enter(&self, name: &str) -> Result<()> {
        self.tmux()
            .args(&["send-keys", "-t", name, "Enter"])
            .run()
            .with_context(|| format!("failed to send Enter to session {}", name))?;
        Ok(())
    }

    /// Returns `{pid, ppid, state, command}` for every process attached to
    /// the session, via `ps` against the tmux pane's shell PID tree.
    pub fn get_pane_processes(&self, name: &str) -> Result<Vec<PaneProcess>> {
        let pane_pid = self
            .tmux()
            .args(&["list-panes", "-t", name, "-F", "#{pane_pid}"])
            .run_and_capture_stdout()
            .with_context(|| format!("failed to list panes for session {}", name))?;

        let mut processes = Vec::new();
        for pid_line in pane_pid.lines() {
            let Ok(root_pid) = pid_line.trim().parse::<u32>() else {
                continue;
            };
            processes.extend(descendant_processes(root_pid)?);
        }
        Ok(processes)
    }
}

/// Walks `ps` output to find every process whose pid or ancestry chain
/// passes through `root_pid`.
fn descendant_processes(root_pid: u32) -> Result<Vec<PaneProcess>> {
    let output = std::process::Command::new("ps")
        .args(["-eo", "pid,ppid,stat,comm"])
        .stdout(Stdio::piped())
        .output()
        .context("failed to run ps")?;
    let text = String::from_utf8_lossy(&output.stdout);

    let mut all = Vec::new();
    for line in text.lines().skip(1) {
        let mut fields = line.split_whitespace();
        let (Some(pid), Some(ppid), Some(state), Some(command)) =
            (fields.next(), fields.next(), fields.next(), fields.next())
        else {
            continue;
        };
        let (Ok(pid), Ok(ppid)) = (pid.parse::<u32>(), ppid.parse::<u32>()) else {
            continue;
        };
        all.push(PaneProcess {
            pid,
            ppid,
            state: state.to_string(),
            command: command.to_string(),
        });
    }

    let mut result = Vec::new();
    let mut frontier = vec![root_pid];
    while let Some(pid) = frontier.pop() {
        if let Some(proc) = all.iter().find(|p| p.pid == pid) {
            result.push(proc.clone());
        }
        for child in all.iter().filter(|p| p.ppid == pid) {
            frontier.push(child.pid);
        }
    }
    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tmux_socket_path_is_derived_from_crew_dir() {
        let coord = SessionCoordinator::new("/repo/.git/crew");
        assert_eq!(coord.socket, PathBuf::from("/repo/.git/crew/tmux.sock"));
    }
}
