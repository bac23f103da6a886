//! Derives every well-known name and on-disk path from `(crewDir, taskID, …)`.
//!
//! Pure functions, no I/O. Every other component composes these rather than
//! formatting paths itself.

use std::path::{Path, PathBuf};

/// Branch name for a task. Tasks opened against a GitHub issue embed the
/// issue number so the branch is self-describing at the git boundary.
pub fn branch_name(id: u64, issue: i64) -> String {
    if issue > 0 {
        format!("crew-{}-gh-{}", id, issue)
    } else {
        format!("crew-{}", id)
    }
}

/// Inverse of [`branch_name`]. Returns `(0, false)` for anything that isn't a
/// well-formed `crew-<id>` or `crew-<id>-gh-<issue>` branch.
pub fn parse_branch_task_id(branch: &str) -> (u64, bool) {
    let Some(rest) = branch.strip_prefix("crew-") else {
        return (0, false);
    };

    let id_part = match rest.split_once("-gh-") {
        Some((id, issue)) => {
            if issue.is_empty() || !issue.chars().all(|c| c.is_ascii_digit()) {
                return (0, false);
            }
            id
        }
        None => rest,
    };

    if id_part.is_empty() || !id_part.chars().all(|c| c.is_ascii_digit()) {
        return (0, false);
    }

    match id_part.parse::<u64>() {
        Ok(id) if id >= 1 => (id, true),
        _ => (0, false),
    }
}

/// Session name for a task. `review` requests the `-review` variant used
/// while a reviewer is attached alongside the primary agent session.
pub fn session_name(id: u64, review: bool) -> String {
    if review {
        format!("crew-{}-review", id)
    } else {
        format!("crew-{}", id)
    }
}

/// The single fixed session name for the manager/dashboard process.
pub fn manager_session_name() -> &'static str {
    "crew-manager"
}

/// Lowercases and collapses a raw namespace candidate into a safe ref
/// component: letters/digits survive, everything else collapses into a
/// single `-`, and leading/trailing `-` is trimmed.
pub fn sanitize_namespace(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_dash = false;
    for ch in raw.chars() {
        if ch.is_ascii_alphanumeric() {
            out.push(ch.to_ascii_lowercase());
            last_was_dash = false;
        } else if !last_was_dash && !out.is_empty() {
            out.push('-');
            last_was_dash = true;
        }
    }
    while out.ends_with('-') {
        out.pop();
    }
    out
}

/// Derives a namespace from an email-like identifier, e.g. `a.b@host` → `a-b`.
pub fn namespace_from_email(email: &str) -> String {
    let local = email.split('@').next().unwrap_or("");
    sanitize_namespace(local)
}

/// Root of the private on-disk layout, `<repoRoot>/.git/crew`.
pub fn crew_dir(git_dir: &Path) -> PathBuf {
    git_dir.join("crew")
}

pub fn scripts_dir(crew_dir: &Path) -> PathBuf {
    crew_dir.join("scripts")
}

pub fn logs_dir(crew_dir: &Path) -> PathBuf {
    crew_dir.join("logs")
}

pub fn worktrees_dir(crew_dir: &Path) -> PathBuf {
    crew_dir.join("worktrees")
}

pub fn worktree_path(crew_dir: &Path, id: u64) -> PathBuf {
    worktrees_dir(crew_dir).join(id.to_string())
}

pub fn tasks_dir(crew_dir: &Path) -> PathBuf {
    crew_dir.join("tasks")
}

pub fn tmux_socket_path(crew_dir: &Path) -> PathBuf {
    crew_dir.join("tmux.sock")
}

pub fn tmux_conf_path(crew_dir: &Path) -> PathBuf {
    crew_dir.join("tmux.conf")
}

pub fn acp_dir(crew_dir: &Path, namespace: &str, id: u64) -> PathBuf {
    crew_dir.join("acp").join(namespace).join(id.to_string())
}

pub fn task_script_path(crew_dir: &Path, id: u64) -> PathBuf {
    scripts_dir(crew_dir).join(format!("task-{}.sh", id))
}

pub fn task_prompt_path(crew_dir: &Path, id: u64) -> PathBuf {
    scripts_dir(crew_dir).join(format!("task-{}-prompt.txt", id))
}

pub fn manager_script_path(crew_dir: &Path) -> PathBuf {
    scripts_dir(crew_dir).join("manager.sh")
}

pub fn session_log_path(crew_dir: &Path, session: &str) -> PathBuf {
    logs_dir(crew_dir).join(format!("{}.log", session))
}

pub fn task_log_path(crew_dir: &Path, id: u64) -> PathBuf {
    logs_dir(crew_dir).join(format!("task-{}.log", id))
}

pub const DEFAULT_NAMESPACE: &str = "crew";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn branch_name_without_issue() {
        assert_eq!(branch_name(42, 0), "crew-42");
        assert_eq!(branch_name(42, -1), "crew-42");
    }

    #[test]
    fn branch_name_with_issue() {
        assert_eq!(branch_name(42, 7), "crew-42-gh-7");
    }

    #[test]
    fn parse_branch_task_id_roundtrips() {
        for (id, issue) in [(1u64, 0i64), (42, 7), (1000, 99999)] {
            let branch = branch_name(id, issue);
            assert_eq!(parse_branch_task_id(&branch), (id, true));
        }
    }

    #[test]
    fn parse_branch_task_id_rejects_garbage() {
        assert_eq!(parse_branch_task_id("main"), (0, false));
        assert_eq!(parse_branch_task_id("crew-"), (0, false));
        assert_eq!(parse_branch_task_id("crew-abc"), (0, false));
        assert_eq!(parse_branch_task_id("crew-0"), (0, false));
        assert_eq!(parse_branch_task_id("crew-1-gh-"), (0, false));
        assert_eq!(parse_branch_task_id("crew-1-gh-x"), (0, false));
    }

    #[test]
    fn sanitize_namespace_collapses_and_trims() {
        assert_eq!(sanitize_namespace("Hello, World!"), "hello-world");
        assert_eq!(sanitize_namespace("  leading"), "leading");
        assert_eq!(sanitize_namespace("trailing___"), "trailing");
        assert_eq!(sanitize_namespace(""), "");
        assert_eq!(sanitize_namespace("___"), "");
    }

    #[test]
    fn namespace_from_email_examples() {
        assert_eq!(namespace_from_email("a.b@host"), "a-b");
        assert_eq!(namespace_from_email(""), "");
    }

    #[test]
    fn session_name_variants() {
        assert_eq!(session_name(3, false), "crew-3");
        assert_eq!(session_name(3, true), "crew-3-review");
    }
}
