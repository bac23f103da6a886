//! On-disk layout helpers and the handful of environment-facing utilities
//! that don't belong to any single component: executable resolution on
//! PATH and the agent-disable pattern list, both carried over from
//! `src/config.rs`'s equivalents.

use std::env;
use std::path::{Path, PathBuf};

use which::{which, which_in};

use crate::cmd;
use crate::naming;

pub const DEFAULT_NAMESPACE: &str = "crew";

/// Resolves the repository's `.git` directory for the current worktree or
/// main checkout. Delegates to `git rev-parse --git-common-dir` so linked
/// worktrees all agree on one shared `.git/crew` root.
pub fn git_common_dir(start_dir: &Path) -> anyhow::Result<PathBuf> {
    let out = cmd::Cmd::new("git")
        .workdir(start_dir)
        .args(&["rev-parse", "--git-common-dir"])
        .run_and_capture_stdout()?;
    let path = PathBuf::from(out);
    if path.is_absolute() {
        Ok(path)
    } else {
        Ok(start_dir.join(path))
    }
}

pub fn crew_dir_for(start_dir: &Path) -> anyhow::Result<PathBuf> {
    Ok(naming::crew_dir(&git_common_dir(start_dir)?))
}

/// Resolves an executable name or path to its full absolute path. For plain
/// names, searches tmux's global PATH first (since sessions run inside
/// tmux's environment), then the current shell's PATH.
pub fn resolve_executable_path(executable: &str) -> Option<String> {
    let exec_path = Path::new(executable);

    if exec_path.is_absolute() {
        return Some(exec_path.to_string_lossy().into_owned());
    }

    if executable.contains(std::path::MAIN_SEPARATOR) || executable.contains('/') {
        if let Ok(current_dir) = env::current_dir() {
            return Some(current_dir.join(exec_path).to_string_lossy().into_owned());
        }
        return None;
    }

    if let Some(tmux_path) = tmux_global_path() {
        let cwd = env::current_dir().unwrap_or_else(|_| PathBuf::from("."));
        if let Ok(found) = which_in(executable, Some(tmux_path.as_str()), &cwd) {
            return Some(found.to_string_lossy().into_owned());
        }
    }

    which(executable).ok().map(|p| p.to_string_lossy().into_owned())
}

pub fn tmux_global_path() -> Option<String> {
    let output = cmd::Cmd::new("tmux")
        .args(&["show-environment", "-g", "PATH"])
        .run_and_capture_stdout()
        .ok()?;
    output.strip_prefix("PATH=").map(|s| s.to_string())
}

pub fn split_first_token(command: &str) -> Option<(&str, &str)> {
    let trimmed = command.trim_start();
    if trimmed.is_empty() {
        return None;
    }
    Some(
        trimmed
            .split_once(char::is_whitespace)
            .unwrap_or((trimmed, "")),
    )
}

#[cfg(test)]
mod tests {
    use super::split_first_token;

    #[test]
    fn split_first_token_single_word() {
        assert_eq!(split_first_token("claude"), Some(("claude", "")));
    }

    #[test]
    fn split_first_token_with_args() {
        assert_eq!(
            split_first_token("claude --verbose"),
            Some(("claude", "--verbose"))
        );
    }

    #[test]
    fn split_first_token_empty_string() {
        assert_eq!(split_first_token(""), None);
    }

    #[test]
    fn split_first_token_only_whitespace() {
        assert_eq!(split_first_token("   "), None);
    }

    #[test]
    fn split_first_token_multiple_spaces() {
        assert_eq!(
            split_first_token("claude  --verbose"),
            Some(("claude", " --verbose"))
        );
    }

    #[test]
    fn split_first_token_leading_whitespace() {
        assert_eq!(
            split_first_token("  claude --verbose"),
            Some(("claude", "--verbose"))
        );
    }
}
