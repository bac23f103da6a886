//! Durable file-backed command queue: one file per command under
//! `<acpDir>/commands/`, atomic write-temp-then-rename, lexicographic
//! ordering by filename.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};

use crate::error::CrewError;
use super::{ACPCommand, ACPCommandType};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Cooperative cancellation handle threaded through blocking calls, per
/// §5's "explicit context carried on all long-running or blocking calls".
#[derive(Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

pub struct CommandQueue {
    dir: PathBuf,
    poll_interval: Duration,
}

impl CommandQueue {
    pub fn new(acp_dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: acp_dir.into().join("commands"),
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    fn failed_dir(&self) -> PathBuf {
        self.dir.join("failed")
    }

    pub fn send(&self, mut cmd: ACPCommand) -> Result<()> {
        validate(&cmd)?;

        if cmd.id.is_empty() {
            cmd.id = generate_id()?;
        }
        if cmd.created_at == 0 {
            cmd.created_at = now_nanos()?;
        }

        fs::create_dir_all(&self.dir).context("failed to create commands directory")?;

        let body = serde_json::to_vec(&cmd).context("failed to serialize command")?;
        let tmp_path = self.dir.join(format!(".tmp-{}", cmd.id));
        let final_path = self.dir.join(format!("{}.json", cmd.id));

        fs::write(&tmp_path, &body)
            .with_context(|| format!("failed to write {}", tmp_path.display()))?;
        fs::rename(&tmp_path, &final_path)
            .with_context(|| format!("failed to rename into {}", final_path.display()))?;

        Ok(())
    }

    /// Blocks until a command is available or `token` is cancelled.
    pub fn next(&self, token: &CancelToken) -> Result<Option<ACPCommand>> {
        loop {
            if token.is_cancelled() {
                return Ok(None);
            }

            fs::create_dir_all(&self.dir).context("failed to create commands directory")?;

            let mut entries: Vec<PathBuf> = fs::read_dir(&self.dir)
                .context("failed to read commands directory")?
                .filter_map(|e| e.ok())
                .map(|e| e.path())
                .filter(|p| {
                    p.file_name()
                        .and_then(|n| n.to_str())
                        .map(|n| n.ends_with(".json") && !n.starts_with('.'))
                        .unwrap_or(false)
                })
                .collect();
            entries.sort();

            for path in entries {
                match self.try_consume(&path) {
                    Ok(Some(cmd)) => return Ok(Some(cmd)),
                    Ok(None) => continue,
                    Err(_) => continue,
                }
            }

            if token.is_cancelled() {
                return Ok(None);
            }
            std::thread::sleep(self.poll_interval);
        }
    }

    fn try_consume(&self, path: &Path) -> Result<Option<ACPCommand>> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(_) => return Ok(None),
        };

        let parsed: Result<ACPCommand> = serde_json::from_slice(&bytes)
            .context("decode failure")
            .and_then(|cmd: ACPCommand| {
                validate(&cmd)?;
                Ok(cmd)
            });

        match parsed {
            Ok(cmd) => {
                let _ = fs::remove_file(path);
                Ok(Some(cmd))
            }
            Err(_) => {
                self.quarantine(path);
                Ok(None)
            }
        }
    }

    fn quarantine(&self, path: &Path) {
        if fs::create_dir_all(self.failed_dir()).is_ok()
            && let Some(name) = path.file_name()
        {
            let target = self.failed_dir().join(name);
            if fs::rename(path, &target).is_ok() {
                return;
            }
        }
        let bad_path = path.with_extension("json.bad");
        let _ = fs::rename(path, bad_path);
    }
}

fn validate(cmd: &ACPCommand) -> Result<()> {
    match cmd.kind {
        ACPCommandType::Prompt => {
            if cmd.text.as_deref().unwrap_or("").is_empty() {
                return Err(CrewError::InvalidACPCommand("prompt requires non-empty text".into()).into());
            }
        }
        ACPCommandType::Permission => {
            if cmd.option_id.as_deref().unwrap_or("").is_empty() {
                return Err(
                    CrewError::InvalidACPCommand("permission requires non-empty option_id".into())
                        .into(),
                );
            }
        }
        ACPCommandType::Cancel | ACPCommandType::Stop => {}
    }
    Ok(())
}

fn now_nanos() -> Result<i64> {
    Ok(SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .context("system clock before epoch")?
        .as_nanos() as i64)
}

fn generate_id() -> Result<String> {
    let nanos = now_nanos()?;
    let mut buf = [0u8; 4];
    getrandom::fill(&mut buf).context("failed to generate random bytes")?;
    Ok(format!("{:020}-{}", nanos, hex_encode(&buf)))
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn send_then_next_round_trips_and_empties_the_directory() {
        let dir = TempDir::new().unwrap();
        let queue = CommandQueue::new(dir.path());

        queue
            .send(ACPCommand {
                id: String::new(),
                kind: ACPCommandType::Prompt,
                text: Some("hello".into()),
                option_id: None,
                created_at: 0,
            })
            .unwrap();
        queue
            .send(ACPCommand {
                id: String::new(),
                kind: ACPCommandType::Stop,
                text: None,
                option_id: None,
                created_at: 0,
            })
            .unwrap();

        let token = CancelToken::new();
        let first = queue.next(&token).unwrap().unwrap();
        assert_eq!(first.kind, ACPCommandType::Prompt);
        let second = queue.next(&token).unwrap().unwrap();
        assert_eq!(second.kind, ACPCommandType::Stop);

        assert!(first.id < second.id);
        assert_eq!(fs::read_dir(dir.path().join("commands")).unwrap().count(), 0);
    }

    #[test]
    fn invalid_command_is_rejected_at_send() {
        let dir = TempDir::new().unwrap();
        let queue = CommandQueue::new(dir.path());
        let err = queue
            .send(ACPCommand {
                id: String::new(),
                kind: ACPCommandType::Prompt,
                text: None,
                option_id: None,
                created_at: 0,
            })
            .unwrap_err();
        assert!(err.to_string().contains("text"));
    }

    #[test]
    fn cancelled_token_returns_none_without_a_command() {
        let dir = TempDir::new().unwrap();
        let queue = CommandQueue::new(dir.path());
        let token = CancelToken::new();
        token.cancel();
        assert!(queue.next(&token).unwrap().is_none());
    }
}
