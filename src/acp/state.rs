//! Strict-JSON execution-state store: one `state.json` per
//! `(namespace, taskID)`, last-writer-wins, written atomically via
//! temp-file-then-rename (the same pattern `src/cmd.rs` callers rely on for
//! every other durable write in this crate).

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::error::CrewError;
use super::ACPExecutionState;

pub struct StateStore {
    root: PathBuf,
}

impl StateStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve_namespace(namespace: &str) -> &str {
        if namespace.is_empty() { "default" } else { namespace }
    }

    fn state_path(&self, namespace: &str, task_id: u64) -> PathBuf {
        self.root
            .join(Self::resolve_namespace(namespace))
            .join(task_id.to_string())
            .join("state.json")
    }

    pub fn load(&self, namespace: &str, task_id: u64) -> Result<ACPExecutionState> {
        let namespace = Self::resolve_namespace(namespace);
        let path = self.state_path(namespace, task_id);
        let bytes = match fs::read(&path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CrewError::ACPStateNotFound {
                    namespace: namespace.to_string(),
                    task_id,
                }
                .into());
            }
            Err(e) => return Err(e).context("failed to read ACP state"),
        };

        let mut deserializer = serde_json::Deserializer::from_slice(&bytes);
        let state = ACPExecutionState::deserialize(&mut deserializer).map_err(|_| {
            CrewError::InvalidACPExecutionSubstate(String::from_utf8_lossy(&bytes).into_owned())
        })?;
        deserializer
            .end()
            .map_err(|_| CrewError::InvalidACPExecutionSubstate("trailing content".to_string()))?;

        Ok(state)
    }

    pub fn save(&self, namespace: &str, task_id: u64, state: &ACPExecutionState) -> Result<()> {
        let namespace = Self::resolve_namespace(namespace);
        let path = self.state_path(namespace, task_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("failed to create ACP state directory")?;
        }

        let body = serde_json::to_vec(state).context("failed to serialize ACP state")?;
        let tmp = tmp_path(&path);
        fs::write(&tmp, &body).with_context(|| format!("failed to write {}", tmp.display()))?;
        fs::rename(&tmp, &path)
            .with_context(|| format!("failed to rename into {}", path.display()))?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let file_name = path
        .file_name()
        .map(|n| format!(".tmp-{}", n.to_string_lossy()))
        .unwrap_or_else(|| ".tmp-state.json".to_string());
    path.with_file_name(file_name)
}
