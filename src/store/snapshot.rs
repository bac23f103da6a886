//! Point-in-time snapshots of a namespace's live task set, anchored to a
//! main-branch commit SHA (§4.4 Snapshot semantics).

use anyhow::{Context, Result};

use super::GitTaskStore;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct SnapshotRef {
    pub main_sha: String,
    pub seq: u32,
}

impl SnapshotRef {
    pub fn ref_suffix(&self) -> String {
        format!("{}_{:03}", self.main_sha, self.seq)
    }

    fn parse(suffix: &str) -> Option<Self> {
        let (sha, seq) = suffix.rsplit_once('_')?;
        let seq: u32 = seq.parse().ok()?;
        Some(SnapshotRef {
            main_sha: sha.to_string(),
            seq,
        })
    }
}

impl GitTaskStore {
    /// Builds a tree of all currently-live `tasks/*` entries and points
    /// `snapshots/<mainSHA>_<seq:03d>` at it, then updates `current`.
    pub fn save_snapshot(&self, main_sha: &str) -> Result<SnapshotRef> {
        let _guard = self.lock.lock().unwrap();

        let existing = self.list_snapshots_unlocked(Some(main_sha))?;
        let next_seq = existing.last().map(|s| s.seq + 1).unwrap_or(1);
        let snap = SnapshotRef {
            main_sha: main_sha.to_string(),
            seq: next_seq,
        };

        let task_refs = self.list_refs("tasks")?;
        let tree_sha = self.make_tree(task_refs)?;

        let snapshot_ref = self.ref_name(&format!("snapshots/{}", snap.ref_suffix()));
        self.update_ref(&snapshot_ref, &tree_sha)?;

        let current_ref = self.ref_name("current");
        self.git()
            .args(&["symbolic-ref", &current_ref, &snapshot_ref])
            .run()
            .context("failed to update current snapshot pointer")?;

        Ok(snap)
    }

    /// Replaces the live `tasks/*` refs with exactly the entries recorded in
    /// the snapshot tree, then updates `current` to point at it.
    pub fn restore_snapshot(&self, snapshot_ref: &str) -> Result<()> {
        let _guard = self.lock.lock().unwrap();

        let tree_sha = self
            .resolve_ref(snapshot_ref)?
            .ok_or_else(|| anyhow::anyhow!("snapshot ref {} not found", snapshot_ref))?;
        let entries = self.read_tree(&tree_sha)?;

        for (id, _) in self.list_refs("tasks")? {
            self.delete_ref(&self.ref_name(&format!("tasks/{}", id)))?;
        }
        for (id, blob_sha) in &entries {
            self.update_ref(&self.ref_name(&format!("tasks/{}", id)), blob_sha)?;
        }

        self.git()
            .args(&["symbolic-ref", &self.ref_name("current"), snapshot_ref])
            .run()
            .context("failed to update current snapshot pointer")?;

        Ok(())
    }

    /// Enumerates `snapshots/*`, optionally filtered to one `mainSHA`,
    /// sorted by `(sha, seq)`.
    pub fn list_snapshots(&self, main_sha: Option<&str>) -> Result<Vec<SnapshotRef>> {
        self.list_snapshots_unlocked(main_sha)
    }

    fn list_snapshots_unlocked(&self, main_sha: Option<&str>) -> Result<Vec<SnapshotRef>> {
        let refs = self.list_refs("snapshots")?;
        let mut snaps: Vec<SnapshotRef> = refs
            .into_iter()
            .filter_map(|(suffix, _)| SnapshotRef::parse(&suffix))
            .filter(|s| main_sha.is_none_or(|wanted| s.main_sha == wanted))
            .collect();
        snaps.sort();
        Ok(snaps)
    }

    fn current_snapshot_ref(&self) -> Result<Option<String>> {
        let current = self.ref_name("current");
        if self.resolve_ref(&current)?.is_none() {
            return Ok(None);
        }
        let target = self
            .git()
            .args(&["symbolic-ref", &current])
            .run_and_capture_stdout()
            .context("failed to read current snapshot pointer")?;
        Ok(Some(target))
    }

    /// If any snapshot exists for the current HEAD SHA, restores the most
    /// recent one unless `current` already points to it.
    pub fn sync_snapshot(&self) -> Result<()> {
        let head_sha = self
            .git()
            .args(&["rev-parse", "HEAD"])
            .run_and_capture_stdout()
            .context("failed to resolve HEAD")?;

        let candidates = self.list_snapshots_unlocked(Some(&head_sha))?;
        let Some(latest) = candidates.last() else {
            return Ok(());
        };
        let latest_ref = self.ref_name(&format!("snapshots/{}", latest.ref_suffix()));

        if self.current_snapshot_ref()? == Some(latest_ref.clone()) {
            return Ok(());
        }
        self.restore_snapshot(&latest_ref)
    }

    /// For each distinct `mainSHA`, deletes the oldest-by-`seq` snapshots
    /// until at most `keep` remain. Never touches the blobs referenced by
    /// live `tasks/*` refs — only the snapshot tree refs themselves.
    pub fn prune_snapshots(&self, keep: usize) -> Result<()> {
        let _guard = self.lock.lock().unwrap();
        let all = self.list_snapshots_unlocked(None)?;

        let mut by_sha: std::collections::BTreeMap<String, Vec<SnapshotRef>> =
            std::collections::BTreeMap::new();
        for snap in all {
            by_sha.entry(snap.main_sha.clone()).or_default().push(snap);
        }

        for (_, mut snaps) in by_sha {
            snaps.sort();
            if snaps.len() <= keep {
                continue;
            }
            let to_remove = snaps.len() - keep;
            for snap in &snaps[..to_remove] {
                let refname = self.ref_name(&format!("snapshots/{}", snap.ref_suffix()));
                self.delete_ref(&refname)?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::task::Task;
    use super::super::{GitTaskStore, TaskFilter};
    use std::process::Command;
    use tempfile::TempDir;

    fn init_repo() -> TempDir {
        let dir = TempDir::new().unwrap();
        for args in [
            vec!["init", "-q"],
            vec!["config", "user.email", "t@example.com"],
            vec!["config", "user.name", "t"],
        ] {
            Command::new("git").args(&args).current_dir(dir.path()).output().unwrap();
        }
        std::fs::write(dir.path().join("README"), "x").unwrap();
        Command::new("git").args(["add", "."]).current_dir(dir.path()).output().unwrap();
        Command::new("git")
            .args(["commit", "-q", "-m", "init"])
            .current_dir(dir.path())
            .output()
            .unwrap();
        dir
    }

    #[test]
    fn snapshot_save_and_restore_round_trips() {
        let dir = init_repo();
        let store = GitTaskStore::new(dir.path(), "crew");
        store.initialize().unwrap();

        let t1_id = store.next_id().unwrap();
        let t1 = Task::new(t1_id, "crew", "t1", 0);
        store.save(&t1).unwrap();

        let t2_id = store.next_id().unwrap();
        let mut t2 = Task::new(t2_id, "crew", "t2", 0);
        t2.status = crate::status::Status::InProgress;
        store.save(&t2).unwrap();

        let snap = store.save_snapshot("abc123").unwrap();
        assert_eq!(snap.seq, 1);

        // Mutate: close t1, delete t2.
        let mut t1_closed = t1.clone();
        t1_closed.status = crate::status::Status::Closed;
        t1_closed.close_reason = crate::status::CloseReason::Merged;
        store.save(&t1_closed).unwrap();
        store.delete(t2_id).unwrap();

        let refname = format!("refs/crew/snapshots/{}", snap.ref_suffix());
        store.restore_snapshot(&refname).unwrap();

        let restored = store.list(&TaskFilter::default()).unwrap();
        assert_eq!(restored.len(), 2);
        let restored_t1 = restored.iter().find(|t| t.id == t1_id).unwrap();
        assert_eq!(restored_t1.status, crate::status::Status::Todo);
        let restored_t2 = restored.iter().find(|t| t.id == t2_id).unwrap();
        assert_eq!(restored_t2.title, "t2");
    }

    #[test]
    fn prune_keeps_only_the_newest_n_per_sha() {
        let dir = init_repo();
        let store = GitTaskStore::new(dir.path(), "crew");
        store.initialize().unwrap();

        for _ in 0..3 {
            store.save_snapshot("sha1").unwrap();
        }
        store.prune_snapshots(1).unwrap();
        let remaining = store.list_snapshots(Some("sha1")).unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].seq, 3);
    }
}
