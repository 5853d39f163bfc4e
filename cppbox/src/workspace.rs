use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;
use tokio::time;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::Error;

/// Default pause between orphan sweeps.
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(30 * 60);
/// Age at which an unclaimed scratch file is considered leaked.
pub const SWEEP_RETENTION: Duration = Duration::from_secs(60 * 60);

/// The filesystem footprint of one request: a source file and the artifact
/// compiled from it. Owned by exactly one request lifecycle; the id is never
/// reused.
///
/// Dropping an armed unit removes both files, so any exit path that forgets
/// an explicit release still cleans up.
#[derive(Debug)]
pub struct WorkUnit {
    pub id: String,
    pub source_path: PathBuf,
    pub artifact_path: PathBuf,
    armed: bool,
}

impl WorkUnit {
    /// File name of the generated source, as it appears in compiler output.
    pub fn source_file_name(&self) -> &str {
        self.source_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// File name of the artifact, used as its public executable id.
    pub fn artifact_file_name(&self) -> String {
        self.artifact_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
            .to_string()
    }

    /// Leave the files on disk past this unit's lifetime, for a later run to
    /// claim. The sweep remains the backstop for artifacts never claimed.
    pub fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for WorkUnit {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let _ = std::fs::remove_file(&self.source_path);
        let _ = std::fs::remove_file(&self.artifact_path);
    }
}

/// Allocates and reclaims per-request scratch files under one shared root.
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    scratch_root: PathBuf,
}

impl WorkspaceManager {
    /// Create a manager rooted at `scratch_root`, creating the directory if
    /// needed.
    pub async fn new(scratch_root: impl Into<PathBuf>) -> Result<Self, Error> {
        let scratch_root = scratch_root.into();
        fs::create_dir_all(&scratch_root).await?;
        Ok(Self { scratch_root })
    }

    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    /// Write `source_text` to a freshly allocated source path and reserve the
    /// matching artifact path.
    pub async fn materialize(&self, source_text: &str) -> Result<WorkUnit, Error> {
        let id = Uuid::new_v4().to_string();
        let source_path = self.scratch_root.join(format!("job-{id}.cpp"));
        let artifact_path = self.scratch_root.join(artifact_name(&id));
        fs::write(&source_path, source_text).await?;
        debug!(%id, source = %source_path.display(), "materialized work unit");
        Ok(WorkUnit {
            id,
            source_path,
            artifact_path,
            armed: true,
        })
    }

    /// Remove the unit's files, tolerating already-absent ones: release may
    /// run twice, once from the orchestrator and once from the sweep.
    pub async fn release(&self, unit: &WorkUnit) {
        for path in [&unit.source_path, &unit.artifact_path] {
            match fs::remove_file(path).await {
                Ok(()) => debug!(path = %path.display(), "removed scratch file"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "failed to remove scratch file")
                }
            }
        }
    }

    /// Look up a previously compiled artifact by its public file name and
    /// reclaim ownership of it (plus its sibling source). Names that could
    /// escape the scratch root are rejected outright.
    pub async fn claim_artifact(&self, name: &str) -> Option<WorkUnit> {
        if name.is_empty() || name.contains(['/', '\\']) || name.contains("..") {
            return None;
        }
        let artifact_path = self.scratch_root.join(name);
        let meta = fs::metadata(&artifact_path).await.ok()?;
        if !meta.is_file() {
            return None;
        }

        let stem = name.strip_suffix(".exe").unwrap_or(name);
        let id = stem.strip_prefix("job-").unwrap_or(stem).to_string();
        let source_path = self.scratch_root.join(format!("{stem}.cpp"));
        Some(WorkUnit {
            id,
            source_path,
            artifact_path,
            armed: true,
        })
    }

    /// Remove any scratch file older than `retention`. Returns the number of
    /// files removed.
    pub async fn sweep_once(&self, retention: Duration) -> usize {
        let mut removed = 0;
        let Ok(mut entries) = fs::read_dir(&self.scratch_root).await else {
            return 0;
        };
        while let Ok(Some(entry)) = entries.next_entry().await {
            let Ok(meta) = entry.metadata().await else {
                continue;
            };
            if !meta.is_file() {
                continue;
            }
            let age = meta.modified().ok().and_then(|modified| modified.elapsed().ok());
            if age.is_some_and(|age| age > retention)
                && fs::remove_file(entry.path()).await.is_ok()
            {
                removed += 1;
            }
        }
        if removed > 0 {
            info!(removed, "swept orphaned scratch files");
        }
        removed
    }

    /// Periodically reclaim files that per-request cleanup never got to,
    /// the only self-healing for a process that died mid-flight. Runs until
    /// the owning task is dropped.
    pub async fn sweep_loop(self, interval: Duration, retention: Duration) {
        let mut ticker = time::interval(interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            self.sweep_once(retention).await;
        }
    }
}

fn artifact_name(id: &str) -> String {
    if cfg!(windows) {
        format!("job-{id}.exe")
    } else {
        format!("job-{id}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[tokio::test]
    async fn materialize_writes_source_with_unique_ids() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceManager::new(dir.path()).await.unwrap();

        let first = workspace.materialize("int main() {}").await.unwrap();
        let second = workspace.materialize("int main() {}").await.unwrap();
        assert_ne!(first.id, second.id);
        assert!(first.source_file_name().ends_with(".cpp"));

        let written = fs::read_to_string(&first.source_path).await.unwrap();
        assert_eq!(written, "int main() {}");
    }

    #[tokio::test]
    async fn release_is_idempotent() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceManager::new(dir.path()).await.unwrap();

        let unit = workspace.materialize("int main() {}").await.unwrap();
        workspace.release(&unit).await;
        assert!(!unit.source_path.exists());
        // second release sees absent files and stays quiet
        workspace.release(&unit).await;
    }

    #[tokio::test]
    async fn drop_removes_files_unless_disarmed() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceManager::new(dir.path()).await.unwrap();

        let unit = workspace.materialize("int main() {}").await.unwrap();
        let source = unit.source_path.clone();
        drop(unit);
        assert!(!source.exists());

        let unit = workspace.materialize("int main() {}").await.unwrap();
        let source = unit.source_path.clone();
        unit.disarm();
        assert!(source.exists());
    }

    #[tokio::test]
    async fn claim_artifact_rejects_traversal_and_unknown_names() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceManager::new(dir.path()).await.unwrap();

        assert!(workspace.claim_artifact("../etc/passwd").await.is_none());
        assert!(workspace.claim_artifact("a/b").await.is_none());
        assert!(workspace.claim_artifact("").await.is_none());
        assert!(workspace.claim_artifact("job-unknown").await.is_none());
    }

    #[tokio::test]
    async fn claim_artifact_recovers_sibling_source() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceManager::new(dir.path()).await.unwrap();

        let unit = workspace.materialize("int main() {}").await.unwrap();
        fs::write(&unit.artifact_path, b"binary").await.unwrap();
        let name = unit.artifact_file_name();
        let source_path = unit.source_path.clone();
        unit.disarm();

        let claimed = workspace.claim_artifact(&name).await.unwrap();
        assert_eq!(claimed.source_path, source_path);
        workspace.release(&claimed).await;
        assert!(!source_path.exists());
    }

    #[tokio::test]
    async fn sweep_removes_only_aged_files() {
        let dir = tempdir().unwrap();
        let workspace = WorkspaceManager::new(dir.path()).await.unwrap();

        let unit = workspace.materialize("int main() {}").await.unwrap();
        unit.disarm();

        assert_eq!(workspace.sweep_once(Duration::from_secs(3600)).await, 0);

        time::sleep(Duration::from_millis(50)).await;
        assert_eq!(workspace.sweep_once(Duration::ZERO).await, 1);
        assert_eq!(workspace.sweep_once(Duration::ZERO).await, 0);
    }
}
