//! Attempt-scoped workspace directories.
//!
//! Each `(job_id, attempt_id)` pair owns `<root>/<job_id>/<attempt_id>`. A lock
//! file created with `create_new` makes the claim exclusive, so two concurrent
//! attempts can never share a directory. The claim is released on every exit
//! path: explicitly via [`AttemptWorkspace::release`] or by `Drop`. A lock
//! whose recorded pid is no longer running is stale and gets reclaimed.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use syncbyte_types::job::JobRunConfig;

use crate::error::WorkerError;

const LOCK_FILE: &str = ".attempt.lock";

/// What happens to an attempt's directory once it is released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionPolicy {
    /// Keep files for inspection; cleanup is left to an external sweeper.
    #[default]
    Retain,
    Remove,
}

#[derive(Debug, thiserror::Error)]
pub enum WorkspaceError {
    #[error("workspace {} is already claimed by another attempt", .path.display())]
    InUse { path: PathBuf },
    #[error("workspace i/o error at {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl WorkspaceError {
    fn io(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Exclusive claim on one attempt's workspace directory.
#[derive(Debug)]
pub struct AttemptWorkspace {
    path: PathBuf,
    retention: RetentionPolicy,
    released: bool,
}

impl AttemptWorkspace {
    /// Directory for an attempt, without claiming it.
    #[must_use]
    pub fn path_for(root: &Path, job: JobRunConfig) -> PathBuf {
        root.join(job.job_id.to_string()).join(job.attempt_id.to_string())
    }

    /// Create and exclusively claim the attempt's directory.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::InUse`] if another live attempt holds the
    /// claim, or [`WorkspaceError::Io`] if the directory cannot be created.
    pub fn claim(
        root: &Path,
        job: JobRunConfig,
        retention: RetentionPolicy,
    ) -> Result<Self, WorkspaceError> {
        let path = Self::path_for(root, job);
        std::fs::create_dir_all(&path).map_err(|e| WorkspaceError::io(&path, e))?;

        let lock_path = path.join(LOCK_FILE);
        let mut lock = match create_lock(&lock_path, &path) {
            Err(WorkspaceError::InUse { .. }) if lock_is_stale(&lock_path) => {
                tracing::warn!(path = %path.display(), "Reclaiming stale workspace lock");
                std::fs::remove_file(&lock_path).map_err(|e| WorkspaceError::io(&lock_path, e))?;
                create_lock(&lock_path, &path)?
            }
            other => other?,
        };
        if let Err(e) = writeln!(lock, "{}", std::process::id()) {
            let _ = std::fs::remove_file(&lock_path);
            return Err(WorkspaceError::io(&lock_path, e));
        }

        tracing::debug!(
            job_id = job.job_id,
            attempt_id = job.attempt_id,
            path = %path.display(),
            "Claimed attempt workspace"
        );
        Ok(Self {
            path,
            retention,
            released: false,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Drop the claim and apply the retention policy.
    ///
    /// # Errors
    ///
    /// Returns [`WorkspaceError::Io`] if the lock or directory cannot be removed.
    pub fn release(mut self) -> Result<(), WorkspaceError> {
        self.released = true;
        self.release_inner()
    }

    fn release_inner(&self) -> Result<(), WorkspaceError> {
        match self.retention {
            RetentionPolicy::Retain => {
                let lock_path = self.path.join(LOCK_FILE);
                std::fs::remove_file(&lock_path).map_err(|e| WorkspaceError::io(&lock_path, e))
            }
            RetentionPolicy::Remove => {
                std::fs::remove_dir_all(&self.path).map_err(|e| WorkspaceError::io(&self.path, e))
            }
        }
    }
}

fn create_lock(lock_path: &Path, workspace: &Path) -> Result<File, WorkspaceError> {
    match OpenOptions::new().write(true).create_new(true).open(lock_path) {
        Ok(file) => Ok(file),
        Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => Err(WorkspaceError::InUse {
            path: workspace.to_path_buf(),
        }),
        Err(e) => Err(WorkspaceError::io(lock_path, e)),
    }
}

/// A lock is stale when it names a pid other than ours that is not running.
/// Unreadable or empty locks may still be mid-write and count as live.
fn lock_is_stale(lock_path: &Path) -> bool {
    let Ok(contents) = std::fs::read_to_string(lock_path) else {
        return false;
    };
    let Ok(pid) = contents.trim().parse::<u32>() else {
        return false;
    };
    pid != std::process::id() && !process_alive(pid)
}

#[cfg(target_os = "linux")]
fn process_alive(pid: u32) -> bool {
    Path::new("/proc").join(pid.to_string()).exists()
}

#[cfg(not(target_os = "linux"))]
fn process_alive(_pid: u32) -> bool {
    true
}

impl Drop for AttemptWorkspace {
    fn drop(&mut self) {
        if !self.released {
            if let Err(e) = self.release_inner() {
                tracing::warn!(path = %self.path.display(), "Failed to release workspace: {}", e);
            }
        }
    }
}

/// Serialize `value` as JSON into `<job_root>/<file_name>`.
pub(crate) async fn write_job_file<T: Serialize + ?Sized>(
    job_root: &Path,
    file_name: &str,
    value: &T,
) -> Result<(), WorkerError> {
    let path = job_root.join(file_name);
    let bytes = serde_json::to_vec_pretty(value)
        .map_err(|e| WorkerError::Launch(anyhow::Error::new(e).context(format!("failed to serialize {file_name}"))))?;
    tokio::fs::write(&path, bytes).await.map_err(|e| {
        WorkerError::Launch(anyhow::Error::new(e).context(format!("failed to write {}", path.display())))
    })
}
