//! Per-run scratch directories.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, info, warn};

use crate::errors::PipelineError;
use crate::types::CommitSha;

/// A uniquely named directory under the work root, owned by one run.
///
/// Removed when dropped unless created with `keep`, in which case it is left
/// on disk for inspection.
#[derive(Debug)]
pub struct ScratchDir {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl ScratchDir {
    pub fn create(work_root: &Path, sha: &CommitSha, keep: bool) -> Result<Self, PipelineError> {
        let scratch_err = |source| PipelineError::Scratch {
            root: work_root.display().to_string(),
            source,
        };
        fs::create_dir_all(work_root).map_err(scratch_err)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("cvr-{}-", sha.short()))
            .tempdir_in(work_root)
            .map_err(scratch_err)?;
        let path = dir.path().to_path_buf();
        debug!(path = %path.display(), "scratch directory created");
        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory now, reporting failures to the caller.
    pub fn dispose(mut self) -> io::Result<()> {
        self.release()
    }

    fn release(&mut self) -> io::Result<()> {
        let Some(dir) = self.dir.take() else {
            return Ok(());
        };
        if self.keep {
            let kept = dir.keep();
            info!(path = %kept.display(), "keeping scratch directory");
            return Ok(());
        }
        restore_write_access(dir.path())?;
        dir.close()?;
        debug!(path = %self.path.display(), "scratch directory removed");
        Ok(())
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = self.release() {
            warn!(path = %self.path.display(), error = %e, "failed to remove scratch directory");
        }
    }
}

/// Extracted directories may carry read-only modes that would block removal
/// of their children.
#[cfg(unix)]
fn restore_write_access(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let meta = fs::symlink_metadata(path)?;
    if !meta.is_dir() {
        return Ok(());
    }
    let mode = meta.permissions().mode();
    if mode & 0o700 != 0o700 {
        fs::set_permissions(path, fs::Permissions::from_mode(mode | 0o700))?;
    }
    for entry in fs::read_dir(path)? {
        restore_write_access(&entry?.path())?;
    }
    Ok(())
}

#[cfg(not(unix))]
fn restore_write_access(_path: &Path) -> io::Result<()> {
    Ok(())
}
