//! Per-execution scratch directories.
//!
//! A [`Workspace`] owns a uniquely named directory holding exactly one staged
//! source file. The directory is removed exactly once: either by an explicit
//! [`Workspace::release`] or, on any other exit path (error, panic, dropped
//! future), by `Drop`.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use tempfile::TempDir;
use tracing::{debug, warn};

use crate::engine::registry::ExecutionProfile;
use crate::error::{Result, RunnerError};

/// Prefix of every workspace directory name.
pub const WORKSPACE_PREFIX: &str = "coderunner-";

/// Readable by the sandbox user, writable only by the host owner.
#[cfg(unix)]
const STAGED_FILE_MODE: u32 = 0o644;

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    id: String,
    staged_file: PathBuf,
}

impl Workspace {
    /// Create a fresh directory under `root` (system temp dir if `None`) and
    /// write `source` into it under the profile's file name.
    pub fn stage(root: Option<&Path>, profile: &ExecutionProfile, source: &str) -> Result<Self> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(WORKSPACE_PREFIX).rand_bytes(12);

        let dir = match root {
            Some(root) => builder.tempdir_in(root),
            None => builder.tempdir(),
        }
        .map_err(RunnerError::Workspace)?;

        let id = dir
            .path()
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        let staged_file = dir.path().join(&profile.file_name);

        // On failure `dir` is dropped here, which removes it.
        write_source(&staged_file, source).map_err(RunnerError::Workspace)?;

        debug!(workspace = %id, file = %staged_file.display(), "Workspace staged");

        Ok(Self {
            dir: Some(dir),
            id,
            staged_file,
        })
    }

    /// Unique identifier, also usable as a container name suffix.
    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn path(&self) -> &Path {
        self.staged_file
            .parent()
            .unwrap_or_else(|| Path::new("."))
    }

    pub fn staged_file(&self) -> &Path {
        &self.staged_file
    }

    /// Remove the directory now and report failures. Later calls and the
    /// eventual drop are no-ops.
    pub fn release(&mut self) -> std::io::Result<()> {
        match self.dir.take() {
            Some(dir) => {
                let result = dir.close();
                debug!(workspace = %self.id, ok = result.is_ok(), "Workspace released");
                result
            }
            None => Ok(()),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if let Err(e) = dir.close() {
                warn!(workspace = %self.id, error = %e, "Failed to remove workspace");
            } else {
                debug!(workspace = %self.id, "Workspace released on drop");
            }
        }
    }
}

fn write_source(path: &Path, source: &str) -> std::io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create_new(true);

    #[cfg(unix)]
    {
        use std::os::unix::fs::{OpenOptionsExt, PermissionsExt};
        options.mode(STAGED_FILE_MODE);
        let mut file = options.open(path)?;
        // The process umask may have stripped bits from the requested mode.
        file.set_permissions(std::fs::Permissions::from_mode(STAGED_FILE_MODE))?;
        file.write_all(source.as_bytes())?;
        file.sync_all()
    }

    #[cfg(not(unix))]
    {
        let mut file = options.open(path)?;
        file.write_all(source.as_bytes())?;
        file.sync_all()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> ExecutionProfile {
        ExecutionProfile {
            runtime: "alpine".to_string(),
            file_name: "main.sh".to_string(),
            command: vec!["sh".to_string(), "main.sh".to_string()],
        }
    }

    fn entries(root: &Path) -> usize {
        std::fs::read_dir(root).unwrap().count()
    }

    #[test]
    fn test_stage_writes_source() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::stage(Some(root.path()), &profile(), "echo hi\n").unwrap();

        assert!(workspace.id().starts_with(WORKSPACE_PREFIX));
        assert_eq!(workspace.path().parent().unwrap(), root.path());
        assert_eq!(
            std::fs::read_to_string(workspace.staged_file()).unwrap(),
            "echo hi\n"
        );

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = std::fs::metadata(workspace.staged_file())
                .unwrap()
                .permissions()
                .mode();
            assert_eq!(mode & 0o777, 0o644);
        }
    }

    #[test]
    fn test_release_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let mut workspace = Workspace::stage(Some(root.path()), &profile(), "").unwrap();
        let path = workspace.path().to_path_buf();
        assert!(path.exists());

        workspace.release().unwrap();
        assert!(!path.exists());
        workspace.release().unwrap();
        drop(workspace);
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        {
            let _workspace = Workspace::stage(Some(root.path()), &profile(), "").unwrap();
            assert_eq!(entries(root.path()), 1);
        }
        assert_eq!(entries(root.path()), 0);
    }

    #[test]
    fn test_unique_paths() {
        let root = tempfile::tempdir().unwrap();
        let workspaces: Vec<_> = (0..32)
            .map(|_| Workspace::stage(Some(root.path()), &profile(), "").unwrap())
            .collect();

        let mut ids: Vec<_> = workspaces.iter().map(|w| w.id().to_string()).collect();
        ids.sort();
        ids.dedup();
        assert_eq!(ids.len(), 32);
    }

    #[test]
    fn test_missing_root_is_workspace_error() {
        let root = tempfile::tempdir().unwrap();
        let missing = root.path().join("does-not-exist");
        assert!(matches!(
            Workspace::stage(Some(&missing), &profile(), ""),
            Err(RunnerError::Workspace(_))
        ));
    }
}
