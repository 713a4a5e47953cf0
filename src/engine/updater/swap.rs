//! Current-Pointer Swapper
//!
//! `current` is a symlink into `versions/`. It is only ever replaced by
//! renaming a freshly built sibling link over it, so any observer resolves
//! either the old artifact or the new one.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use super::version_manager::sync_dir;

#[cfg(unix)]
use std::os::unix::fs::symlink;

/// Swap errors
#[derive(Error, Debug)]
pub enum SwapError {
    #[error("Refusing to point current at {0}: not a promoted artifact")]
    InvalidTarget(PathBuf),
    #[error("Failed to stage {path}: {source}")]
    Stage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to rename {from} onto {to}: {source}")]
    Commit {
        from: PathBuf,
        to: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed to read current pointer: {0}")]
    Resolve(#[source] io::Error),
    #[error("Symlink-based version switching is not supported on this platform")]
    Unsupported,
}

/// Owner of the `current` indirection
#[derive(Debug)]
pub struct CurrentPointer {
    install_root: PathBuf,
    versions_dir: PathBuf,
}

/// A temp link that has been written next to `current` but not yet renamed
/// over it. Dropping it without committing leaves `current` untouched.
#[must_use = "a staged swap does nothing until committed"]
#[derive(Debug)]
pub struct StagedSwap<'a> {
    pointer: &'a CurrentPointer,
    target: PathBuf,
}

impl CurrentPointer {
    pub const LINK_NAME: &'static str = "current";
    pub const TEMP_NAME: &'static str = "current.tmp";

    pub fn new(install_root: PathBuf, versions_dir: PathBuf) -> Self {
        Self { install_root, versions_dir }
    }

    /// Path of the `current` link
    pub fn link_path(&self) -> PathBuf {
        self.install_root.join(Self::LINK_NAME)
    }

    /// Path of the staging link, in the same directory as `current`
    pub fn temp_path(&self) -> PathBuf {
        self.install_root.join(Self::TEMP_NAME)
    }

    /// Resolve `current` to the artifact it names.
    ///
    /// Returns `None` when there is no pointer yet or it dangles.
    pub fn resolve(&self) -> Result<Option<PathBuf>, SwapError> {
        let link = self.link_path();
        let target = match fs::read_link(&link) {
            Ok(target) => target,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(SwapError::Resolve(e)),
        };

        let resolved = if target.is_absolute() {
            target
        } else {
            self.install_root.join(target)
        };

        Ok(resolved.is_file().then_some(resolved))
    }

    /// Atomically repoint `current` at `artifact`
    pub fn swap(&self, artifact: &Path) -> Result<(), SwapError> {
        self.stage(artifact)?.commit()
    }

    /// Steps 1 and 2: validate the target and build the temp link.
    ///
    /// A temp link left by an earlier crashed attempt is replaced.
    pub fn stage(&self, artifact: &Path) -> Result<StagedSwap<'_>, SwapError> {
        let relative = self.link_target(artifact)?;
        let temp = self.temp_path();

        match fs::remove_file(&temp) {
            Ok(()) => debug!(path = %temp.display(), "removed stale temp link"),
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(SwapError::Stage { path: temp, source: e }),
        }

        make_link(&relative, &temp)?;

        Ok(StagedSwap {
            pointer: self,
            target: artifact.to_path_buf(),
        })
    }

    /// Relative link target for a promoted artifact, or `InvalidTarget`
    fn link_target(&self, artifact: &Path) -> Result<PathBuf, SwapError> {
        let invalid = || SwapError::InvalidTarget(artifact.to_path_buf());

        if artifact.parent() != Some(self.versions_dir.as_path()) {
            return Err(invalid());
        }
        let name = artifact.file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.starts_with('.'))
            .ok_or_else(invalid)?;
        if !artifact.is_file() {
            return Err(invalid());
        }

        let relative_dir = self.versions_dir
            .strip_prefix(&self.install_root)
            .map(Path::to_path_buf)
            .unwrap_or_else(|_| self.versions_dir.clone());
        Ok(relative_dir.join(name))
    }
}

impl StagedSwap<'_> {
    /// Step 3: rename the temp link over `current`
    pub fn commit(self) -> Result<(), SwapError> {
        let temp = self.pointer.temp_path();
        let link = self.pointer.link_path();

        fs::rename(&temp, &link).map_err(|e| SwapError::Commit {
            from: temp,
            to: link.clone(),
            source: e,
        })?;
        sync_dir(&self.pointer.install_root);

        info!(current = %link.display(), target = %self.target.display(), "current pointer swapped");
        Ok(())
    }
}

#[cfg(unix)]
fn make_link(target: &Path, temp: &Path) -> Result<(), SwapError> {
    symlink(target, temp).map_err(|e| SwapError::Stage {
        path: temp.to_path_buf(),
        source: e,
    })
}

#[cfg(not(unix))]
fn make_link(_target: &Path, _temp: &Path) -> Result<(), SwapError> {
    Err(SwapError::Unsupported)
}
