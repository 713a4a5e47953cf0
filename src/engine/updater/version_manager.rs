//! Version Manager
//!
//! Owns the `versions/` directory: slot allocation, streaming artifacts in as
//! pending files, promoting them once verified, and discarding rejects.

use std::path::{Path, PathBuf};
use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use thiserror::Error;
use tracing::{debug, warn};

#[cfg(unix)]
use std::os::unix::fs::PermissionsExt;

const PENDING_SUFFIX: &str = ".partial";

/// An artifact whose bytes are on disk but not yet verified.
///
/// Lives at a hidden sibling of its final path; never a valid swap target.
#[derive(Debug)]
pub struct PendingArtifact {
    version: String,
    pending_path: PathBuf,
    final_path: PathBuf,
    bytes_written: u64,
}

impl PendingArtifact {
    pub fn path(&self) -> &Path {
        &self.pending_path
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }
}

/// A verified artifact at its final location under `versions/`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionArtifact {
    pub version: String,
    pub path: PathBuf,
}

/// Version store errors
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("Failed reading artifact stream: {0}")]
    Stream(#[source] io::Error),
    #[error("Invalid version identifier: {0:?}")]
    InvalidVersion(String),
    #[error("Path {0} is not a slot in the version store")]
    ForeignPath(PathBuf),
}

impl StoreError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io { path: path.to_path_buf(), source }
    }
}

/// Version Manager handles the `versions/` directory of an installation
pub struct VersionManager {
    versions_dir: PathBuf,
    artifact_name: String,
}

impl VersionManager {
    pub fn new(versions_dir: PathBuf, artifact_name: impl Into<String>) -> Self {
        Self {
            versions_dir,
            artifact_name: artifact_name.into(),
        }
    }

    /// Get the versions directory
    pub fn versions_dir(&self) -> &Path {
        &self.versions_dir
    }

    /// Create the versions directory if missing
    pub fn init(&self) -> Result<(), StoreError> {
        fs::create_dir_all(&self.versions_dir)
            .map_err(|e| StoreError::io(&self.versions_dir, e))
    }

    /// Derive the artifact path for a version.
    ///
    /// Distinct versions always map to distinct file names inside
    /// `versions/`; identifiers that could escape the directory are rejected.
    pub fn allocate(&self, version: &str) -> Result<PathBuf, StoreError> {
        if !is_valid_version_id(version) {
            return Err(StoreError::InvalidVersion(version.to_string()));
        }
        Ok(self.versions_dir.join(self.file_name(version)))
    }

    fn file_name(&self, version: &str) -> String {
        format!("{}-{}", self.artifact_name, version)
    }

    /// Hidden sibling used while an artifact is still being written
    pub fn pending_path(&self, path: &Path) -> Result<PathBuf, StoreError> {
        let name = self.slot_name(path)?;
        Ok(self.versions_dir.join(format!(".{}{}", name, PENDING_SUFFIX)))
    }

    fn slot_name<'a>(&self, path: &'a Path) -> Result<&'a str, StoreError> {
        if path.parent() != Some(self.versions_dir.as_path()) {
            return Err(StoreError::ForeignPath(path.to_path_buf()));
        }
        path.file_name()
            .and_then(|n| n.to_str())
            .filter(|n| !n.starts_with('.'))
            .ok_or_else(|| StoreError::ForeignPath(path.to_path_buf()))
    }

    /// Stream `source` into the pending file for `path` and mark it
    /// executable. Nothing is left behind if the stream or the disk fails.
    pub fn materialize<R: Read>(
        &self,
        version: &str,
        path: &Path,
        source: R,
    ) -> Result<PendingArtifact, StoreError> {
        self.init()?;
        let pending_path = self.pending_path(path)?;

        match write_pending(&pending_path, source) {
            Ok(bytes_written) => {
                debug!(path = %pending_path.display(), bytes_written, "artifact materialized");
                Ok(PendingArtifact {
                    version: version.to_string(),
                    pending_path,
                    final_path: path.to_path_buf(),
                    bytes_written,
                })
            }
            Err(e) => {
                if let Err(cleanup) = remove_if_exists(&pending_path) {
                    warn!(path = %pending_path.display(), error = %cleanup, "failed to remove partial artifact");
                }
                Err(e)
            }
        }
    }

    /// Move a verified pending artifact onto its final path
    pub fn promote(&self, pending: PendingArtifact) -> Result<VersionArtifact, StoreError> {
        fs::rename(&pending.pending_path, &pending.final_path)
            .map_err(|e| StoreError::io(&pending.final_path, e))?;
        sync_dir(&self.versions_dir);
        Ok(VersionArtifact {
            version: pending.version,
            path: pending.final_path,
        })
    }

    /// Remove an artifact (pending or final). Missing files are not an error.
    pub fn discard(&self, path: &Path) -> Result<(), StoreError> {
        if path.parent() != Some(self.versions_dir.as_path()) {
            return Err(StoreError::ForeignPath(path.to_path_buf()));
        }
        remove_if_exists(path).map_err(|e| StoreError::io(path, e))
    }

    /// Whether a verified artifact exists for `version`
    pub fn is_installed(&self, version: &str) -> bool {
        self.allocate(version)
            .map(|p| p.is_file())
            .unwrap_or(false)
    }

    /// Recover the version id from an artifact path
    pub fn version_of(&self, path: &Path) -> Option<String> {
        let name = self.slot_name(path).ok()?;
        name.strip_prefix(&format!("{}-", self.artifact_name))
            .map(str::to_string)
    }

    /// List installed versions, sorted by name. Pending files are skipped.
    pub fn list_versions(&self) -> Result<Vec<VersionArtifact>, StoreError> {
        if !self.versions_dir.exists() {
            return Ok(vec![]);
        }

        let entries = fs::read_dir(&self.versions_dir)
            .map_err(|e| StoreError::io(&self.versions_dir, e))?;

        let mut versions = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.versions_dir, e))?;
            let path = entry.path();
            if !path.is_file() {
                continue;
            }
            if let Some(version) = self.version_of(&path) {
                versions.push(VersionArtifact { version, path });
            }
        }

        versions.sort_by(|a, b| a.version.cmp(&b.version));
        Ok(versions)
    }

    /// Remove pending files abandoned by a crashed attempt
    pub fn cleanup_pending(&self) -> Result<usize, StoreError> {
        if !self.versions_dir.exists() {
            return Ok(0);
        }

        let entries = fs::read_dir(&self.versions_dir)
            .map_err(|e| StoreError::io(&self.versions_dir, e))?;

        let mut removed = 0;
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::io(&self.versions_dir, e))?;
            let path = entry.path();
            let is_pending = path.file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with('.') && n.ends_with(PENDING_SUFFIX))
                .unwrap_or(false);
            if is_pending {
                remove_if_exists(&path).map_err(|e| StoreError::io(&path, e))?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn is_valid_version_id(version: &str) -> bool {
    !version.is_empty()
        && version != "."
        && version != ".."
        && !version.contains(['/', '\\', '\0'])
}

fn write_pending<R: Read>(path: &Path, mut source: R) -> Result<u64, StoreError> {
    let mut file = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|e| StoreError::io(path, e))?;

    let mut buffer = [0u8; 8192];
    let mut written = 0u64;
    loop {
        let n = match source.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(StoreError::Stream(e)),
        };
        file.write_all(&buffer[..n]).map_err(|e| StoreError::io(path, e))?;
        written += n as u64;
    }

    file.sync_all().map_err(|e| StoreError::io(path, e))?;
    set_executable(&file).map_err(|e| StoreError::io(path, e))?;
    Ok(written)
}

#[cfg(unix)]
fn set_executable(file: &File) -> io::Result<()> {
    file.set_permissions(fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_file: &File) -> io::Result<()> {
    Ok(())
}

fn remove_if_exists(path: &Path) -> io::Result<()> {
    match fs::remove_file(path) {
        Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
        _ => Ok(()),
    }
}

/// Best-effort fsync of a directory so renames inside it are durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        if let Err(e) = handle.sync_all() {
            warn!(dir = %dir.display(), error = %e, "directory fsync failed");
        }
    }
}

/// Directories cannot be opened for fsync here; renames are left to the OS
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) {}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    struct FailingReader {
        sent: bool,
    }

    impl Read for FailingReader {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if self.sent {
                return Err(io::Error::new(io::ErrorKind::ConnectionReset, "peer went away"));
            }
            self.sent = true;
            buf[..4].copy_from_slice(b"half");
            Ok(4)
        }
    }

    fn store(dir: &Path) -> VersionManager {
        VersionManager::new(dir.join("versions"), "myapp")
    }

    #[test]
    fn test_allocate_is_deterministic() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());

        let a = vm.allocate("2.0").unwrap();
        assert_eq!(a, dir.path().join("versions").join("myapp-2.0"));
        assert_eq!(a, vm.allocate("2.0").unwrap());
        assert_ne!(a, vm.allocate("2.0.1").unwrap());
    }

    #[test]
    fn test_allocate_rejects_escaping_ids() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());

        for bad in ["", ".", "..", "../evil", "a/b", "a\\b", "nul\0"] {
            assert!(
                matches!(vm.allocate(bad), Err(StoreError::InvalidVersion(_))),
                "accepted {:?}",
                bad
            );
        }
    }

    #[test]
    fn test_materialize_and_promote() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());
        let path = vm.allocate("2.0").unwrap();

        let pending = vm.materialize("2.0", &path, &b"binary"[..]).unwrap();
        assert_eq!(pending.bytes_written(), 6);
        assert!(pending.path().exists());
        assert!(!path.exists());
        assert!(!vm.is_installed("2.0"));
        assert!(vm.list_versions().unwrap().is_empty());

        let artifact = vm.promote(pending).unwrap();
        assert_eq!(artifact.path, path);
        assert_eq!(fs::read(&path).unwrap(), b"binary");
        assert!(vm.is_installed("2.0"));

        #[cfg(unix)]
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o755);
    }

    #[test]
    fn test_materialize_removes_partial_on_stream_error() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());
        let path = vm.allocate("2.0").unwrap();

        let result = vm.materialize("2.0", &path, FailingReader { sent: false });
        assert!(matches!(result, Err(StoreError::Stream(_))));
        assert!(!vm.pending_path(&path).unwrap().exists());
        assert!(!path.exists());
    }

    #[test]
    fn test_discard_leaves_other_versions() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());

        for v in ["1.0", "2.0"] {
            let path = vm.allocate(v).unwrap();
            let pending = vm.materialize(v, &path, &b"x"[..]).unwrap();
            vm.promote(pending).unwrap();
        }

        vm.discard(&vm.allocate("2.0").unwrap()).unwrap();
        vm.discard(&vm.allocate("3.0").unwrap()).unwrap();

        assert!(vm.is_installed("1.0"));
        assert!(!vm.is_installed("2.0"));
    }

    #[test]
    fn test_discard_refuses_foreign_paths() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());
        let outside = dir.path().join("current");
        fs::write(&outside, "keep").unwrap();

        assert!(matches!(vm.discard(&outside), Err(StoreError::ForeignPath(_))));
        assert!(outside.exists());
    }

    #[test]
    fn test_list_versions_and_cleanup_pending() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());
        vm.init().unwrap();

        for v in ["1.0", "0.9"] {
            fs::write(vm.allocate(v).unwrap(), v).unwrap();
        }
        let abandoned = vm.pending_path(&vm.allocate("2.0").unwrap()).unwrap();
        fs::write(&abandoned, "half").unwrap();

        let listed: Vec<String> = vm.list_versions().unwrap()
            .into_iter()
            .map(|a| a.version)
            .collect();
        assert_eq!(listed, vec!["0.9", "1.0"]);

        assert_eq!(vm.cleanup_pending().unwrap(), 1);
        assert!(!abandoned.exists());
        assert!(vm.is_installed("1.0"));
    }

    #[test]
    fn test_version_of() {
        let dir = tempdir().unwrap();
        let vm = store(dir.path());
        let path = vm.allocate("1.2.3-rc1").unwrap();
        assert_eq!(vm.version_of(&path), Some("1.2.3-rc1".to_string()));
        assert_eq!(vm.version_of(&vm.pending_path(&path).unwrap()), None);
        assert_eq!(vm.version_of(Path::new("/elsewhere/myapp-1.0")), None);
    }
}
