//! Update Orchestrator
//!
//! Runs one update attempt: descriptor → version decision → download →
//! verify → stop → swap → start. Every stage failure ends the attempt, and
//! nothing before the swap touches `current`.

use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::engine::config::UpdaterConfig;
use crate::engine::locks::{LockError, UpdateLock};

use super::probe::{CommandProbe, VersionProbe};
use super::service::{ServiceControl, ServiceError, SystemdService};
use super::state::{UpdateState, UpdateStatus};
use super::swap::{CurrentPointer, SwapError};
use super::transport::{ArtifactSource, DescriptorSource, HttpTransport, TransportError, UpdateDescriptor};
use super::verify::{self, VerifyError};
use super::version_manager::{StoreError, VersionManager};

/// Knobs for a single attempt
#[derive(Debug, Clone, Copy, Default)]
pub struct UpdateOptions {
    /// Decide only; never download, swap or touch the service
    pub check_only: bool,
    /// Install even when the installed version already matches
    pub force: bool,
}

/// How an attempt ended when nothing went wrong
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum UpdateOutcome {
    /// The descriptor was missing a field or could not be decoded
    NoUpdateAvailable,
    UpToDate { version: String },
    /// Reported by check-only runs
    UpdateAvailable { installed: String, available: String },
    Updated {
        from: String,
        to: String,
        /// What the new binary says it is after the restart
        reported: String,
    },
}

/// Update errors, one variant per failure class
#[derive(Error, Debug)]
pub enum UpdateError {
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
    #[error("Integrity check failed for {version}: {source}")]
    Integrity {
        version: String,
        #[source]
        source: VerifyError,
    },
    #[error("Storage error: {0}")]
    Storage(#[from] StoreError),
    #[error("Swap failed: {0}")]
    Swap(#[from] SwapError),
    #[error("Failed to stop service: {0}")]
    ServiceStop(#[source] ServiceError),
    #[error("Service failed to start on {version}: {source}")]
    ServiceStart {
        version: String,
        #[source]
        source: ServiceError,
    },
    #[error(transparent)]
    Lock(#[from] LockError),
}

impl UpdateError {
    /// Whether `current` may have moved before this error happened
    pub fn after_swap(&self) -> bool {
        matches!(self, Self::ServiceStart { .. })
    }
}

/// Sequences the updater components for one installation
pub struct Updater {
    store: VersionManager,
    pointer: CurrentPointer,
    lock: UpdateLock,
    state_path: PathBuf,
    descriptors: Box<dyn DescriptorSource>,
    artifacts: Box<dyn ArtifactSource>,
    service: Box<dyn ServiceControl>,
    probe: Box<dyn VersionProbe>,
}

impl Updater {
    pub fn new(
        config: &UpdaterConfig,
        descriptors: impl DescriptorSource + 'static,
        artifacts: impl ArtifactSource + 'static,
        service: impl ServiceControl + 'static,
        probe: impl VersionProbe + 'static,
    ) -> Self {
        Self {
            store: VersionManager::new(config.versions_dir(), config.artifact_name.clone()),
            pointer: CurrentPointer::new(config.install_root.clone(), config.versions_dir()),
            lock: UpdateLock::new(&config.install_root),
            state_path: config.state_path(),
            descriptors: Box::new(descriptors),
            artifacts: Box::new(artifacts),
            service: Box::new(service),
            probe: Box::new(probe),
        }
    }

    /// Production wiring: one shared HTTP transport, init-system CLI, `--version` probe
    pub fn from_config(config: &UpdaterConfig) -> Result<Self, UpdateError> {
        let timeouts = &config.timeouts;
        let transport = Arc::new(HttpTransport::new(&config.metadata_url, timeouts.fetch(), timeouts.download())?);
        let service = SystemdService::new(&config.supervisor, &config.service_name, timeouts.service());
        let probe = CommandProbe::new(&config.version_flag, timeouts.probe());
        Ok(Self::new(config, Arc::clone(&transport), transport, service, probe))
    }

    pub fn store(&self) -> &VersionManager {
        &self.store
    }

    pub fn pointer(&self) -> &CurrentPointer {
        &self.pointer
    }

    /// Version reported by whatever `current` resolves to; `""` if unknown
    pub fn installed_version(&self) -> String {
        match self.pointer.resolve() {
            Ok(Some(binary)) => self.probe.installed_version(&binary),
            Ok(None) => String::new(),
            Err(e) => {
                warn!(error = %e, "could not resolve current pointer");
                String::new()
            }
        }
    }

    /// Run one attempt.
    ///
    /// The version decision is made without writing anything; the lock and
    /// `state.json` are only touched once an install is actually going ahead.
    pub fn run(&self, options: &UpdateOptions) -> Result<UpdateOutcome, UpdateError> {
        let descriptor = match self.descriptors.fetch() {
            Ok(descriptor) => descriptor,
            Err(TransportError::Decode(reason)) => {
                warn!(%reason, "undecodable update descriptor, treating as no update");
                return Ok(UpdateOutcome::NoUpdateAvailable);
            }
            Err(e) => return Err(e.into()),
        };
        if !descriptor.is_actionable() {
            warn!(?descriptor, "incomplete update descriptor, treating as no update");
            return Ok(UpdateOutcome::NoUpdateAvailable);
        }
        let target = descriptor.version.trim().to_string();

        let installed = self.installed_version();
        if !options.force && installed == target {
            info!(version = %installed, "already up to date");
            return Ok(UpdateOutcome::UpToDate { version: installed });
        }
        if options.check_only {
            info!(installed = %installed, available = %target, "update available");
            return Ok(UpdateOutcome::UpdateAvailable { installed, available: target });
        }

        let _guard = self.lock.acquire(&format!("installing {}", target))?;

        // Another attempt may have finished while we waited on the network
        let installed = self.installed_version();
        if !options.force && installed == target {
            info!(version = %installed, "installed by a concurrent attempt");
            return Ok(UpdateOutcome::UpToDate { version: installed });
        }

        info!(from = %installed, to = %target, "starting update");
        let mut attempt = Attempt::begin(&self.state_path, &installed, &target);
        match self.install(&descriptor, &target, &installed, &mut attempt) {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                error!(stage = %attempt.stage(), error = %e, "update failed");
                attempt.fail(&e);
                Err(e)
            }
        }
    }

    fn install(
        &self,
        descriptor: &UpdateDescriptor,
        target: &str,
        installed: &str,
        attempt: &mut Attempt,
    ) -> Result<UpdateOutcome, UpdateError> {
        let removed = self.store.cleanup_pending()?;
        if removed > 0 {
            info!(removed, "removed abandoned partial downloads");
        }

        attempt.enter(UpdateStatus::Downloading);
        let path = self.store.allocate(target)?;
        let stream = self.artifacts.open(&descriptor.url)?;
        let pending = self.store
            .materialize(target, &path, stream)
            .map_err(|e| match e {
                StoreError::Stream(io) => UpdateError::Transport(TransportError::Network(io.to_string())),
                other => UpdateError::Storage(other),
            })?;
        info!(path = %path.display(), bytes = pending.bytes_written(), "artifact downloaded");

        attempt.enter(UpdateStatus::Verifying);
        if let Err(source) = verify::verify_file(pending.path(), &descriptor.sha256) {
            if let Err(e) = self.store.discard(pending.path()) {
                warn!(path = %pending.path().display(), error = %e, "could not discard rejected artifact");
            }
            return Err(match source {
                VerifyError::ChecksumMismatch { .. } => {
                    attempt.enter(UpdateStatus::VerificationFailed);
                    UpdateError::Integrity { version: target.to_string(), source }
                }
                VerifyError::Io(io) => UpdateError::Storage(StoreError::Io {
                    path: path.clone(),
                    source: io,
                }),
            });
        }
        let artifact = self.store.promote(pending)?;
        debug!(path = %artifact.path.display(), "artifact verified");

        attempt.enter(UpdateStatus::StoppingService);
        self.service.stop().map_err(UpdateError::ServiceStop)?;

        attempt.enter(UpdateStatus::Swapping);
        self.pointer.swap(&artifact.path)?;

        attempt.enter(UpdateStatus::StartingService);
        self.service.start().map_err(|source| UpdateError::ServiceStart {
            version: target.to_string(),
            source,
        })?;

        let reported = self.installed_version();
        if reported != target {
            warn!(expected = %target, reported = %reported, "new binary reports a different version");
        }

        attempt.complete(target);
        info!(from = %installed, to = %target, "update complete");
        Ok(UpdateOutcome::Updated {
            from: installed.to_string(),
            to: target.to_string(),
            reported,
        })
    }
}

/// Progress of one attempt, mirrored into `state.json`.
///
/// The record is advisory, so write failures are logged and ignored.
struct Attempt<'a> {
    path: &'a std::path::Path,
    state: UpdateState,
}

impl<'a> Attempt<'a> {
    fn begin(path: &'a std::path::Path, installed: &str, target: &str) -> Self {
        let mut state = UpdateState::load(path).unwrap_or_else(|e| {
            warn!(error = %e, "ignoring unreadable state file");
            UpdateState::default()
        });
        state.start_checking();
        state.record_versions(installed, target);
        let attempt = Self { path, state };
        attempt.persist();
        attempt
    }

    fn stage(&self) -> &UpdateStatus {
        &self.state.update_status
    }

    fn enter(&mut self, status: UpdateStatus) {
        debug!(%status, "entering stage");
        self.state.transition(status);
        self.persist();
    }

    fn fail(&mut self, error: &UpdateError) {
        if matches!(error, UpdateError::Integrity { .. }) {
            // Already recorded as VerificationFailed
            return;
        }
        let stage = self.state.update_status.clone();
        self.state.mark_failed(&stage, error.to_string());
        self.persist();
    }

    fn complete(&mut self, version: &str) {
        self.state.complete(version);
        self.persist();
    }

    fn persist(&self) {
        if let Err(e) = self.state.save(self.path) {
            warn!(path = %self.path.display(), error = %e, "could not record update state");
        }
    }
}
