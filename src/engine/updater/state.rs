//! Update State
//!
//! The orchestrator's state machine, plus the `state.json` record of the
//! last attempt that operators can inspect with `cutover status`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Stage of an update attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum UpdateStatus {
    /// No attempt has run yet
    #[default]
    Idle,
    CheckingVersion,
    /// Installed version already matches the descriptor
    NoUpdateNeeded,
    Downloading,
    Verifying,
    /// Digest mismatch; the download was discarded
    VerificationFailed,
    StoppingService,
    Swapping,
    StartingService,
    Done,
    /// Any other failure, with the stage it happened in
    Failed { stage: String, reason: String },
}

impl UpdateStatus {
    /// Whether an attempt ends in this status
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Idle
                | Self::NoUpdateNeeded
                | Self::VerificationFailed
                | Self::Done
                | Self::Failed { .. }
        )
    }
}

impl fmt::Display for UpdateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::CheckingVersion => write!(f, "checking version"),
            Self::NoUpdateNeeded => write!(f, "no update needed"),
            Self::Downloading => write!(f, "downloading"),
            Self::Verifying => write!(f, "verifying"),
            Self::VerificationFailed => write!(f, "verification failed"),
            Self::StoppingService => write!(f, "stopping service"),
            Self::Swapping => write!(f, "swapping"),
            Self::StartingService => write!(f, "starting service"),
            Self::Done => write!(f, "done"),
            Self::Failed { stage, reason } => write!(f, "failed while {}: {}", stage, reason),
        }
    }
}

/// Persisted record of the most recent attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateState {
    /// Version the active binary reported at the last check
    pub installed_version: String,
    /// Version offered by the descriptor
    pub target_version: Option<String>,
    pub update_status: UpdateStatus,
    pub last_check: Option<DateTime<Utc>>,
    pub last_success: Option<DateTime<Utc>>,
}

impl UpdateState {
    /// Load state from disk, or default if it does not exist yet
    pub fn load(state_path: &Path) -> Result<Self, StateError> {
        if !state_path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(state_path)?;
        Ok(serde_json::from_str(&content)?)
    }

    /// Save state to disk atomically
    pub fn save(&self, state_path: &Path) -> Result<(), StateError> {
        let content = serde_json::to_string_pretty(self)?;

        let temp_path = state_path.with_extension("json.tmp");
        fs::write(&temp_path, &content)?;
        fs::rename(&temp_path, state_path)?;

        Ok(())
    }

    /// Begin a new attempt
    pub fn start_checking(&mut self) {
        self.update_status = UpdateStatus::CheckingVersion;
        self.last_check = Some(Utc::now());
    }

    pub fn record_versions(&mut self, installed: &str, target: &str) {
        self.installed_version = installed.to_string();
        self.target_version = Some(target.to_string());
    }

    pub fn transition(&mut self, status: UpdateStatus) {
        self.update_status = status;
    }

    /// Mark the attempt failed in `stage`
    pub fn mark_failed(&mut self, stage: &UpdateStatus, reason: String) {
        self.update_status = UpdateStatus::Failed {
            stage: stage.to_string(),
            reason,
        };
    }

    /// Record a completed cutover to `version`
    pub fn complete(&mut self, version: &str) {
        self.installed_version = version.to_string();
        self.update_status = UpdateStatus::Done;
        self.last_success = Some(Utc::now());
    }
}

/// State persistence errors
#[derive(Error, Debug)]
pub enum StateError {
    #[error("Failed to access state file: {0}")]
    Io(#[from] std::io::Error),
    #[error("Failed to (de)serialize state: {0}")]
    Serde(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_state_default() {
        let state = UpdateState::default();
        assert_eq!(state.update_status, UpdateStatus::Idle);
        assert!(state.target_version.is_none());
    }

    #[test]
    fn test_state_transitions() {
        let mut state = UpdateState::default();

        state.start_checking();
        assert!(state.last_check.is_some());
        assert!(!state.update_status.is_terminal());

        state.record_versions("1.0", "2.0");
        state.transition(UpdateStatus::Downloading);
        state.transition(UpdateStatus::Verifying);
        state.transition(UpdateStatus::Swapping);
        state.complete("2.0");

        assert_eq!(state.update_status, UpdateStatus::Done);
        assert_eq!(state.installed_version, "2.0");
        assert!(state.last_success.is_some());
    }

    #[test]
    fn test_mark_failed_records_stage() {
        let mut state = UpdateState::default();
        state.mark_failed(&UpdateStatus::StartingService, "exit 1".to_string());
        assert_eq!(
            state.update_status,
            UpdateStatus::Failed {
                stage: "starting service".to_string(),
                reason: "exit 1".to_string(),
            }
        );
        assert!(state.update_status.is_terminal());
    }

    #[test]
    fn test_state_persistence() {
        let dir = tempdir().unwrap();
        let state_path = dir.path().join("state.json");

        let mut state = UpdateState::default();
        state.record_versions("1.0", "2.0");
        state.transition(UpdateStatus::VerificationFailed);
        state.save(&state_path).unwrap();

        let loaded = UpdateState::load(&state_path).unwrap();
        assert_eq!(loaded.installed_version, "1.0");
        assert_eq!(loaded.update_status, UpdateStatus::VerificationFailed);
        assert!(!dir.path().join("state.json.tmp").exists());

        let raw = fs::read_to_string(&state_path).unwrap();
        assert!(raw.contains("\"status\": \"verification_failed\""));
    }
}
