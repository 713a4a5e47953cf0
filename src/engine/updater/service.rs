//! Service Controller
//!
//! Stops and starts the managed service around the swap window.

use std::fmt;
use std::sync::Arc;
use std::process::Command;
use std::time::Duration;
use thiserror::Error;
use tracing::info;

use super::probe::{run_with_timeout, ProcessError};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ServiceAction {
    Stop,
    Start,
}

impl ServiceAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceAction::Stop => "stop",
            ServiceAction::Start => "start",
        }
    }
}

impl fmt::Display for ServiceAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Service control errors
#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Could not {action} service: {source}")]
    Process {
        action: ServiceAction,
        #[source]
        source: ProcessError,
    },
    #[error("{action} {service} exited with {code:?}: {stderr}")]
    CommandFailed {
        action: ServiceAction,
        service: String,
        code: Option<i32>,
        stderr: String,
    },
}

/// Process supervisor seam
pub trait ServiceControl {
    fn stop(&self) -> Result<(), ServiceError>;
    fn start(&self) -> Result<(), ServiceError>;
}

impl<T: ServiceControl + ?Sized> ServiceControl for Arc<T> {
    fn stop(&self) -> Result<(), ServiceError> {
        (**self).stop()
    }

    fn start(&self) -> Result<(), ServiceError> {
        (**self).start()
    }
}

/// Drives a service through an init system CLI (`systemctl stop <name>`)
#[derive(Debug, Clone)]
pub struct SystemdService {
    supervisor: String,
    service_name: String,
    timeout: Duration,
}

impl SystemdService {
    pub fn new(supervisor: impl Into<String>, service_name: impl Into<String>, timeout: Duration) -> Self {
        Self {
            supervisor: supervisor.into(),
            service_name: service_name.into(),
            timeout,
        }
    }

    fn run(&self, action: ServiceAction) -> Result<(), ServiceError> {
        let mut command = Command::new(&self.supervisor);
        command.args([action.as_str(), self.service_name.as_str()]);

        let output = run_with_timeout(command, self.timeout)
            .map_err(|source| ServiceError::Process { action, source })?;

        if !output.status.success() {
            return Err(ServiceError::CommandFailed {
                action,
                service: self.service_name.clone(),
                code: output.status.code(),
                stderr: output.stderr.trim().to_string(),
            });
        }

        info!(service = %self.service_name, %action, "service command succeeded");
        Ok(())
    }
}

impl ServiceControl for SystemdService {
    fn stop(&self) -> Result<(), ServiceError> {
        self.run(ServiceAction::Stop)
    }

    fn start(&self) -> Result<(), ServiceError> {
        self.run(ServiceAction::Start)
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;
    use tempfile::tempdir;

    fn fake_supervisor(dir: &std::path::Path, body: &str) -> String {
        let path = dir.join("fakectl");
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn test_passes_action_and_name() {
        let dir = tempdir().unwrap();
        let log = dir.path().join("calls");
        let ctl = fake_supervisor(dir.path(), &format!("echo \"$1 $2\" >> {}", log.display()));

        let service = SystemdService::new(ctl, "myapp.service", Duration::from_secs(5));
        service.stop().unwrap();
        service.start().unwrap();

        let calls = fs::read_to_string(&log).unwrap();
        assert_eq!(calls, "stop myapp.service\nstart myapp.service\n");
    }

    #[test]
    fn test_non_zero_exit_is_reported() {
        let dir = tempdir().unwrap();
        let ctl = fake_supervisor(dir.path(), "echo 'Unit not found' >&2; exit 5");

        let service = SystemdService::new(ctl, "myapp.service", Duration::from_secs(5));
        match service.start() {
            Err(ServiceError::CommandFailed { action, code, stderr, .. }) => {
                assert_eq!(action, ServiceAction::Start);
                assert_eq!(code, Some(5));
                assert_eq!(stderr, "Unit not found");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[test]
    fn test_missing_supervisor_is_reported() {
        let service = SystemdService::new("/nonexistent/ctl", "myapp.service", Duration::from_secs(5));
        assert!(matches!(service.stop(), Err(ServiceError::Process { .. })));
    }
}
