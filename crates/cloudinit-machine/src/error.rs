//! Error types for cloudinit-machine.

use crate::process::RunResult;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for cloudinit-machine operations.
pub type Result<T> = std::result::Result<T, MachineError>;

/// Closed classification of every failure the tool can surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Bad arguments
    InvalidInput,
    /// Filesystem failure
    Io,
    /// Process could not be started
    LaunchFailed,
    /// Deadline exceeded
    Timeout,
    /// Process exited non-zero
    ProcessFailed,
    /// Machine state transition failed unrecoverably
    Lifecycle,
    /// Required artifact or path missing
    NotFound,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ErrorKind::InvalidInput => write!(f, "invalid input"),
            ErrorKind::Io => write!(f, "I/O"),
            ErrorKind::LaunchFailed => write!(f, "launch failed"),
            ErrorKind::Timeout => write!(f, "timeout"),
            ErrorKind::ProcessFailed => write!(f, "process failed"),
            ErrorKind::Lifecycle => write!(f, "lifecycle"),
            ErrorKind::NotFound => write!(f, "not found"),
        }
    }
}

/// Errors that can occur while running commands or driving the machine.
#[derive(Debug, Error)]
pub enum MachineError {
    /// Caller supplied an unusable argument
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Filesystem operation failed
    #[error("{context}: {source}")]
    Io {
        /// What was being done
        context: String,
        #[source]
        source: std::io::Error,
    },

    /// The process could not be spawned at all
    #[error("failed to launch {command}: {source}")]
    LaunchFailed {
        /// Normalized command line
        command: String,
        #[source]
        source: std::io::Error,
    },

    /// The deadline expired; the result holds whatever output was captured
    #[error("command timed out after {timeout:?}: {}", .result.command)]
    Timeout {
        /// Deadline that was exceeded
        timeout: Duration,
        /// Partial result, `timed_out` is set
        result: Box<RunResult>,
    },

    /// The process ran and exited non-zero
    #[error("command failed with exit code {}: {}", .result.exit_code, .result.command)]
    ProcessFailed {
        /// Full captured result
        result: Box<RunResult>,
    },

    /// A machine lifecycle step failed and could not be recovered
    #[error("{step}: {source}")]
    Lifecycle {
        /// Lifecycle step that failed (e.g. "podman machine start")
        step: &'static str,
        #[source]
        source: Box<MachineError>,
    },
}

impl MachineError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        MachineError::Io {
            context: context.into(),
            source,
        }
    }

    pub(crate) fn lifecycle(step: &'static str, source: MachineError) -> Self {
        MachineError::Lifecycle {
            step,
            source: Box::new(source),
        }
    }

    /// Taxonomy kind of this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            MachineError::InvalidInput(_) => ErrorKind::InvalidInput,
            MachineError::Io { .. } => ErrorKind::Io,
            MachineError::LaunchFailed { .. } => ErrorKind::LaunchFailed,
            MachineError::Timeout { .. } => ErrorKind::Timeout,
            MachineError::ProcessFailed { .. } => ErrorKind::ProcessFailed,
            MachineError::Lifecycle { .. } => ErrorKind::Lifecycle,
        }
    }

    /// The captured command result, when the process actually ran.
    pub fn run_result(&self) -> Option<&RunResult> {
        match self {
            MachineError::Timeout { result, .. } | MachineError::ProcessFailed { result } => {
                Some(result)
            }
            _ => None,
        }
    }
}
