//! Error types for cloudinit-core.

use cloudinit_machine::{ErrorKind, MachineError};
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for cloudinit-core operations.
pub type Result<T> = std::result::Result<T, CoreError>;

/// Errors that can occur while building or testing.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Error from cloudinit-machine
    #[error(transparent)]
    Machine(#[from] MachineError),

    /// A named build or test step failed
    #[error("{step}: {source}")]
    Step {
        /// Step that failed (e.g. "podman pull")
        step: &'static str,
        #[source]
        source: Box<CoreError>,
    },

    /// Required file is missing
    #[error("{what} not found at {}", .path.display())]
    NotFound {
        /// Human description of the file
        what: String,
        /// Expected location
        path: PathBuf,
    },

    /// A path expected to be a file is a directory
    #[error("{what} points to a directory: {}", .path.display())]
    NotAFile {
        /// Human description of the file
        what: String,
        /// Offending path
        path: PathBuf,
    },

    /// Bad arguments
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

    /// HTTP download failed
    #[error("download {url} failed: {source}")]
    Download {
        /// Requested URL
        url: String,
        #[source]
        source: reqwest::Error,
    },

    /// HTTP download returned a non-success status
    #[error("download {url} failed with status {status}")]
    DownloadStatus {
        /// Requested URL
        url: String,
        /// Response status
        status: reqwest::StatusCode,
    },
}

impl CoreError {
    pub(crate) fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        CoreError::Io {
            context: context.into(),
            source,
        }
    }

    /// Taxonomy kind of the innermost error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CoreError::Machine(e) => e.kind(),
            CoreError::Step { source, .. } => source.kind(),
            CoreError::NotFound { .. } => ErrorKind::NotFound,
            CoreError::NotAFile { .. } | CoreError::InvalidInput(_) => ErrorKind::InvalidInput,
            CoreError::Io { .. } | CoreError::Download { .. } | CoreError::DownloadStatus { .. } => {
                ErrorKind::Io
            }
        }
    }

    /// Name of the outermost failing step, if any.
    pub fn step(&self) -> Option<&'static str> {
        match self {
            CoreError::Step { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Wraps an error with the name of the step that produced it.
pub(crate) trait StepExt<T> {
    fn step(self, step: &'static str) -> Result<T>;
}

impl<T, E: Into<CoreError>> StepExt<T> for std::result::Result<T, E> {
    fn step(self, step: &'static str) -> Result<T> {
        self.map_err(|e| CoreError::Step {
            step,
            source: Box::new(e.into()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cloudinit_machine::RunResult;

    #[test]
    fn test_step_wrapping_keeps_inner_kind() {
        let inner: std::result::Result<(), MachineError> = Err(MachineError::ProcessFailed {
            result: Box::new(RunResult {
                command: "podman pull debian".into(),
                exit_code: 125,
                ..Default::default()
            }),
        });
        let err = inner.step("podman pull").unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessFailed);
        assert_eq!(err.step(), Some("podman pull"));
        assert_eq!(
            err.to_string(),
            "podman pull: command failed with exit code 125: podman pull debian"
        );
    }

    #[test]
    fn test_not_found_display() {
        let err = CoreError::NotFound {
            what: "velocloud qcow2 image".into(),
            path: PathBuf::from("images/velocloud.qcow2"),
        };
        assert_eq!(
            err.to_string(),
            "velocloud qcow2 image not found at images/velocloud.qcow2"
        );
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
