use std::path::PathBuf;
use thiserror::Error;

/// A specialized `Result` type for emulator driver operations.
pub type DriverResult<T> = Result<T, DriverError>;

/// The error type for all emulator driver operations.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("Emulator driver not found at {path:?}. Set --driver or LDTRACE_DRIVER to ld.exe")]
    DriverNotFound { path: PathBuf },

    #[error("No emulator driver configured")]
    DriverNotConfigured,

    #[error("Failed to launch '{command}': {source}")]
    SpawnFailed {
        command: String,
        source: std::io::Error,
    },

    #[error("Command '{command}' exited with {status}: {stderr}")]
    CommandFailed {
        command: String,
        status: std::process::ExitStatus,
        stderr: String,
    },

    #[error("Screenshot for device {index} not ready after {duration:?} ({path:?})")]
    CaptureTimeout {
        index: u32,
        duration: std::time::Duration,
        path: PathBuf,
    },

    #[error("Failed to decode screenshot {path:?}: {source}")]
    DecodeFailed {
        path: PathBuf,
        source: image::ImageError,
    },

    #[error("Filesystem error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Device {index} is not in the emulator list")]
    UnknownDevice { index: u32 },
}

impl DriverError {
    /// Configuration problems stop a session from starting; everything else is
    /// transient and retried on the next cycle.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            DriverError::DriverNotFound { .. } | DriverError::DriverNotConfigured
        )
    }

    /// Build a `CommandFailed` from a finished process output.
    pub fn from_output(command: String, output: &std::process::Output) -> Self {
        DriverError::CommandFailed {
            command,
            status: output.status,
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        }
    }
}
