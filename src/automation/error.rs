use crate::device::DriverError;
use crate::template_matching::TemplateError;
use thiserror::Error;

/// Reasons a session refuses to start.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("No emulator selected")]
    NoDeviceSelected,

    #[error("Emulator driver unavailable: {0}")]
    Driver(#[from] DriverError),

    #[error("Templates could not be loaded: {0}")]
    Templates(#[from] TemplateError),

    #[error("Template loader failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Unexpected failures that end a running session.
#[derive(Debug, Error)]
pub enum AutomationError {
    #[error("Matching worker failed: {0}")]
    Worker(#[from] tokio::task::JoinError),

    #[error("Automation loop panicked: {0}")]
    Panicked(String),
}
