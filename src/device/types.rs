// Core device types and the driver trait
use super::error::DriverResult;
use image::DynamicImage;
use serde::Serialize;
use std::future::Future;

/// One emulator instance as reported by the console roster.
#[derive(Debug, PartialEq, Serialize, Clone)]
pub struct Device {
    pub index: u32,
    pub name: String,
    pub selected: bool,
    pub last_known_running: bool,
}

impl Device {
    pub fn new(index: u32, name: impl Into<String>, running: bool) -> Self {
        Self {
            index,
            name: name.into(),
            selected: false,
            last_known_running: running,
        }
    }

    pub fn label(&self) -> String {
        format!("{}: {}", self.index, self.name)
    }
}

// Trait defining emulator control capabilities.
// Futures are `Send` so the automation loop can run on a spawned task.
pub trait DeviceDriver: Send + Sync {
    /// Fails when the driver executable cannot be resolved.
    fn ensure_available(&self) -> DriverResult<()>;

    fn list_devices(&self) -> impl Future<Output = DriverResult<Vec<Device>>> + Send;

    /// Request a fresh screenshot and wait until it decodes.
    fn capture(&self, index: u32) -> impl Future<Output = DriverResult<DynamicImage>> + Send;

    fn tap(&self, index: u32, x: u32, y: u32) -> impl Future<Output = DriverResult<()>> + Send;

    /// Liveness check, only used after a failed capture.
    fn is_running(&self, index: u32) -> impl Future<Output = DriverResult<bool>> + Send {
        async move {
            let devices = self.list_devices().await?;
            Ok(devices
                .iter()
                .find(|d| d.index == index)
                .map(|d| d.last_known_running)
                .unwrap_or(false))
        }
    }
}
