// Emulator roster owned by a session, shared with its automation loop
use crate::device::Device;
use tokio::sync::RwLock;

/// Ordered device list plus selection flags. The lock is never held across a
/// driver call.
#[derive(Debug, Default)]
pub struct DeviceRoster {
    devices: RwLock<Vec<Device>>,
}

impl DeviceRoster {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the roster. A device starts selected when it is running or
    /// was part of the saved selection. Returns the number selected.
    pub async fn replace(&self, mut devices: Vec<Device>, saved_selection: &[u32]) -> usize {
        for device in devices.iter_mut() {
            device.selected =
                device.last_known_running || saved_selection.contains(&device.index);
        }
        let selected = devices.iter().filter(|d| d.selected).count();
        log::info!(
            "📋 {} emulators listed, {} selected",
            devices.len(),
            selected
        );
        *self.devices.write().await = devices;
        selected
    }

    pub async fn snapshot(&self) -> Vec<Device> {
        self.devices.read().await.clone()
    }

    pub async fn selected_indices(&self) -> Vec<u32> {
        self.devices
            .read()
            .await
            .iter()
            .filter(|d| d.selected)
            .map(|d| d.index)
            .collect()
    }

    pub async fn is_selected(&self, index: u32) -> bool {
        self.devices
            .read()
            .await
            .iter()
            .any(|d| d.index == index && d.selected)
    }

    /// Returns false when the index is not in the roster.
    pub async fn set_selected(&self, index: u32, selected: bool) -> bool {
        let mut devices = self.devices.write().await;
        match devices.iter_mut().find(|d| d.index == index) {
            Some(device) => {
                device.selected = selected;
                true
            }
            None => false,
        }
    }

    pub async fn set_all(&self, selected: bool) {
        for device in self.devices.write().await.iter_mut() {
            device.selected = selected;
        }
    }

    /// Record that an emulator was found closed and drop it from the
    /// selection.
    pub async fn mark_closed(&self, index: u32) {
        if let Some(device) = self
            .devices
            .write()
            .await
            .iter_mut()
            .find(|d| d.index == index)
        {
            device.selected = false;
            device.last_known_running = false;
        }
    }

    pub async fn mark_running(&self, index: u32) {
        if let Some(device) = self
            .devices
            .write()
            .await
            .iter_mut()
            .find(|d| d.index == index)
        {
            device.last_known_running = true;
        }
    }
}
