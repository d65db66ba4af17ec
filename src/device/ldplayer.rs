use super::error::{DriverError, DriverResult};
use super::roster::{decode_console_output, parse_roster};
use super::types::{Device, DeviceDriver};
use super::wait::{CAPTURE_POLL_INTERVAL, CAPTURE_TIMEOUT, await_condition};
use image::DynamicImage;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;

/// Remote directory the emulator writes screenshots into. LDPlayer shares it
/// with the host as its picture folder.
const REMOTE_PICTURE_DIR: &str = "/sdcard/Pictures";

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Driver for LDPlayer instances, addressed by index through `ld.exe -s <index>`.
pub struct LdPlayer {
    driver_path: PathBuf,
    console_path: PathBuf,
    capture_dir: PathBuf,
}

impl LdPlayer {
    pub fn new(driver_path: impl Into<PathBuf>, capture_dir: impl Into<PathBuf>) -> Self {
        let driver_path = driver_path.into();
        let console_path = Self::resolve_console(&driver_path);
        Self {
            driver_path,
            console_path,
            capture_dir: capture_dir.into(),
        }
    }

    /// `ldconsole.exe` next to `ld.exe` when present, otherwise `ld.exe` itself
    /// (it accepts the same `list2` verb).
    pub fn resolve_console(driver_path: &Path) -> PathBuf {
        driver_path
            .parent()
            .map(|dir| dir.join("ldconsole.exe"))
            .filter(|candidate| candidate.is_file())
            .unwrap_or_else(|| driver_path.to_path_buf())
    }

    pub fn driver_path(&self) -> &Path {
        &self.driver_path
    }

    pub fn console_path(&self) -> &Path {
        &self.console_path
    }

    pub fn capture_file_name(index: u32) -> String {
        format!("trace_cap_{index}.png")
    }

    /// Host-side location of the screenshot for `index`.
    pub fn local_capture_path(&self, index: u32) -> PathBuf {
        self.capture_dir.join(Self::capture_file_name(index))
    }

    pub fn remote_capture_path(index: u32) -> String {
        format!("{REMOTE_PICTURE_DIR}/{}", Self::capture_file_name(index))
    }

    fn command(program: &Path) -> Command {
        let mut cmd = Command::new(program);
        #[cfg(windows)]
        cmd.creation_flags(CREATE_NO_WINDOW);
        cmd.kill_on_drop(true);
        cmd
    }

    async fn run_device_command(&self, index: u32, args: &[String]) -> DriverResult<()> {
        let command = format!("-s {index} {}", args.join(" "));
        log::debug!("[{index}] {} {}", self.driver_path.display(), command);
        let output = Self::command(&self.driver_path)
            .arg("-s")
            .arg(index.to_string())
            .args(args)
            .output()
            .await
            .map_err(|source| DriverError::SpawnFailed {
                command: command.clone(),
                source,
            })?;
        if !output.status.success() {
            return Err(DriverError::from_output(command, &output));
        }
        Ok(())
    }

    async fn remove_stale_capture(path: &Path) -> DriverResult<()> {
        match tokio::fs::remove_file(path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(DriverError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// `None` while the file is missing or still being written.
    async fn try_decode(path: &Path) -> Option<DynamicImage> {
        let bytes = tokio::fs::read(path).await.ok()?;
        match image::load_from_memory(&bytes) {
            Ok(img) => Some(img),
            Err(e) => {
                log::trace!("{} not decodable yet: {e}", path.display());
                None
            }
        }
    }

    /// Wait for a screenshot file to appear and decode.
    pub async fn wait_for_capture(
        path: &Path,
        poll_interval: Duration,
        timeout: Duration,
    ) -> Option<DynamicImage> {
        await_condition(|| Self::try_decode(path), poll_interval, timeout).await
    }
}

impl DeviceDriver for LdPlayer {
    fn ensure_available(&self) -> DriverResult<()> {
        if self.driver_path.as_os_str().is_empty() {
            return Err(DriverError::DriverNotConfigured);
        }
        if !self.driver_path.is_file() {
            return Err(DriverError::DriverNotFound {
                path: self.driver_path.clone(),
            });
        }
        Ok(())
    }

    async fn list_devices(&self) -> DriverResult<Vec<Device>> {
        self.ensure_available()?;
        let output = Self::command(&self.console_path)
            .arg("list2")
            .output()
            .await
            .map_err(|source| DriverError::SpawnFailed {
                command: "list2".to_string(),
                source,
            })?;
        if !output.status.success() {
            return Err(DriverError::from_output("list2".to_string(), &output));
        }
        let stdout = decode_console_output(&output.stdout);
        Ok(parse_roster(&stdout))
    }

    async fn capture(&self, index: u32) -> DriverResult<DynamicImage> {
        let local = self.local_capture_path(index);
        Self::remove_stale_capture(&local).await?;

        let args = [
            "screencap".to_string(),
            Self::remote_capture_path(index),
        ];
        self.run_device_command(index, &args).await?;

        Self::wait_for_capture(&local, CAPTURE_POLL_INTERVAL, CAPTURE_TIMEOUT)
            .await
            .ok_or(DriverError::CaptureTimeout {
                index,
                duration: CAPTURE_TIMEOUT,
                path: local,
            })
    }

    async fn tap(&self, index: u32, x: u32, y: u32) -> DriverResult<()> {
        let args = [
            "input".to_string(),
            "tap".to_string(),
            x.to_string(),
            y.to_string(),
        ];
        self.run_device_command(index, &args).await
    }
}
