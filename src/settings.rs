// Runtime settings: defaults, environment overrides and LDPlayer path detection
use crate::automation::{DEFAULT_INTERVAL, TapPoint, TemplateRule, clamp_interval};
use crate::template_matching::{DEFAULT_THRESHOLD, Region, TemplateStore};
use serde::{Deserialize, Serialize};
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const DRIVER_ENV: &str = "LDTRACE_DRIVER";
pub const CAPTURE_DIR_ENV: &str = "LDTRACE_CAPTURE_DIR";
pub const TEMPLATE_DIR_ENV: &str = "LDTRACE_TEMPLATE_DIR";

pub const DRIVER_FILE_NAME: &str = "ld.exe";
pub const DEFAULT_TEMPLATE_DIR: &str = "trace";
pub const DEFAULT_TAP_Y: u32 = 320;
pub const DEFAULT_SEARCH_REGION: Region = Region::new(180, 120, 430, 60);
pub const FALLBACK_CAPTURE_DIR: &str = r"D:\Screenshots";

/// Usual LDPlayer 9 install locations, tried in order.
pub const COMMON_DRIVER_PATHS: [&str; 6] = [
    r"C:\LDPlayer\LDPlayer9\ld.exe",
    r"D:\LDPlayer\LDPlayer9\ld.exe",
    r"E:\LDPlayer\LDPlayer9\ld.exe",
    r"F:\LDPlayer\LDPlayer9\ld.exe",
    r"C:\Program Files\LDPlayer\LDPlayer9\ld.exe",
    r"C:\XuanZhi\LDPlayer9\ld.exe",
];

/// Emulator config files that may carry the shared picture folder, relative
/// to the driver's directory.
const PLAYER_CONFIG_FILES: [&[&str]; 3] = [
    &["leidian.config"],
    &["vms", "config", "leidian.config"],
    &["vms", "config", "leidians.config"],
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub driver_path: Option<PathBuf>,
    pub capture_dir: Option<PathBuf>,
    pub template_dir: PathBuf,
    pub interval_secs: f64,
    /// Devices to select on refresh even when they are not running.
    pub selected_devices: Vec<u32>,
    /// Preferred template priority; unlisted templates follow sorted.
    pub template_order: Vec<String>,
    pub threshold: f32,
    pub search_region: Option<Region>,
    pub tap_y: u32,
    pub debug: bool,
    pub log_file: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            driver_path: None,
            capture_dir: None,
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
            interval_secs: DEFAULT_INTERVAL.as_secs_f64(),
            selected_devices: Vec::new(),
            template_order: Vec::new(),
            threshold: DEFAULT_THRESHOLD,
            search_region: Some(DEFAULT_SEARCH_REGION),
            tap_y: DEFAULT_TAP_Y,
            debug: false,
            log_file: None,
        }
    }
}

impl Settings {
    /// Defaults overridden by the process environment.
    pub fn from_env() -> Self {
        let mut settings = Self::default();
        settings.apply_env(|key| std::env::var_os(key));
        settings
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<OsString>) {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.is_empty()).map(PathBuf::from);
        if let Some(path) = non_empty(DRIVER_ENV) {
            self.driver_path = Some(path);
        }
        if let Some(path) = non_empty(CAPTURE_DIR_ENV) {
            self.capture_dir = Some(path);
        }
        if let Some(path) = non_empty(TEMPLATE_DIR_ENV) {
            self.template_dir = path;
        }
    }

    /// Fill in a missing or stale driver path and capture directory.
    pub fn resolve_paths(&mut self) {
        let driver_ok = self.driver_path.as_deref().is_some_and(Path::is_file);
        if !driver_ok {
            let detected = detect_driver(|p| p.is_file());
            match &detected {
                Some(path) => log::info!("🔍 Found emulator driver at {}", path.display()),
                None => log::warn!("⚠️ Could not find {} automatically", DRIVER_FILE_NAME),
            }
            // Keep a configured path for the error message when nothing is found
            if detected.is_some() || self.driver_path.is_none() {
                self.driver_path = detected;
            }
        }

        let capture_ok = self.capture_dir.as_deref().is_some_and(Path::is_dir);
        if !capture_ok {
            let detected = detect_capture_dir(self.driver_path.as_deref(), |p| p.is_dir());
            log::info!("🔍 Using capture directory {}", detected.display());
            self.capture_dir = Some(detected);
        }
    }

    pub fn interval(&self) -> Duration {
        if !self.interval_secs.is_finite() {
            return DEFAULT_INTERVAL;
        }
        clamp_interval(Duration::from_secs_f64(self.interval_secs.clamp(0.0, 3600.0)))
    }

    /// Build the rule list for the given template names: saved order first,
    /// then the rest sorted, all sharing the configured threshold, region
    /// and tap row.
    pub fn rules(&self, available: &[String]) -> Vec<TemplateRule> {
        TemplateStore::prioritize(&self.template_order, available)
            .into_iter()
            .map(|name| {
                TemplateRule::new(name, TapPoint::FixedY(self.tap_y))
                    .with_threshold(self.threshold)
                    .in_region(self.search_region)
            })
            .collect()
    }
}

/// First existing driver among the well-known install paths, then `PATH`.
pub fn detect_driver(exists: impl Fn(&Path) -> bool) -> Option<PathBuf> {
    let path_var = std::env::var_os("PATH").unwrap_or_default();
    let from_path = std::env::split_paths(&path_var).map(|dir| dir.join(DRIVER_FILE_NAME));

    COMMON_DRIVER_PATHS
        .iter()
        .map(PathBuf::from)
        .chain(from_path)
        .find(|candidate| exists(candidate.as_path()))
}

/// Where the emulator drops screenshots: the configured picture folder,
/// then the usual per-user folders, then a fixed fallback.
pub fn detect_capture_dir(driver: Option<&Path>, is_dir: impl Fn(&Path) -> bool) -> PathBuf {
    if let Some(dir) = driver.and_then(Path::parent) {
        for parts in PLAYER_CONFIG_FILES {
            let config = parts.iter().fold(dir.to_path_buf(), |p, part| p.join(part));
            let Ok(bytes) = std::fs::read(&config) else {
                continue;
            };
            let text = String::from_utf8_lossy(&bytes);
            if let Some(pictures) = parse_picture_path(&text)
                && is_dir(pictures.as_path())
            {
                log::debug!("picturePath from {}", config.display());
                return pictures;
            }
        }
    }

    let home = homedir::my_home().ok().flatten();
    if let Some(home) = home {
        let candidates = [
            home.join("Documents").join("XuanZhi9").join("Pictures"),
            home.join("Pictures").join("LDPlayer"),
        ];
        if let Some(found) = candidates.into_iter().find(|c| is_dir(c.as_path())) {
            return found;
        }
    }

    PathBuf::from(FALLBACK_CAPTURE_DIR)
}

/// Extract `"picturePath"` from an emulator config file. The value is a JSON
/// string, so backslashes arrive doubled.
pub fn parse_picture_path(config: &str) -> Option<PathBuf> {
    config.lines().find_map(|line| {
        let (_, rest) = line.split_once("\"picturePath\"")?;
        let (_, value) = rest.split_once(':')?;
        let value = value
            .trim()
            .trim_end_matches(',')
            .trim()
            .trim_matches('"')
            .replace("\\\\", "\\");
        (!value.is_empty()).then(|| PathBuf::from(value))
    })
}
