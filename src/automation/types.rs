// Types and enums for the automation loop
use crate::template_matching::{DEFAULT_THRESHOLD, MatchRequest, Region};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const MIN_INTERVAL: Duration = Duration::from_millis(100);
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Global controller state. There is no pause state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Stopped,
    Running,
}

/// Where to tap once a template matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TapPoint {
    /// Tap at the match's x and a fixed y; the target sits on a known row
    /// below the matched anchor.
    FixedY(u32),
    /// Tap relative to the match's top-left corner.
    Offset { dx: i32, dy: i32 },
}

impl TapPoint {
    pub fn resolve(&self, match_x: u32, match_y: u32) -> (u32, u32) {
        match *self {
            TapPoint::FixedY(y) => (match_x, y),
            TapPoint::Offset { dx, dy } => (shift(match_x, dx), shift(match_y, dy)),
        }
    }
}

fn shift(value: u32, delta: i32) -> u32 {
    (value as i64 + delta as i64).clamp(0, u32::MAX as i64) as u32
}

/// One entry of the priority list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateRule {
    pub template: String,
    pub threshold: f32,
    pub region: Option<Region>,
    pub tap: TapPoint,
}

impl TemplateRule {
    pub fn new(template: impl Into<String>, tap: TapPoint) -> Self {
        Self {
            template: template.into(),
            threshold: DEFAULT_THRESHOLD,
            region: None,
            tap,
        }
    }

    pub fn with_threshold(mut self, threshold: f32) -> Self {
        self.threshold = threshold;
        self
    }

    pub fn in_region(mut self, region: Option<Region>) -> Self {
        self.region = region;
        self
    }

    pub fn request(&self) -> MatchRequest<'_> {
        MatchRequest {
            template: &self.template,
            threshold: self.threshold,
            region: self.region,
        }
    }
}

/// Everything `Session::start` needs besides the device roster.
#[derive(Debug, Clone)]
pub struct AutomationPlan {
    /// Reloaded into the template store on start when set.
    pub template_dir: Option<PathBuf>,
    /// Priority order: first match wins.
    pub rules: Vec<TemplateRule>,
    pub interval: Duration,
}

impl AutomationPlan {
    pub fn new(rules: Vec<TemplateRule>) -> Self {
        Self {
            template_dir: None,
            rules,
            interval: DEFAULT_INTERVAL,
        }
    }

    pub fn with_template_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.template_dir = Some(dir.into());
        self
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = clamp_interval(interval);
        self
    }
}

pub fn clamp_interval(interval: Duration) -> Duration {
    interval.clamp(MIN_INTERVAL, MAX_INTERVAL)
}

/// Status notifications, in the order they happened.
#[derive(Debug, Clone, PartialEq)]
pub enum AutomationEvent {
    StateChanged(SessionState),
    CycleStarted {
        cycle: u64,
        devices: Vec<u32>,
    },
    Capturing {
        device: u32,
    },
    CaptureFailed {
        device: u32,
        error: String,
    },
    /// Capture failed and the emulator reports it is no longer running.
    DeviceDeselected {
        device: u32,
    },
    Matching {
        device: u32,
        template: String,
    },
    Matched {
        device: u32,
        template: String,
        x: u32,
        y: u32,
        score: f32,
    },
    Dispatching {
        device: u32,
        template: String,
        x: u32,
        y: u32,
    },
    TapFailed {
        device: u32,
        error: String,
    },
    NoMatch {
        device: u32,
    },
    NoDevicesSelected,
    Error(String),
}

impl AutomationEvent {
    pub fn device(&self) -> Option<u32> {
        match self {
            AutomationEvent::Capturing { device }
            | AutomationEvent::CaptureFailed { device, .. }
            | AutomationEvent::DeviceDeselected { device }
            | AutomationEvent::Matching { device, .. }
            | AutomationEvent::Matched { device, .. }
            | AutomationEvent::Dispatching { device, .. }
            | AutomationEvent::TapFailed { device, .. }
            | AutomationEvent::NoMatch { device } => Some(*device),
            _ => None,
        }
    }

    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            AutomationEvent::CaptureFailed { .. }
                | AutomationEvent::DeviceDeselected { .. }
                | AutomationEvent::TapFailed { .. }
                | AutomationEvent::Error(_)
        )
    }
}

impl fmt::Display for AutomationEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AutomationEvent::StateChanged(SessionState::Running) => write!(f, "Running"),
            AutomationEvent::StateChanged(SessionState::Stopped) => write!(f, "Stopped"),
            AutomationEvent::CycleStarted { cycle, devices } => {
                write!(f, "Cycle #{cycle} over {devices:?}")
            }
            AutomationEvent::Capturing { device } => write!(f, "[{device}] Capturing..."),
            AutomationEvent::CaptureFailed { device, error } => {
                write!(f, "[{device}] Capture failed, checking status: {error}")
            }
            AutomationEvent::DeviceDeselected { device } => {
                write!(f, "[{device}] Emulator is closed, deselected")
            }
            AutomationEvent::Matching { device, template } => {
                write!(f, "[{device}] Matching: {template}")
            }
            AutomationEvent::Matched {
                device,
                template,
                x,
                y,
                score,
            } => write!(f, "[{device}] Matched: {template} at ({x}, {y}) score {score:.3}"),
            AutomationEvent::Dispatching {
                device,
                template,
                x,
                y,
            } => write!(f, "[{device}] {template} -> tap ({x}, {y})"),
            AutomationEvent::TapFailed { device, error } => {
                write!(f, "[{device}] Tap failed: {error}")
            }
            AutomationEvent::NoMatch { device } => write!(f, "[{device}] No match"),
            AutomationEvent::NoDevicesSelected => write!(f, "No emulator selected"),
            AutomationEvent::Error(msg) => write!(f, "Error: {msg}"),
        }
    }
}
