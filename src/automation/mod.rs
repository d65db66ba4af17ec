// Automation module - multi-emulator capture, match and tap
pub mod channels;
pub mod cycle;
pub mod error;
pub mod selection;
pub mod session;
pub mod types;

#[cfg(test)]
mod tests;

pub use channels::{StatusReporter, create_event_channel};
pub use cycle::evaluate_rules;
pub use error::{AutomationError, SessionError};
pub use selection::DeviceRoster;
pub use session::Session;
pub use types::{
    AutomationEvent, AutomationPlan, DEFAULT_INTERVAL, SessionState, TapPoint, TemplateRule,
    clamp_interval,
};
