pub mod args;
pub mod automation;
pub mod device;
pub mod settings;
pub mod template_matching;

pub use automation::{AutomationEvent, AutomationPlan, Session, SessionState};
pub use device::{DeviceDriver, LdPlayer};
pub use settings::Settings;
pub use template_matching::TemplateStore;
