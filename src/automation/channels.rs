// Communication channels for the automation loop
use super::types::AutomationEvent;
use tokio::sync::mpsc;

/// Sending half of the event stream. Every event is also written to the log;
/// a reporter without a receiver only logs.
#[derive(Clone, Debug, Default)]
pub struct StatusReporter {
    tx: Option<mpsc::UnboundedSender<AutomationEvent>>,
}

impl StatusReporter {
    pub fn new(tx: mpsc::UnboundedSender<AutomationEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    pub fn log_only() -> Self {
        Self { tx: None }
    }

    pub fn emit(&self, event: AutomationEvent) {
        match &event {
            AutomationEvent::Error(_) => log::error!("❌ {}", event),
            e if e.is_failure() => log::warn!("⚠️ {}", event),
            AutomationEvent::Matching { .. } | AutomationEvent::CycleStarted { .. } => {
                log::debug!("{}", event)
            }
            _ => log::info!("{}", event),
        }
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is watching anymore
            let _ = tx.send(event);
        }
    }
}

/// Helper function to create the event channel
pub fn create_event_channel() -> (StatusReporter, mpsc::UnboundedReceiver<AutomationEvent>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (StatusReporter::new(tx), rx)
}
