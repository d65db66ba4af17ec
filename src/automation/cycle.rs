// Per-device capture -> match -> tap loop
use super::channels::StatusReporter;
use super::error::AutomationError;
use super::selection::DeviceRoster;
use super::types::{AutomationEvent, SessionState, TemplateRule};
use crate::device::{DeviceDriver, DriverError};
use crate::template_matching::{MatchResult, Matcher};
use image::RgbImage;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::{Duration, sleep};

/// Move a run to `Stopped`. Returns true when this call made the transition.
pub(super) fn halt(control: &watch::Sender<SessionState>, reporter: &StatusReporter) -> bool {
    let changed = control.send_if_modified(|state| {
        let was_running = *state == SessionState::Running;
        *state = SessionState::Stopped;
        was_running
    });
    if changed {
        reporter.emit(AutomationEvent::StateChanged(SessionState::Stopped));
    }
    changed
}

pub struct AutomationLoop<D, M> {
    driver: Arc<D>,
    matcher: Arc<M>,
    roster: Arc<DeviceRoster>,
    rules: Arc<[TemplateRule]>,
    interval: Duration,
    control: Arc<watch::Sender<SessionState>>,
    reporter: StatusReporter,
}

impl<D, M> AutomationLoop<D, M>
where
    D: DeviceDriver + 'static,
    M: Matcher + 'static,
{
    pub(super) fn new(
        driver: Arc<D>,
        matcher: Arc<M>,
        roster: Arc<DeviceRoster>,
        rules: Vec<TemplateRule>,
        interval: Duration,
        control: Arc<watch::Sender<SessionState>>,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            driver,
            matcher,
            roster,
            rules: rules.into(),
            interval,
            control,
            reporter,
        }
    }

    fn is_running(&self) -> bool {
        *self.control.borrow() == SessionState::Running
    }

    pub async fn run(self) -> Result<(), AutomationError> {
        log::info!(
            "🎮 Automation loop started ({} rules, interval {:?})",
            self.rules.len(),
            self.interval
        );
        let mut state_rx = self.control.subscribe();
        let mut cycle = 0u64;

        while self.is_running() {
            let devices = self.roster.selected_indices().await;
            if devices.is_empty() {
                self.reporter.emit(AutomationEvent::NoDevicesSelected);
                halt(&self.control, &self.reporter);
                break;
            }

            cycle += 1;
            self.reporter.emit(AutomationEvent::CycleStarted {
                cycle,
                devices: devices.clone(),
            });
            for index in devices {
                if !self.is_running() {
                    break;
                }
                // Deselected from outside since the cycle began
                if !self.roster.is_selected(index).await {
                    continue;
                }
                self.process_device(index).await?;
            }

            if !self.is_running() {
                break;
            }
            self.pause(&mut state_rx).await;
        }

        log::info!("🎮 Automation loop ended after {} cycles", cycle);
        Ok(())
    }

    /// Sleep for the interval, or until the run is stopped.
    async fn pause(&self, state_rx: &mut watch::Receiver<SessionState>) {
        tokio::select! {
            _ = sleep(self.interval) => {}
            _ = wait_for_stop(state_rx) => {
                log::debug!("Pause interrupted by stop");
            }
        }
    }

    async fn process_device(&self, index: u32) -> Result<(), AutomationError> {
        self.reporter.emit(AutomationEvent::Capturing { device: index });
        let capture = match self.driver.capture(index).await {
            Ok(image) => image,
            Err(e) => {
                self.handle_capture_failure(index, e).await;
                return Ok(());
            }
        };

        let matcher = Arc::clone(&self.matcher);
        let rules = Arc::clone(&self.rules);
        let reporter = self.reporter.clone();
        let hit = tokio::task::spawn_blocking(move || {
            let frame = capture.to_rgb8();
            evaluate_rules(index, &frame, matcher.as_ref(), &rules, &reporter)
        })
        .await?;

        match hit {
            Some((position, result)) => self.dispatch(index, &self.rules[position], &result).await,
            None => self.reporter.emit(AutomationEvent::NoMatch { device: index }),
        }
        Ok(())
    }

    async fn handle_capture_failure(&self, index: u32, error: DriverError) {
        self.reporter.emit(AutomationEvent::CaptureFailed {
            device: index,
            error: error.to_string(),
        });
        // A status check that cannot answer counts as closed
        let running = match self.driver.is_running(index).await {
            Ok(running) => running,
            Err(e) => {
                log::warn!("⚠️ [{}] Status check failed: {}", index, e);
                false
            }
        };
        if running {
            self.roster.mark_running(index).await;
            log::debug!("[{}] Still running, retrying next cycle", index);
        } else {
            self.roster.mark_closed(index).await;
            self.reporter
                .emit(AutomationEvent::DeviceDeselected { device: index });
        }
    }

    async fn dispatch(&self, index: u32, rule: &TemplateRule, result: &MatchResult) {
        let (x, y) = rule.tap.resolve(result.x, result.y);
        self.reporter.emit(AutomationEvent::Dispatching {
            device: index,
            template: rule.template.clone(),
            x,
            y,
        });
        if let Err(e) = self.driver.tap(index, x, y).await {
            self.reporter.emit(AutomationEvent::TapFailed {
                device: index,
                error: e.to_string(),
            });
        }
    }
}

async fn wait_for_stop(state_rx: &mut watch::Receiver<SessionState>) {
    loop {
        if *state_rx.borrow_and_update() == SessionState::Stopped {
            return;
        }
        if state_rx.changed().await.is_err() {
            return;
        }
    }
}

/// Try each rule in order against one capture; the first success wins and
/// later rules are not evaluated.
pub fn evaluate_rules<M: Matcher + ?Sized>(
    device: u32,
    capture: &RgbImage,
    matcher: &M,
    rules: &[TemplateRule],
    reporter: &StatusReporter,
) -> Option<(usize, MatchResult)> {
    for (position, rule) in rules.iter().enumerate() {
        reporter.emit(AutomationEvent::Matching {
            device,
            template: rule.template.clone(),
        });
        let result = matcher.find(capture, &rule.request());
        if result.success {
            reporter.emit(AutomationEvent::Matched {
                device,
                template: rule.template.clone(),
                x: result.x,
                y: result.y,
                score: result.score,
            });
            return Some((position, result));
        }
    }
    None
}
