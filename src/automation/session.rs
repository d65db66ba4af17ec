// Session controller: owns the roster, the template store and the run state
use super::channels::StatusReporter;
use super::cycle::{AutomationLoop, halt};
use super::error::{AutomationError, SessionError};
use super::selection::DeviceRoster;
use super::types::{AutomationEvent, AutomationPlan, SessionState, clamp_interval};
use crate::device::{Device, DeviceDriver, DriverResult};
use crate::template_matching::{Matcher, RegionMatcher, TemplateStore};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{OwnedMutexGuard, watch};
use tokio::task::JoinHandle;

type RunControl = Arc<watch::Sender<SessionState>>;

pub struct Session<D, M = RegionMatcher> {
    driver: Arc<D>,
    matcher: Arc<M>,
    store: Arc<TemplateStore>,
    roster: Arc<DeviceRoster>,
    reporter: StatusReporter,
    // Each run gets its own control channel so a loop that is still finishing
    // its last device never observes a later run's state.
    control: Mutex<RunControl>,
    task: Mutex<Option<JoinHandle<()>>>,
    starting: tokio::sync::Mutex<()>,
    // Held by the supervisor for the lifetime of a run; at most one loop
    // drives the devices at a time.
    run_slot: Arc<tokio::sync::Mutex<()>>,
}

fn stopped_control() -> RunControl {
    let (tx, _) = watch::channel(SessionState::Stopped);
    Arc::new(tx)
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

impl<D: DeviceDriver + 'static> Session<D, RegionMatcher> {
    pub fn new(driver: D, store: Arc<TemplateStore>, reporter: StatusReporter) -> Self {
        let matcher = RegionMatcher::new(Arc::clone(&store));
        Self::with_matcher(driver, store, matcher, reporter)
    }
}

impl<D, M> Session<D, M>
where
    D: DeviceDriver + 'static,
    M: Matcher + 'static,
{
    pub fn with_matcher(
        driver: D,
        store: Arc<TemplateStore>,
        matcher: M,
        reporter: StatusReporter,
    ) -> Self {
        Self {
            driver: Arc::new(driver),
            matcher: Arc::new(matcher),
            store,
            roster: Arc::new(DeviceRoster::new()),
            reporter,
            control: Mutex::new(stopped_control()),
            task: Mutex::new(None),
            starting: tokio::sync::Mutex::new(()),
            run_slot: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn driver(&self) -> &Arc<D> {
        &self.driver
    }

    pub fn matcher(&self) -> &Arc<M> {
        &self.matcher
    }

    pub fn store(&self) -> &Arc<TemplateStore> {
        &self.store
    }

    fn current_control(&self) -> RunControl {
        Arc::clone(&lock(&self.control))
    }

    pub fn state(&self) -> SessionState {
        *self.current_control().borrow()
    }

    /// Replace the roster with the driver's current list. Returns the number
    /// of devices selected.
    pub async fn refresh_devices(&self, saved_selection: &[u32]) -> DriverResult<usize> {
        let devices = self.driver.list_devices().await?;
        Ok(self.roster.replace(devices, saved_selection).await)
    }

    pub async fn devices(&self) -> Vec<Device> {
        self.roster.snapshot().await
    }

    pub async fn selected_indices(&self) -> Vec<u32> {
        self.roster.selected_indices().await
    }

    /// Returns false for an index that is not in the roster.
    pub async fn set_selected(&self, index: u32, selected: bool) -> bool {
        self.roster.set_selected(index, selected).await
    }

    pub async fn select_all(&self) {
        self.roster.set_all(true).await;
    }

    pub async fn deselect_all(&self) {
        self.roster.set_all(false).await;
    }

    /// Validate, reload templates and spawn the automation loop. Calling this
    /// while already running does nothing. After a `stop`, the new loop is
    /// spawned only once the previous one has exited.
    pub async fn start(&self, plan: AutomationPlan) -> Result<(), SessionError> {
        let _starting = self.starting.lock().await;
        if self.state() == SessionState::Running {
            log::debug!("Automation already running, ignoring start");
            return Ok(());
        }

        if self.roster.selected_indices().await.is_empty() {
            return Err(SessionError::NoDeviceSelected);
        }
        self.driver.ensure_available()?;

        if let Some(dir) = plan.template_dir.clone() {
            let store = Arc::clone(&self.store);
            let count = tokio::task::spawn_blocking(move || store.load(&dir)).await??;
            if count == 0 {
                log::warn!("⚠️ No templates loaded, nothing will match");
            }
        }
        for rule in &plan.rules {
            if self.store.get(&rule.template).is_none() {
                log::debug!("Template {} is not in the store", rule.template);
            }
        }

        // A stopped loop may still be finishing its current device
        let slot = match Arc::clone(&self.run_slot).try_lock_owned() {
            Ok(slot) => slot,
            Err(_) => {
                log::debug!("Waiting for the previous run to finish");
                Arc::clone(&self.run_slot).lock_owned().await
            }
        };

        let (tx, _) = watch::channel(SessionState::Running);
        let control = Arc::new(tx);
        *lock(&self.control) = Arc::clone(&control);
        self.reporter
            .emit(AutomationEvent::StateChanged(SessionState::Running));

        let automation = AutomationLoop::new(
            Arc::clone(&self.driver),
            Arc::clone(&self.matcher),
            Arc::clone(&self.roster),
            plan.rules,
            clamp_interval(plan.interval),
            Arc::clone(&control),
            self.reporter.clone(),
        );
        let handle = tokio::spawn(supervise(automation, control, self.reporter.clone(), slot));
        *lock(&self.task) = Some(handle);
        Ok(())
    }

    /// Request a stop. The device being processed finishes; nothing new starts.
    pub fn stop(&self) {
        if halt(&self.current_control(), &self.reporter) {
            log::info!("⏹️ Stop requested");
        }
    }

    /// Wait for the most recently started loop to finish.
    pub async fn wait(&self) {
        let handle = lock(&self.task).take();
        if let Some(handle) = handle
            && let Err(e) = handle.await
        {
            log::error!("Automation supervisor failed: {}", e);
        }
    }
}

/// Run the loop on its own task so a panic is caught here, then make sure
/// the run ends up `Stopped`. The run slot is released on return.
async fn supervise<D, M>(
    automation: AutomationLoop<D, M>,
    control: Arc<watch::Sender<SessionState>>,
    reporter: StatusReporter,
    _slot: OwnedMutexGuard<()>,
) where
    D: DeviceDriver + 'static,
    M: Matcher + 'static,
{
    let outcome = match tokio::spawn(automation.run()).await {
        Ok(result) => result,
        Err(e) if e.is_panic() => Err(AutomationError::Panicked(e.to_string())),
        Err(e) => Err(AutomationError::Worker(e)),
    };
    if let Err(e) = outcome {
        reporter.emit(AutomationEvent::Error(e.to_string()));
    }
    halt(&control, &reporter);
}
