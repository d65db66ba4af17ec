//! Tests for the automation loop and session controller

use super::*;
use crate::device::{Device, DeviceDriver, DriverError, DriverResult};
use crate::template_matching::{
    MatchRequest, MatchResult, Matcher, Region, Template, TemplateStore,
};
use image::{DynamicImage, Rgb, RgbImage};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, mpsc};
use tokio::time::{Duration, Instant, timeout};

#[derive(Debug, Clone, PartialEq)]
enum Call {
    Capture(u32),
    Tap(u32, u32, u32),
}

/// Blocks the first capture of one device until released.
struct CaptureGate {
    device: u32,
    armed: AtomicBool,
    reached: Arc<Notify>,
    release: Arc<Notify>,
}

impl CaptureGate {
    fn on(device: u32) -> Self {
        Self {
            device,
            armed: AtomicBool::new(true),
            reached: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[derive(Default)]
struct FakeDriver {
    devices: Vec<Device>,
    frames: HashMap<u32, RgbImage>,
    unavailable: bool,
    fail_taps: bool,
    status_unknown: bool,
    gate: Option<CaptureGate>,
    calls: Mutex<Vec<Call>>,
    in_flight: AtomicUsize,
    overlapped: AtomicBool,
}

impl FakeDriver {
    fn with_devices(devices: Vec<Device>) -> Self {
        Self {
            devices,
            ..Default::default()
        }
    }

    fn frame(mut self, index: u32, image: RgbImage) -> Self {
        self.frames.insert(index, image);
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }

    fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    /// True when two captures were ever in progress at once.
    fn overlapped(&self) -> bool {
        self.overlapped.load(Ordering::SeqCst)
    }

    fn taps(&self) -> Vec<Call> {
        self.calls()
            .into_iter()
            .filter(|c| matches!(c, Call::Tap(..)))
            .collect()
    }
}

impl DeviceDriver for FakeDriver {
    fn ensure_available(&self) -> DriverResult<()> {
        if self.unavailable {
            Err(DriverError::DriverNotConfigured)
        } else {
            Ok(())
        }
    }

    async fn list_devices(&self) -> DriverResult<Vec<Device>> {
        Ok(self.devices.clone())
    }

    async fn capture(&self, index: u32) -> DriverResult<DynamicImage> {
        self.record(Call::Capture(index));
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlapped.store(true, Ordering::SeqCst);
        }
        if let Some(gate) = &self.gate
            && gate.device == index
            && gate.armed.swap(false, Ordering::SeqCst)
        {
            gate.reached.notify_one();
            gate.release.notified().await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        match self.frames.get(&index) {
            Some(frame) => Ok(DynamicImage::ImageRgb8(frame.clone())),
            None => Err(DriverError::CaptureTimeout {
                index,
                duration: Duration::from_secs(5),
                path: PathBuf::from(format!("trace_cap_{index}.png")),
            }),
        }
    }

    async fn tap(&self, index: u32, x: u32, y: u32) -> DriverResult<()> {
        self.record(Call::Tap(index, x, y));
        if self.fail_taps {
            return Err(DriverError::UnknownDevice { index });
        }
        Ok(())
    }

    async fn is_running(&self, index: u32) -> DriverResult<bool> {
        if self.status_unknown {
            return Err(DriverError::CommandFailed {
                command: "list2".to_string(),
                status: std::process::ExitStatus::default(),
                stderr: "console busy".to_string(),
            });
        }
        Ok(self
            .devices
            .iter()
            .any(|d| d.index == index && d.last_known_running))
    }
}

/// Reports success for a fixed set of names and records every lookup.
#[derive(Default)]
struct ScriptedMatcher {
    hits: HashSet<String>,
    asked: Mutex<Vec<String>>,
}

impl ScriptedMatcher {
    fn hitting(names: &[&str]) -> Self {
        Self {
            hits: names.iter().map(|n| n.to_string()).collect(),
            ..Default::default()
        }
    }

    fn asked(&self) -> Vec<String> {
        self.asked.lock().unwrap().clone()
    }
}

impl Matcher for ScriptedMatcher {
    fn find(&self, _capture: &RgbImage, request: &MatchRequest<'_>) -> MatchResult {
        self.asked.lock().unwrap().push(request.template.to_string());
        MatchResult {
            success: self.hits.contains(request.template),
            x: 10,
            y: 20,
            score: 1.0,
        }
    }
}

fn noise(width: u32, height: u32, seed: u64) -> RgbImage {
    let mut state = seed;
    RgbImage::from_fn(width, height, |_, _| {
        state = state
            .wrapping_mul(6364136223846793005)
            .wrapping_add(1442695040888963407);
        Rgb([(state >> 56) as u8, (state >> 48) as u8, (state >> 40) as u8])
    })
}

fn blank() -> RgbImage {
    RgbImage::new(32, 32)
}

fn rule(name: &str) -> TemplateRule {
    TemplateRule::new(name, TapPoint::Offset { dx: 0, dy: 0 })
}

fn quick_plan(rules: Vec<TemplateRule>) -> AutomationPlan {
    AutomationPlan::new(rules).with_interval(Duration::from_millis(100))
}

async fn next_device_event(rx: &mut mpsc::UnboundedReceiver<AutomationEvent>) -> AutomationEvent {
    loop {
        let event = rx.recv().await.expect("event channel closed");
        if event.device().is_some() {
            return event;
        }
    }
}

async fn finish<D, M>(session: &Session<D, M>)
where
    D: DeviceDriver + 'static,
    M: Matcher + 'static,
{
    timeout(Duration::from_secs(120), session.wait())
        .await
        .expect("loop did not finish");
}

#[test]
fn test_tap_point_resolve() {
    assert_eq!(TapPoint::FixedY(320).resolve(230, 130), (230, 320));
    assert_eq!(TapPoint::Offset { dx: 5, dy: -3 }.resolve(10, 10), (15, 7));
    assert_eq!(TapPoint::Offset { dx: -50, dy: 0 }.resolve(10, 10), (0, 10));
}

#[test]
fn test_interval_is_clamped() {
    assert_eq!(clamp_interval(Duration::ZERO), Duration::from_millis(100));
    assert_eq!(clamp_interval(Duration::from_secs(600)), Duration::from_secs(60));
    assert_eq!(clamp_interval(Duration::from_secs(2)), Duration::from_secs(2));
    assert_eq!(AutomationPlan::new(vec![]).interval, DEFAULT_INTERVAL);
}

#[test]
fn test_event_status_lines() {
    let event = AutomationEvent::Dispatching {
        device: 3,
        template: "ok.png".into(),
        x: 230,
        y: 320,
    };
    assert_eq!(event.to_string(), "[3] ok.png -> tap (230, 320)");
    assert!(AutomationEvent::TapFailed { device: 1, error: "x".into() }.is_failure());
    assert!(!AutomationEvent::NoMatch { device: 1 }.is_failure());
}

#[test]
fn test_evaluate_rules_stops_at_first_success() {
    let matcher = ScriptedMatcher::hitting(&["second.png", "third.png"]);
    let (reporter, mut rx) = create_event_channel();
    let rules = vec![rule("first.png"), rule("second.png"), rule("third.png")];

    let hit = evaluate_rules(4, &blank(), &matcher, &rules, &reporter);

    let (position, result) = hit.unwrap();
    assert_eq!(position, 1);
    assert_eq!(result.location(), (10, 20));
    assert_eq!(matcher.asked(), vec!["first.png", "second.png"]);

    let mut names = Vec::new();
    while let Ok(event) = rx.try_recv() {
        if let AutomationEvent::Matching { template, .. } = event {
            names.push(template);
        }
    }
    assert_eq!(names, vec!["first.png", "second.png"]);
}

#[test]
fn test_evaluate_rules_without_match() {
    let matcher = ScriptedMatcher::hitting(&[]);
    let rules = vec![rule("a.png"), rule("b.png")];
    let hit = evaluate_rules(0, &blank(), &matcher, &rules, &StatusReporter::log_only());
    assert!(hit.is_none());
    assert_eq!(matcher.asked().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_end_to_end_region_match_and_tap() {
    let frame = noise(640, 360, 11);
    let target = image::imageops::crop_imm(&frame, 230, 130, 40, 20).to_image();
    let store = Arc::new(TemplateStore::new());
    store.insert_all(vec![
        Template::new("A.png", noise(40, 20, 77)),
        Template::new("B.png", target),
    ]);

    let region = Some(Region::new(180, 120, 430, 60));
    let rules = vec![
        TemplateRule::new("A.png", TapPoint::FixedY(320)).in_region(region),
        TemplateRule::new("B.png", TapPoint::FixedY(320)).in_region(region),
    ];

    let driver = FakeDriver::with_devices(vec![Device::new(0, "main", true)]).frame(0, frame);
    let (reporter, mut rx) = create_event_channel();
    let session = Session::new(driver, store, reporter);
    assert_eq!(session.refresh_devices(&[]).await.unwrap(), 1);

    session.start(AutomationPlan::new(rules)).await.unwrap();
    assert_eq!(session.state(), SessionState::Running);

    let mut sequence = Vec::new();
    loop {
        let event = next_device_event(&mut rx).await;
        let done = matches!(event, AutomationEvent::Dispatching { .. });
        sequence.push(event);
        if done {
            break;
        }
    }
    session.stop();
    finish(&session).await;

    assert_eq!(sequence.len(), 5, "{sequence:?}");
    assert_eq!(sequence[0], AutomationEvent::Capturing { device: 0 });
    assert_eq!(
        sequence[1],
        AutomationEvent::Matching {
            device: 0,
            template: "A.png".into()
        }
    );
    assert_eq!(
        sequence[2],
        AutomationEvent::Matching {
            device: 0,
            template: "B.png".into()
        }
    );
    assert!(matches!(
        &sequence[3],
        AutomationEvent::Matched { template, x: 230, y: 130, score, .. }
            if template == "B.png" && *score > 0.99
    ));
    assert_eq!(
        sequence[4],
        AutomationEvent::Dispatching {
            device: 0,
            template: "B.png".into(),
            x: 230,
            y: 320
        }
    );
    assert_eq!(session.driver().taps()[0], Call::Tap(0, 230, 320));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_priority_order_through_session() {
    let driver = FakeDriver::with_devices(vec![Device::new(2, "alt", true)]).frame(2, blank());
    let matcher = ScriptedMatcher::hitting(&["mid.png", "last.png"]);
    let (reporter, mut rx) = create_event_channel();
    let session =
        Session::with_matcher(driver, Arc::new(TemplateStore::new()), matcher, reporter);
    session.refresh_devices(&[]).await.unwrap();

    let rules = vec![
        rule("first.png"),
        TemplateRule::new("mid.png", TapPoint::Offset { dx: 1, dy: 2 }),
        rule("last.png"),
    ];
    session.start(quick_plan(rules)).await.unwrap();
    while !matches!(
        next_device_event(&mut rx).await,
        AutomationEvent::Dispatching { .. }
    ) {}
    session.stop();
    finish(&session).await;

    let asked = session.matcher().asked();
    assert_eq!(&asked[..2], &["first.png", "mid.png"]);
    assert!(!asked.contains(&"last.png".to_string()));
    assert_eq!(session.driver().taps()[0], Call::Tap(2, 11, 22));
}

#[tokio::test(start_paused = true)]
async fn test_closed_emulator_is_deselected_without_tap() {
    // saved as selected but reported as not running, and no frame to capture
    let driver = FakeDriver::with_devices(vec![Device::new(0, "gone", false)]);
    let (reporter, mut rx) = create_event_channel();
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::hitting(&["a.png"]),
        reporter,
    );
    assert_eq!(session.refresh_devices(&[0]).await.unwrap(), 1);

    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();
    finish(&session).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&AutomationEvent::DeviceDeselected { device: 0 }));
    assert!(events.contains(&AutomationEvent::NoDevicesSelected));
    assert_eq!(
        events.last(),
        Some(&AutomationEvent::StateChanged(SessionState::Stopped))
    );
    assert!(session.driver().taps().is_empty());
    assert!(session.matcher().asked().is_empty());

    let devices = session.devices().await;
    assert!(!devices[0].selected);
    assert!(!devices[0].last_known_running);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_transient_capture_failure_keeps_device() {
    // running but without a frame: failure is transient
    let driver = FakeDriver::with_devices(vec![Device::new(5, "busy", true)]);
    let (reporter, mut rx) = create_event_channel();
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::default(),
        reporter,
    );
    session.refresh_devices(&[]).await.unwrap();
    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();

    // two failed cycles in a row
    let mut failures = 0;
    while failures < 2 {
        if let AutomationEvent::CaptureFailed { device, .. } = next_device_event(&mut rx).await {
            assert_eq!(device, 5);
            failures += 1;
        }
    }
    session.stop();
    finish(&session).await;

    assert_eq!(session.selected_indices().await, vec![5]);
    assert!(session.driver().taps().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_status_check_deselects_device() {
    let mut driver = FakeDriver::with_devices(vec![Device::new(4, "flaky", true)]);
    driver.status_unknown = true;
    let (reporter, mut rx) = create_event_channel();
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::hitting(&["a.png"]),
        reporter,
    );
    session.refresh_devices(&[]).await.unwrap();
    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();
    finish(&session).await;

    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    assert!(events.contains(&AutomationEvent::DeviceDeselected { device: 4 }));
    assert!(events.contains(&AutomationEvent::NoDevicesSelected));
    assert!(session.selected_indices().await.is_empty());
    assert!(session.driver().taps().is_empty());
    assert_eq!(session.driver().calls(), vec![Call::Capture(4)]);
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_between_devices_leaves_rest_untouched() {
    let gate = CaptureGate::on(1);
    let (reached, release) = (Arc::clone(&gate.reached), Arc::clone(&gate.release));
    let mut driver = FakeDriver::with_devices(vec![
        Device::new(1, "one", true),
        Device::new(2, "two", true),
        Device::new(3, "three", true),
    ])
    .frame(1, blank())
    .frame(2, blank())
    .frame(3, blank());
    driver.gate = Some(gate);

    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::hitting(&["a.png"]),
        StatusReporter::log_only(),
    );
    session.refresh_devices(&[]).await.unwrap();
    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();

    reached.notified().await;
    session.stop();
    release.notify_one();
    finish(&session).await;

    // device 1 completes its capture-match-tap, the others never start
    assert_eq!(
        session.driver().calls(),
        vec![Call::Capture(1), Call::Tap(1, 10, 20)]
    );
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_restart_waits_for_stopped_loop() {
    let gate = CaptureGate::on(1);
    let (reached, release) = (Arc::clone(&gate.reached), Arc::clone(&gate.release));
    let mut driver = FakeDriver::with_devices(vec![Device::new(1, "one", true)]).frame(1, blank());
    driver.gate = Some(gate);
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::hitting(&["a.png"]),
        StatusReporter::log_only(),
    );
    session.refresh_devices(&[]).await.unwrap();
    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();

    reached.notified().await;
    session.stop();
    // restart while the first loop is still inside its capture
    let (restarted, ()) = tokio::join!(session.start(quick_plan(vec![rule("a.png")])), async {
        tokio::task::yield_now().await;
        assert_eq!(session.driver().calls(), vec![Call::Capture(1)]);
        release.notify_one();
    });
    restarted.unwrap();
    assert_eq!(session.state(), SessionState::Running);

    while session.driver().taps().len() < 2 {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    session.stop();
    finish(&session).await;

    let calls = session.driver().calls();
    assert_eq!(
        &calls[..4],
        &[
            Call::Capture(1),
            Call::Tap(1, 10, 20),
            Call::Capture(1),
            Call::Tap(1, 10, 20)
        ]
    );
    assert!(!session.driver().overlapped());
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_stop_interrupts_interval() {
    let driver = FakeDriver::with_devices(vec![Device::new(0, "main", true)]).frame(0, blank());
    let (reporter, mut rx) = create_event_channel();
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::default(),
        reporter,
    );
    session.refresh_devices(&[]).await.unwrap();

    let started = Instant::now();
    let plan = AutomationPlan::new(vec![rule("a.png")]).with_interval(Duration::from_secs(60));
    session.start(plan).await.unwrap();
    while !matches!(next_device_event(&mut rx).await, AutomationEvent::NoMatch { .. }) {}

    tokio::time::sleep(Duration::from_secs(5)).await;
    session.stop();
    finish(&session).await;

    assert!(started.elapsed() < Duration::from_secs(60));
    assert_eq!(session.driver().calls(), vec![Call::Capture(0)]);
}

#[tokio::test(start_paused = true)]
async fn test_tap_failure_does_not_stop_loop() {
    let mut driver =
        FakeDriver::with_devices(vec![Device::new(0, "main", true)]).frame(0, blank());
    driver.fail_taps = true;
    let (reporter, mut rx) = create_event_channel();
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::hitting(&["a.png"]),
        reporter,
    );
    session.refresh_devices(&[]).await.unwrap();
    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();

    let mut failed = 0;
    while failed < 2 {
        if matches!(
            next_device_event(&mut rx).await,
            AutomationEvent::TapFailed { .. }
        ) {
            failed += 1;
        }
    }
    assert_eq!(session.state(), SessionState::Running);
    session.stop();
    finish(&session).await;
}

#[tokio::test]
async fn test_start_requires_selected_device() {
    let driver = FakeDriver::with_devices(vec![Device::new(0, "idle", false)]);
    let session = Session::new(driver, Arc::new(TemplateStore::new()), StatusReporter::log_only());
    session.refresh_devices(&[]).await.unwrap();

    let result = session.start(quick_plan(vec![rule("a.png")])).await;
    assert!(matches!(result, Err(SessionError::NoDeviceSelected)));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_start_requires_driver() {
    let mut driver = FakeDriver::with_devices(vec![Device::new(0, "main", true)]);
    driver.unavailable = true;
    let session = Session::new(driver, Arc::new(TemplateStore::new()), StatusReporter::log_only());
    session.refresh_devices(&[]).await.unwrap();

    let result = session.start(quick_plan(vec![rule("a.png")])).await;
    assert!(matches!(result, Err(SessionError::Driver(_))));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test]
async fn test_start_fails_on_missing_template_dir() {
    let driver = FakeDriver::with_devices(vec![Device::new(0, "main", true)]);
    let session = Session::new(driver, Arc::new(TemplateStore::new()), StatusReporter::log_only());
    session.refresh_devices(&[]).await.unwrap();

    let missing = std::env::temp_dir().join(format!("ldtrace-no-such-dir-{}", std::process::id()));
    let plan = quick_plan(vec![rule("a.png")]).with_template_dir(missing);
    let result = session.start(plan).await;
    assert!(matches!(result, Err(SessionError::Templates(_))));
    assert_eq!(session.state(), SessionState::Stopped);
}

#[tokio::test(start_paused = true)]
async fn test_start_while_running_is_noop() {
    let driver = FakeDriver::with_devices(vec![Device::new(0, "main", true)]).frame(0, blank());
    let (reporter, mut rx) = create_event_channel();
    let session = Session::with_matcher(
        driver,
        Arc::new(TemplateStore::new()),
        ScriptedMatcher::default(),
        reporter,
    );
    session.refresh_devices(&[]).await.unwrap();

    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();
    session.start(quick_plan(vec![rule("a.png")])).await.unwrap();
    session.stop();
    finish(&session).await;

    let mut running = 0;
    while let Ok(event) = rx.try_recv() {
        if event == AutomationEvent::StateChanged(SessionState::Running) {
            running += 1;
        }
    }
    assert_eq!(running, 1);
}

#[tokio::test]
async fn test_selection_operations() {
    let driver = FakeDriver::with_devices(vec![
        Device::new(0, "a", true),
        Device::new(1, "b", false),
    ]);
    let session = Session::new(driver, Arc::new(TemplateStore::new()), StatusReporter::log_only());
    session.refresh_devices(&[]).await.unwrap();
    assert_eq!(session.selected_indices().await, vec![0]);

    session.select_all().await;
    assert_eq!(session.selected_indices().await, vec![0, 1]);
    assert!(session.set_selected(0, false).await);
    assert_eq!(session.selected_indices().await, vec![1]);
    session.deselect_all().await;
    assert!(session.selected_indices().await.is_empty());
    assert!(!session.set_selected(42, true).await);
}
