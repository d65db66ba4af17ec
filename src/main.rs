use ldtrace::args::{Args, Mode};
use ldtrace::automation::{
    AutomationEvent, AutomationPlan, Session, SessionState, create_event_channel,
};
use ldtrace::device::{DeviceDriver, LdPlayer};
use ldtrace::settings::Settings;
use ldtrace::template_matching::TemplateStore;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

#[tokio::main]
async fn main() -> ExitCode {
    let Some(args) = Args::parse() else {
        return ExitCode::SUCCESS;
    };

    let mut settings = Settings::from_env();
    args.apply(&mut settings);
    if let Err(e) = init_logging(&settings) {
        eprintln!("❌ Cannot open log file: {}", e);
        return ExitCode::FAILURE;
    }
    settings.resolve_paths();

    let driver = LdPlayer::new(
        settings.driver_path.clone().unwrap_or_default(),
        settings.capture_dir.clone().unwrap_or_default(),
    );
    let store = Arc::new(TemplateStore::new());
    let (reporter, mut events) = create_event_channel();
    let session = Session::new(driver, Arc::clone(&store), reporter);

    if let Err(e) = session.driver().ensure_available() {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }
    if let Err(e) = session.refresh_devices(&settings.selected_devices).await {
        eprintln!("❌ Failed to list emulators: {}", e);
        return ExitCode::FAILURE;
    }

    if args.mode() == Mode::List {
        print_devices(&session).await;
        return ExitCode::SUCCESS;
    }

    let plan = match build_plan(&settings, &store) {
        Ok(plan) => plan,
        Err(e) => {
            eprintln!("❌ {}", e);
            return ExitCode::FAILURE;
        }
    };
    println!(
        "🚀 Running {} templates on emulators {:?} every {:?}",
        plan.rules.len(),
        session.selected_indices().await,
        plan.interval
    );
    if let Err(e) = session.start(plan).await {
        eprintln!("❌ {}", e);
        return ExitCode::FAILURE;
    }

    let deadline = tokio::time::sleep(
        args.timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(Duration::from_secs(60 * 60 * 24 * 365)),
    );
    tokio::pin!(deadline);
    let mut stopping = false;
    let mut taps = 0u64;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c(), if !stopping => {
                println!("⏹️ Ctrl-C received, stopping after the current emulator...");
                stopping = true;
                session.stop();
            }
            _ = &mut deadline, if !stopping && args.timeout_secs.is_some() => {
                log::info!("⏰ Timeout reached, stopping");
                stopping = true;
                session.stop();
            }
            event = events.recv() => match event {
                Some(AutomationEvent::Dispatching { .. }) => taps += 1,
                Some(AutomationEvent::StateChanged(SessionState::Stopped)) | None => break,
                Some(_) => {}
            }
        }
    }

    session.wait().await;
    println!("✅ Stopped after {} taps", taps);
    ExitCode::SUCCESS
}

fn init_logging(settings: &Settings) -> std::io::Result<()> {
    let default_filter = if settings.debug { "debug" } else { "info" };
    let mut builder =
        env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter));
    if let Some(path) = &settings.log_file {
        let file = std::fs::File::create(path)?;
        builder.target(env_logger::Target::Pipe(Box::new(file)));
    }
    builder.init();
    Ok(())
}

/// Load the template folder (creating it when missing) and turn it into the
/// ordered rule list.
fn build_plan(settings: &Settings, store: &TemplateStore) -> std::io::Result<AutomationPlan> {
    let dir = &settings.template_dir;
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        log::warn!(
            "⚠️ Template folder {} did not exist and was created, put template images there",
            dir.display()
        );
    }
    if let Err(e) = store.load(dir) {
        log::warn!("⚠️ {}", e);
    }
    let rules = settings.rules(&store.names());
    if rules.is_empty() {
        log::warn!("⚠️ No templates in {}, nothing will be tapped", dir.display());
    }

    // Rules are built from this load; the plan carries no directory, so
    // start does not read the folder a second time
    Ok(AutomationPlan::new(rules).with_interval(settings.interval()))
}

async fn print_devices<D: DeviceDriver + 'static>(session: &Session<D>) {
    let devices = session.devices().await;
    if devices.is_empty() {
        println!("❌ No emulators found");
        return;
    }
    for device in devices {
        println!(
            "{} {}{}",
            if device.selected { "[x]" } else { "[ ]" },
            device.label(),
            if device.last_known_running { " (running)" } else { "" }
        );
    }
}
