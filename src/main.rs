use anyhow::{bail, Context, Result};
use std::time::Duration;
use tracing::{info, warn};

use flowcopy_hotkey::config::Config;
use flowcopy_hotkey::input::accelerator;
use flowcopy_hotkey::input::binding;
use flowcopy_hotkey::input::globe::GlobeBridge;
use flowcopy_hotkey::input::hotkey::{HotkeyEngine, RecordingController, RecordingStatus};
use flowcopy_hotkey::input::keys::Platform;
use flowcopy_hotkey::input::service::{HotkeyHandle, HotkeyService};
use flowcopy_hotkey::input::source::DefaultSource;
use flowcopy_hotkey::{permissions, telemetry};

/// Stand-in for the recording pipeline: logs each push-to-talk session
struct LoggingController;

impl RecordingController for LoggingController {
    fn recording_started(&mut self) {
        info!("push-to-talk: recording started");
    }

    fn recording_stopped(&mut self, elapsed: Duration) {
        info!(elapsed_ms = elapsed.as_millis(), "push-to-talk: recording stopped");
    }
}

enum Mode {
    Run,
    Capture,
}

#[tokio::main]
async fn main() -> Result<()> {
    let mode = match std::env::args().nth(1).as_deref() {
        None | Some("run") => Mode::Run,
        Some("capture") => Mode::Capture,
        Some(other) => bail!("unknown command {other:?}\n\nusage: flowcopy-hotkey [run|capture]"),
    };

    // Load configuration
    let config = Config::load()?;
    println!("✓ Config loaded from {}", Config::config_path()?.display());

    // Initialize telemetry
    telemetry::init(&config.telemetry)?;
    info!("flowcopy-hotkey starting");
    println!("✓ Telemetry initialized");

    // Request permissions
    permissions::request_hotkey_permissions(config.globe.enabled)?;
    println!("✓ Permissions OK");

    // Arm the persisted binding
    let platform = Platform::current();
    let resolved = config.binding(platform);
    let globe = GlobeBridge::new(config.globe_helper_path()?);
    let (engine, events) = HotkeyEngine::new(
        DefaultSource::default(),
        globe,
        config.engine_settings(),
        platform,
    );
    if resolved.combo.key.is_globe() && !engine.is_globe_available() {
        warn!("Fn binding without the globe key helper, falling back to the keyboard hook");
    }
    let display_name = accelerator::format(resolved.combo, engine.platform());
    let (service, handle) = HotkeyService::new(engine, events);
    let task = service.spawn();

    handle
        .register(resolved.combo, Box::new(LoggingController))
        .await
        .context("failed to register hotkey")?;
    println!("✓ Hotkey registered: {display_name} ({:?})", resolved.source);

    match mode {
        Mode::Run => run_until_interrupted(&handle).await?,
        Mode::Capture => capture_binding(&handle).await?,
    }

    handle.shutdown().await?;
    task.await.context("hotkey service task failed")?;
    Ok(())
}

async fn run_until_interrupted(handle: &HotkeyHandle) -> Result<()> {
    info!("event loop starting (press Ctrl+C to exit)");
    println!("\nFlowcopy Hotkey is running. Hold the hotkey to test push-to-talk.");
    println!("Press Ctrl+C to exit.\n");

    let mut status = handle.status();
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("shutdown signal received");
                println!("\nShutting down...");
                break;
            }
            changed = status.changed() => {
                if changed.is_err() {
                    break;
                }
                let current = *status.borrow_and_update();
                info!(status = ?current, "recording status changed");
                // No transcription pipeline attached; hand straight back to idle
                if matches!(current, RecordingStatus::Transcribing { .. }) {
                    handle.mark_idle()?;
                }
            }
        }
    }
    Ok(())
}

async fn capture_binding(handle: &HotkeyHandle) -> Result<()> {
    println!("\nPress the new hotkey (Ctrl+C to cancel)...");

    let pending = handle.start_capture().await?;
    tokio::select! {
        result = pending => {
            let result = result.context("capture cancelled")?;
            println!("✓ Captured: {}", result.display_name);
            println!("\nAdd this to the [hotkey] table of {}:", Config::config_path()?.display());
            println!("raw = '{}'", binding::to_raw(result.combo())?);
        }
        _ = tokio::signal::ctrl_c() => {
            handle.stop_capture().await?;
            println!("\nCapture cancelled");
        }
    }
    Ok(())
}
