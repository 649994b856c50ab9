//! End-to-end tests of the hotkey engine through its public API
//!
//! The keyboard hook and Globe helper are replaced by in-process fakes that
//! hand their event sinks back to the test, so every scenario runs without
//! OS permissions. Time is paused; `advance` moves the hold clock.
//!
//! The live helper round-trip needs macOS Accessibility permission:
//! cargo test --test hotkey_engine_test -- --ignored

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::mpsc::UnboundedSender;
use tokio::time::advance;

use flowcopy_hotkey::input::accelerator;
use flowcopy_hotkey::input::binding::{self, BindingSource};
use flowcopy_hotkey::input::globe::{GlobeEvent, GlobeListener, GlobeSignal};
use flowcopy_hotkey::input::hotkey::{
    EngineSettings, HotkeyEngine, RecordingCallbacks, RecordingController, RecordingStatus,
    SessionState,
};
use flowcopy_hotkey::input::keys::{HookEvent, Key, KeyCombo, KeyEvent, Modifier, Modifiers, Platform};
use flowcopy_hotkey::input::service::HotkeyService;
use flowcopy_hotkey::input::source::{KeyEventSource, SourceError};

type Sink<T> = Arc<Mutex<Option<UnboundedSender<T>>>>;

#[derive(Default)]
struct FakeHook {
    sink: Sink<HookEvent>,
    starts: Arc<Mutex<u32>>,
}

impl KeyEventSource for FakeHook {
    fn start(&mut self, sink: UnboundedSender<HookEvent>) -> Result<(), SourceError> {
        *self.starts.lock().unwrap() += 1;
        *self.sink.lock().unwrap() = Some(sink);
        Ok(())
    }

    fn stop(&mut self) {
        self.sink.lock().unwrap().take();
    }
}

#[derive(Default)]
struct FakeGlobe {
    sink: Sink<GlobeSignal>,
    generations: Arc<Mutex<Vec<u64>>>,
    running: bool,
}

impl GlobeListener for FakeGlobe {
    fn start(&mut self, generation: u64, sink: UnboundedSender<GlobeSignal>) -> bool {
        self.generations.lock().unwrap().push(generation);
        *self.sink.lock().unwrap() = Some(sink);
        self.running = true;
        true
    }

    fn stop(&mut self) {
        self.running = false;
    }

    fn is_running(&self) -> bool {
        self.running
    }

    fn is_available(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Start,
    Stop(Duration),
}

type Log = Arc<Mutex<Vec<Call>>>;

fn recorder() -> (Box<dyn RecordingController>, Log) {
    let log: Log = Arc::default();
    let (a, b) = (Arc::clone(&log), Arc::clone(&log));
    let controller = RecordingCallbacks::new(
        move || a.lock().unwrap().push(Call::Start),
        move |elapsed| b.lock().unwrap().push(Call::Stop(elapsed)),
    );
    (Box::new(controller), log)
}

fn mods(list: &[Modifier]) -> Modifiers {
    list.iter().fold(Modifiers::NONE, |m, &x| m.with(x))
}

fn down(key: Key, list: &[Modifier]) -> HookEvent {
    HookEvent::KeyDown(KeyEvent::new(key, mods(list)))
}

fn up(key: Key, list: &[Modifier]) -> HookEvent {
    HookEvent::KeyUp(KeyEvent::new(key, mods(list)))
}

fn engine(platform: Platform) -> HotkeyEngine<FakeHook, FakeGlobe> {
    let (engine, _events) = HotkeyEngine::new(
        FakeHook::default(),
        FakeGlobe::default(),
        EngineSettings::default(),
        platform,
    );
    engine
}

#[tokio::test(start_paused = true)]
async fn test_default_binding_hold_on_linux() {
    let mut engine = engine(Platform::Linux);
    let (controller, log) = recorder();
    let combo = engine
        .register_accelerator("CommandOrControl+Shift+Space", controller)
        .unwrap();

    assert_eq!(combo, KeyCombo::new(Key::Space, mods(&[Modifier::Ctrl, Modifier::Shift])));
    assert_eq!(engine.display_name().as_deref(), Some("Ctrl+Shift+Space"));

    engine.handle_hook_event(down(Key::Space, &[Modifier::Ctrl, Modifier::Shift]));
    assert_eq!(engine.state(), SessionState::Holding);

    advance(Duration::from_millis(400)).await;
    engine.handle_hook_event(up(Key::Space, &[Modifier::Ctrl, Modifier::Shift]));

    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(
        *log.lock().unwrap(),
        vec![Call::Start, Call::Stop(Duration::from_millis(400))]
    );
    assert_eq!(
        *engine.subscribe().borrow(),
        RecordingStatus::Transcribing { duration_ms: 400 }
    );
}

#[tokio::test(start_paused = true)]
async fn test_extra_or_missing_modifiers_do_not_start() {
    let mut engine = engine(Platform::Linux);
    let (controller, log) = recorder();
    engine
        .register(KeyCombo::new(Key::Space, mods(&[Modifier::Ctrl])), controller)
        .unwrap();

    engine.handle_hook_event(down(Key::Space, &[]));
    engine.handle_hook_event(down(Key::Space, &[Modifier::Ctrl, Modifier::Shift]));
    engine.handle_hook_event(down(Key::K, &[Modifier::Ctrl]));

    assert_eq!(engine.state(), SessionState::Idle);
    assert!(log.lock().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_repeated_key_down_keeps_one_session() {
    let mut engine = engine(Platform::Linux);
    let (controller, log) = recorder();
    engine
        .register(KeyCombo::new(Key::F9, Modifiers::NONE), controller)
        .unwrap();

    // Auto-repeat
    for _ in 0..5 {
        engine.handle_hook_event(down(Key::F9, &[]));
        advance(Duration::from_millis(100)).await;
    }
    engine.handle_hook_event(up(Key::F9, &[]));

    assert_eq!(
        *log.lock().unwrap(),
        vec![Call::Start, Call::Stop(Duration::from_millis(500))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_short_tap_waits_for_minimum_hold() {
    let mut engine = engine(Platform::Linux);
    let (controller, log) = recorder();
    engine
        .register(KeyCombo::new(Key::F9, Modifiers::NONE), controller)
        .unwrap();

    engine.handle_hook_event(down(Key::F9, &[]));
    advance(Duration::from_millis(100)).await;
    engine.handle_hook_event(up(Key::F9, &[]));
    assert_eq!(engine.state(), SessionState::Holding);

    // A later release of the same key ends the session
    advance(Duration::from_millis(250)).await;
    engine.handle_hook_event(up(Key::F9, &[]));
    assert_eq!(
        *log.lock().unwrap(),
        vec![Call::Start, Call::Stop(Duration::from_millis(350))]
    );
}

#[tokio::test(start_paused = true)]
async fn test_modifier_release_ends_hold() {
    let mut engine = engine(Platform::Windows);
    let (controller, log) = recorder();
    engine
        .register_accelerator("Ctrl+Alt+R", controller)
        .unwrap();

    engine.handle_hook_event(down(Key::R, &[Modifier::Ctrl, Modifier::Alt]));
    advance(Duration::from_millis(600)).await;
    engine.handle_hook_event(up(Key::Alt, &[Modifier::Ctrl]));

    assert_eq!(engine.state(), SessionState::Idle);
    assert_eq!(log.lock().unwrap().len(), 2);
}

#[tokio::test(start_paused = true)]
async fn test_globe_helper_drives_fn_hold_on_mac() {
    let globe = FakeGlobe::default();
    let globe_sink = Arc::clone(&globe.sink);
    let generations = Arc::clone(&globe.generations);
    let (mut engine, _events) = HotkeyEngine::new(
        FakeHook::default(),
        globe,
        EngineSettings::default(),
        Platform::MacOs,
    );
    let (controller, log) = recorder();
    engine
        .register(KeyCombo::new(Key::Globe, Modifiers::NONE), controller)
        .unwrap();
    assert!(engine.is_globe_active());

    let generation = *generations.lock().unwrap().last().unwrap();
    let signal = |event| GlobeSignal { generation, event };

    engine.handle_globe_signal(signal(GlobeEvent::Ready));
    engine.handle_globe_signal(signal(GlobeEvent::Down));
    // The hook's own Fn report is ignored while the helper is attached
    engine.handle_hook_event(up(Key::Globe, &[]));
    advance(Duration::from_millis(800)).await;
    engine.handle_globe_signal(signal(GlobeEvent::Up));

    assert_eq!(
        *log.lock().unwrap(),
        vec![Call::Start, Call::Stop(Duration::from_millis(800))]
    );
    assert!(globe_sink.lock().unwrap().is_some());
}

#[tokio::test(start_paused = true)]
async fn test_rebinding_drops_signals_from_old_helper() {
    let globe = FakeGlobe::default();
    let generations = Arc::clone(&globe.generations);
    let (mut engine, _events) = HotkeyEngine::new(
        FakeHook::default(),
        globe,
        EngineSettings::default(),
        Platform::MacOs,
    );
    let (controller, log) = recorder();
    let globe_combo = KeyCombo::new(Key::Globe, mods(&[Modifier::Shift]));
    engine.register(globe_combo, controller).unwrap();
    let old = *generations.lock().unwrap().last().unwrap();

    engine.rebind(globe_combo).unwrap();
    let current = *generations.lock().unwrap().last().unwrap();
    assert_ne!(old, current);

    engine.handle_hook_event(down(Key::Shift, &[Modifier::Shift]));
    engine.handle_globe_signal(GlobeSignal {
        generation: old,
        event: GlobeEvent::Down,
    });
    assert_eq!(engine.state(), SessionState::Idle);

    engine.handle_globe_signal(GlobeSignal {
        generation: current,
        event: GlobeEvent::Down,
    });
    assert_eq!(engine.state(), SessionState::Holding);
    assert_eq!(*log.lock().unwrap(), vec![Call::Start]);
}

#[tokio::test(start_paused = true)]
async fn test_capture_then_rebind_through_service() {
    let hook = FakeHook::default();
    let sink = Arc::clone(&hook.sink);
    let starts = Arc::clone(&hook.starts);
    let (engine, events) = HotkeyEngine::new(
        hook,
        FakeGlobe::default(),
        EngineSettings::default(),
        Platform::Linux,
    );
    let (service, handle) = HotkeyService::new(engine, events);
    let task = service.spawn();

    let (controller, log) = recorder();
    handle
        .register(binding::default_combo(Platform::Linux), controller)
        .await
        .unwrap();

    let send = |event| sink.lock().unwrap().as_ref().unwrap().send(event).unwrap();

    let pending = handle.start_capture().await.unwrap();
    // Matching is suspended while capturing
    send(down(Key::Space, &[Modifier::Ctrl, Modifier::Shift]));
    let result = pending.await.unwrap();
    assert_eq!(result.display_name, "Ctrl+Shift+Space");
    assert!(log.lock().unwrap().is_empty());

    let pending = handle.start_capture().await.unwrap();
    send(down(Key::Ctrl, &[Modifier::Ctrl]));
    send(down(Key::K, &[Modifier::Ctrl]));
    let result = pending.await.unwrap();
    assert_eq!(result.display_name, "Ctrl+K");

    // Persist and re-arm the way a settings screen would
    let raw = binding::to_raw(result.combo()).unwrap();
    let resolved = binding::resolve(Some(&raw), None, Platform::Linux);
    assert_eq!(resolved.source, BindingSource::Raw);
    handle.rebind(resolved.combo).await.unwrap();

    let mut status = handle.status();
    send(down(Key::K, &[Modifier::Ctrl]));
    status.changed().await.unwrap();
    assert_eq!(*status.borrow_and_update(), RecordingStatus::Recording);

    advance(Duration::from_millis(500)).await;
    send(up(Key::K, &[Modifier::Ctrl]));
    status.changed().await.unwrap();
    assert_eq!(
        *status.borrow_and_update(),
        RecordingStatus::Transcribing { duration_ms: 500 }
    );

    handle.shutdown().await.unwrap();
    task.await.unwrap();
    assert_eq!(*starts.lock().unwrap(), 1);
    assert!(sink.lock().unwrap().is_none());
    assert_eq!(
        *log.lock().unwrap(),
        vec![Call::Start, Call::Stop(Duration::from_millis(500))]
    );
}

#[test]
fn test_display_strings_per_platform() {
    let combo = binding::default_combo(Platform::MacOs);
    assert_eq!(accelerator::format(combo, Platform::MacOs), "⌘⇧␣");

    let combo = binding::default_combo(Platform::Windows);
    assert_eq!(accelerator::format(combo, Platform::Windows), "Ctrl+Shift+Space");
}

#[tokio::test]
#[ignore = "requires macOS with Accessibility permission"]
async fn test_live_globe_helper_reports_ready() {
    use flowcopy_hotkey::input::globe::GlobeBridge;
    use std::path::PathBuf;
    use tokio::sync::mpsc;

    let helper = PathBuf::from(env!("CARGO_BIN_EXE_globe-key-listener"));
    let mut bridge = GlobeBridge::new(Some(helper));
    let (tx, mut rx) = mpsc::unbounded_channel();
    assert!(bridge.start(1, tx));

    let signal = tokio::time::timeout(Duration::from_secs(5), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(signal.event, GlobeEvent::Ready);
    bridge.stop();
}
