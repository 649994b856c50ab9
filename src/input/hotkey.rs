use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use super::accelerator;
use super::binding;
use super::capture::{CaptureSession, PendingCapture, FINALIZE_DELAY};
use super::globe::{GlobeEvent, GlobeListener, GlobeSignal};
use super::keys::{HookEvent, KeyCombo, KeyEvent, Modifiers, Platform};
use super::source::{KeyEventSource, SourceError};

/// Key-ups closer than this to the start of a hold are ignored
pub const MIN_HOLD: Duration = Duration::from_millis(300);

/// Push-to-talk session state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionState {
    /// Nothing held
    Idle,
    /// Hotkey held, recording in progress
    Holding,
}

/// Receiver of push-to-talk start/stop signals
#[cfg_attr(test, mockall::automock)]
pub trait RecordingController: Send {
    /// Hotkey went down
    fn recording_started(&mut self);

    /// Hotkey released after `elapsed`
    fn recording_stopped(&mut self, elapsed: Duration);
}

/// [`RecordingController`] built from two closures
pub struct RecordingCallbacks<S, T> {
    on_start: S,
    on_stop: T,
}

impl<S, T> RecordingCallbacks<S, T>
where
    S: FnMut() + Send,
    T: FnMut(Duration) + Send,
{
    /// Wrap `on_start`/`on_stop`
    pub const fn new(on_start: S, on_stop: T) -> Self {
        Self { on_start, on_stop }
    }
}

impl<S, T> RecordingController for RecordingCallbacks<S, T>
where
    S: FnMut() + Send,
    T: FnMut(Duration) + Send,
{
    fn recording_started(&mut self) {
        (self.on_start)();
    }

    fn recording_stopped(&mut self, elapsed: Duration) {
        (self.on_stop)(elapsed);
    }
}

/// Status published for UI consumers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "lowercase")]
pub enum RecordingStatus {
    /// Waiting for the hotkey
    Idle,
    /// Hotkey held
    Recording,
    /// Hotkey released; downstream pipeline owns the audio now
    Transcribing {
        /// Length of the hold
        duration_ms: u64,
    },
}

/// Point-in-time view of the engine
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSnapshot {
    /// Session state
    pub state: SessionState,
    /// When the current hold began
    pub started_at: Option<Instant>,
    /// Time held so far (zero when idle)
    pub elapsed: Duration,
    /// Armed combination
    pub target: Option<KeyCombo>,
    /// Display string of the armed combination
    pub display_name: Option<String>,
    /// Globe helper attached
    pub globe_active: bool,
    /// Capture session in progress
    pub capturing: bool,
}

/// Registration failure
#[derive(Debug, Error)]
pub enum EngineError {
    /// Keyboard hook could not be started
    #[error(transparent)]
    Hook(#[from] SourceError),
}

/// Engine tunables
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineSettings {
    /// Minimum hold before a key-up may stop the session
    pub min_hold: Duration,
    /// Quiet period that finalizes a modifier-only capture
    pub capture_timeout: Duration,
    /// Use the Globe helper when the target is the Globe key
    pub globe_enabled: bool,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            min_hold: MIN_HOLD,
            capture_timeout: FINALIZE_DELAY,
            globe_enabled: true,
        }
    }
}

/// Receiving ends of the engine's event channels
///
/// The owner of the engine drains these and feeds them back through
/// [`HotkeyEngine::handle_hook_event`] and [`HotkeyEngine::handle_globe_signal`].
pub struct EngineEvents {
    /// Raw key events from the keyboard hook
    pub hook: mpsc::UnboundedReceiver<HookEvent>,
    /// Globe helper signals
    pub globe: mpsc::UnboundedReceiver<GlobeSignal>,
}

/// Global hotkey matcher with push-to-talk session tracking
///
/// All state lives here and is mutated only through `&mut self`, so a single
/// owner (normally [`crate::input::service::HotkeyService`]) serializes every
/// input in delivery order.
pub struct HotkeyEngine<S: KeyEventSource, G: GlobeListener> {
    source: S,
    globe: G,
    settings: EngineSettings,
    platform: Platform,
    hook_tx: mpsc::UnboundedSender<HookEvent>,
    globe_tx: mpsc::UnboundedSender<GlobeSignal>,
    hook_started: bool,
    target: Option<KeyCombo>,
    controller: Option<Box<dyn RecordingController>>,
    state: SessionState,
    started_at: Option<Instant>,
    live: Modifiers,
    globe_generation: u64,
    globe_active: bool,
    capture: CaptureSession,
    status: watch::Sender<RecordingStatus>,
}

impl<S: KeyEventSource, G: GlobeListener> HotkeyEngine<S, G> {
    /// Create an unarmed engine; the hook starts on first registration
    pub fn new(
        source: S,
        globe: G,
        settings: EngineSettings,
        platform: Platform,
    ) -> (Self, EngineEvents) {
        let (hook_tx, hook) = mpsc::unbounded_channel();
        let (globe_tx, globe_rx) = mpsc::unbounded_channel();
        let (status, _) = watch::channel(RecordingStatus::Idle);

        let engine = Self {
            source,
            globe,
            settings,
            platform,
            hook_tx,
            globe_tx,
            hook_started: false,
            target: None,
            controller: None,
            state: SessionState::Idle,
            started_at: None,
            live: Modifiers::NONE,
            globe_generation: 0,
            globe_active: false,
            capture: CaptureSession::new(settings.capture_timeout),
            status,
        };
        (
            engine,
            EngineEvents {
                hook,
                globe: globe_rx,
            },
        )
    }

    /// Arm `combo` and route start/stop signals to `controller`
    ///
    /// Replaces any previous binding. A hold in progress is finished with
    /// `recording_stopped` on the previous controller first.
    ///
    /// # Errors
    /// Returns [`EngineError::Hook`] if the keyboard hook cannot be started;
    /// the previous binding stays armed.
    pub fn register(
        &mut self,
        combo: KeyCombo,
        controller: Box<dyn RecordingController>,
    ) -> Result<(), EngineError> {
        self.ensure_hook()?;
        self.stop_session("hotkey re-registered");
        self.controller = Some(controller);
        self.arm(combo);
        Ok(())
    }

    /// Parse and arm an accelerator string
    ///
    /// An unparseable accelerator keeps the armed combination, or arms the
    /// default when nothing is armed yet. Returns the combination now armed.
    ///
    /// # Errors
    /// Returns [`EngineError::Hook`] if the keyboard hook cannot be started.
    pub fn register_accelerator(
        &mut self,
        accelerator: &str,
        controller: Box<dyn RecordingController>,
    ) -> Result<KeyCombo, EngineError> {
        let combo = match accelerator::parse(accelerator, self.platform) {
            Ok(combo) => combo,
            Err(e) => {
                let fallback = self
                    .target
                    .unwrap_or_else(|| binding::default_combo(self.platform));
                warn!(
                    accelerator,
                    error = %e,
                    fallback = %accelerator::format(fallback, self.platform),
                    "failed to parse hotkey"
                );
                fallback
            }
        };
        self.register(combo, controller)?;
        Ok(combo)
    }

    /// Arm a new combination, keeping the current controller
    ///
    /// # Errors
    /// Returns [`EngineError::Hook`] if the keyboard hook cannot be started.
    pub fn rebind(&mut self, combo: KeyCombo) -> Result<(), EngineError> {
        self.ensure_hook()?;
        self.stop_session("hotkey re-bound");
        self.arm(combo);
        Ok(())
    }

    /// Disarm the hotkey; the hook keeps running for a later registration
    pub fn unregister(&mut self) {
        self.stop_session("hotkey unregistered");
        self.stop_globe();
        if self.target.take().is_some() {
            info!("hotkey unregistered");
        }
        self.status.send_replace(RecordingStatus::Idle);
    }

    /// Tear everything down: capture, session, Globe helper and hook
    pub fn shutdown(&mut self) {
        self.capture.cancel();
        self.stop_session("hotkey engine shutting down");
        self.stop_globe();
        self.target = None;
        self.controller = None;
        if self.hook_started {
            self.source.stop();
            self.hook_started = false;
            info!("keyboard hook stopped");
        }
        self.status.send_replace(RecordingStatus::Idle);
    }

    /// Dispatch one keyboard hook event
    pub fn handle_hook_event(&mut self, event: HookEvent) {
        match event {
            HookEvent::KeyDown(e) => self.key_down(&e),
            HookEvent::KeyUp(e) => self.key_up(&e),
        }
    }

    /// Key pressed
    pub fn key_down(&mut self, event: &KeyEvent) {
        self.live = event.modifiers;

        if self.capture.is_active() {
            self.capture.key_down(event, self.platform);
            return;
        }

        if self.globe_active && event.key.is_globe() {
            debug!("ignoring hook Globe key-down, helper is authoritative");
            return;
        }

        let Some(target) = self.target else {
            return;
        };
        if event.key.code() != target.key.code() {
            return;
        }

        let bare = target.key.is_modifier() || target.key.is_globe();
        if !bare && event.modifiers != target.modifiers {
            debug!(
                held = ?event.modifiers,
                required = ?target.modifiers,
                "hotkey key-down with wrong modifiers"
            );
            return;
        }

        self.start_session("key-down matched");
    }

    /// Key released
    pub fn key_up(&mut self, event: &KeyEvent) {
        self.live = event.modifiers;

        if self.capture.is_active() || self.state == SessionState::Idle {
            return;
        }
        if self.globe_active && event.key.is_globe() {
            return;
        }
        if self.held_for() < self.settings.min_hold {
            debug!(key = %event.key, "ignoring key-up inside minimum hold");
            return;
        }

        let Some(target) = self.target else {
            return;
        };
        let main_released = event.key.code() == target.key.code();
        let required_released = event
            .key
            .modifier()
            .is_some_and(|m| target.modifiers.get(m));

        if main_released || required_released {
            self.stop_session("key-up released hotkey");
        }
    }

    /// Handle a signal from the Globe helper
    pub fn handle_globe_signal(&mut self, signal: GlobeSignal) {
        if signal.generation != self.globe_generation || !self.globe_active {
            debug!(
                generation = signal.generation,
                current = self.globe_generation,
                event = ?signal.event,
                "dropping stale globe signal"
            );
            return;
        }

        match signal.event {
            GlobeEvent::Ready => info!("globe key listener ready"),
            GlobeEvent::Down => self.globe_down(),
            GlobeEvent::Up => {
                if self.state == SessionState::Holding {
                    self.stop_session("globe released");
                }
            }
            GlobeEvent::Exited => {
                warn!("globe key helper exited, Fn hold-to-talk disabled");
                self.stop_globe();
                self.stop_session("globe helper exited");
            }
        }
    }

    fn globe_down(&mut self) {
        if self.capture.is_active() || self.state == SessionState::Holding {
            return;
        }
        let Some(target) = self.target else {
            return;
        };
        if !self.live.contains_all(target.modifiers) {
            debug!(
                held = ?self.live,
                required = ?target.modifiers,
                "globe pressed without required modifiers"
            );
            return;
        }
        self.start_session("globe pressed");
    }

    /// Start capturing the next key combination
    ///
    /// A capture already in progress is cancelled; its future resolves to
    /// [`super::capture::CaptureError::Cancelled`].
    pub fn start_capture(&mut self) -> PendingCapture {
        self.stop_session("capture started");
        self.capture.begin()
    }

    /// Cancel the capture in progress; returns false if there was none
    pub fn stop_capture(&mut self) -> bool {
        self.capture.cancel()
    }

    /// Finalize deadline of the capture in progress, with its generation
    #[must_use]
    pub fn capture_deadline(&self) -> Option<(u64, Instant)> {
        self.capture.deadline()
    }

    /// Capture finalize timer expired
    pub fn capture_timer_fired(&mut self, generation: u64) -> bool {
        self.capture.timer_fired(generation, self.platform)
    }

    /// Session state
    #[must_use]
    pub const fn state(&self) -> SessionState {
        self.state
    }

    /// Armed combination
    #[must_use]
    pub const fn target(&self) -> Option<KeyCombo> {
        self.target
    }

    /// Display string of the armed combination
    #[must_use]
    pub fn display_name(&self) -> Option<String> {
        self.target
            .map(|combo| accelerator::format(combo, self.platform))
    }

    /// Whether the Globe helper is attached
    #[must_use]
    pub const fn is_globe_active(&self) -> bool {
        self.globe_active
    }

    /// Whether a capture is in progress
    #[must_use]
    pub const fn is_capturing(&self) -> bool {
        self.capture.is_active()
    }

    /// Whether the Globe bridge could run on this machine
    #[must_use]
    pub fn is_globe_available(&self) -> bool {
        self.settings.globe_enabled && self.globe.is_available()
    }

    /// Platform used for parsing and display
    #[must_use]
    pub const fn platform(&self) -> Platform {
        self.platform
    }

    /// Current status and a receiver for future changes
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<RecordingStatus> {
        self.status.subscribe()
    }

    /// Downstream pipeline finished with the last recording
    pub fn mark_idle(&mut self) {
        if self.state == SessionState::Idle {
            self.status.send_replace(RecordingStatus::Idle);
        }
    }

    /// Point-in-time view of the engine
    #[must_use]
    pub fn snapshot(&self) -> RecordingSnapshot {
        RecordingSnapshot {
            state: self.state,
            started_at: self.started_at,
            elapsed: self.held_for(),
            target: self.target,
            display_name: self.display_name(),
            globe_active: self.globe_active,
            capturing: self.capture.is_active(),
        }
    }

    fn held_for(&self) -> Duration {
        self.started_at
            .map_or(Duration::ZERO, |at| Instant::now().saturating_duration_since(at))
    }

    fn ensure_hook(&mut self) -> Result<(), SourceError> {
        if self.hook_started {
            return Ok(());
        }
        self.source.start(self.hook_tx.clone())?;
        self.hook_started = true;
        info!("keyboard hook started");
        Ok(())
    }

    fn arm(&mut self, combo: KeyCombo) {
        self.stop_globe();
        self.target = Some(combo);
        self.state = SessionState::Idle;
        self.started_at = None;

        if combo.key.is_globe() && self.settings.globe_enabled {
            self.globe_active = self.globe.start(self.globe_generation, self.globe_tx.clone());
            if self.globe_active {
                info!(
                    generation = self.globe_generation,
                    required = ?combo.modifiers,
                    "globe key listener active, Fn hold-to-talk enabled"
                );
            } else {
                warn!("globe key listener unavailable, Fn may not work as hold-to-talk");
            }
        }

        info!(
            keycode = combo.key.code(),
            mods = ?combo.modifiers,
            display = %accelerator::format(combo, self.platform),
            "hotkey registered"
        );
    }

    fn stop_globe(&mut self) {
        if self.globe_active {
            self.globe.stop();
            self.globe_active = false;
        }
        // Anything still queued from the old helper is now stale
        self.globe_generation += 1;
    }

    fn start_session(&mut self, reason: &str) {
        if self.state == SessionState::Holding {
            return;
        }
        self.state = SessionState::Holding;
        self.started_at = Some(Instant::now());
        info!(reason, "recording started");

        self.status.send_replace(RecordingStatus::Recording);
        if let Some(controller) = self.controller.as_mut() {
            controller.recording_started();
        }
    }

    fn stop_session(&mut self, reason: &str) {
        if self.state == SessionState::Idle {
            return;
        }
        let elapsed = self.held_for();
        self.state = SessionState::Idle;
        self.started_at = None;
        info!(reason, elapsed_ms = elapsed.as_millis(), "recording stopped");

        self.status.send_replace(RecordingStatus::Transcribing {
            duration_ms: u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX),
        });
        if let Some(controller) = self.controller.as_mut() {
            controller.recording_stopped(elapsed);
        }
    }
}

impl<S: KeyEventSource, G: GlobeListener> Drop for HotkeyEngine<S, G> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
