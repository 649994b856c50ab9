//! Interactive "press the new hotkey" capture.
//!
//! A session collects key-downs until either a non-modifier key arrives
//! (finalize immediately) or the finalize delay passes with no further input
//! (finalize with whatever modifier/Globe keys were seen). Each session carries
//! a generation number; a deadline from an older session can never finalize a
//! newer one.

use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use thiserror::Error;
use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, info};

use super::accelerator;
use super::keys::{Key, KeyCombo, KeyEvent, Modifiers, Platform};

/// Quiet period after a modifier/Globe key before a capture finalizes
pub const FINALIZE_DELAY: Duration = Duration::from_millis(500);

/// Combination captured from the keyboard
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaptureResult {
    /// Main key
    pub keycode: Key,
    /// Modifiers held with it
    pub mods: Modifiers,
    /// Display string for the settings UI
    #[serde(rename = "displayName")]
    pub display_name: String,
}

impl CaptureResult {
    /// The combo to arm for this result
    #[must_use]
    pub const fn combo(&self) -> KeyCombo {
        KeyCombo::new(self.keycode, self.mods)
    }
}

/// Capture ended without a result
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CaptureError {
    /// Cancelled by `stop_capture`, superseded by a newer capture, or the engine shut down
    #[error("hotkey capture was cancelled")]
    Cancelled,
}

/// Future side of a capture session
#[derive(Debug)]
pub struct PendingCapture {
    generation: u64,
    rx: oneshot::Receiver<CaptureResult>,
}

impl PendingCapture {
    /// Generation of the session this future belongs to
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

impl Future for PendingCapture {
    type Output = Result<CaptureResult, CaptureError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.rx)
            .poll(cx)
            .map(|res| res.map_err(|_| CaptureError::Cancelled))
    }
}

struct ActiveCapture {
    generation: u64,
    reply: oneshot::Sender<CaptureResult>,
    keys: Vec<Key>,
    mods: Modifiers,
    deadline: Option<Instant>,
}

/// Capture state owned by the hotkey engine
pub struct CaptureSession {
    generation: u64,
    delay: Duration,
    active: Option<ActiveCapture>,
}

impl CaptureSession {
    /// New idle session with the given finalize delay
    #[must_use]
    pub const fn new(delay: Duration) -> Self {
        Self {
            generation: 0,
            delay,
            active: None,
        }
    }

    /// Whether a capture is in progress
    #[must_use]
    pub const fn is_active(&self) -> bool {
        self.active.is_some()
    }

    /// Begin a capture, superseding (and cancelling) any capture in progress
    pub fn begin(&mut self) -> PendingCapture {
        if let Some(previous) = self.active.take() {
            info!(
                generation = previous.generation,
                "capture superseded by a new capture"
            );
        }

        self.generation += 1;
        let (reply, rx) = oneshot::channel();
        self.active = Some(ActiveCapture {
            generation: self.generation,
            reply,
            keys: Vec::new(),
            mods: Modifiers::NONE,
            deadline: None,
        });
        info!(generation = self.generation, "capture mode started");

        PendingCapture {
            generation: self.generation,
            rx,
        }
    }

    /// Drop the capture in progress without resolving it
    ///
    /// Returns false if nothing was being captured.
    pub fn cancel(&mut self) -> bool {
        match self.active.take() {
            Some(capture) => {
                info!(generation = capture.generation, "capture cancelled");
                true
            }
            None => false,
        }
    }

    /// Pending finalize deadline and the generation it belongs to
    #[must_use]
    pub fn deadline(&self) -> Option<(u64, Instant)> {
        self.active
            .as_ref()
            .and_then(|c| c.deadline.map(|at| (c.generation, at)))
    }

    /// Feed a key-down; returns true if the capture finalized
    pub fn key_down(&mut self, event: &KeyEvent, platform: Platform) -> bool {
        let delay = self.delay;
        let Some(capture) = self.active.as_mut() else {
            return false;
        };

        capture.deadline = None;
        if !capture.keys.iter().any(|k| k.code() == event.key.code()) {
            capture.keys.push(event.key);
        }
        if let Some(modifier) = event.key.modifier() {
            capture.mods.set(modifier, true);
        }

        if !event.key.is_modifier() && !event.key.is_globe() {
            capture.mods = capture.mods.union(event.modifiers);
            self.finalize(platform);
            return true;
        }

        capture.deadline = Some(Instant::now() + delay);
        debug!(
            key = %event.key,
            generation = capture.generation,
            "capture waiting for more keys"
        );
        false
    }

    /// Finalize timer expiry; ignored unless it belongs to the current session and is due
    pub fn timer_fired(&mut self, generation: u64, platform: Platform) -> bool {
        let due = self.active.as_ref().is_some_and(|c| {
            c.generation == generation && c.deadline.is_some_and(|at| Instant::now() >= at)
        });
        if !due {
            debug!(generation, "ignoring stale capture timer");
            return false;
        }
        self.finalize(platform);
        true
    }

    fn finalize(&mut self, platform: Platform) {
        let Some(mut capture) = self.active.take() else {
            return;
        };

        let main = capture
            .keys
            .iter()
            .copied()
            .find(|k| !k.is_modifier())
            .or_else(|| capture.keys.first().copied());

        let Some(keycode) = main else {
            debug!(generation = capture.generation, "capture ended with no keys");
            return;
        };
        if let Some(own) = keycode.modifier() {
            capture.mods.set(own, false);
        }

        let display_name = accelerator::format(KeyCombo::new(keycode, capture.mods), platform);
        info!(
            keycode = keycode.code(),
            mods = ?capture.mods,
            display = %display_name,
            "captured hotkey"
        );

        let result = CaptureResult {
            keycode,
            mods: capture.mods,
            display_name,
        };
        if capture.reply.send(result).is_err() {
            debug!(generation = capture.generation, "capture caller went away");
        }
    }
}
