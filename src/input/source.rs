//! System-wide keyboard hook feeding the hotkey engine.

use std::io;
use thiserror::Error;
use tokio::sync::mpsc::UnboundedSender;

use super::keys::HookEvent;

/// Failure to bring up the keyboard hook
#[derive(Debug, Error)]
pub enum SourceError {
    /// The listener thread could not be spawned
    #[error("failed to spawn keyboard hook thread: {0}")]
    Spawn(#[source] io::Error),
    /// Built without a native hook backend
    #[error("no keyboard hook available in this build (enable the `native-hook` feature)")]
    Unsupported,
}

/// Source of raw key-down/key-up events with live modifier flags
///
/// `start` may be called again after `stop`; implementations deliver events
/// to whichever sink was installed last and drop them while stopped.
#[cfg_attr(test, mockall::automock)]
pub trait KeyEventSource: Send {
    /// Begin delivering events into `sink`
    ///
    /// # Errors
    /// Returns an error if the hook cannot be installed.
    fn start(&mut self, sink: UnboundedSender<HookEvent>) -> Result<(), SourceError>;

    /// Stop delivering events
    fn stop(&mut self);
}

/// Hook backend selected by cargo features
#[cfg(feature = "native-hook")]
pub type DefaultSource = rdev_hook::RdevSource;

/// Hook backend selected by cargo features
#[cfg(not(feature = "native-hook"))]
pub type DefaultSource = NullSource;

/// Backend for builds without a native hook; `start` always fails
#[derive(Debug, Default)]
pub struct NullSource;

impl KeyEventSource for NullSource {
    fn start(&mut self, _sink: UnboundedSender<HookEvent>) -> Result<(), SourceError> {
        Err(SourceError::Unsupported)
    }

    fn stop(&mut self) {}
}

#[cfg(feature = "native-hook")]
pub use rdev_hook::RdevSource;

#[cfg(feature = "native-hook")]
mod rdev_hook {
    use std::collections::HashSet;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::{Arc, Mutex, PoisonError};
    use std::thread;

    use rdev::{Event, EventType};
    use tokio::sync::mpsc::UnboundedSender;
    use tracing::{debug, error, info};

    use super::{KeyEventSource, SourceError};
    use crate::input::keys::{HookEvent, Key, KeyEvent, Modifiers};

    /// Platform scan codes rdev cannot name are shifted past the uiohook code
    /// space so they never collide with a named key or the Globe sentinel.
    const RAW_CODE_BASE: u32 = 0x1_0000;

    type Sink = Arc<Mutex<Option<UnboundedSender<HookEvent>>>>;

    /// Global keyboard listener built on `rdev::listen`
    ///
    /// `rdev::listen` never returns while healthy, so the listener thread lives
    /// for the rest of the process. `stop` detaches the sink instead of
    /// joining the thread; a later `start` re-attaches one.
    pub struct RdevSource {
        sink: Sink,
        running: Arc<AtomicBool>,
    }

    impl RdevSource {
        /// Create an idle source; no thread runs until `start`
        #[must_use]
        pub fn new() -> Self {
            Self {
                sink: Arc::new(Mutex::new(None)),
                running: Arc::new(AtomicBool::new(false)),
            }
        }

        fn spawn_listener(&self) -> Result<(), SourceError> {
            let sink = Arc::clone(&self.sink);
            let running = Arc::clone(&self.running);
            running.store(true, Ordering::SeqCst);

            let spawned = thread::Builder::new()
                .name("key-hook".to_owned())
                .spawn(move || {
                    let mut held = HeldModifiers::default();
                    let callback = move |event: Event| {
                        if let Some(hook_event) = held.translate(&event) {
                            forward(&sink, hook_event);
                        }
                    };

                    if let Err(e) = rdev::listen(callback) {
                        error!(error = ?e, "keyboard hook stopped");
                    }
                    running.store(false, Ordering::SeqCst);
                });

            match spawned {
                Ok(_) => {
                    info!("keyboard hook listener started");
                    Ok(())
                }
                Err(e) => {
                    self.running.store(false, Ordering::SeqCst);
                    Err(SourceError::Spawn(e))
                }
            }
        }
    }

    impl Default for RdevSource {
        fn default() -> Self {
            Self::new()
        }
    }

    impl KeyEventSource for RdevSource {
        fn start(&mut self, sink: UnboundedSender<HookEvent>) -> Result<(), SourceError> {
            *self.sink.lock().unwrap_or_else(PoisonError::into_inner) = Some(sink);

            if self.running.load(Ordering::SeqCst) {
                debug!("keyboard hook already running, sink replaced");
                return Ok(());
            }
            self.spawn_listener()
        }

        fn stop(&mut self) {
            self.sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .take();
            debug!("keyboard hook sink detached");
        }
    }

    fn forward(sink: &Sink, event: HookEvent) {
        let guard = sink.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(tx) = guard.as_ref() {
            // Receiver gone means the engine is shutting down
            let _ = tx.send(event);
        }
    }

    /// Physically held modifier keys, left and right tracked separately
    #[derive(Default)]
    struct HeldModifiers {
        keys: HashSet<Key>,
    }

    impl HeldModifiers {
        fn flags(&self) -> Modifiers {
            self.keys
                .iter()
                .filter_map(|k| k.modifier())
                .fold(Modifiers::NONE, Modifiers::with)
        }

        fn translate(&mut self, event: &Event) -> Option<HookEvent> {
            let (raw, pressed) = match event.event_type {
                EventType::KeyPress(k) => (k, true),
                EventType::KeyRelease(k) => (k, false),
                _ => return None,
            };
            let key = map_key(raw)?;

            if key.is_modifier() {
                if pressed {
                    self.keys.insert(key);
                } else {
                    self.keys.remove(&key);
                }
            }

            let event = KeyEvent::new(key, self.flags());
            Some(if pressed {
                HookEvent::KeyDown(event)
            } else {
                HookEvent::KeyUp(event)
            })
        }
    }

    #[allow(clippy::too_many_lines)]
    const fn map_key(key: rdev::Key) -> Option<Key> {
        use rdev::Key as R;

        let mapped = match key {
            R::Function => Key::Globe,
            R::ControlLeft => Key::Ctrl,
            R::ControlRight => Key::CtrlRight,
            R::Alt => Key::Alt,
            R::AltGr => Key::AltRight,
            R::ShiftLeft => Key::Shift,
            R::ShiftRight => Key::ShiftRight,
            R::MetaLeft => Key::Meta,
            R::MetaRight => Key::MetaRight,
            R::Escape => Key::Escape,
            R::Num1 => Key::Digit1,
            R::Num2 => Key::Digit2,
            R::Num3 => Key::Digit3,
            R::Num4 => Key::Digit4,
            R::Num5 => Key::Digit5,
            R::Num6 => Key::Digit6,
            R::Num7 => Key::Digit7,
            R::Num8 => Key::Digit8,
            R::Num9 => Key::Digit9,
            R::Num0 => Key::Digit0,
            R::Minus => Key::Minus,
            R::Equal => Key::Equal,
            R::Backspace => Key::Backspace,
            R::Tab => Key::Tab,
            R::KeyQ => Key::Q,
            R::KeyW => Key::W,
            R::KeyE => Key::E,
            R::KeyR => Key::R,
            R::KeyT => Key::T,
            R::KeyY => Key::Y,
            R::KeyU => Key::U,
            R::KeyI => Key::I,
            R::KeyO => Key::O,
            R::KeyP => Key::P,
            R::LeftBracket => Key::BracketLeft,
            R::RightBracket => Key::BracketRight,
            R::Return => Key::Enter,
            R::KeyA => Key::A,
            R::KeyS => Key::S,
            R::KeyD => Key::D,
            R::KeyF => Key::F,
            R::KeyG => Key::G,
            R::KeyH => Key::H,
            R::KeyJ => Key::J,
            R::KeyK => Key::K,
            R::KeyL => Key::L,
            R::SemiColon => Key::Semicolon,
            R::Quote => Key::Quote,
            R::BackQuote => Key::Backquote,
            R::BackSlash => Key::Backslash,
            R::KeyZ => Key::Z,
            R::KeyX => Key::X,
            R::KeyC => Key::C,
            R::KeyV => Key::V,
            R::KeyB => Key::B,
            R::KeyN => Key::N,
            R::KeyM => Key::M,
            R::Comma => Key::Comma,
            R::Dot => Key::Period,
            R::Slash => Key::Slash,
            R::KpMultiply => Key::NumpadMultiply,
            R::Space => Key::Space,
            R::CapsLock => Key::CapsLock,
            R::F1 => Key::F1,
            R::F2 => Key::F2,
            R::F3 => Key::F3,
            R::F4 => Key::F4,
            R::F5 => Key::F5,
            R::F6 => Key::F6,
            R::F7 => Key::F7,
            R::F8 => Key::F8,
            R::F9 => Key::F9,
            R::F10 => Key::F10,
            R::F11 => Key::F11,
            R::F12 => Key::F12,
            R::NumLock => Key::NumLock,
            R::ScrollLock => Key::ScrollLock,
            R::PrintScreen => Key::PrintScreen,
            R::Home => Key::Home,
            R::PageUp => Key::PageUp,
            R::End => Key::End,
            R::PageDown => Key::PageDown,
            R::Insert => Key::Insert,
            R::Delete => Key::Delete,
            R::UpArrow => Key::ArrowUp,
            R::LeftArrow => Key::ArrowLeft,
            R::RightArrow => Key::ArrowRight,
            R::DownArrow => Key::ArrowDown,
            R::Unknown(code) => Key::Other(RAW_CODE_BASE + code),
            _ => return None,
        };
        Some(mapped)
    }

    #[cfg(test)]
    mod tests {
        use super::*;
        use crate::input::keys::Modifier;
        use std::time::SystemTime;

        fn event(event_type: EventType) -> Event {
            Event {
                time: SystemTime::now(),
                name: None,
                event_type,
            }
        }

        #[test]
        fn test_map_key_covers_modifiers_and_globe() {
            assert_eq!(map_key(rdev::Key::Function), Some(Key::Globe));
            assert_eq!(map_key(rdev::Key::AltGr), Some(Key::AltRight));
            assert_eq!(map_key(rdev::Key::Return), Some(Key::Enter));
            assert_eq!(map_key(rdev::Key::KpPlus), None);
        }

        #[test]
        fn test_unknown_codes_never_collide() {
            let key = map_key(rdev::Key::Unknown(0)).unwrap();
            assert!(!key.is_globe());
            assert_eq!(key.code(), RAW_CODE_BASE);
        }

        #[test]
        fn test_held_modifiers_track_both_sides() {
            let mut held = HeldModifiers::default();
            held.translate(&event(EventType::KeyPress(rdev::Key::ShiftLeft)));
            held.translate(&event(EventType::KeyPress(rdev::Key::ShiftRight)));

            let up = held
                .translate(&event(EventType::KeyRelease(rdev::Key::ShiftLeft)))
                .unwrap();
            let HookEvent::KeyUp(up) = up else {
                panic!("expected key-up");
            };
            assert!(up.modifiers.shift, "right shift still held");

            let down = held
                .translate(&event(EventType::KeyPress(rdev::Key::Space)))
                .unwrap();
            assert_eq!(
                down,
                HookEvent::KeyDown(KeyEvent::new(
                    Key::Space,
                    Modifiers::NONE.with(Modifier::Shift)
                ))
            );
        }

        #[test]
        fn test_modifier_release_clears_own_flag() {
            let mut held = HeldModifiers::default();
            held.translate(&event(EventType::KeyPress(rdev::Key::ControlLeft)));
            let up = held
                .translate(&event(EventType::KeyRelease(rdev::Key::ControlLeft)))
                .unwrap();
            assert_eq!(
                up,
                HookEvent::KeyUp(KeyEvent::new(Key::Ctrl, Modifiers::NONE))
            );
        }

        #[test]
        fn test_mouse_events_are_dropped() {
            let mut held = HeldModifiers::default();
            assert!(held
                .translate(&event(EventType::MouseMove { x: 1.0, y: 2.0 }))
                .is_none());
        }

        #[test]
        #[ignore = "requires a display server and input monitoring permission"]
        fn test_real_hook_starts() {
            let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
            let mut source = RdevSource::new();
            assert!(source.start(tx).is_ok());
            source.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_null_source_refuses_to_start() {
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        let mut source = NullSource;
        assert!(matches!(source.start(tx), Err(SourceError::Unsupported)));
        source.stop();
    }
}
