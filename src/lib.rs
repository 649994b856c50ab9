//! Flowcopy Hotkey - global push-to-talk hotkey engine for voice dictation
//!
//! This library exports the engine and its ambient plumbing so the binary,
//! the Globe helper and the integration tests share one implementation.

/// Configuration management
pub mod config;
/// Input handling (key codes, accelerators, hook, Globe helper, engine)
pub mod input;
/// macOS permission checks
pub mod permissions;
/// Logging setup
pub mod telemetry;
