//! Global hotkey capture and matching.
//!
//! Leaf to root: [`keys`] (code space), [`accelerator`] (string form),
//! [`binding`] (persisted settings), [`source`] and [`globe`] (event
//! producers), [`capture`] and [`hotkey`] (engine), [`service`] (async loop).

/// Accelerator string parsing and display formatting
pub mod accelerator;
/// Persisted binding resolution
pub mod binding;
/// Interactive "press the new hotkey" capture
pub mod capture;
/// Globe/Fn helper process bridge
pub mod globe;
/// Push-to-talk matching engine
pub mod hotkey;
/// Key codes and modifier flags
pub mod keys;
/// Async control loop and handle
pub mod service;
/// System-wide keyboard hook
pub mod source;
