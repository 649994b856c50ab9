use tracing::{info, warn};

use super::accelerator::{self, ParseError};
use super::keys::{Key, KeyCombo, Modifiers, Platform};

/// Binding used when nothing persisted can be parsed
pub const DEFAULT_ACCELERATOR: &str = "CommandOrControl+Shift+Space";

/// Where the armed binding came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BindingSource {
    /// Raw `{keycode, modifiers}` pair from a capture session
    Raw,
    /// Legacy accelerator string
    Accelerator,
    /// Hard-coded default
    Default,
}

/// Binding resolved from settings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolvedBinding {
    /// Combo to arm
    pub combo: KeyCombo,
    /// Which setting supplied it
    pub source: BindingSource,
}

/// [`DEFAULT_ACCELERATOR`] resolved for `platform`
#[must_use]
pub const fn default_combo(platform: Platform) -> KeyCombo {
    let mac = platform.is_mac();
    KeyCombo::new(
        Key::Space,
        Modifiers {
            ctrl: !mac,
            alt: false,
            shift: true,
            meta: mac,
        },
    )
}

/// Decode the raw JSON pair stored by the settings UI
///
/// # Errors
/// Returns the JSON error if the payload is not `{keycode, modifiers}`.
pub fn parse_raw(raw: &str) -> Result<KeyCombo, serde_json::Error> {
    serde_json::from_str(raw)
}

/// Encode a combo as the raw JSON pair the settings store keeps
///
/// # Errors
/// Returns the JSON error from serialization.
pub fn to_raw(combo: KeyCombo) -> Result<String, serde_json::Error> {
    serde_json::to_string(&combo)
}

/// Pick the binding to arm: raw pair, then accelerator, then the default
///
/// Failures are logged and never surfaced; the caller always gets a usable
/// combination.
#[must_use]
pub fn resolve(raw: Option<&str>, accel: Option<&str>, platform: Platform) -> ResolvedBinding {
    if let Some(raw) = raw.filter(|r| !r.trim().is_empty()) {
        match parse_raw(raw) {
            Ok(combo) => {
                info!(keycode = combo.key.code(), "using raw hotkey binding");
                return ResolvedBinding {
                    combo,
                    source: BindingSource::Raw,
                };
            }
            Err(e) => warn!(error = %e, raw, "ignoring malformed raw hotkey binding"),
        }
    }

    if let Some(accel) = accel {
        match accelerator::parse(accel, platform) {
            Ok(combo) => {
                return ResolvedBinding {
                    combo,
                    source: BindingSource::Accelerator,
                }
            }
            Err(e) => log_parse_failure(accel, &e),
        }
    }

    ResolvedBinding {
        combo: default_combo(platform),
        source: BindingSource::Default,
    }
}

fn log_parse_failure(accel: &str, error: &ParseError) {
    warn!(
        accelerator = accel,
        error = %error,
        fallback = DEFAULT_ACCELERATOR,
        "failed to parse hotkey, falling back to default"
    );
}
