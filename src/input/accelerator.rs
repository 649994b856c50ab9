//! Accelerator strings (`"CommandOrControl+Shift+Space"`) to key combos and back.

use thiserror::Error;

use super::keys::{Key, KeyCombo, Modifier, Modifiers, Platform};

/// Accelerator parse failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// Input was empty or whitespace
    #[error("accelerator is empty")]
    Empty,

    /// Only modifier tokens were given
    #[error("accelerator has no main key")]
    MissingKey,

    /// More than one non-modifier token
    #[error("accelerator has more than one main key ({first:?} and {second:?})")]
    MultipleKeys {
        /// First main-key token
        first: String,
        /// Second main-key token
        second: String,
    },

    /// Main-key token not in the key table
    #[error("unknown key: {0:?}")]
    UnknownKey(String),
}

/// Parse an accelerator into a key combo
///
/// # Errors
/// Returns [`ParseError`] when the string is empty, has zero or several main
/// keys, or names a key outside the supported vocabulary.
pub fn parse(accelerator: &str, platform: Platform) -> Result<KeyCombo, ParseError> {
    if accelerator.trim().is_empty() {
        return Err(ParseError::Empty);
    }

    let mut modifiers = Modifiers::NONE;
    let mut main: Option<&str> = None;

    for token in accelerator.split('+').map(str::trim) {
        if let Some(modifier) = modifier_token(token, platform) {
            modifiers.set(modifier, true);
            continue;
        }
        if let Some(first) = main {
            return Err(ParseError::MultipleKeys {
                first: first.to_owned(),
                second: token.to_owned(),
            });
        }
        main = Some(token);
    }

    let token = main.ok_or(ParseError::MissingKey)?;
    let key = key_token(token).ok_or_else(|| ParseError::UnknownKey(token.to_owned()))?;
    Ok(KeyCombo::new(key, modifiers))
}

fn modifier_token(token: &str, platform: Platform) -> Option<Modifier> {
    match token {
        "CommandOrControl" | "CmdOrCtrl" => Some(if platform.is_mac() {
            Modifier::Meta
        } else {
            Modifier::Ctrl
        }),
        "Command" | "Cmd" | "Super" => Some(Modifier::Meta),
        "Control" | "Ctrl" => Some(Modifier::Ctrl),
        "Alt" | "Option" => Some(Modifier::Alt),
        "Shift" => Some(Modifier::Shift),
        _ => None,
    }
}

fn key_token(token: &str) -> Option<Key> {
    let mut chars = token.chars();
    if let (Some(c), None) = (chars.next(), chars.next()) {
        if let Some(key) = single_char_key(c.to_ascii_uppercase()) {
            return Some(key);
        }
    }

    let key = match token {
        "Space" => Key::Space,
        "Backspace" => Key::Backspace,
        "Delete" => Key::Delete,
        "Return" | "Enter" => Key::Enter,
        "Tab" => Key::Tab,
        "Escape" => Key::Escape,
        "Up" => Key::ArrowUp,
        "Down" => Key::ArrowDown,
        "Left" => Key::ArrowLeft,
        "Right" => Key::ArrowRight,
        "Home" => Key::Home,
        "End" => Key::End,
        "PageUp" => Key::PageUp,
        "PageDown" => Key::PageDown,
        "Insert" => Key::Insert,
        "Fn" | "Globe" => Key::Globe,
        "F1" => Key::F1,
        "F2" => Key::F2,
        "F3" => Key::F3,
        "F4" => Key::F4,
        "F5" => Key::F5,
        "F6" => Key::F6,
        "F7" => Key::F7,
        "F8" => Key::F8,
        "F9" => Key::F9,
        "F10" => Key::F10,
        "F11" => Key::F11,
        "F12" => Key::F12,
        "F13" => Key::F13,
        "F14" => Key::F14,
        "F15" => Key::F15,
        "F16" => Key::F16,
        "F17" => Key::F17,
        "F18" => Key::F18,
        "F19" => Key::F19,
        "F20" => Key::F20,
        _ => return None,
    };
    Some(key)
}

const fn single_char_key(c: char) -> Option<Key> {
    let key = match c {
        'A' => Key::A,
        'B' => Key::B,
        'C' => Key::C,
        'D' => Key::D,
        'E' => Key::E,
        'F' => Key::F,
        'G' => Key::G,
        'H' => Key::H,
        'I' => Key::I,
        'J' => Key::J,
        'K' => Key::K,
        'L' => Key::L,
        'M' => Key::M,
        'N' => Key::N,
        'O' => Key::O,
        'P' => Key::P,
        'Q' => Key::Q,
        'R' => Key::R,
        'S' => Key::S,
        'T' => Key::T,
        'U' => Key::U,
        'V' => Key::V,
        'W' => Key::W,
        'X' => Key::X,
        'Y' => Key::Y,
        'Z' => Key::Z,
        '0' => Key::Digit0,
        '1' => Key::Digit1,
        '2' => Key::Digit2,
        '3' => Key::Digit3,
        '4' => Key::Digit4,
        '5' => Key::Digit5,
        '6' => Key::Digit6,
        '7' => Key::Digit7,
        '8' => Key::Digit8,
        '9' => Key::Digit9,
        '-' => Key::Minus,
        '=' => Key::Equal,
        '[' => Key::BracketLeft,
        ']' => Key::BracketRight,
        '\\' => Key::Backslash,
        ';' => Key::Semicolon,
        '\'' => Key::Quote,
        ',' => Key::Comma,
        '.' => Key::Period,
        '/' => Key::Slash,
        '`' => Key::Backquote,
        _ => return None,
    };
    Some(key)
}

/// Human-readable form of a combo
///
/// macOS renders glyphs with no separator (`⌘⇧␣`), other platforms join
/// labels with `+` (`Ctrl+Shift+Space`). A modifier is not repeated when the
/// main key is that modifier, so binding bare Command shows `⌘`, not `⌘⌘`.
#[must_use]
pub fn format(combo: KeyCombo, platform: Platform) -> String {
    let mac = platform.is_mac();
    let own = combo.key.modifier();

    let mut parts: Vec<String> = Modifier::DISPLAY_ORDER
        .into_iter()
        .filter(|&m| combo.modifiers.get(m) && own != Some(m))
        .map(|m| modifier_label(m, mac).to_owned())
        .collect();

    parts.push(key_label(combo.key, mac));
    parts.join(if mac { "" } else { "+" })
}

const fn modifier_label(modifier: Modifier, mac: bool) -> &'static str {
    match (modifier, mac) {
        (Modifier::Meta, true) => "⌘",
        (Modifier::Meta, false) => "Super",
        (Modifier::Ctrl, true) => "⌃",
        (Modifier::Ctrl, false) => "Ctrl",
        (Modifier::Alt, true) => "⌥",
        (Modifier::Alt, false) => "Alt",
        (Modifier::Shift, true) => "⇧",
        (Modifier::Shift, false) => "Shift",
    }
}

fn key_label(key: Key, mac: bool) -> String {
    if let Some(modifier) = key.modifier() {
        return modifier_label(modifier, mac).to_owned();
    }

    let pretty = match key {
        Key::ArrowUp => "↑",
        Key::ArrowDown => "↓",
        Key::ArrowLeft => "←",
        Key::ArrowRight => "→",
        Key::Backspace => "⌫",
        Key::Delete => "⌦",
        Key::Enter => "↩",
        Key::Escape => "Esc",
        Key::Space if mac => "␣",
        Key::Globe if mac => "🌐",
        _ => return key.to_string(),
    };
    pretty.to_owned()
}
