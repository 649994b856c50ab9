use serde::{Deserialize, Serialize};
use std::fmt;

/// Code reserved for the Globe/Fn key, which the generic hook cannot track as a held key
pub const GLOBE_CODE: u32 = 0;

/// Platform flavour used for accelerator parsing and display formatting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Platform {
    /// macOS (glyph display, `CommandOrControl` → meta)
    MacOs,
    /// Windows
    Windows,
    /// Linux and other unix desktops
    Linux,
}

impl Platform {
    /// Platform this binary was compiled for
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "macos") {
            Self::MacOs
        } else if cfg!(target_os = "windows") {
            Self::Windows
        } else {
            Self::Linux
        }
    }

    /// Whether display strings use macOS glyphs
    #[must_use]
    pub const fn is_mac(self) -> bool {
        matches!(self, Self::MacOs)
    }
}

/// One of the four tracked modifiers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Modifier {
    /// Control
    Ctrl,
    /// Alt / Option
    Alt,
    /// Shift
    Shift,
    /// Command / Super / Windows
    Meta,
}

impl Modifier {
    /// All modifiers in display order (meta first, as macOS renders them)
    pub const DISPLAY_ORDER: [Self; 4] = [Self::Meta, Self::Ctrl, Self::Alt, Self::Shift];
}

/// Modifier flags; `false` means "must not be held" once armed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Modifiers {
    /// Control held
    pub ctrl: bool,
    /// Alt / Option held
    pub alt: bool,
    /// Shift held
    pub shift: bool,
    /// Command / Super held
    pub meta: bool,
}

impl Modifiers {
    /// No modifiers
    pub const NONE: Self = Self {
        ctrl: false,
        alt: false,
        shift: false,
        meta: false,
    };

    /// True when no flag is set
    #[must_use]
    pub const fn is_empty(self) -> bool {
        !(self.ctrl || self.alt || self.shift || self.meta)
    }

    /// Read a single flag
    #[must_use]
    pub const fn get(self, modifier: Modifier) -> bool {
        match modifier {
            Modifier::Ctrl => self.ctrl,
            Modifier::Alt => self.alt,
            Modifier::Shift => self.shift,
            Modifier::Meta => self.meta,
        }
    }

    /// Set a single flag
    pub fn set(&mut self, modifier: Modifier, held: bool) {
        match modifier {
            Modifier::Ctrl => self.ctrl = held,
            Modifier::Alt => self.alt = held,
            Modifier::Shift => self.shift = held,
            Modifier::Meta => self.meta = held,
        }
    }

    /// Builder-style variant of [`Modifiers::set`]
    #[must_use]
    pub fn with(mut self, modifier: Modifier) -> Self {
        self.set(modifier, true);
        self
    }

    /// Flags set in either operand
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self {
            ctrl: self.ctrl || other.ctrl,
            alt: self.alt || other.alt,
            shift: self.shift || other.shift,
            meta: self.meta || other.meta,
        }
    }

    /// True if every flag set in `required` is also set here
    #[must_use]
    pub const fn contains_all(self, required: Self) -> bool {
        (!required.ctrl || self.ctrl)
            && (!required.alt || self.alt)
            && (!required.shift || self.shift)
            && (!required.meta || self.meta)
    }
}

macro_rules! key_table {
    ($($(#[$doc:meta])* $variant:ident = $code:literal => $label:literal,)+) => {
        /// A key in the hook's code space (libuiohook virtual codes)
        ///
        /// Named variants cover the keys the accelerator grammar and display
        /// formatter know about. Every other code round-trips through
        /// [`Key::Other`]; [`Key::from_code`] never produces `Other` for a code
        /// that has a named variant.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        #[serde(from = "u32", into = "u32")]
        pub enum Key {
            $(
                #[doc = concat!("`", $label, "` key")]
                $(#[$doc])*
                $variant,
            )+
            /// Any code outside the named table
            Other(u32),
        }

        impl Key {
            /// Numeric code in the hook's code space
            #[must_use]
            pub const fn code(self) -> u32 {
                match self {
                    $(Self::$variant => $code,)+
                    Self::Other(code) => code,
                }
            }

            /// Resolve a numeric code, falling back to [`Key::Other`]
            #[must_use]
            pub const fn from_code(code: u32) -> Self {
                match code {
                    $($code => Self::$variant,)+
                    other => Self::Other(other),
                }
            }

            /// Table name of the key, `None` for [`Key::Other`]
            #[must_use]
            pub const fn label(self) -> Option<&'static str> {
                match self {
                    $(Self::$variant => Some($label),)+
                    Self::Other(_) => None,
                }
            }
        }
    };
}

key_table! {
    /// Globe / Fn (sentinel)
    Globe = 0 => "Fn",
    Escape = 0x0001 => "Escape",
    Digit1 = 0x0002 => "1",
    Digit2 = 0x0003 => "2",
    Digit3 = 0x0004 => "3",
    Digit4 = 0x0005 => "4",
    Digit5 = 0x0006 => "5",
    Digit6 = 0x0007 => "6",
    Digit7 = 0x0008 => "7",
    Digit8 = 0x0009 => "8",
    Digit9 = 0x000A => "9",
    Digit0 = 0x000B => "0",
    Minus = 0x000C => "Minus",
    Equal = 0x000D => "Equal",
    Backspace = 0x000E => "Backspace",
    Tab = 0x000F => "Tab",
    Q = 0x0010 => "Q",
    W = 0x0011 => "W",
    E = 0x0012 => "E",
    R = 0x0013 => "R",
    T = 0x0014 => "T",
    Y = 0x0015 => "Y",
    U = 0x0016 => "U",
    I = 0x0017 => "I",
    O = 0x0018 => "O",
    P = 0x0019 => "P",
    BracketLeft = 0x001A => "BracketLeft",
    BracketRight = 0x001B => "BracketRight",
    Enter = 0x001C => "Enter",
    /// Left control
    Ctrl = 0x001D => "Ctrl",
    A = 0x001E => "A",
    S = 0x001F => "S",
    D = 0x0020 => "D",
    F = 0x0021 => "F",
    G = 0x0022 => "G",
    H = 0x0023 => "H",
    J = 0x0024 => "J",
    K = 0x0025 => "K",
    L = 0x0026 => "L",
    Semicolon = 0x0027 => "Semicolon",
    Quote = 0x0028 => "Quote",
    Backquote = 0x0029 => "Backquote",
    /// Left shift
    Shift = 0x002A => "Shift",
    Backslash = 0x002B => "Backslash",
    Z = 0x002C => "Z",
    X = 0x002D => "X",
    C = 0x002E => "C",
    V = 0x002F => "V",
    B = 0x0030 => "B",
    N = 0x0031 => "N",
    M = 0x0032 => "M",
    Comma = 0x0033 => "Comma",
    Period = 0x0034 => "Period",
    Slash = 0x0035 => "Slash",
    ShiftRight = 0x0036 => "ShiftRight",
    NumpadMultiply = 0x0037 => "NumpadMultiply",
    /// Left alt / option
    Alt = 0x0038 => "Alt",
    Space = 0x0039 => "Space",
    CapsLock = 0x003A => "CapsLock",
    F1 = 0x003B => "F1",
    F2 = 0x003C => "F2",
    F3 = 0x003D => "F3",
    F4 = 0x003E => "F4",
    F5 = 0x003F => "F5",
    F6 = 0x0040 => "F6",
    F7 = 0x0041 => "F7",
    F8 = 0x0042 => "F8",
    F9 = 0x0043 => "F9",
    F10 = 0x0044 => "F10",
    NumLock = 0x0045 => "NumLock",
    ScrollLock = 0x0046 => "ScrollLock",
    F11 = 0x0057 => "F11",
    F12 = 0x0058 => "F12",
    F13 = 0x005B => "F13",
    F14 = 0x005C => "F14",
    F15 = 0x005D => "F15",
    F16 = 0x0063 => "F16",
    F17 = 0x0064 => "F17",
    F18 = 0x0065 => "F18",
    F19 = 0x0066 => "F19",
    F20 = 0x0067 => "F20",
    CtrlRight = 0x0E1D => "CtrlRight",
    PrintScreen = 0x0E37 => "PrintScreen",
    AltRight = 0x0E38 => "AltRight",
    Home = 0x0E47 => "Home",
    PageUp = 0x0E49 => "PageUp",
    End = 0x0E4F => "End",
    PageDown = 0x0E51 => "PageDown",
    Insert = 0x0E52 => "Insert",
    Delete = 0x0E53 => "Delete",
    /// Left command / super
    Meta = 0x0E5B => "Meta",
    MetaRight = 0x0E5C => "MetaRight",
    ArrowUp = 0xE048 => "ArrowUp",
    ArrowLeft = 0xE04B => "ArrowLeft",
    ArrowRight = 0xE04D => "ArrowRight",
    ArrowDown = 0xE050 => "ArrowDown",
}

impl Key {
    /// Modifier this key drives, if it is a (left or right) modifier key
    #[must_use]
    pub const fn modifier(self) -> Option<Modifier> {
        match self {
            Self::Ctrl | Self::CtrlRight => Some(Modifier::Ctrl),
            Self::Alt | Self::AltRight => Some(Modifier::Alt),
            Self::Shift | Self::ShiftRight => Some(Modifier::Shift),
            Self::Meta | Self::MetaRight => Some(Modifier::Meta),
            _ => None,
        }
    }

    /// True for the eight modifier keys
    #[must_use]
    pub const fn is_modifier(self) -> bool {
        self.modifier().is_some()
    }

    /// True for the Globe/Fn sentinel
    #[must_use]
    pub const fn is_globe(self) -> bool {
        self.code() == GLOBE_CODE
    }
}

impl From<u32> for Key {
    fn from(code: u32) -> Self {
        Self::from_code(code)
    }
}

impl From<Key> for u32 {
    fn from(key: Key) -> Self {
        key.code()
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.label() {
            Some(label) => f.write_str(label),
            None => write!(f, "Key({})", self.code()),
        }
    }
}

/// A key with its modifier requirements
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct KeyCombo {
    /// Main key
    #[serde(rename = "keycode")]
    pub key: Key,
    /// Exact modifier set
    #[serde(alias = "mods")]
    pub modifiers: Modifiers,
}

impl KeyCombo {
    /// Combine a key with modifiers
    #[must_use]
    pub const fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }
}

/// Key press with the modifier flags live at the time of the event
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    /// Key pressed or released
    pub key: Key,
    /// Modifier flags reported with the event
    pub modifiers: Modifiers,
}

impl KeyEvent {
    /// Build an event
    #[must_use]
    pub const fn new(key: Key, modifiers: Modifiers) -> Self {
        Self { key, modifiers }
    }
}

/// Event emitted by a [`crate::input::source::KeyEventSource`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookEvent {
    /// Key went down
    KeyDown(KeyEvent),
    /// Key went up
    KeyUp(KeyEvent),
}
