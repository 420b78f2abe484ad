//! Input events.
//!
//! A [`Key`] is the only thing a client sends to the server in steady state.
//! Terminal resizes travel on the same channel as a distinguished key whose
//! code packs the new dimensions, so ordering between keystrokes and resizes
//! is preserved by construction.

use std::ops::{BitOr, BitOrAssign};

use crate::display::DisplayCoord;

/// Modifier bitmask carried in the first byte of an encoded key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Modifiers(u8);

impl Modifiers {
    pub const NONE: Modifiers = Modifiers(0);
    pub const CONTROL: Modifiers = Modifiers(1);
    pub const ALT: Modifiers = Modifiers(1 << 1);
    /// Marks a resize pseudo-key; the code packs a [`DisplayCoord`].
    pub const RESIZE: Modifiers = Modifiers(1 << 6);

    pub fn contains(self, other: Modifiers) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn bits(self) -> u8 {
        self.0
    }

    pub fn from_bits(bits: u8) -> Option<Modifiers> {
        const KNOWN: u8 = 1 | 1 << 1 | 1 << 6;
        if bits & !KNOWN != 0 {
            return None;
        }
        Some(Modifiers(bits))
    }
}

impl BitOr for Modifiers {
    type Output = Modifiers;

    fn bitor(self, rhs: Modifiers) -> Modifiers {
        Modifiers(self.0 | rhs.0)
    }
}

impl BitOrAssign for Modifiers {
    fn bitor_assign(&mut self, rhs: Modifiers) {
        self.0 |= rhs.0;
    }
}

/// Base of the named-key code range, above any Unicode scalar value.
const NAMED_KEY_BASE: u32 = 0x0040_0000;

/// Non-printable keys with their own wire codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NamedKey {
    Escape,
    Backspace,
    Delete,
    Up,
    Down,
    Left,
    Right,
    PageUp,
    PageDown,
    Home,
    End,
    Tab,
    /// Function key, 1 through 12.
    F(u8),
}

impl NamedKey {
    pub(crate) fn to_code(self) -> u32 {
        let offset = match self {
            NamedKey::Escape => 0,
            NamedKey::Backspace => 1,
            NamedKey::Delete => 2,
            NamedKey::Up => 3,
            NamedKey::Down => 4,
            NamedKey::Left => 5,
            NamedKey::Right => 6,
            NamedKey::PageUp => 7,
            NamedKey::PageDown => 8,
            NamedKey::Home => 9,
            NamedKey::End => 10,
            NamedKey::Tab => 11,
            NamedKey::F(n) => 11 + u32::from(n),
        };
        NAMED_KEY_BASE + offset
    }

    pub(crate) fn from_code(code: u32) -> Option<NamedKey> {
        let offset = code.checked_sub(NAMED_KEY_BASE)?;
        match offset {
            0 => Some(NamedKey::Escape),
            1 => Some(NamedKey::Backspace),
            2 => Some(NamedKey::Delete),
            3 => Some(NamedKey::Up),
            4 => Some(NamedKey::Down),
            5 => Some(NamedKey::Left),
            6 => Some(NamedKey::Right),
            7 => Some(NamedKey::PageUp),
            8 => Some(NamedKey::PageDown),
            9 => Some(NamedKey::Home),
            10 => Some(NamedKey::End),
            11 => Some(NamedKey::Tab),
            12..=23 => Some(NamedKey::F((offset - 11) as u8)),
            _ => None,
        }
    }
}

/// The code half of a key event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyCode {
    /// A printable codepoint.
    Char(char),
    /// A non-printable named key.
    Named(NamedKey),
    /// New terminal dimensions; only valid with [`Modifiers::RESIZE`].
    Resize(DisplayCoord),
}

/// A single input event: modifiers plus code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Key {
    pub modifiers: Modifiers,
    pub code: KeyCode,
}

impl Key {
    pub fn normal(c: char) -> Key {
        Key {
            modifiers: Modifiers::NONE,
            code: KeyCode::Char(c),
        }
    }

    pub fn ctrl(c: char) -> Key {
        Key {
            modifiers: Modifiers::CONTROL,
            code: KeyCode::Char(c),
        }
    }

    pub fn alt(c: char) -> Key {
        Key {
            modifiers: Modifiers::ALT,
            code: KeyCode::Char(c),
        }
    }

    pub fn named(key: NamedKey) -> Key {
        Key {
            modifiers: Modifiers::NONE,
            code: KeyCode::Named(key),
        }
    }

    /// The resize pseudo-key announcing new terminal dimensions.
    pub fn resize(dimensions: DisplayCoord) -> Key {
        Key {
            modifiers: Modifiers::RESIZE,
            code: KeyCode::Resize(dimensions),
        }
    }

    /// The packed dimensions if this is a resize key.
    pub fn resize_coord(&self) -> Option<DisplayCoord> {
        match self.code {
            KeyCode::Resize(coord) => Some(coord),
            _ => None,
        }
    }
}

/// Pack a coordinate into a key code: 16 bits of line, 16 bits of column.
pub(crate) fn encode_coord(coord: DisplayCoord) -> u32 {
    ((coord.line as u32 & 0xFFFF) << 16) | (coord.column as u32 & 0xFFFF)
}

pub(crate) fn decode_coord(code: u32) -> DisplayCoord {
    DisplayCoord {
        line: (code >> 16) as i32,
        column: (code & 0xFFFF) as i32,
    }
}
