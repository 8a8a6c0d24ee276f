//! Key events, modifier masks and keysyms.
//!
//! Keyvals are X11 keysyms so that clients on any toolkit can hand them over
//! without translation.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// Modifier state accompanying a key event (X11 bit layout).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct Modifiers(pub u32);

impl Modifiers {
    pub const NONE: Self = Self(0);
    pub const SHIFT: Self = Self(1 << 0);
    pub const LOCK: Self = Self(1 << 1);
    pub const CONTROL: Self = Self(1 << 2);
    /// Usually Alt.
    pub const MOD1: Self = Self(1 << 3);
    /// Usually NumLock.
    pub const MOD2: Self = Self(1 << 4);
    pub const MOD3: Self = Self(1 << 5);
    /// Usually Super.
    pub const MOD4: Self = Self(1 << 6);
    pub const MOD5: Self = Self(1 << 7);
    pub const RELEASE: Self = Self(1 << 30);

    #[must_use]
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    #[must_use]
    pub fn without(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Look up a modifier by the name used in hotkey strings.
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "shift" => Some(Self::SHIFT),
            "lock" => Some(Self::LOCK),
            "control" | "ctrl" => Some(Self::CONTROL),
            "alt" | "mod1" => Some(Self::MOD1),
            "mod2" => Some(Self::MOD2),
            "mod3" => Some(Self::MOD3),
            "super" | "mod4" => Some(Self::MOD4),
            "mod5" => Some(Self::MOD5),
            _ => None,
        }
    }
}

impl std::ops::BitOr for Modifiers {
    type Output = Self;

    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

/// A key press or release as delivered by a client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct KeyEvent {
    pub keyval: u32,
    pub is_press: bool,
    pub modifiers: Modifiers,
}

impl KeyEvent {
    #[must_use]
    pub fn press(keyval: u32, modifiers: Modifiers) -> Self {
        Self {
            keyval,
            is_press: true,
            modifiers,
        }
    }

    #[must_use]
    pub fn release(keyval: u32, modifiers: Modifiers) -> Self {
        Self {
            keyval,
            is_press: false,
            modifiers: modifiers | Modifiers::RELEASE,
        }
    }
}

/// The keysyms the broker needs to name; everything else passes through.
pub mod keysym {
    pub const SPACE: u32 = 0x0020;
    pub const BACKSPACE: u32 = 0xff08;
    pub const TAB: u32 = 0xff09;
    pub const RETURN: u32 = 0xff0d;
    pub const ESCAPE: u32 = 0xff1b;
    pub const KANJI: u32 = 0xff21;
    pub const MUHENKAN: u32 = 0xff22;
    pub const HENKAN: u32 = 0xff23;
    pub const ZENKAKU_HANKAKU: u32 = 0xff2a;
    pub const HANGUL: u32 = 0xff31;
    pub const F1: u32 = 0xffbe;
    pub const SHIFT_L: u32 = 0xffe1;
    pub const SHIFT_R: u32 = 0xffe2;
    pub const CONTROL_L: u32 = 0xffe3;
    pub const CONTROL_R: u32 = 0xffe4;
    pub const ALT_L: u32 = 0xffe9;
    pub const ALT_R: u32 = 0xffea;
    pub const SUPER_L: u32 = 0xffeb;

    const NAMED: &[(&str, u32)] = &[
        ("space", SPACE),
        ("BackSpace", BACKSPACE),
        ("Tab", TAB),
        ("Return", RETURN),
        ("Escape", ESCAPE),
        ("Kanji", KANJI),
        ("Muhenkan", MUHENKAN),
        ("Henkan", HENKAN),
        ("Zenkaku_Hankaku", ZENKAKU_HANKAKU),
        ("Hangul", HANGUL),
        ("Shift_L", SHIFT_L),
        ("Shift_R", SHIFT_R),
        ("Control_L", CONTROL_L),
        ("Control_R", CONTROL_R),
        ("Alt_L", ALT_L),
        ("Alt_R", ALT_R),
        ("Super_L", SUPER_L),
    ];

    /// Resolve a keysym name (`"space"`, `"F3"`, `"a"`).
    #[must_use]
    pub fn from_name(name: &str) -> Option<u32> {
        if let Some((_, sym)) = NAMED.iter().find(|(n, _)| n.eq_ignore_ascii_case(name)) {
            return Some(*sym);
        }
        if let Some(n) = name.strip_prefix('F').and_then(|n| n.parse::<u32>().ok()) {
            if (1..=12).contains(&n) {
                return Some(F1 + n - 1);
            }
        }
        let mut chars = name.chars();
        match (chars.next(), chars.next()) {
            // Latin-1 keysyms equal their code points.
            (Some(c), None) if c.is_ascii_graphic() => Some(u32::from(c.to_ascii_lowercase())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn without_masks_bits() {
        let state = Modifiers::CONTROL | Modifiers::MOD2;
        assert_eq!(state.without(Modifiers::MOD2), Modifiers::CONTROL);
        assert!(state.contains(Modifiers::CONTROL));
        assert!(!state.contains(Modifiers::SHIFT));
    }

    #[test]
    fn release_sets_release_bit() {
        let ev = KeyEvent::release(keysym::SPACE, Modifiers::CONTROL);
        assert!(!ev.is_press);
        assert!(ev.modifiers.contains(Modifiers::RELEASE));
    }

    #[test]
    fn keysym_names_resolve() {
        assert_eq!(keysym::from_name("space"), Some(keysym::SPACE));
        assert_eq!(keysym::from_name("zenkaku_hankaku"), Some(keysym::ZENKAKU_HANKAKU));
        assert_eq!(keysym::from_name("F3"), Some(0xffc0));
        assert_eq!(keysym::from_name("J"), Some(u32::from(b'j')));
        assert_eq!(keysym::from_name("F13"), None);
        assert_eq!(keysym::from_name("nonsense"), None);
    }

    #[test]
    fn modifier_names_resolve() {
        assert_eq!(Modifiers::from_name("Control"), Some(Modifiers::CONTROL));
        assert_eq!(Modifiers::from_name("ctrl"), Some(Modifiers::CONTROL));
        assert_eq!(Modifiers::from_name("Alt"), Some(Modifiers::MOD1));
        assert_eq!(Modifiers::from_name("Hyper"), None);
    }
}
