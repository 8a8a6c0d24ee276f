//! Trigger chord that toggles an input context on and off.

use std::str::FromStr;

use imbus_types::{keysym, KeyEvent, Modifiers};

use crate::error::DaemonError;

/// Parsed hotkey such as `Control+space`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hotkey {
    pub keyval: u32,
    pub modifiers: Modifiers,
}

impl Default for Hotkey {
    fn default() -> Self {
        Self {
            keyval: keysym::SPACE,
            modifiers: Modifiers::CONTROL,
        }
    }
}

impl Hotkey {
    /// Whether `event` is a press of exactly this chord.
    ///
    /// NumLock (`MOD2`) is ignored. Releases never match.
    pub fn matches(&self, event: &KeyEvent) -> bool {
        event.is_press
            && !event.modifiers.contains(Modifiers::RELEASE)
            && event.keyval == self.keyval
            && event.modifiers.without(Modifiers::MOD2) == self.modifiers
    }
}

impl FromStr for Hotkey {
    type Err = DaemonError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |why: &str| DaemonError::Config(format!("invalid hotkey {s:?}: {why}"));
        let mut parts: Vec<&str> = s.split('+').map(str::trim).collect();
        let key = parts.pop().filter(|k| !k.is_empty()).ok_or_else(|| invalid("no key"))?;
        let keyval = keysym::from_name(key).ok_or_else(|| invalid("unknown key"))?;
        let mut modifiers = Modifiers::NONE;
        for part in parts {
            let m = Modifiers::from_name(part).ok_or_else(|| invalid("unknown modifier"))?;
            modifiers = modifiers | m;
        }
        Ok(Self { keyval, modifiers })
    }
}

impl std::fmt::Display for Hotkey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for (bit, name) in [
            (Modifiers::CONTROL, "Control"),
            (Modifiers::SHIFT, "Shift"),
            (Modifiers::MOD1, "Alt"),
            (Modifiers::MOD4, "Super"),
        ] {
            if self.modifiers.contains(bit) {
                write!(f, "{name}+")?;
            }
        }
        write!(f, "{:#x}", self.keyval)
    }
}
