//! Attributed text: preedit strings, aux strings and candidates.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// How an attribute decorates its range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum AttrKind {
    /// Underline style (`value` is one of the `UNDERLINE_*` constants).
    Underline,
    /// Foreground colour as `0x00RRGGBB`.
    Foreground,
    /// Background colour as `0x00RRGGBB`.
    Background,
}

pub const UNDERLINE_NONE: u32 = 0;
pub const UNDERLINE_SINGLE: u32 = 1;
pub const UNDERLINE_DOUBLE: u32 = 2;
pub const UNDERLINE_LOW: u32 = 3;

/// A decoration applied to the character range `start..end`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Attribute {
    pub kind: AttrKind,
    pub value: u32,
    /// First character (inclusive), counted in chars, not bytes.
    pub start: u32,
    /// Last character (exclusive).
    pub end: u32,
}

impl Attribute {
    #[must_use]
    pub fn underline(start: u32, end: u32) -> Self {
        Self {
            kind: AttrKind::Underline,
            value: UNDERLINE_SINGLE,
            start,
            end,
        }
    }
}

/// A string with display attributes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct Text {
    pub text: String,
    pub attrs: Vec<Attribute>,
}

impl Text {
    /// Plain text without attributes.
    #[must_use]
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            attrs: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_attrs(text: impl Into<String>, attrs: Vec<Attribute>) -> Self {
        Self {
            text: text.into(),
            attrs,
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }

    /// Length in characters.
    #[must_use]
    pub fn char_len(&self) -> u32 {
        u32::try_from(self.text.chars().count()).unwrap_or(u32::MAX)
    }

    /// Check that every attribute range lies inside the text.
    pub fn validate(&self) -> Result<(), ValidationError> {
        let len = self.char_len();
        for attr in &self.attrs {
            if attr.start > attr.end || attr.end > len {
                return Err(ValidationError::AttributeRange {
                    start: attr.start,
                    end: attr.end,
                    len,
                });
            }
        }
        Ok(())
    }
}

impl From<&str> for Text {
    fn from(s: &str) -> Self {
        Self::plain(s)
    }
}

impl std::fmt::Display for Text {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.text)
    }
}
