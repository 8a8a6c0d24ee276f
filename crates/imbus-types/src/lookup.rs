//! Candidate lookup tables.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;
use crate::text::Text;

/// A paginated list of conversion candidates.
///
/// Paging and cursor movement are computed by the engine; the broker only
/// caches and relays the table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct LookupTable {
    pub page_size: u32,
    pub cursor_pos: u32,
    pub cursor_visible: bool,
    pub candidates: Vec<Text>,
}

impl LookupTable {
    #[must_use]
    pub fn new(page_size: u32) -> Self {
        Self {
            page_size,
            cursor_pos: 0,
            cursor_visible: true,
            candidates: Vec::new(),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.page_size == 0 {
            return Err(ValidationError::ZeroPageSize);
        }
        let len = u32::try_from(self.candidates.len()).unwrap_or(u32::MAX);
        if len > 0 && self.cursor_pos >= len {
            return Err(ValidationError::CursorOutOfRange {
                cursor: self.cursor_pos,
                len,
            });
        }
        self.candidates.iter().try_for_each(Text::validate)
    }
}

impl Default for LookupTable {
    fn default() -> Self {
        Self::new(5)
    }
}
