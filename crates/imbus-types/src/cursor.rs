//! Cursor geometry reported by clients.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// The on-screen rectangle of the client's text cursor.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub struct CursorLocation {
    pub x: i32,
    pub y: i32,
    pub width: i32,
    pub height: i32,
}

impl CursorLocation {
    #[must_use]
    pub fn new(x: i32, y: i32, width: i32, height: i32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}
