//! Configuration values exchanged with the config service.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// A typed configuration value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Value {
    Bool(bool),
    Int(i32),
    Uint(u32),
    Double(f64),
    Str(String),
    StrList(Vec<String>),
}

impl Value {
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }
}

impl std::fmt::Display for Value {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::Double(v) => write!(f, "{v}"),
            Self::Str(v) => write!(f, "{v:?}"),
            Self::StrList(v) => write!(f, "{v:?}"),
        }
    }
}
