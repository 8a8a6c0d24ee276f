//! Reserved names, object paths and identifier types.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

/// Well-known name of the bus-level service (name ownership, match rules).
pub const BUS_NAME: &str = "org.imbus.Bus";
pub const BUS_PATH: &str = "/org/imbus/Bus";

/// Well-known name of the input-method broker.
pub const BROKER_NAME: &str = "org.imbus.Broker";
pub const BROKER_PATH: &str = "/org/imbus/Broker";

/// Every unique connection name starts with this character.
pub const UNIQUE_PREFIX: char = ':';

const MAX_NAME_LEN: usize = 255;

/// Broker-assigned identifier of an input context, rendered as `"1"`, `"2"`...
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Encode, Decode,
)]
pub struct ContextId(pub u32);

impl ContextId {
    /// Object path the context's signals are emitted from.
    #[must_use]
    pub fn path(self) -> String {
        format!("/org/imbus/InputContext_{}", self.0)
    }
}

impl std::fmt::Display for ContextId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Whether `name` is one of the names owned by the broker itself.
#[must_use]
pub fn is_reserved(name: &str) -> bool {
    name == BUS_NAME || name == BROKER_NAME
}

#[must_use]
pub fn is_unique(name: &str) -> bool {
    name.starts_with(UNIQUE_PREFIX)
}

/// Check the syntax of a bus name (unique or well-known).
pub fn validate_bus_name(name: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::BusName(name.to_string());
    if name.is_empty() || name.len() > MAX_NAME_LEN {
        return Err(invalid());
    }
    let (body, unique) = match name.strip_prefix(UNIQUE_PREFIX) {
        Some(rest) => (rest, true),
        None => (name, false),
    };
    let elements: Vec<&str> = body.split('.').collect();
    if elements.len() < 2 {
        return Err(invalid());
    }
    for element in elements {
        let mut chars = element.chars();
        let Some(first) = chars.next() else {
            return Err(invalid());
        };
        if !unique && first.is_ascii_digit() {
            return Err(invalid());
        }
        if !element
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        {
            return Err(invalid());
        }
    }
    Ok(())
}

/// Check the syntax of an object path (`/`, `/a/b_c`).
pub fn validate_object_path(path: &str) -> Result<(), ValidationError> {
    let invalid = || ValidationError::ObjectPath(path.to_string());
    let Some(rest) = path.strip_prefix('/') else {
        return Err(invalid());
    };
    if rest.is_empty() {
        return Ok(());
    }
    for element in rest.split('/') {
        if element.is_empty()
            || !element
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '_')
        {
            return Err(invalid());
        }
    }
    Ok(())
}
