//! Engine factory descriptors.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

/// What a factory reports about the engines it creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct FactoryInfo {
    /// Engine name, e.g. "Anthy".
    pub name: String,
    /// Language tag, e.g. "ja" or "zh_CN".
    pub language: String,
    pub icon: String,
    pub authors: String,
    pub license: String,
}

impl FactoryInfo {
    #[must_use]
    pub fn new(name: impl Into<String>, language: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            language: language.into(),
            icon: String::new(),
            authors: String::new(),
            license: String::new(),
        }
    }
}

/// One registered factory as listed by `GetFactories`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct FactoryEntry {
    pub path: String,
    /// Unique name of the connection that registered the factory.
    pub owner: String,
    /// `None` until the factory has answered `GetInfo`.
    pub info: Option<FactoryInfo>,
}
