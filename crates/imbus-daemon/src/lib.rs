//! Core broker daemon for imbus.
//!
//! Owns the name service, input contexts, engine routing, and the hand-off
//! to the panel and config service, all driven from a single event loop.

pub mod broker;
pub mod config;
pub mod config_service;
pub mod connection;
pub mod context;
pub mod daemon;
pub mod engine;
pub mod error;
pub mod factory;
pub mod hotkey;
pub mod match_rule;
pub mod names;
pub mod outbox;
pub mod panel;
pub mod setup;

pub use broker::Broker;
pub use config::Config;
pub use daemon::{Daemon, DaemonEvent, DaemonStatus};
pub use error::{BusError, DaemonError};
