//! Shared types for imbus.
//!
//! This crate contains everything that crosses the wire between the broker,
//! clients, engines, the panel and the config service: attributed text,
//! lookup tables, properties, key events, factory descriptors, config values
//! and the bus message envelope.

pub mod cursor;
pub mod error;
pub mod factory;
pub mod key;
pub mod lookup;
pub mod message;
pub mod names;
pub mod property;
pub mod text;
pub mod value;

pub use cursor::CursorLocation;
pub use error::ValidationError;
pub use factory::{FactoryEntry, FactoryInfo};
pub use key::{keysym, KeyEvent, Modifiers};
pub use lookup::LookupTable;
pub use message::{
    Body, BrokerMethod, BusMethod, BusSignal, ConfigMethod, ConfigSignal, ContextSignal,
    EngineMethod, EngineSignal, ErrorName, ErrorReply, FactoryMethod, Message, Method, MethodCall,
    MethodReturn, PanelMethod, PanelSignal, ReleaseNameReply, RequestNameReply, ReturnValue,
    Signal, SignalKind,
};
pub use names::{ContextId, BROKER_NAME, BROKER_PATH, BUS_NAME, BUS_PATH};
pub use property::{PropKind, PropList, PropState, Property};
pub use text::{AttrKind, Attribute, Text};
pub use value::Value;
