//! Bus message types.
//!
//! Every frame on the wire is one [`Message`]: a method call addressed to an
//! object path on a named peer, a reply or error for an earlier call, or a
//! signal. Method and signal arguments are typed per interface so a peer can
//! only ever send calls the receiving side knows how to interpret.

use bincode::{Decode, Encode};
use serde::{Deserialize, Serialize};

use crate::cursor::CursorLocation;
use crate::error::ValidationError;
use crate::factory::{FactoryEntry, FactoryInfo};
use crate::key::KeyEvent;
use crate::lookup::LookupTable;
use crate::names::{validate_bus_name, validate_object_path, ContextId};
use crate::property::{PropList, PropState, Property};
use crate::text::Text;
use crate::value::Value;

pub const BUS_INTERFACE: &str = "org.imbus.Bus";
pub const INPUT_CONTEXT_INTERFACE: &str = "org.imbus.InputContext";
pub const ENGINE_INTERFACE: &str = "org.imbus.Engine";
pub const PANEL_INTERFACE: &str = "org.imbus.Panel";
pub const CONFIG_INTERFACE: &str = "org.imbus.Config";

/// `RequestName` flag: let a later `REPLACE_EXISTING` request take the name.
pub const NAME_FLAG_ALLOW_REPLACEMENT: u32 = 0x1;
/// `RequestName` flag: take the name from an owner that allows replacement.
pub const NAME_FLAG_REPLACE_EXISTING: u32 = 0x2;

/// Input context capability bits (`SetCapabilities`).
pub const CAP_PREEDIT: u32 = 0x1;
pub const CAP_AUX_STRING: u32 = 0x2;
pub const CAP_LOOKUP_TABLE: u32 = 0x4;
pub const CAP_FOCUS: u32 = 0x8;
pub const CAP_ALL: u32 = CAP_PREEDIT | CAP_AUX_STRING | CAP_LOOKUP_TABLE | CAP_FOCUS;

/// Top-level message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Message {
    /// Sender-chosen serial; replies refer to it.
    pub serial: u32,
    /// Unique name of the sender, stamped by the broker when routing.
    pub sender: Option<String>,
    /// Target name; `None` addresses the broker.
    pub destination: Option<String>,
    pub body: Body,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Body {
    Call(MethodCall),
    Return(MethodReturn),
    Error(ErrorReply),
    Signal(Signal),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct MethodCall {
    pub path: String,
    pub method: Method,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct MethodReturn {
    pub reply_serial: u32,
    pub value: ReturnValue,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub struct ErrorReply {
    pub reply_serial: u32,
    pub name: ErrorName,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub struct Signal {
    pub path: String,
    pub kind: SignalKind,
}

/// Error names carried by error replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Encode, Decode)]
pub enum ErrorName {
    NameConflict,
    InvalidName,
    NoSuchName,
    NoSuchContext,
    NoSuchFactory,
    AlreadyRegistered,
    ProtocolViolation,
    PeerLost,
    Failed,
}

impl std::fmt::Display for ErrorName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::NameConflict => "NameConflict",
            Self::InvalidName => "InvalidName",
            Self::NoSuchName => "NoSuchName",
            Self::NoSuchContext => "NoSuchContext",
            Self::NoSuchFactory => "NoSuchFactory",
            Self::AlreadyRegistered => "AlreadyRegistered",
            Self::ProtocolViolation => "ProtocolViolation",
            Self::PeerLost => "PeerLost",
            Self::Failed => "Failed",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Methods
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum Method {
    Bus(BusMethod),
    Broker(BrokerMethod),
    Factory(FactoryMethod),
    Engine(EngineMethod),
    Panel(PanelMethod),
    Config(ConfigMethod),
}

/// Name service and subscription methods, served by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum BusMethod {
    /// First call on every connection; returns the unique name.
    Hello,
    RequestName { name: String, flags: u32 },
    ReleaseName { name: String },
    ListNames,
    ListActivatableNames,
    NameHasOwner { name: String },
    GetNameOwner { name: String },
    AddMatch { rule: String },
    RemoveMatch { rule: String },
    GetId,
}

/// Input-method methods served by the broker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum BrokerMethod {
    RegisterFactories { paths: Vec<String> },
    RegisterPanel { path: String, replace: bool },
    RegisterConfig { path: String, replace: bool },
    CreateInputContext { name: String },
    ReleaseInputContext { id: ContextId },
    SetCapabilities { id: ContextId, caps: u32 },
    /// Replies `Bool(handled)`, possibly after the engine has answered.
    ProcessKeyEvent { id: ContextId, event: KeyEvent },
    FocusIn { id: ContextId },
    FocusOut { id: ContextId },
    Reset { id: ContextId },
    SetCursorLocation { id: ContextId, location: CursorLocation },
    IsEnabled { id: ContextId },
    SetEnable { id: ContextId, enabled: bool },
    GetFactories,
    GetFactoryInfo { path: String },
    SetFactory { path: String },
    ConfigGetValue { section: String, name: String },
    ConfigGetValues { section: String },
    ConfigSetValue { section: String, name: String, value: Value },
    ConfigUnsetValue { section: String, name: String },
    Kill,
}

/// Implemented by engine factories, called by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum FactoryMethod {
    /// Replies `FactoryInfo`.
    GetInfo,
    /// Replies `Str(engine_object_path)`.
    CreateEngine,
}

/// Implemented by every engine instance, called by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum EngineMethod {
    /// Replies `Bool(handled)`.
    ProcessKeyEvent(KeyEvent),
    FocusIn,
    FocusOut,
    SetCursorLocation(CursorLocation),
    Reset,
    PageUp,
    PageDown,
    CursorUp,
    CursorDown,
    SetEnable(bool),
    PropertyActivate { name: String, state: PropState },
    PropertyShow { name: String },
    PropertyHide { name: String },
    Destroy,
}

/// Implemented by the panel, called by the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum PanelMethod {
    UpdatePreedit {
        text: Text,
        cursor_pos: u32,
        visible: bool,
    },
    UpdateAuxString {
        text: Text,
        visible: bool,
    },
    UpdateLookupTable {
        table: LookupTable,
        visible: bool,
    },
    RegisterProperties(PropList),
    UpdateProperty(Property),
    SetCursorLocation(CursorLocation),
    ShowLanguageBar,
    HideLanguageBar,
    FocusIn {
        path: String,
    },
    FocusOut {
        path: String,
    },
    StatesChanged {
        enabled: bool,
    },
    Reset,
    Destroy,
}

/// Implemented by the config service.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum ConfigMethod {
    GetValue { section: String, name: String },
    GetValues { section: String },
    SetValue { section: String, name: String, value: Value },
    UnsetValue { section: String, name: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum RequestNameReply {
    PrimaryOwner,
    InUse,
    AlreadyOwner,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ReleaseNameReply {
    Released,
    NonExistent,
    NotOwner,
}

/// Successful method results.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum ReturnValue {
    Unit,
    Bool(bool),
    Str(String),
    Strings(Vec<String>),
    Context(ContextId),
    RequestName(RequestNameReply),
    ReleaseName(ReleaseNameReply),
    FactoryInfo(FactoryInfo),
    Factories(Vec<FactoryEntry>),
    Value(Value),
    Values(Vec<(String, Value)>),
}

// ---------------------------------------------------------------------------
// Signals
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum SignalKind {
    Bus(BusSignal),
    Context(ContextSignal),
    Engine(EngineSignal),
    Panel(PanelSignal),
    Config(ConfigSignal),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum BusSignal {
    /// An empty owner string means "none".
    NameOwnerChanged {
        name: String,
        old_owner: String,
        new_owner: String,
    },
    NameAcquired {
        name: String,
    },
    NameLost {
        name: String,
    },
}

/// Emitted by the broker towards the client owning an input context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum ContextSignal {
    CommitString(Text),
    UpdatePreedit {
        text: Text,
        cursor_pos: u32,
        visible: bool,
    },
    ForwardKeyEvent(KeyEvent),
    Enabled,
    Disabled,
}

/// Emitted by engine instances from their own object path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum EngineSignal {
    CommitString(Text),
    UpdatePreedit {
        text: Text,
        cursor_pos: u32,
        visible: bool,
    },
    UpdateAuxString {
        text: Text,
        visible: bool,
    },
    UpdateLookupTable {
        table: LookupTable,
        visible: bool,
    },
    RegisterProperties(PropList),
    UpdateProperty(Property),
    ForwardKeyEvent(KeyEvent),
}

/// User interaction reported by the panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Encode, Decode)]
pub enum PanelSignal {
    PageUp,
    PageDown,
    CursorUp,
    CursorDown,
    PropertyActivate { name: String, state: PropState },
    PropertyShow { name: String },
    PropertyHide { name: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Encode, Decode)]
pub enum ConfigSignal {
    ValueChanged {
        section: String,
        name: String,
        value: Value,
    },
}

// ---------------------------------------------------------------------------
// Construction and inspection
// ---------------------------------------------------------------------------

impl Message {
    /// A method call; the serial is assigned when the message is sent.
    #[must_use]
    pub fn call(destination: Option<&str>, path: impl Into<String>, method: Method) -> Self {
        Self {
            serial: 0,
            sender: None,
            destination: destination.map(str::to_string),
            body: Body::Call(MethodCall {
                path: path.into(),
                method,
            }),
        }
    }

    #[must_use]
    pub fn method_return(reply_serial: u32, value: ReturnValue) -> Self {
        Self {
            serial: 0,
            sender: None,
            destination: None,
            body: Body::Return(MethodReturn {
                reply_serial,
                value,
            }),
        }
    }

    #[must_use]
    pub fn error(reply_serial: u32, name: ErrorName, message: impl Into<String>) -> Self {
        Self {
            serial: 0,
            sender: None,
            destination: None,
            body: Body::Error(ErrorReply {
                reply_serial,
                name,
                message: message.into(),
            }),
        }
    }

    #[must_use]
    pub fn signal(path: impl Into<String>, kind: SignalKind) -> Self {
        Self {
            serial: 0,
            sender: None,
            destination: None,
            body: Body::Signal(Signal {
                path: path.into(),
                kind,
            }),
        }
    }

    /// Serial of the call this message answers, if it is a reply.
    #[must_use]
    pub fn reply_serial(&self) -> Option<u32> {
        match &self.body {
            Body::Return(r) => Some(r.reply_serial),
            Body::Error(e) => Some(e.reply_serial),
            Body::Call(_) | Body::Signal(_) => None,
        }
    }

    /// Check invariants bincode cannot express.
    pub fn validate(&self) -> Result<(), ValidationError> {
        if let Some(name) = &self.sender {
            validate_bus_name(name)?;
        }
        if let Some(name) = &self.destination {
            validate_bus_name(name)?;
        }
        match &self.body {
            Body::Call(call) => {
                validate_object_path(&call.path)?;
                call.method.validate()
            }
            Body::Return(_) | Body::Error(_) => Ok(()),
            Body::Signal(signal) => {
                validate_object_path(&signal.path)?;
                signal.kind.validate()
            }
        }
    }
}

impl Method {
    /// Interface the method belongs to.
    #[must_use]
    pub fn interface(&self) -> &'static str {
        match self {
            Self::Bus(_) => BUS_INTERFACE,
            Self::Broker(_) => crate::names::BROKER_NAME,
            Self::Factory(_) => "org.imbus.Factory",
            Self::Engine(_) => ENGINE_INTERFACE,
            Self::Panel(_) => PANEL_INTERFACE,
            Self::Config(_) => CONFIG_INTERFACE,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Broker(m) => m.validate(),
            Self::Panel(m) => m.validate(),
            Self::Bus(_) | Self::Factory(_) | Self::Engine(_) | Self::Config(_) => Ok(()),
        }
    }
}

impl BrokerMethod {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::RegisterFactories { paths } => {
                paths.iter().try_for_each(|p| validate_object_path(p))
            }
            Self::RegisterPanel { path, .. }
            | Self::RegisterConfig { path, .. }
            | Self::GetFactoryInfo { path }
            | Self::SetFactory { path } => validate_object_path(path),
            _ => Ok(()),
        }
    }
}

impl PanelMethod {
    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::UpdatePreedit { text, .. } | Self::UpdateAuxString { text, .. } => {
                text.validate()
            }
            Self::UpdateLookupTable { table, .. } => table.validate(),
            Self::RegisterProperties(props) => props.validate(),
            Self::UpdateProperty(prop) => prop.validate(),
            _ => Ok(()),
        }
    }
}

impl SignalKind {
    #[must_use]
    pub fn interface(&self) -> &'static str {
        match self {
            Self::Bus(_) => BUS_INTERFACE,
            Self::Context(_) => INPUT_CONTEXT_INTERFACE,
            Self::Engine(_) => ENGINE_INTERFACE,
            Self::Panel(_) => PANEL_INTERFACE,
            Self::Config(_) => CONFIG_INTERFACE,
        }
    }

    #[must_use]
    pub fn member(&self) -> &'static str {
        match self {
            Self::Bus(s) => match s {
                BusSignal::NameOwnerChanged { .. } => "NameOwnerChanged",
                BusSignal::NameAcquired { .. } => "NameAcquired",
                BusSignal::NameLost { .. } => "NameLost",
            },
            Self::Context(s) => match s {
                ContextSignal::CommitString(_) => "CommitString",
                ContextSignal::UpdatePreedit { .. } => "UpdatePreedit",
                ContextSignal::ForwardKeyEvent(_) => "ForwardKeyEvent",
                ContextSignal::Enabled => "Enabled",
                ContextSignal::Disabled => "Disabled",
            },
            Self::Engine(s) => match s {
                EngineSignal::CommitString(_) => "CommitString",
                EngineSignal::UpdatePreedit { .. } => "UpdatePreedit",
                EngineSignal::UpdateAuxString { .. } => "UpdateAuxString",
                EngineSignal::UpdateLookupTable { .. } => "UpdateLookupTable",
                EngineSignal::RegisterProperties(_) => "RegisterProperties",
                EngineSignal::UpdateProperty(_) => "UpdateProperty",
                EngineSignal::ForwardKeyEvent(_) => "ForwardKeyEvent",
            },
            Self::Panel(s) => match s {
                PanelSignal::PageUp => "PageUp",
                PanelSignal::PageDown => "PageDown",
                PanelSignal::CursorUp => "CursorUp",
                PanelSignal::CursorDown => "CursorDown",
                PanelSignal::PropertyActivate { .. } => "PropertyActivate",
                PanelSignal::PropertyShow { .. } => "PropertyShow",
                PanelSignal::PropertyHide { .. } => "PropertyHide",
            },
            Self::Config(ConfigSignal::ValueChanged { .. }) => "ValueChanged",
        }
    }

    /// First string argument, used by `arg0` match rules.
    #[must_use]
    pub fn arg0(&self) -> Option<&str> {
        match self {
            Self::Bus(
                BusSignal::NameOwnerChanged { name, .. }
                | BusSignal::NameAcquired { name }
                | BusSignal::NameLost { name },
            ) => Some(name),
            Self::Panel(
                PanelSignal::PropertyActivate { name, .. }
                | PanelSignal::PropertyShow { name }
                | PanelSignal::PropertyHide { name },
            ) => Some(name),
            Self::Config(ConfigSignal::ValueChanged { section, .. }) => Some(section),
            _ => None,
        }
    }

    fn validate(&self) -> Result<(), ValidationError> {
        match self {
            Self::Engine(s) => match s {
                EngineSignal::CommitString(text)
                | EngineSignal::UpdatePreedit { text, .. }
                | EngineSignal::UpdateAuxString { text, .. } => text.validate(),
                EngineSignal::UpdateLookupTable { table, .. } => table.validate(),
                EngineSignal::RegisterProperties(props) => props.validate(),
                EngineSignal::UpdateProperty(prop) => prop.validate(),
                EngineSignal::ForwardKeyEvent(_) => Ok(()),
            },
            Self::Context(
                ContextSignal::CommitString(text) | ContextSignal::UpdatePreedit { text, .. },
            ) => text.validate(),
            _ => Ok(()),
        }
    }
}
