//! The broker: routes every message on the bus and owns all broker state.
//!
//! `Broker` is driven by one task. Each inbound message is handled to
//! completion by [`Broker::dispatch`], which never awaits; everything the
//! handling produced is then flushed to the per-connection writer queues.
//! Connection loss is handled the same way by [`Broker::disconnect`].

use std::collections::{BTreeMap, HashMap};

use imbus_types::names::validate_object_path;
use imbus_types::{
    Body, BrokerMethod, BusMethod, ConfigMethod, ConfigSignal, ContextId, Message, Method,
    MethodCall, PanelMethod, PanelSignal, ReturnValue, Signal, SignalKind, Value, BROKER_NAME,
    BUS_NAME, BUS_PATH,
};
use tokio::sync::mpsc;
use tracing::{debug, info, trace, warn};

use crate::config::Config;
use crate::config_service::{ConfigAnswer, ConfigService, DummyConfig, RemoteConfig};
use crate::connection::{ConnId, Connection, ConnectionTable, SendFailure};
use crate::context::{InputContext, KeyRoute};
use crate::daemon::DaemonStatus;
use crate::engine::{key_reply_handled, Engine};
use crate::error::{BusError, DaemonError};
use crate::factory::FactoryRegistry;
use crate::hotkey::Hotkey;
use crate::match_rule::MatchRule;
use crate::names::{NameEvent, NameRegistry, Owner};
use crate::outbox::Outbox;
use crate::panel::{DummyPanel, Panel, RemotePanel};

const TRIGGER_SECTION: &str = "general";
const TRIGGER_NAME: &str = "trigger";

/// A call the broker made and still expects an answer to.
#[derive(Debug)]
struct PendingCall {
    callee: ConnId,
    kind: Pending,
}

#[derive(Debug)]
enum Pending {
    /// Relay `handled` to the client that asked.
    KeyEvent { client: ConnId, client_serial: u32 },
    /// Bind the created engine to the context.
    CreateEngine { context: ContextId, factory: String },
    FactoryInfo { path: String },
    /// Relay a config service answer to the client that asked.
    ConfigRelay { client: ConnId, client_serial: u32 },
    /// Initial read of the trigger chord from a new config service.
    TriggerLookup,
}

pub struct Broker {
    guid: String,
    conns: ConnectionTable,
    next_conn: u64,
    names: NameRegistry,
    contexts: BTreeMap<ContextId, InputContext>,
    next_context: u32,
    /// Engine signal demultiplexing: (hosting connection, engine path).
    engines: HashMap<(ConnId, String), ContextId>,
    factories: FactoryRegistry,
    panel: Box<dyn Panel>,
    config: Box<dyn ConfigService>,
    hotkey: Hotkey,
    default_capabilities: u32,
    focused: Option<ContextId>,
    pending: HashMap<u32, PendingCall>,
    name_events: Vec<NameEvent>,
    out: Outbox,
    /// Connections torn down since the last `take_closed`.
    closed: Vec<ConnId>,
    shutdown_requested: bool,
}

fn is_local(destination: Option<&str>) -> bool {
    matches!(destination, None | Some(BUS_NAME | BROKER_NAME))
}

impl Broker {
    pub fn new(config: &Config) -> Result<Self, DaemonError> {
        let hotkey: Hotkey = config.hotkey.trigger.parse()?;
        Ok(Self {
            guid: uuid::Uuid::new_v4().simple().to_string(),
            conns: ConnectionTable::new(),
            next_conn: 1,
            names: NameRegistry::new(),
            contexts: BTreeMap::new(),
            next_context: 1,
            engines: HashMap::new(),
            factories: FactoryRegistry::new(),
            panel: Box::new(DummyPanel),
            config: Box::new(DummyConfig),
            hotkey,
            default_capabilities: config.input.capabilities,
            focused: None,
            pending: HashMap::new(),
            name_events: Vec::new(),
            out: Outbox::new(),
            closed: Vec::new(),
            shutdown_requested: false,
        })
    }

    /// Bus GUID returned by `GetId`.
    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn hotkey(&self) -> Hotkey {
        self.hotkey
    }

    /// Whether a peer called `Kill`.
    pub fn shutdown_requested(&self) -> bool {
        self.shutdown_requested
    }

    pub fn status(&self) -> DaemonStatus {
        DaemonStatus {
            connections: self.conns.len(),
            contexts: self.contexts.len(),
            factories: self.factories.len(),
            engines: self.engines.len(),
            focused: self.focused,
            panel_registered: self.panel.owner().is_some(),
            config_registered: self.config.owner().is_some(),
        }
    }

    /// Add a connection whose outbound frames go to `tx`.
    pub fn connect(&mut self, tx: mpsc::Sender<Message>) -> ConnId {
        let id = ConnId(self.next_conn);
        self.next_conn += 1;
        self.conns.insert(id, Connection::new(id, tx));
        debug!(conn = %id, "connection accepted");
        id
    }

    /// Handle one inbound message and flush the result.
    pub fn dispatch(&mut self, from: ConnId, msg: Message) {
        self.handle(from, msg);
        self.flush();
    }

    /// A frame from `from` could not be decoded or failed validation.
    pub fn violation(&mut self, from: ConnId, serial: Option<u32>, reason: &str) {
        warn!(conn = %from, reason, "protocol violation");
        if let Some(serial) = serial {
            self.out
                .error(from, serial, &BusError::ProtocolViolation(reason.to_string()));
        }
        self.flush();
    }

    /// Tear down everything `conn` owned and flush the notifications.
    pub fn disconnect(&mut self, conn: ConnId) {
        self.teardown(conn);
        self.flush();
    }

    /// Connections removed since the last call, whether the peer hung up
    /// or the broker dropped them.
    pub fn take_closed(&mut self) -> Vec<ConnId> {
        std::mem::take(&mut self.closed)
    }

    /// Drop every connection's queue without notifying anyone.
    pub fn close_all(&mut self) {
        for (_, mut conn) in self.conns.drain() {
            conn.close();
        }
    }

    // -----------------------------------------------------------------------
    // Delivery
    // -----------------------------------------------------------------------

    fn flush(&mut self) {
        loop {
            let mut doomed = Vec::new();
            for (to, mut msg) in self.out.drain() {
                let Some(conn) = self.conns.get(&to) else {
                    continue;
                };
                if !conn.is_alive() {
                    continue;
                }
                if msg.destination.is_none() {
                    msg.destination = conn.unique_name().map(str::to_string);
                }
                match conn.send(msg) {
                    Ok(()) => {}
                    Err(SendFailure::Full) => {
                        warn!(conn = %to, "outbound queue full, dropping connection");
                        doomed.push(to);
                    }
                    Err(SendFailure::Closed) => doomed.push(to),
                }
            }
            if doomed.is_empty() {
                break;
            }
            for conn in doomed {
                self.teardown(conn);
            }
        }
    }

    fn deliver_name_events(&mut self) {
        for event in std::mem::take(&mut self.name_events) {
            match event {
                NameEvent::Direct(to, signal) => {
                    self.out.bus_signal(to, SignalKind::Bus(signal));
                }
                NameEvent::Broadcast(signal) => {
                    let kind = SignalKind::Bus(signal);
                    let mut probe = Message::signal(BUS_PATH, kind.clone());
                    probe.sender = Some(BUS_NAME.to_string());
                    for to in self.subscribers(&probe) {
                        self.out.bus_signal(to, kind.clone());
                    }
                }
            }
        }
    }

    /// Live connections whose match rules accept `msg`, in id order.
    fn subscribers(&self, msg: &Message) -> Vec<ConnId> {
        let mut ids: Vec<ConnId> = self
            .conns
            .values()
            .filter(|c| c.is_alive() && c.unique_name().is_some() && c.wants(msg))
            .map(Connection::id)
            .collect();
        ids.sort();
        ids
    }

    // -----------------------------------------------------------------------
    // Routing
    // -----------------------------------------------------------------------

    fn handle(&mut self, from: ConnId, mut msg: Message) {
        let Some(conn) = self.conns.get(&from) else {
            return;
        };
        if !conn.is_alive() {
            return;
        }
        trace!(conn = %from, serial = msg.serial, "inbound message");
        let sender = conn.unique_name().map(str::to_string);

        if sender.is_none() {
            let is_hello = matches!(
                &msg.body,
                Body::Call(MethodCall {
                    method: Method::Bus(BusMethod::Hello),
                    ..
                })
            ) && is_local(msg.destination.as_deref());
            if !is_hello {
                if matches!(msg.body, Body::Call(_)) {
                    self.out.error(
                        from,
                        msg.serial,
                        &BusError::ProtocolViolation("Hello must be the first call".into()),
                    );
                } else {
                    debug!(conn = %from, "dropping message sent before Hello");
                }
                return;
            }
        }
        msg.sender = sender;

        if is_local(msg.destination.as_deref()) {
            self.handle_local(from, msg);
        } else {
            self.route(from, msg);
        }
    }

    /// Forward a peer-to-peer message to the destination's owner.
    fn route(&mut self, from: ConnId, msg: Message) {
        let destination = msg.destination.clone().unwrap_or_default();
        match self.names.lookup_owner(&destination) {
            Ok(Owner::Connection(to)) => {
                debug!(from = %from, to = %to, destination = %destination, "routing message");
                self.out.forward(to, msg);
            }
            Ok(Owner::Broker) => self.handle_local(from, msg),
            Err(e) => {
                if matches!(msg.body, Body::Call(_)) {
                    self.out.error(from, msg.serial, &e);
                } else {
                    debug!(destination = %destination, "dropping message for unknown name");
                }
            }
        }
    }

    fn handle_local(&mut self, from: ConnId, msg: Message) {
        let serial = msg.serial;
        match msg.body {
            Body::Call(call) => {
                match self.handle_call(from, serial, call.method) {
                    Ok(Some(value)) => self.out.reply(from, serial, value),
                    Ok(None) => {}
                    Err(e) => {
                        debug!(conn = %from, serial, error = %e, "call failed");
                        self.out.error(from, serial, &e);
                    }
                }
                self.deliver_name_events();
            }
            Body::Return(_) | Body::Error(_) => self.handle_reply(from, &msg.body),
            Body::Signal(signal) => {
                let sender = msg.sender.clone();
                self.handle_signal(from, sender, signal);
            }
        }
    }

    /// `Ok(None)` means the reply is deferred until a peer answers.
    fn handle_call(
        &mut self,
        from: ConnId,
        serial: u32,
        method: Method,
    ) -> Result<Option<ReturnValue>, BusError> {
        match method {
            Method::Bus(m) => self.handle_bus(from, m).map(Some),
            Method::Broker(m) => self.handle_broker(from, serial, m),
            other => Err(BusError::Failed(format!(
                "interface {} is not served by the broker",
                other.interface()
            ))),
        }
    }

    // -----------------------------------------------------------------------
    // Name service
    // -----------------------------------------------------------------------

    fn handle_bus(&mut self, from: ConnId, method: BusMethod) -> Result<ReturnValue, BusError> {
        match method {
            BusMethod::Hello => {
                let conn = self
                    .conns
                    .get_mut(&from)
                    .ok_or_else(|| BusError::Failed("unknown connection".into()))?;
                let unique = self.names.register_connection(conn, &mut self.name_events)?;
                Ok(ReturnValue::Str(unique))
            }
            BusMethod::RequestName { name, flags } => self
                .names
                .request_name(&mut self.conns, from, &name, flags, &mut self.name_events)
                .map(ReturnValue::RequestName),
            BusMethod::ReleaseName { name } => self
                .names
                .release_name(&mut self.conns, from, &name, &mut self.name_events)
                .map(ReturnValue::ReleaseName),
            BusMethod::ListNames => Ok(ReturnValue::Strings(self.names.list_names())),
            BusMethod::ListActivatableNames => Ok(ReturnValue::Strings(vec![
                BROKER_NAME.to_string(),
                BUS_NAME.to_string(),
            ])),
            BusMethod::NameHasOwner { name } => Ok(ReturnValue::Bool(self.names.has_owner(&name))),
            BusMethod::GetNameOwner { name } => self.names.owner_name(&name).map(ReturnValue::Str),
            BusMethod::AddMatch { rule } => {
                let parsed: MatchRule = rule.parse()?;
                if let Some(conn) = self.conns.get_mut(&from) {
                    conn.add_match(parsed);
                }
                debug!(conn = %from, rule = %rule, "match rule added");
                Ok(ReturnValue::Unit)
            }
            BusMethod::RemoveMatch { rule } => {
                let parsed: MatchRule = rule.parse()?;
                let removed = self
                    .conns
                    .get_mut(&from)
                    .is_some_and(|c| c.remove_match(&parsed));
                if removed {
                    Ok(ReturnValue::Unit)
                } else {
                    Err(BusError::NoSuchName(rule))
                }
            }
            BusMethod::GetId => Ok(ReturnValue::Str(self.guid.clone())),
        }
    }

    // -----------------------------------------------------------------------
    // Broker methods
    // -----------------------------------------------------------------------

    fn unique_name(&self, conn: ConnId) -> String {
        self.conns
            .get(&conn)
            .and_then(Connection::unique_name)
            .unwrap_or_default()
            .to_string()
    }

    /// The context `id`, if `from` created it.
    fn owned_context(&mut self, from: ConnId, id: ContextId) -> Result<&mut InputContext, BusError> {
        self.contexts
            .get_mut(&id)
            .filter(|ctx| ctx.owner() == from)
            .ok_or(BusError::NoSuchContext(id))
    }

    fn handle_broker(
        &mut self,
        from: ConnId,
        serial: u32,
        method: BrokerMethod,
    ) -> Result<Option<ReturnValue>, BusError> {
        let unit = Ok(Some(ReturnValue::Unit));
        match method {
            BrokerMethod::RegisterFactories { paths } => {
                let owner = self.unique_name(from);
                self.factories.register_factories(from, &owner, &paths)?;
                for path in paths {
                    let serial = self.factories.request_info(&mut self.out, &path)?;
                    self.pending.insert(
                        serial,
                        PendingCall {
                            callee: from,
                            kind: Pending::FactoryInfo { path },
                        },
                    );
                }
                unit
            }
            BrokerMethod::RegisterPanel { path, replace } => {
                self.register_panel(from, path, replace)?;
                unit
            }
            BrokerMethod::RegisterConfig { path, replace } => {
                self.register_config(from, path, replace)?;
                unit
            }
            BrokerMethod::CreateInputContext { name } => {
                let id = ContextId(self.next_context);
                self.next_context += 1;
                let ctx = InputContext::new(id, from, name, self.default_capabilities);
                info!(context = %id, conn = %from, client = %ctx.client(), "input context created");
                self.contexts.insert(id, ctx);
                Ok(Some(ReturnValue::Context(id)))
            }
            BrokerMethod::ReleaseInputContext { id } => {
                self.owned_context(from, id)?;
                self.destroy_context(id);
                unit
            }
            BrokerMethod::SetCapabilities { id, caps } => {
                self.owned_context(from, id)?.set_capabilities(caps);
                unit
            }
            BrokerMethod::ProcessKeyEvent { id, event } => {
                let hotkey = self.hotkey;
                let ctx = self
                    .contexts
                    .get_mut(&id)
                    .filter(|ctx| ctx.owner() == from)
                    .ok_or(BusError::NoSuchContext(id))?;
                match ctx.process_key_event(&mut self.out, &hotkey, event) {
                    KeyRoute::Hotkey => {
                        let enabled = !ctx.is_enabled();
                        debug!(context = %id, enabled, "trigger chord");
                        self.set_enable(id, enabled);
                        Ok(Some(ReturnValue::Bool(true)))
                    }
                    KeyRoute::Engine(engine_serial) => {
                        let callee = ctx.engine().map_or(from, Engine::conn);
                        self.pending.insert(
                            engine_serial,
                            PendingCall {
                                callee,
                                kind: Pending::KeyEvent {
                                    client: from,
                                    client_serial: serial,
                                },
                            },
                        );
                        Ok(None)
                    }
                    KeyRoute::Unhandled => Ok(Some(ReturnValue::Bool(false))),
                }
            }
            BrokerMethod::FocusIn { id } => {
                self.owned_context(from, id)?;
                self.focus(id);
                unit
            }
            BrokerMethod::FocusOut { id } => {
                let ctx = self
                    .contexts
                    .get_mut(&id)
                    .filter(|ctx| ctx.owner() == from)
                    .ok_or(BusError::NoSuchContext(id))?;
                ctx.focus_out(&mut self.out, self.panel.as_mut());
                if self.focused == Some(id) {
                    self.focused = None;
                }
                unit
            }
            BrokerMethod::Reset { id } => {
                let out = &mut self.out;
                self.contexts
                    .get(&id)
                    .filter(|ctx| ctx.owner() == from)
                    .ok_or(BusError::NoSuchContext(id))?
                    .reset(out);
                unit
            }
            BrokerMethod::SetCursorLocation { id, location } => {
                let ctx = self
                    .contexts
                    .get_mut(&id)
                    .filter(|ctx| ctx.owner() == from)
                    .ok_or(BusError::NoSuchContext(id))?;
                ctx.set_cursor_location(&mut self.out, self.panel.as_mut(), location);
                unit
            }
            BrokerMethod::IsEnabled { id } => {
                let enabled = self.owned_context(from, id)?.is_enabled();
                Ok(Some(ReturnValue::Bool(enabled)))
            }
            BrokerMethod::SetEnable { id, enabled } => {
                self.owned_context(from, id)?;
                self.set_enable(id, enabled);
                unit
            }
            BrokerMethod::GetFactories => Ok(Some(ReturnValue::Factories(self.factories.list()))),
            BrokerMethod::GetFactoryInfo { path } => {
                let entry = self.factories.get(&path)?;
                let info = entry.info.clone().ok_or_else(|| {
                    BusError::Failed(format!("factory {path} has not described itself yet"))
                })?;
                Ok(Some(ReturnValue::FactoryInfo(info)))
            }
            BrokerMethod::SetFactory { path } => {
                self.factories.set_preferred(&path)?;
                if let Some(id) = self.focused {
                    if self.contexts.get(&id).is_some_and(InputContext::is_enabled) {
                        self.provision(id);
                    }
                }
                unit
            }
            BrokerMethod::ConfigGetValue { section, name } => {
                self.config_request(from, serial, ConfigMethod::GetValue { section, name })
            }
            BrokerMethod::ConfigGetValues { section } => {
                self.config_request(from, serial, ConfigMethod::GetValues { section })
            }
            BrokerMethod::ConfigSetValue {
                section,
                name,
                value,
            } => self.config_request(
                from,
                serial,
                ConfigMethod::SetValue {
                    section,
                    name,
                    value,
                },
            ),
            BrokerMethod::ConfigUnsetValue { section, name } => {
                self.config_request(from, serial, ConfigMethod::UnsetValue { section, name })
            }
            BrokerMethod::Kill => {
                info!(conn = %from, "shutdown requested");
                self.shutdown_requested = true;
                unit
            }
        }
    }

    fn register_panel(&mut self, from: ConnId, path: String, replace: bool) -> Result<(), BusError> {
        if self.panel.owner().is_some() && !replace {
            return Err(BusError::AlreadyRegistered("panel".into()));
        }
        if self.panel.owner().is_some() {
            self.panel.notify(&mut self.out, PanelMethod::Destroy);
        }
        info!(conn = %from, path = %path, "panel registered");
        self.panel = Box::new(RemotePanel::new(from, path));
        if let Some(ctx) = self.focused.and_then(|id| self.contexts.get(&id)) {
            ctx.replay_panel(&mut self.out, self.panel.as_mut());
        }
        Ok(())
    }

    fn register_config(&mut self, from: ConnId, path: String, replace: bool) -> Result<(), BusError> {
        if self.config.owner().is_some() && !replace {
            return Err(BusError::AlreadyRegistered("config service".into()));
        }
        info!(conn = %from, path = %path, "config service registered");
        self.config = Box::new(RemoteConfig::new(from, path));
        let answer = self.config.request(
            &mut self.out,
            ConfigMethod::GetValue {
                section: TRIGGER_SECTION.into(),
                name: TRIGGER_NAME.into(),
            },
        );
        if let ConfigAnswer::Pending { conn, serial } = answer {
            self.pending.insert(
                serial,
                PendingCall {
                    callee: conn,
                    kind: Pending::TriggerLookup,
                },
            );
        }
        Ok(())
    }

    fn config_request(
        &mut self,
        from: ConnId,
        serial: u32,
        method: ConfigMethod,
    ) -> Result<Option<ReturnValue>, BusError> {
        match self.config.request(&mut self.out, method) {
            ConfigAnswer::Ready(result) => result.map(Some),
            ConfigAnswer::Pending {
                conn,
                serial: relay_serial,
            } => {
                self.pending.insert(
                    relay_serial,
                    PendingCall {
                        callee: conn,
                        kind: Pending::ConfigRelay {
                            client: from,
                            client_serial: serial,
                        },
                    },
                );
                Ok(None)
            }
        }
    }

    fn update_trigger(&mut self, value: &Value) {
        let Some(text) = value.as_str() else {
            warn!(%value, "trigger is not a string");
            return;
        };
        match text.parse::<Hotkey>() {
            Ok(hotkey) => {
                info!(trigger = %text, "trigger chord changed");
                self.hotkey = hotkey;
            }
            Err(e) => warn!(error = %e, "ignoring trigger chord"),
        }
    }

    // -----------------------------------------------------------------------
    // Contexts
    // -----------------------------------------------------------------------

    /// Give `id` the focus, taking it from the previous holder first.
    fn focus(&mut self, id: ContextId) {
        if self.focused == Some(id) {
            return;
        }
        if let Some(previous) = self.focused.take() {
            if let Some(ctx) = self.contexts.get_mut(&previous) {
                ctx.focus_out(&mut self.out, self.panel.as_mut());
            }
        }
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.focus_in(&mut self.out, self.panel.as_mut());
            self.focused = Some(id);
        }
    }

    fn set_enable(&mut self, id: ContextId, enabled: bool) {
        let Some(ctx) = self.contexts.get_mut(&id) else {
            return;
        };
        if enabled && ctx.engine().is_none() && !ctx.is_provisioning() {
            self.provision(id);
            return;
        }
        ctx.set_enable(&mut self.out, self.panel.as_mut(), enabled);
    }

    /// Ask the default factory for a new engine for `id`.
    ///
    /// The context is enabled right away; it falls back to disabled if the
    /// factory fails. Without any eligible factory it stays as it is.
    fn provision(&mut self, id: ContextId) {
        let Some(factory) = self.factories.get_default_factory() else {
            debug!(context = %id, "no engine factory available");
            return;
        };
        let (conn, serial) = match self.factories.create_engine(&mut self.out, &factory) {
            Ok(call) => call,
            Err(e) => {
                warn!(context = %id, error = %e, "cannot create engine");
                return;
            }
        };
        self.pending.insert(
            serial,
            PendingCall {
                callee: conn,
                kind: Pending::CreateEngine {
                    context: id,
                    factory,
                },
            },
        );
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.set_provisioning(true);
            ctx.set_enable(&mut self.out, self.panel.as_mut(), true);
        }
    }

    fn bind_engine(&mut self, id: ContextId, engine: Engine) {
        let key = (engine.conn(), engine.path().to_string());
        let Some(ctx) = self.contexts.get_mut(&id) else {
            debug!(context = %id, engine = %engine.path(), "context gone; discarding engine");
            engine.destroy(&mut self.out);
            return;
        };
        if self.engines.get(&key).is_some_and(|owner| *owner != id) {
            warn!(engine = %engine.path(), "factory returned an engine that is already bound");
            ctx.set_provisioning(false);
            if ctx.engine().is_none() {
                ctx.set_enable(&mut self.out, self.panel.as_mut(), false);
            }
            return;
        }
        if let Some(old) = ctx.set_engine(&mut self.out, self.panel.as_mut(), engine) {
            self.engines.remove(&(old.conn(), old.path().to_string()));
        }
        self.engines.insert(key, id);
    }

    fn destroy_context(&mut self, id: ContextId) {
        let Some(mut ctx) = self.contexts.remove(&id) else {
            return;
        };
        if let Some(engine) = ctx.destroy(&mut self.out, self.panel.as_mut()) {
            self.engines
                .remove(&(engine.conn(), engine.path().to_string()));
        }
        if self.focused == Some(id) {
            self.focused = None;
        }
        info!(context = %id, "input context released");
    }

    // -----------------------------------------------------------------------
    // Replies and signals
    // -----------------------------------------------------------------------

    fn handle_reply(&mut self, from: ConnId, body: &Body) {
        let reply_serial = match body {
            Body::Return(r) => r.reply_serial,
            Body::Error(e) => e.reply_serial,
            Body::Call(_) | Body::Signal(_) => return,
        };
        let Some(call) = self.pending.remove(&reply_serial) else {
            debug!(conn = %from, reply_serial, "reply matches no pending call");
            return;
        };
        if call.callee != from {
            warn!(conn = %from, reply_serial, "reply from unexpected peer");
            self.pending.insert(reply_serial, call);
            return;
        }
        match call.kind {
            Pending::KeyEvent {
                client,
                client_serial,
            } => {
                let handled = key_reply_handled(body);
                self.out
                    .reply(client, client_serial, ReturnValue::Bool(handled));
            }
            Pending::CreateEngine { context, factory } => match body {
                Body::Return(r) => match &r.value {
                    ReturnValue::Str(path) if validate_object_path(path).is_ok() => {
                        self.bind_engine(context, Engine::new(from, path.clone(), factory));
                    }
                    other => {
                        warn!(factory = %factory, ?other, "unexpected CreateEngine reply");
                        self.engine_creation_failed(context);
                    }
                },
                _ => {
                    warn!(factory = %factory, "engine creation failed");
                    self.engine_creation_failed(context);
                }
            },
            Pending::FactoryInfo { path } => match body {
                Body::Return(r) => match &r.value {
                    ReturnValue::FactoryInfo(info) => {
                        self.factories.set_info(from, &path, info.clone());
                    }
                    other => warn!(factory = %path, ?other, "unexpected GetInfo reply"),
                },
                _ => warn!(factory = %path, "factory did not describe itself"),
            },
            Pending::ConfigRelay {
                client,
                client_serial,
            } => match body {
                Body::Return(r) => self.out.reply(client, client_serial, r.value.clone()),
                Body::Error(e) => {
                    self.out
                        .error_named(client, client_serial, e.name, e.message.clone());
                }
                Body::Call(_) | Body::Signal(_) => {}
            },
            Pending::TriggerLookup => {
                if let Body::Return(r) = body {
                    if let ReturnValue::Value(value) = &r.value {
                        self.update_trigger(value);
                    }
                }
            }
        }
    }

    fn engine_creation_failed(&mut self, id: ContextId) {
        if let Some(ctx) = self.contexts.get_mut(&id) {
            ctx.set_provisioning(false);
            if ctx.engine().is_none() {
                ctx.set_enable(&mut self.out, self.panel.as_mut(), false);
            }
        }
    }

    fn handle_signal(&mut self, from: ConnId, sender: Option<String>, signal: Signal) {
        match &signal.kind {
            SignalKind::Engine(engine_signal) => {
                let key = (from, signal.path.clone());
                match self.engines.get(&key).copied() {
                    Some(id) => {
                        if let Some(ctx) = self.contexts.get_mut(&id) {
                            ctx.handle_engine_signal(
                                &mut self.out,
                                self.panel.as_mut(),
                                engine_signal.clone(),
                            );
                        }
                    }
                    None => debug!(conn = %from, path = %signal.path, "signal from unbound engine"),
                }
            }
            SignalKind::Panel(panel_signal) => {
                if self.panel.owner() == Some(from) {
                    self.handle_panel_signal(panel_signal);
                } else {
                    debug!(conn = %from, "panel signal from non-panel connection");
                }
            }
            SignalKind::Config(ConfigSignal::ValueChanged {
                section,
                name,
                value,
            }) => {
                if self.config.owner() == Some(from)
                    && section == TRIGGER_SECTION
                    && name == TRIGGER_NAME
                {
                    let value = value.clone();
                    self.update_trigger(&value);
                }
            }
            SignalKind::Bus(_) | SignalKind::Context(_) => {
                warn!(conn = %from, member = signal.kind.member(), "peer emitted a broker-only signal");
                return;
            }
        }

        let msg = Message {
            serial: 0,
            sender,
            destination: None,
            body: Body::Signal(signal),
        };
        for to in self.subscribers(&msg) {
            self.out.forward(to, msg.clone());
        }
    }

    fn handle_panel_signal(&mut self, signal: &PanelSignal) {
        let Some(ctx) = self.focused.and_then(|id| self.contexts.get(&id)) else {
            debug!("panel signal with no focused context");
            return;
        };
        let out = &mut self.out;
        match signal {
            PanelSignal::PageUp => ctx.page_up(out),
            PanelSignal::PageDown => ctx.page_down(out),
            PanelSignal::CursorUp => ctx.cursor_up(out),
            PanelSignal::CursorDown => ctx.cursor_down(out),
            PanelSignal::PropertyActivate { name, state } => ctx.property_activate(out, name, *state),
            PanelSignal::PropertyShow { name } => ctx.property_show(out, name),
            PanelSignal::PropertyHide { name } => ctx.property_hide(out, name),
        }
    }

    // -----------------------------------------------------------------------
    // Teardown
    // -----------------------------------------------------------------------

    fn teardown(&mut self, id: ConnId) {
        let Some(mut conn) = self.conns.remove(&id) else {
            return;
        };
        conn.close();
        self.closed.push(id);
        info!(conn = %conn.label(), "connection closed");

        self.names.remove_connection(&mut conn, &mut self.name_events);

        let owned: Vec<ContextId> = self
            .contexts
            .values()
            .filter(|ctx| ctx.owner() == id)
            .map(InputContext::id)
            .collect();
        for ctx in owned {
            self.destroy_context(ctx);
        }

        self.factories.remove_connection(id);

        let lost: Vec<((ConnId, String), ContextId)> = self
            .engines
            .iter()
            .filter(|((conn, _), _)| *conn == id)
            .map(|(key, ctx)| (key.clone(), *ctx))
            .collect();
        for (key, ctx) in lost {
            self.engines.remove(&key);
            if let Some(ctx) = self.contexts.get_mut(&ctx) {
                ctx.engine_lost(&mut self.out, self.panel.as_mut());
            }
        }

        if self.panel.owner() == Some(id) {
            info!(conn = %id, "panel disconnected");
            self.panel = Box::new(DummyPanel);
        }
        if self.config.owner() == Some(id) {
            info!(conn = %id, "config service disconnected");
            self.config = Box::new(DummyConfig);
        }

        let orphaned: Vec<u32> = self
            .pending
            .iter()
            .filter(|(_, call)| call.callee == id)
            .map(|(serial, _)| *serial)
            .collect();
        for serial in orphaned {
            let Some(call) = self.pending.remove(&serial) else {
                continue;
            };
            let peer = conn.label();
            match call.kind {
                Pending::KeyEvent {
                    client,
                    client_serial,
                }
                | Pending::ConfigRelay {
                    client,
                    client_serial,
                } => {
                    self.out
                        .error(client, client_serial, &BusError::PeerLost(peer));
                }
                Pending::CreateEngine { context, .. } => self.engine_creation_failed(context),
                Pending::FactoryInfo { .. } | Pending::TriggerLookup => {}
            }
        }

        self.deliver_name_events();
    }
}
