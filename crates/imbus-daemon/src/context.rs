//! Input context: one client text field and the engine bound to it.
//!
//! A context is `Focused` or `Unfocused` and independently `Enabled` or
//! `Disabled`. It forwards client requests to its engine and routes the
//! engine's output to the client or to the panel. Panel-bound state is
//! cached so it can be replayed when the context gains focus; while the
//! context is unfocused the panel sees nothing from it.
//!
//! The single-focus rule and engine provisioning span several contexts and
//! live in the broker.

use imbus_types::message::CAP_PREEDIT;
use imbus_types::{
    ContextId, ContextSignal, CursorLocation, EngineSignal, KeyEvent, LookupTable, PanelMethod,
    PropList, PropState, SignalKind, Text,
};
use tracing::{debug, info};

use crate::connection::ConnId;
use crate::engine::Engine;
use crate::hotkey::Hotkey;
use crate::outbox::Outbox;
use crate::panel::Panel;

/// What `process_key_event` did with a key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRoute {
    /// The trigger chord; the broker toggles the context.
    Hotkey,
    /// Sent to the engine under this call serial.
    Engine(u32),
    /// No enabled engine; answer not-handled immediately.
    Unhandled,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Preedit {
    text: Text,
    cursor_pos: u32,
    visible: bool,
}

pub struct InputContext {
    id: ContextId,
    path: String,
    owner: ConnId,
    client: String,
    capabilities: u32,
    enabled: bool,
    focused: bool,
    engine: Option<Engine>,
    provisioning: bool,
    cursor: CursorLocation,
    preedit: Preedit,
    aux: (Text, bool),
    lookup: (LookupTable, bool),
    props: PropList,
}

impl InputContext {
    pub fn new(id: ContextId, owner: ConnId, client: impl Into<String>, capabilities: u32) -> Self {
        Self {
            id,
            path: id.path(),
            owner,
            client: client.into(),
            capabilities,
            enabled: false,
            focused: false,
            engine: None,
            provisioning: false,
            cursor: CursorLocation::default(),
            preedit: Preedit::default(),
            aux: (Text::default(), false),
            lookup: (LookupTable::default(), false),
            props: PropList::default(),
        }
    }

    pub fn id(&self) -> ContextId {
        self.id
    }

    pub fn owner(&self) -> ConnId {
        self.owner
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Name the client gave the context at creation.
    pub fn client(&self) -> &str {
        &self.client
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_focused(&self) -> bool {
        self.focused
    }

    pub fn engine(&self) -> Option<&Engine> {
        self.engine.as_ref()
    }

    /// Whether a `CreateEngine` for this context is outstanding.
    pub fn is_provisioning(&self) -> bool {
        self.provisioning
    }

    pub fn set_provisioning(&mut self, provisioning: bool) {
        self.provisioning = provisioning;
    }

    /// The client renders preedit itself.
    pub fn use_preedit(&self) -> bool {
        self.capabilities & CAP_PREEDIT != 0
    }

    pub fn set_capabilities(&mut self, capabilities: u32) {
        self.capabilities = capabilities;
    }

    fn client_signal(&self, out: &mut Outbox, signal: ContextSignal) {
        out.signal(self.owner, &self.path, SignalKind::Context(signal));
    }

    fn show(&self, out: &mut Outbox, panel: &mut dyn Panel, method: PanelMethod) {
        if self.focused {
            panel.notify(out, method);
        }
    }

    pub fn focus_in(&mut self, out: &mut Outbox, panel: &mut dyn Panel) {
        if self.focused {
            return;
        }
        self.focused = true;
        debug!(context = %self.id, "focus in");
        if let Some(engine) = &self.engine {
            engine.focus_in(out);
        }
        self.replay_panel(out, panel);
    }

    /// Push the full cached state to the panel.
    pub fn replay_panel(&self, out: &mut Outbox, panel: &mut dyn Panel) {
        if !self.focused {
            return;
        }
        panel.notify(
            out,
            PanelMethod::FocusIn {
                path: self.path.clone(),
            },
        );
        panel.notify(
            out,
            PanelMethod::StatesChanged {
                enabled: self.enabled,
            },
        );
        panel.notify(
            out,
            if self.enabled {
                PanelMethod::ShowLanguageBar
            } else {
                PanelMethod::HideLanguageBar
            },
        );
        panel.notify(out, PanelMethod::SetCursorLocation(self.cursor));
        panel.notify(out, PanelMethod::RegisterProperties(self.props.clone()));
        panel.notify(
            out,
            PanelMethod::UpdateAuxString {
                text: self.aux.0.clone(),
                visible: self.aux.1,
            },
        );
        panel.notify(
            out,
            PanelMethod::UpdateLookupTable {
                table: self.lookup.0.clone(),
                visible: self.lookup.1,
            },
        );
        if !self.use_preedit() {
            panel.notify(
                out,
                PanelMethod::UpdatePreedit {
                    text: self.preedit.text.clone(),
                    cursor_pos: self.preedit.cursor_pos,
                    visible: self.preedit.visible,
                },
            );
        }
    }

    pub fn focus_out(&mut self, out: &mut Outbox, panel: &mut dyn Panel) {
        if !self.focused {
            return;
        }
        debug!(context = %self.id, "focus out");
        if let Some(engine) = &self.engine {
            engine.focus_out(out);
        }
        panel.notify(
            out,
            PanelMethod::FocusOut {
                path: self.path.clone(),
            },
        );
        panel.notify(out, PanelMethod::Reset);
        self.focused = false;
    }

    /// Route a key: trigger chord first, then the engine if enabled.
    pub fn process_key_event(&self, out: &mut Outbox, hotkey: &Hotkey, event: KeyEvent) -> KeyRoute {
        if hotkey.matches(&event) {
            return KeyRoute::Hotkey;
        }
        match &self.engine {
            Some(engine) if self.enabled => KeyRoute::Engine(engine.process_key_event(out, event)),
            _ => KeyRoute::Unhandled,
        }
    }

    /// Returns whether the state changed.
    pub fn set_enable(&mut self, out: &mut Outbox, panel: &mut dyn Panel, enabled: bool) -> bool {
        if self.enabled == enabled {
            return false;
        }
        self.enabled = enabled;
        info!(context = %self.id, enabled, "context state changed");
        self.client_signal(
            out,
            if enabled {
                ContextSignal::Enabled
            } else {
                ContextSignal::Disabled
            },
        );
        if let Some(engine) = &self.engine {
            engine.set_enable(out, enabled);
        }
        self.show(out, panel, PanelMethod::StatesChanged { enabled });
        self.show(
            out,
            panel,
            if enabled {
                PanelMethod::ShowLanguageBar
            } else {
                PanelMethod::HideLanguageBar
            },
        );
        true
    }

    /// Bind `engine`, destroying the previous one.
    ///
    /// Returns the engine that was unbound so the caller can drop its
    /// routing entry. Binding the engine that is already bound does nothing.
    pub fn set_engine(
        &mut self,
        out: &mut Outbox,
        panel: &mut dyn Panel,
        engine: Engine,
    ) -> Option<Engine> {
        if self.engine.as_ref() == Some(&engine) {
            return None;
        }
        let old = self.engine.take();
        if let Some(old) = &old {
            old.destroy(out);
            self.clear_engine_output(out, panel);
        }
        info!(context = %self.id, engine = %engine.path(), factory = %engine.factory(), "engine bound");
        if self.focused {
            engine.focus_in(out);
            engine.set_cursor_location(out, self.cursor);
        }
        if self.enabled {
            engine.set_enable(out, true);
        }
        self.engine = Some(engine);
        self.provisioning = false;
        old
    }

    /// Forget the engine after its peer went away.
    ///
    /// The client sees an empty preedit, then `Disabled`; a focused context
    /// then resets the panel.
    pub fn engine_lost(&mut self, out: &mut Outbox, panel: &mut dyn Panel) {
        let Some(engine) = self.engine.take() else {
            return;
        };
        info!(context = %self.id, engine = %engine.path(), "engine lost");
        self.clear_preedit(out, panel);
        self.aux = (Text::default(), false);
        self.lookup = (LookupTable::default(), false);
        self.props = PropList::default();
        if self.enabled {
            self.enabled = false;
            self.client_signal(out, ContextSignal::Disabled);
        }
        self.show(out, panel, PanelMethod::Reset);
    }

    fn clear_preedit(&mut self, out: &mut Outbox, panel: &mut dyn Panel) {
        self.preedit = Preedit::default();
        let (text, cursor_pos, visible) = (Text::default(), 0, false);
        if self.use_preedit() {
            self.client_signal(
                out,
                ContextSignal::UpdatePreedit {
                    text,
                    cursor_pos,
                    visible,
                },
            );
        } else {
            self.show(
                out,
                panel,
                PanelMethod::UpdatePreedit {
                    text,
                    cursor_pos,
                    visible,
                },
            );
        }
    }

    fn clear_engine_output(&mut self, out: &mut Outbox, panel: &mut dyn Panel) {
        if self.preedit != Preedit::default() {
            self.clear_preedit(out, panel);
        }
        self.aux = (Text::default(), false);
        self.lookup = (LookupTable::default(), false);
        self.props = PropList::default();
        self.show(
            out,
            panel,
            PanelMethod::UpdateAuxString {
                text: Text::default(),
                visible: false,
            },
        );
        self.show(
            out,
            panel,
            PanelMethod::UpdateLookupTable {
                table: LookupTable::default(),
                visible: false,
            },
        );
        self.show(out, panel, PanelMethod::RegisterProperties(PropList::default()));
    }

    pub fn reset(&self, out: &mut Outbox) {
        if let Some(engine) = &self.engine {
            engine.reset(out);
        }
    }

    pub fn set_cursor_location(
        &mut self,
        out: &mut Outbox,
        panel: &mut dyn Panel,
        location: CursorLocation,
    ) {
        self.cursor = location;
        if let Some(engine) = &self.engine {
            engine.set_cursor_location(out, location);
        }
        self.show(out, panel, PanelMethod::SetCursorLocation(location));
    }

    pub fn page_up(&self, out: &mut Outbox) {
        if let Some(engine) = &self.engine {
            engine.page_up(out);
        }
    }

    pub fn page_down(&self, out: &mut Outbox) {
        if let Some(engine) = &self.engine {
            engine.page_down(out);
        }
    }

    pub fn cursor_up(&self, out: &mut Outbox) {
        if let Some(engine) = &self.engine {
            engine.cursor_up(out);
        }
    }

    pub fn cursor_down(&self, out: &mut Outbox) {
        if let Some(engine) = &self.engine {
            engine.cursor_down(out);
        }
    }

    pub fn property_activate(&self, out: &mut Outbox, name: &str, state: PropState) {
        if let Some(engine) = &self.engine {
            engine.property_activate(out, name, state);
        }
    }

    pub fn property_show(&self, out: &mut Outbox, name: &str) {
        if let Some(engine) = &self.engine {
            engine.property_show(out, name);
        }
    }

    pub fn property_hide(&self, out: &mut Outbox, name: &str) {
        if let Some(engine) = &self.engine {
            engine.property_hide(out, name);
        }
    }

    /// Route one signal from the bound engine.
    pub fn handle_engine_signal(
        &mut self,
        out: &mut Outbox,
        panel: &mut dyn Panel,
        signal: EngineSignal,
    ) {
        match signal {
            EngineSignal::CommitString(text) => {
                self.client_signal(out, ContextSignal::CommitString(text));
            }
            EngineSignal::ForwardKeyEvent(event) => {
                self.client_signal(out, ContextSignal::ForwardKeyEvent(event));
            }
            EngineSignal::UpdatePreedit {
                text,
                cursor_pos,
                visible,
            } => {
                self.preedit = Preedit {
                    text: text.clone(),
                    cursor_pos,
                    visible,
                };
                if self.use_preedit() {
                    self.client_signal(
                        out,
                        ContextSignal::UpdatePreedit {
                            text,
                            cursor_pos,
                            visible,
                        },
                    );
                } else {
                    self.show(
                        out,
                        panel,
                        PanelMethod::UpdatePreedit {
                            text,
                            cursor_pos,
                            visible,
                        },
                    );
                }
            }
            EngineSignal::UpdateAuxString { text, visible } => {
                self.aux = (text.clone(), visible);
                self.show(out, panel, PanelMethod::UpdateAuxString { text, visible });
            }
            EngineSignal::UpdateLookupTable { table, visible } => {
                self.lookup = (table.clone(), visible);
                self.show(out, panel, PanelMethod::UpdateLookupTable { table, visible });
            }
            EngineSignal::RegisterProperties(props) => {
                self.props = props.clone();
                self.show(out, panel, PanelMethod::RegisterProperties(props));
            }
            EngineSignal::UpdateProperty(prop) => {
                if self.props.update(&prop) {
                    self.show(out, panel, PanelMethod::UpdateProperty(prop));
                }
            }
        }
    }

    /// Tear the context down; returns the engine that was bound.
    pub fn destroy(&mut self, out: &mut Outbox, panel: &mut dyn Panel) -> Option<Engine> {
        self.focus_out(out, panel);
        let engine = self.engine.take();
        if let Some(engine) = &engine {
            engine.destroy(out);
        }
        self.provisioning = false;
        debug!(context = %self.id, client = %self.client, "context destroyed");
        engine
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::RemotePanel;
    use imbus_types::{
        keysym, Body, EngineMethod, Message, Method, Modifiers, Property, PropKind,
    };

    const CLIENT: ConnId = ConnId(1);
    const ENGINE: ConnId = ConnId(2);
    const PANEL: ConnId = ConnId(3);

    fn fixture(caps: u32) -> (InputContext, RemotePanel, Outbox) {
        (
            InputContext::new(ContextId(1), CLIENT, "test", caps),
            RemotePanel::new(PANEL, "/org/example/Panel"),
            Outbox::new(),
        )
    }

    fn engine(n: u32) -> Engine {
        Engine::new(ENGINE, format!("/org/example/Engine_{n}"), "/org/example/Factory")
    }

    fn to(out: &mut Outbox, conn: ConnId) -> Vec<Message> {
        out.drain()
            .into_iter()
            .filter(|(c, _)| *c == conn)
            .map(|(_, m)| m)
            .collect()
    }

    fn client_signals(msgs: &[Message]) -> Vec<ContextSignal> {
        msgs.iter()
            .filter_map(|m| match &m.body {
                Body::Signal(s) => match &s.kind {
                    SignalKind::Context(c) => Some(c.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn panel_calls(msgs: &[Message]) -> Vec<PanelMethod> {
        msgs.iter()
            .filter_map(|m| match &m.body {
                Body::Call(c) => match &c.method {
                    Method::Panel(p) => Some(p.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    fn engine_calls(msgs: &[Message]) -> Vec<EngineMethod> {
        msgs.iter()
            .filter_map(|m| match &m.body {
                Body::Call(c) => match &c.method {
                    Method::Engine(e) => Some(e.clone()),
                    _ => None,
                },
                _ => None,
            })
            .collect()
    }

    #[test]
    fn set_enable_is_idempotent() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        assert!(ctx.set_enable(&mut out, &mut panel, true));
        assert!(!ctx.set_enable(&mut out, &mut panel, true));
        let signals = client_signals(&to(&mut out, CLIENT));
        assert_eq!(signals, vec![ContextSignal::Enabled]);
    }

    #[test]
    fn unfocused_context_keeps_panel_quiet() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.set_engine(&mut out, &mut panel, engine(1));
        ctx.handle_engine_signal(
            &mut out,
            &mut panel,
            EngineSignal::UpdateAuxString {
                text: "aux".into(),
                visible: true,
            },
        );
        assert!(to(&mut out, PANEL).is_empty());

        // Cached state is replayed on focus.
        ctx.focus_in(&mut out, &mut panel);
        let calls = panel_calls(&to(&mut out, PANEL));
        assert_eq!(
            calls[0],
            PanelMethod::FocusIn {
                path: "/org/imbus/InputContext_1".into()
            }
        );
        assert!(calls.contains(&PanelMethod::UpdateAuxString {
            text: "aux".into(),
            visible: true
        }));
    }

    #[test]
    fn focus_out_resets_panel() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.focus_in(&mut out, &mut panel);
        out.drain();
        ctx.focus_out(&mut out, &mut panel);
        assert_eq!(
            panel_calls(&to(&mut out, PANEL)),
            vec![
                PanelMethod::FocusOut {
                    path: ctx.path().to_string()
                },
                PanelMethod::Reset
            ]
        );
        assert!(!ctx.is_focused());
    }

    #[test]
    fn keys_go_to_engine_only_when_enabled() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        let hotkey = Hotkey::default();
        let key = KeyEvent::press(u32::from(b'a'), Modifiers::NONE);
        assert_eq!(
            ctx.process_key_event(&mut out, &hotkey, key),
            KeyRoute::Unhandled
        );
        ctx.set_engine(&mut out, &mut panel, engine(1));
        assert_eq!(
            ctx.process_key_event(&mut out, &hotkey, key),
            KeyRoute::Unhandled
        );
        ctx.set_enable(&mut out, &mut panel, true);
        assert!(matches!(
            ctx.process_key_event(&mut out, &hotkey, key),
            KeyRoute::Engine(_)
        ));
        let trigger = KeyEvent::press(keysym::SPACE, Modifiers::CONTROL);
        assert_eq!(
            ctx.process_key_event(&mut out, &hotkey, trigger),
            KeyRoute::Hotkey
        );
    }

    #[test]
    fn rebinding_destroys_old_engine_first() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.set_enable(&mut out, &mut panel, true);
        assert!(ctx.set_engine(&mut out, &mut panel, engine(1)).is_none());
        out.drain();

        let old = ctx.set_engine(&mut out, &mut panel, engine(2));
        assert_eq!(old, Some(engine(1)));
        let msgs = to(&mut out, ENGINE);
        assert_eq!(msgs.len(), 2);
        match &msgs[0].body {
            Body::Call(c) => {
                assert_eq!(c.path, "/org/example/Engine_1");
                assert_eq!(c.method, Method::Engine(EngineMethod::Destroy));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            engine_calls(&msgs[1..]),
            vec![EngineMethod::SetEnable(true)]
        );
        assert_eq!(ctx.engine(), Some(&engine(2)));
    }

    #[test]
    fn binding_same_engine_is_noop() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.set_engine(&mut out, &mut panel, engine(1));
        out.drain();
        assert!(ctx.set_engine(&mut out, &mut panel, engine(1)).is_none());
        assert!(out.is_empty());
    }

    #[test]
    fn engine_loss_clears_preedit_then_disables_then_resets_panel() {
        let (mut ctx, mut panel, mut out) = fixture(CAP_PREEDIT);
        ctx.focus_in(&mut out, &mut panel);
        ctx.set_enable(&mut out, &mut panel, true);
        ctx.set_engine(&mut out, &mut panel, engine(1));
        ctx.handle_engine_signal(
            &mut out,
            &mut panel,
            EngineSignal::UpdatePreedit {
                text: "ni".into(),
                cursor_pos: 2,
                visible: true,
            },
        );
        out.drain();

        ctx.engine_lost(&mut out, &mut panel);
        let order: Vec<String> = out
            .drain()
            .into_iter()
            .map(|(conn, m)| match m.body {
                Body::Signal(s) => format!("{conn}:{}", s.kind.member()),
                Body::Call(c) => format!("{conn}:{:?}", c.method),
                _ => String::new(),
            })
            .collect();
        assert_eq!(
            order,
            vec![
                "#1:UpdatePreedit".to_string(),
                "#1:Disabled".to_string(),
                format!("#3:{:?}", Method::Panel(PanelMethod::Reset)),
            ]
        );
        assert!(!ctx.is_enabled());
        assert!(ctx.engine().is_none());
    }

    #[test]
    fn preedit_goes_to_panel_without_capability() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.focus_in(&mut out, &mut panel);
        ctx.set_engine(&mut out, &mut panel, engine(1));
        out.drain();
        ctx.handle_engine_signal(
            &mut out,
            &mut panel,
            EngineSignal::UpdatePreedit {
                text: "ka".into(),
                cursor_pos: 1,
                visible: true,
            },
        );
        ctx.handle_engine_signal(&mut out, &mut panel, EngineSignal::CommitString("か".into()));
        let msgs = out.drain();
        assert!(matches!(
            &msgs[0],
            (PANEL, Message { body: Body::Call(_), .. })
        ));
        assert_eq!(msgs[1].0, CLIENT);
    }

    #[test]
    fn unknown_property_update_is_dropped() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.focus_in(&mut out, &mut panel);
        ctx.handle_engine_signal(
            &mut out,
            &mut panel,
            EngineSignal::RegisterProperties(PropList(vec![Property::new(
                "mode",
                PropKind::Normal,
                "あ",
            )])),
        );
        out.drain();
        ctx.handle_engine_signal(
            &mut out,
            &mut panel,
            EngineSignal::UpdateProperty(Property::new("missing", PropKind::Normal, "?")),
        );
        assert!(out.is_empty());
    }

    #[test]
    fn destroy_releases_focus_and_engine() {
        let (mut ctx, mut panel, mut out) = fixture(0);
        ctx.focus_in(&mut out, &mut panel);
        ctx.set_engine(&mut out, &mut panel, engine(1));
        out.drain();
        let engine = ctx.destroy(&mut out, &mut panel);
        assert!(engine.is_some());
        assert!(!ctx.is_focused());
        let engine_msgs = to(&mut out, ENGINE);
        assert_eq!(
            engine_calls(&engine_msgs),
            vec![EngineMethod::FocusOut, EngineMethod::Destroy]
        );
    }
}
