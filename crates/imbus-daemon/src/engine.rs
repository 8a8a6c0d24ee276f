//! Proxy for a remote engine instance.
//!
//! Every method is fire-and-forget except `process_key_event`, whose serial
//! the broker keeps so it can relay the engine's answer to the client.

use imbus_types::{
    Body, CursorLocation, EngineMethod, KeyEvent, Method, PropState, ReturnValue,
};
use tracing::debug;

use crate::connection::ConnId;
use crate::outbox::Outbox;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    conn: ConnId,
    path: String,
    factory: String,
}

impl Engine {
    pub fn new(conn: ConnId, path: impl Into<String>, factory: impl Into<String>) -> Self {
        Self {
            conn,
            path: path.into(),
            factory: factory.into(),
        }
    }

    pub fn conn(&self) -> ConnId {
        self.conn
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Path of the factory that created this engine.
    pub fn factory(&self) -> &str {
        &self.factory
    }

    fn call(&self, out: &mut Outbox, method: EngineMethod) -> u32 {
        out.call(self.conn, &self.path, Method::Engine(method))
    }

    /// Returns the serial of the call; the reply carries `handled`.
    pub fn process_key_event(&self, out: &mut Outbox, event: KeyEvent) -> u32 {
        self.call(out, EngineMethod::ProcessKeyEvent(event))
    }

    pub fn focus_in(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::FocusIn);
    }

    pub fn focus_out(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::FocusOut);
    }

    pub fn set_cursor_location(&self, out: &mut Outbox, location: CursorLocation) {
        self.call(out, EngineMethod::SetCursorLocation(location));
    }

    pub fn reset(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::Reset);
    }

    pub fn page_up(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::PageUp);
    }

    pub fn page_down(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::PageDown);
    }

    pub fn cursor_up(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::CursorUp);
    }

    pub fn cursor_down(&self, out: &mut Outbox) {
        self.call(out, EngineMethod::CursorDown);
    }

    pub fn set_enable(&self, out: &mut Outbox, enabled: bool) {
        self.call(out, EngineMethod::SetEnable(enabled));
    }

    pub fn property_activate(&self, out: &mut Outbox, name: &str, state: PropState) {
        self.call(
            out,
            EngineMethod::PropertyActivate {
                name: name.to_string(),
                state,
            },
        );
    }

    pub fn property_show(&self, out: &mut Outbox, name: &str) {
        self.call(
            out,
            EngineMethod::PropertyShow {
                name: name.to_string(),
            },
        );
    }

    pub fn property_hide(&self, out: &mut Outbox, name: &str) {
        self.call(
            out,
            EngineMethod::PropertyHide {
                name: name.to_string(),
            },
        );
    }

    pub fn destroy(&self, out: &mut Outbox) {
        debug!(engine = %self.path, conn = %self.conn, "destroying engine");
        self.call(out, EngineMethod::Destroy);
    }
}

/// Interpret an engine's answer to `ProcessKeyEvent`.
///
/// Anything other than a boolean return counts as not handled.
pub fn key_reply_handled(body: &Body) -> bool {
    match body {
        Body::Return(r) => match r.value {
            ReturnValue::Bool(handled) => handled,
            ref other => {
                debug!(?other, "ill-typed key event reply");
                false
            }
        },
        Body::Error(e) => {
            debug!(error = %e.name, message = %e.message, "engine failed to process key");
            false
        }
        Body::Call(_) | Body::Signal(_) => false,
    }
}
