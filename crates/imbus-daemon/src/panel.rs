//! The panel: a single UI surface showing the focused context's state.

use imbus_types::{Method, PanelMethod};
use tracing::trace;

use crate::connection::ConnId;
use crate::outbox::Outbox;

/// Receiver of panel updates.
///
/// The broker always has exactly one panel installed. Without a registered
/// UI it is [`DummyPanel`], which discards everything.
pub trait Panel: Send {
    /// Connection hosting the panel, if it is remote.
    fn owner(&self) -> Option<ConnId>;

    fn notify(&mut self, out: &mut Outbox, method: PanelMethod);
}

#[derive(Debug, Default)]
pub struct DummyPanel;

impl Panel for DummyPanel {
    fn owner(&self) -> Option<ConnId> {
        None
    }

    fn notify(&mut self, _out: &mut Outbox, method: PanelMethod) {
        trace!(?method, "no panel; update dropped");
    }
}

/// A panel UI living on another connection.
#[derive(Debug)]
pub struct RemotePanel {
    conn: ConnId,
    path: String,
}

impl RemotePanel {
    pub fn new(conn: ConnId, path: impl Into<String>) -> Self {
        Self {
            conn,
            path: path.into(),
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Panel for RemotePanel {
    fn owner(&self) -> Option<ConnId> {
        Some(self.conn)
    }

    fn notify(&mut self, out: &mut Outbox, method: PanelMethod) {
        out.call(self.conn, &self.path, Method::Panel(method));
    }
}
