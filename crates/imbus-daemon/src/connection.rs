//! One transport peer as the broker sees it.

use std::collections::BTreeSet;

use imbus_types::Message;
use tokio::sync::mpsc;
use tracing::trace;

use crate::error::BusError;
use crate::match_rule::MatchRule;

/// Arena key of a connection, stable for the connection's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ConnId(pub u64);

impl std::fmt::Display for ConnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Why an outbound message could not be queued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendFailure {
    /// The peer is not draining its queue.
    Full,
    /// The writer task is gone.
    Closed,
}

/// Live connections keyed by id.
pub type ConnectionTable = std::collections::HashMap<ConnId, Connection>;

/// A connected peer: its names, subscriptions and outbound queue.
pub struct Connection {
    id: ConnId,
    unique_name: Option<String>,
    names: BTreeSet<String>,
    match_rules: Vec<MatchRule>,
    alive: bool,
    tx: mpsc::Sender<Message>,
}

impl Connection {
    pub fn new(id: ConnId, tx: mpsc::Sender<Message>) -> Self {
        Self {
            id,
            unique_name: None,
            names: BTreeSet::new(),
            match_rules: Vec::new(),
            alive: true,
            tx,
        }
    }

    pub fn id(&self) -> ConnId {
        self.id
    }

    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    /// Display name for logs: the unique name once assigned.
    pub fn label(&self) -> String {
        self.unique_name
            .clone()
            .unwrap_or_else(|| self.id.to_string())
    }

    pub fn is_alive(&self) -> bool {
        self.alive
    }

    /// Record the unique name; it can be assigned exactly once.
    pub fn assign_unique_name(&mut self, name: String) -> Result<(), BusError> {
        if let Some(existing) = &self.unique_name {
            return Err(BusError::NameConflict(existing.clone()));
        }
        self.unique_name = Some(name);
        Ok(())
    }

    /// Well-known names currently owned, in sorted order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub fn add_name(&mut self, name: &str) -> bool {
        self.names.insert(name.to_string())
    }

    pub fn remove_name(&mut self, name: &str) -> bool {
        self.names.remove(name)
    }

    pub fn add_match(&mut self, rule: MatchRule) {
        self.match_rules.push(rule);
    }

    /// Remove one instance of an equal rule.
    pub fn remove_match(&mut self, rule: &MatchRule) -> bool {
        match self.match_rules.iter().position(|r| r == rule) {
            Some(index) => {
                self.match_rules.remove(index);
                true
            }
            None => false,
        }
    }

    /// Whether any of this connection's rules accepts the signal.
    pub fn wants(&self, msg: &Message) -> bool {
        self.match_rules.iter().any(|rule| rule.matches(msg))
    }

    /// Queue a message for the writer task.
    ///
    /// Once the connection is closed every send is silently dropped.
    pub fn send(&self, msg: Message) -> Result<(), SendFailure> {
        if !self.alive {
            return Ok(());
        }
        trace!(conn = %self.id, serial = msg.serial, "queue message");
        self.tx.try_send(msg).map_err(|e| match e {
            mpsc::error::TrySendError::Full(_) => SendFailure::Full,
            mpsc::error::TrySendError::Closed(_) => SendFailure::Closed,
        })
    }

    /// Mark the connection dead; later sends are dropped.
    pub fn close(&mut self) {
        self.alive = false;
    }

    /// Hand back every well-known name, leaving the set empty.
    pub fn take_names(&mut self) -> Vec<String> {
        std::mem::take(&mut self.names).into_iter().collect()
    }
}
