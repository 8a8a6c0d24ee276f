//! Outbound messages produced while handling one event.
//!
//! Components never write to connections directly. They queue messages
//! here and the broker flushes the queue once the event has been fully
//! handled, so state is consistent before any peer can observe it.

use imbus_types::{ErrorName, Message, Method, ReturnValue, SignalKind, BROKER_NAME, BUS_NAME};

use crate::connection::ConnId;
use crate::error::BusError;

#[derive(Debug)]
pub struct Outbox {
    next_serial: u32,
    queue: Vec<(ConnId, Message)>,
}

impl Default for Outbox {
    fn default() -> Self {
        Self::new()
    }
}

impl Outbox {
    pub fn new() -> Self {
        Self {
            next_serial: 1,
            queue: Vec::new(),
        }
    }

    fn stamp(&mut self, mut msg: Message, sender: &str) -> Message {
        msg.serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        msg.sender = Some(sender.to_string());
        msg
    }

    /// Queue a broker-originated method call and return its serial.
    pub fn call(&mut self, to: ConnId, path: &str, method: Method) -> u32 {
        let msg = self.stamp(Message::call(None, path, method), BROKER_NAME);
        let serial = msg.serial;
        self.queue.push((to, msg));
        serial
    }

    pub fn signal(&mut self, to: ConnId, path: &str, kind: SignalKind) {
        let msg = self.stamp(Message::signal(path, kind), BROKER_NAME);
        self.queue.push((to, msg));
    }

    /// Queue a signal that originates from the name service.
    pub fn bus_signal(&mut self, to: ConnId, kind: SignalKind) {
        let msg = self.stamp(Message::signal(imbus_types::BUS_PATH, kind), BUS_NAME);
        self.queue.push((to, msg));
    }

    pub fn reply(&mut self, to: ConnId, reply_serial: u32, value: ReturnValue) {
        let msg = self.stamp(Message::method_return(reply_serial, value), BROKER_NAME);
        self.queue.push((to, msg));
    }

    pub fn error(&mut self, to: ConnId, reply_serial: u32, err: &BusError) {
        self.error_named(to, reply_serial, err.name(), err.to_string());
    }

    /// Queue an error reply relayed from another peer.
    pub fn error_named(&mut self, to: ConnId, reply_serial: u32, name: ErrorName, message: String) {
        let msg = self.stamp(Message::error(reply_serial, name, message), BROKER_NAME);
        self.queue.push((to, msg));
    }

    /// Queue a peer's message unchanged (serial and sender preserved).
    pub fn forward(&mut self, to: ConnId, msg: Message) {
        self.queue.push((to, msg));
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn drain(&mut self) -> Vec<(ConnId, Message)> {
        std::mem::take(&mut self.queue)
    }
}
