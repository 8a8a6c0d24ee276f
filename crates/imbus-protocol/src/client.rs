//! Minimal bus client used by the CLI, tests and simple peers.

use std::collections::VecDeque;
use std::path::Path;

use imbus_types::{
    Body, BrokerMethod, BusMethod, Message, Method, ReturnValue, SignalKind, BROKER_PATH, BUS_PATH,
};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tracing::debug;

use crate::connection::{MessageReceiver, MessageSender};
use crate::error::ProtocolError;
use crate::transport::UnixTransport;

/// A connection to the broker that can make calls and see everything else
/// the broker sends (signals, incoming calls) in arrival order.
pub struct BusClient<R = OwnedReadHalf, W = OwnedWriteHalf> {
    tx: MessageSender<W>,
    rx: MessageReceiver<R>,
    next_serial: u32,
    unique_name: Option<String>,
    /// Messages that arrived while waiting for a reply.
    backlog: VecDeque<Message>,
}

impl BusClient {
    /// Connect to the bus socket and perform the `Hello` handshake.
    pub async fn connect(path: impl AsRef<Path>) -> Result<Self, ProtocolError> {
        let (tx, rx) = UnixTransport::connect(path).await?.into_split();
        let mut client = Self::new(tx, rx);
        client.hello().await?;
        Ok(client)
    }
}

impl<R: AsyncRead + Unpin, W: AsyncWrite + Unpin> BusClient<R, W> {
    pub fn new(tx: MessageSender<W>, rx: MessageReceiver<R>) -> Self {
        Self {
            tx,
            rx,
            next_serial: 1,
            unique_name: None,
            backlog: VecDeque::new(),
        }
    }

    /// Unique name assigned by `Hello`.
    pub fn unique_name(&self) -> Option<&str> {
        self.unique_name.as_deref()
    }

    pub async fn hello(&mut self) -> Result<String, ProtocolError> {
        match self.call_bus(BusMethod::Hello).await? {
            ReturnValue::Str(name) => {
                debug!(name = %name, "registered on bus");
                self.unique_name = Some(name.clone());
                Ok(name)
            }
            other => Err(ProtocolError::UnexpectedReply(format!("{other:?}"))),
        }
    }

    /// Send a message, assigning it the next serial.
    pub async fn send(&mut self, mut msg: Message) -> Result<u32, ProtocolError> {
        let serial = self.next_serial;
        self.next_serial = self.next_serial.wrapping_add(1).max(1);
        msg.serial = serial;
        self.tx.send(&msg).await?;
        Ok(serial)
    }

    /// Call a method and wait for its reply.
    ///
    /// Anything else received in the meantime is kept for
    /// [`next_message`](Self::next_message).
    pub async fn call(
        &mut self,
        destination: Option<&str>,
        path: &str,
        method: Method,
    ) -> Result<ReturnValue, ProtocolError> {
        let serial = self.send(Message::call(destination, path, method)).await?;
        loop {
            let msg = self.rx.recv().await?.ok_or(ProtocolError::StreamClosed)?;
            if msg.reply_serial() != Some(serial) {
                self.backlog.push_back(msg);
                continue;
            }
            return match msg.body {
                Body::Return(ret) => Ok(ret.value),
                Body::Error(err) => Err(ProtocolError::Remote {
                    name: err.name,
                    message: err.message,
                }),
                Body::Call(_) | Body::Signal(_) => unreachable!("only replies carry a reply serial"),
            };
        }
    }

    pub async fn call_bus(&mut self, method: BusMethod) -> Result<ReturnValue, ProtocolError> {
        self.call(None, BUS_PATH, Method::Bus(method)).await
    }

    pub async fn call_broker(
        &mut self,
        method: BrokerMethod,
    ) -> Result<ReturnValue, ProtocolError> {
        self.call(None, BROKER_PATH, Method::Broker(method)).await
    }

    /// Emit a signal towards the broker.
    pub async fn emit(&mut self, path: &str, kind: SignalKind) -> Result<(), ProtocolError> {
        self.send(Message::signal(path, kind)).await.map(|_| ())
    }

    /// Answer a method call received through [`next_message`](Self::next_message).
    pub async fn reply(&mut self, call: &Message, value: ReturnValue) -> Result<(), ProtocolError> {
        let mut reply = Message::method_return(call.serial, value);
        reply.destination.clone_from(&call.sender);
        self.send(reply).await.map(|_| ())
    }

    /// Fail a method call received through [`next_message`](Self::next_message).
    pub async fn reply_error(
        &mut self,
        call: &Message,
        name: imbus_types::ErrorName,
        message: &str,
    ) -> Result<(), ProtocolError> {
        let mut reply = Message::error(call.serial, name, message);
        reply.destination.clone_from(&call.sender);
        self.send(reply).await.map(|_| ())
    }

    /// Next incoming message that was not consumed as a reply.
    ///
    /// Returns `None` once the broker has closed the connection.
    pub async fn next_message(&mut self) -> Result<Option<Message>, ProtocolError> {
        if let Some(msg) = self.backlog.pop_front() {
            return Ok(Some(msg));
        }
        self.rx.recv().await
    }
}
