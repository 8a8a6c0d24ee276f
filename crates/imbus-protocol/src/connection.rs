//! Unix stream connections and message framing.

use imbus_types::Message;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::UnixStream;
use tracing::trace;

use crate::error::ProtocolError;
use crate::wire::{decode_message, encode_message, leading_serial, MAX_MESSAGE_SIZE};

/// A connection to a bus peer over a Unix domain socket.
#[derive(Debug)]
pub struct PeerConnection {
    stream: UnixStream,
}

impl PeerConnection {
    pub fn new(stream: UnixStream) -> Self {
        Self { stream }
    }

    /// Peer process id, when the platform reports credentials.
    pub fn peer_pid(&self) -> Option<i32> {
        self.stream.peer_cred().ok().and_then(|cred| cred.pid())
    }

    /// Split into independently owned sending and receiving halves.
    pub fn into_split(self) -> (MessageSender, MessageReceiver) {
        let (read, write) = self.stream.into_split();
        (MessageSender::new(write), MessageReceiver::new(read))
    }
}

/// Sends length-prefixed bincode messages.
pub struct MessageSender<W = OwnedWriteHalf> {
    stream: W,
}

impl<W: AsyncWrite + Unpin> MessageSender<W> {
    pub fn new(stream: W) -> Self {
        Self { stream }
    }

    /// Send a message, encoding it as length-prefixed bincode.
    pub async fn send(&mut self, msg: &Message) -> Result<(), ProtocolError> {
        let frame = encode_message(msg)?;
        self.stream
            .write_all(&frame)
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;
        self.stream
            .flush()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))?;

        trace!(len = frame.len() - 4, serial = msg.serial, "sent message");
        Ok(())
    }

    /// Shut down the write direction (signal no more data).
    pub async fn finish(mut self) -> Result<(), ProtocolError> {
        self.stream
            .shutdown()
            .await
            .map_err(|e| ProtocolError::Connection(e.to_string()))
    }
}

/// Receives length-prefixed bincode messages.
pub struct MessageReceiver<R = OwnedReadHalf> {
    stream: R,
}

impl<R: AsyncRead + Unpin> MessageReceiver<R> {
    pub fn new(stream: R) -> Self {
        Self { stream }
    }

    /// Receive, decode and validate a message.
    ///
    /// Returns `None` if the stream has been cleanly closed by the peer.
    /// A frame that fails to decode past its serial, or decodes but breaks
    /// a wire invariant, yields [`ProtocolError::Violation`] carrying the
    /// offending serial.
    pub async fn recv(&mut self) -> Result<Option<Message>, ProtocolError> {
        // Read 4-byte length prefix
        let mut len_buf = [0u8; 4];
        match self.stream.read_exact(&mut len_buf).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(ProtocolError::Connection(e.to_string())),
        }

        let len = u32::from_be_bytes(len_buf);
        if len > MAX_MESSAGE_SIZE {
            return Err(ProtocolError::TooLarge {
                size: len,
                max: MAX_MESSAGE_SIZE,
            });
        }

        let mut payload = vec![0u8; len as usize];
        match self.stream.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                return Err(ProtocolError::StreamClosed);
            }
            Err(e) => return Err(ProtocolError::Connection(e.to_string())),
        }

        let msg: Message = decode_message(&payload).map_err(|e| match leading_serial(&payload) {
            Some(serial) => ProtocolError::Violation {
                serial: Some(serial),
                reason: e.to_string(),
            },
            None => e,
        })?;
        msg.validate().map_err(|e| ProtocolError::Violation {
            serial: Some(msg.serial),
            reason: e.to_string(),
        })?;

        trace!(len, serial = msg.serial, "received message");
        Ok(Some(msg))
    }
}
