//! Wire format: length-prefixed bincode v2 frames.
//!
//! Each message on the wire is:
//!   [4 bytes big-endian length][bincode v2 payload]

use bincode::{Decode, Encode};

use crate::error::ProtocolError;

/// Maximum message size (1 MiB).
///
/// Applies to the frame prefix and, as a decode limit, to every length
/// claimed inside the payload.
pub const MAX_MESSAGE_SIZE: u32 = 1024 * 1024;

fn decode_config() -> impl bincode::config::Config {
    bincode::config::standard().with_limit::<{ MAX_MESSAGE_SIZE as usize }>()
}

/// Encode a message to a length-prefixed byte vector.
pub fn encode_message<T: Encode>(msg: &T) -> Result<Vec<u8>, ProtocolError> {
    let config = bincode::config::standard();
    let payload = bincode::encode_to_vec(msg, config)
        .map_err(|e| ProtocolError::Serialization(e.to_string()))?;

    let len = u32::try_from(payload.len())
        .map_err(|_| ProtocolError::Serialization("message too large".to_string()))?;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::TooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a message from a bincode v2 payload (without the length prefix).
pub fn decode_message<T: Decode<()>>(payload: &[u8]) -> Result<T, ProtocolError> {
    let (msg, used) = bincode::decode_from_slice(payload, decode_config())
        .map_err(|e| ProtocolError::Deserialization(e.to_string()))?;
    if used != payload.len() {
        return Err(ProtocolError::Deserialization(format!(
            "{} trailing bytes after message",
            payload.len() - used
        )));
    }
    Ok(msg)
}

/// Serial at the head of a payload that failed to decode as a whole.
///
/// The serial is the first field of a message, so a frame that is broken
/// further in can still be answered.
pub fn leading_serial(payload: &[u8]) -> Option<u32> {
    bincode::decode_from_slice::<u32, _>(payload, decode_config())
        .ok()
        .map(|(serial, _)| serial)
}

/// A `RegisterFactories` payload whose path list claims an absurd length.
#[cfg(test)]
pub(crate) fn inflated_factory_list(serial: u32) -> Vec<u8> {
    let mut msg = imbus_types::Message::call(
        None,
        imbus_types::BROKER_PATH,
        imbus_types::Method::Broker(imbus_types::BrokerMethod::RegisterFactories {
            paths: vec!["/q".into()],
        }),
    );
    msg.serial = serial;
    let payload = encode_message(&msg).unwrap()[4..].to_vec();
    let at = payload
        .windows(4)
        .position(|w| w == [1, 2, b'/', b'q'])
        .unwrap();

    let mut inflated = payload[..at].to_vec();
    inflated.push(253);
    inflated.extend_from_slice(&(u64::MAX / 64).to_le_bytes());
    inflated.extend_from_slice(&payload[at + 1..]);
    inflated
}
