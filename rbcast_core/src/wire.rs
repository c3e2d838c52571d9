//! JSON wire codec for [`Message`] over [`Packet`]s.

use crate::message::Message;
use rbcast_env::{EnvError, Packet};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),

    #[error("failed to decode packet ({size} bytes): {source}")]
    Decode {
        size: usize,
        #[source]
        source: serde_json::Error,
    },
}

impl From<WireError> for EnvError {
    fn from(err: WireError) -> Self {
        EnvError::serialization(err)
    }
}

/// Encodes `message` into a packet stamped with `timestamp_ms`.
pub fn encode(message: &Message, timestamp_ms: u64) -> Result<Packet, WireError> {
    let payload = serde_json::to_vec(message).map_err(WireError::Encode)?;
    Ok(Packet::new(payload, timestamp_ms))
}

pub fn decode(packet: &Packet) -> Result<Message, WireError> {
    serde_json::from_slice(&packet.payload).map_err(|source| WireError::Decode {
        size: packet.size(),
        source,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::{BrachaKind, BrachaMessage, DolevMessage, InstanceId, Payload};
    use rbcast_env::NodeId;

    #[test]
    fn test_bracha_message_survives_the_wire() {
        let message = Message::Bracha(DolevMessage {
            origin: NodeId(3),
            payload: BrachaMessage {
                kind: BrachaKind::Echo,
                instance: InstanceId::new(NodeId(0), 2),
                payload: Payload::from("Message-2"),
            },
            path: vec![NodeId(3), NodeId(5)],
        });

        let packet = encode(&message, 120).unwrap();
        assert_eq!(packet.timestamp_ms, 120);
        assert_eq!(decode(&packet).unwrap(), message);

        let json: serde_json::Value = serde_json::from_slice(&packet.payload).unwrap();
        assert_eq!(json["protocol"], "bracha");
        assert_eq!(json["message"]["payload"]["kind"], "ECHO");
    }

    #[test]
    fn test_garbage_is_a_decode_error() {
        let packet = Packet::new(b"not json".to_vec(), 0);
        let err = decode(&packet).unwrap_err();

        assert!(matches!(err, WireError::Decode { size: 8, .. }));
        assert!(matches!(EnvError::from(err), EnvError::SerializationError(_)));
    }
}
