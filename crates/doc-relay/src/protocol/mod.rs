use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;

use crate::{RelayError, RelayResult};

/// Client asks to join a document room
pub const JOIN_DOCUMENT: &str = "join-document";
/// Alternative name for [`JOIN_DOCUMENT`]
pub const JOIN_ROOM: &str = "join-room";
/// Client publishes a change to its room
pub const SEND_CHANGES: &str = "send-changes";
/// Server forwards a change from another room member
pub const RECEIVE_CHANGES: &str = "receive-changes";

/// An opaque change payload
///
/// Holds the exact JSON text the sender put in the `data` field of its envelope.
/// The relay never parses it further, so recipients get it back byte for byte.
#[derive(Debug, Clone)]
pub struct Payload(Box<RawValue>);

impl Payload {
    /// Wrap a JSON document as a payload
    pub fn from_json(json: impl Into<String>) -> RelayResult<Self> {
        Ok(Self(RawValue::from_string(json.into())?))
    }

    /// Wrap plain text as a JSON string payload
    pub fn text(text: &str) -> RelayResult<Self> {
        Self::from_json(serde_json::to_string(text)?)
    }

    /// The raw JSON text of the payload
    pub fn as_json(&self) -> &str {
        self.0.get()
    }

    /// Length of the raw JSON text in bytes
    pub fn len(&self) -> usize {
        self.0.get().len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.get().is_empty()
    }
}

impl PartialEq for Payload {
    fn eq(&self, other: &Self) -> bool {
        self.as_json() == other.as_json()
    }
}

impl Eq for Payload {}

impl Serialize for Payload {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.0.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Payload {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        Box::<RawValue>::deserialize(deserializer).map(Self)
    }
}

/// Wire envelope shared by both directions: `{"event": ..., "data": ...}`
#[derive(Debug, Deserialize)]
struct Envelope {
    event: String,
    data: Payload,
}

#[derive(Serialize)]
struct OutboundEnvelope<'a> {
    event: &'a str,
    data: &'a Payload,
}

/// Messages sent from client to server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Join a room, leaving any room joined before
    JoinRoom { room_id: String },
    /// Relay a change to the other members of the current room
    SendChanges { payload: Payload },
}

impl ClientMessage {
    fn from_envelope(envelope: Envelope) -> RelayResult<Self> {
        match envelope.event.as_str() {
            JOIN_DOCUMENT | JOIN_ROOM => {
                let room_id: String =
                    serde_json::from_str(envelope.data.as_json()).map_err(|e| {
                        RelayError::Protocol {
                            message: format!("{} expects a string room id: {}", envelope.event, e),
                        }
                    })?;
                Ok(ClientMessage::JoinRoom { room_id })
            }
            SEND_CHANGES => Ok(ClientMessage::SendChanges {
                payload: envelope.data,
            }),
            _ => Err(RelayError::UnknownEvent {
                event: envelope.event,
            }),
        }
    }
}

/// Messages sent from server to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerMessage {
    /// A change published by another member of the room
    ReceiveChanges { payload: Payload },
}

impl ServerMessage {
    fn event(&self) -> &'static str {
        match self {
            ServerMessage::ReceiveChanges { .. } => RECEIVE_CHANGES,
        }
    }

    fn data(&self) -> &Payload {
        match self {
            ServerMessage::ReceiveChanges { payload } => payload,
        }
    }

    /// Serialize into the JSON envelope
    pub fn to_json(&self) -> RelayResult<String> {
        let envelope = OutboundEnvelope {
            event: self.event(),
            data: self.data(),
        };
        Ok(serde_json::to_string(&envelope)?)
    }
}

/// How messages are framed on a WebSocket connection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framing {
    /// JSON envelope in a text frame
    #[default]
    Text,
    /// JSON envelope as a lib0 string in a binary frame
    Binary,
}

/// Decode a client message from a text frame
pub fn decode_text(text: &str) -> RelayResult<ClientMessage> {
    let envelope: Envelope = serde_json::from_str(text)?;
    ClientMessage::from_envelope(envelope)
}

/// Encode a server message for a text frame
pub fn encode_text(message: &ServerMessage) -> RelayResult<String> {
    message.to_json()
}

/// Encode a message using lib0 format
pub fn encode_message(message: &ServerMessage) -> RelayResult<Vec<u8>> {
    let json = message.to_json()?;
    let mut encoder = Vec::new();
    lib0::encoding::Write::write_string(&mut encoder, &json);
    Ok(encoder)
}

/// Decode a message from lib0 format
pub fn decode_message(data: &[u8]) -> RelayResult<ClientMessage> {
    let mut decoder = lib0::decoding::Cursor::new(data);
    let json =
        lib0::decoding::Read::read_string(&mut decoder).map_err(|e| RelayError::Protocol {
            message: format!("Failed to decode lib0 string: {}", e),
        })?;

    decode_text(json)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_join_document() {
        let message = decode_text(r#"{"event":"join-document","data":"doc1"}"#).unwrap();
        assert_eq!(
            message,
            ClientMessage::JoinRoom {
                room_id: "doc1".to_string()
            }
        );
    }

    #[test]
    fn test_decode_join_room_alias() {
        let message = decode_text(r#"{"event":"join-room","data":"poc_document_1"}"#).unwrap();
        assert!(matches!(message, ClientMessage::JoinRoom { room_id } if room_id == "poc_document_1"));
    }

    #[test]
    fn test_join_requires_string_room_id() {
        let result = decode_text(r#"{"event":"join-document","data":{"id":1}}"#);
        assert!(matches!(result, Err(RelayError::Protocol { .. })));
    }

    #[test]
    fn test_send_changes_keeps_raw_payload() {
        let raw = r#"{ "ops" : [ {"insert":"aé"}, 1.50 ] }"#;
        let frame = format!(r#"{{"event":"send-changes","data":{}}}"#, raw);

        match decode_text(&frame).unwrap() {
            ClientMessage::SendChanges { payload } => assert_eq!(payload.as_json(), raw),
            other => panic!("Expected SendChanges, got: {:?}", other),
        }
    }

    #[test]
    fn test_unknown_event_is_rejected() {
        let result = decode_text(r#"{"event":"delete-document","data":"doc1"}"#);
        match result {
            Err(RelayError::UnknownEvent { event }) => assert_eq!(event, "delete-document"),
            other => panic!("Expected UnknownEvent, got: {:?}", other),
        }
    }

    #[test]
    fn test_missing_data_is_rejected() {
        assert!(decode_text(r#"{"event":"send-changes"}"#).is_err());
        assert!(decode_text("not json").is_err());
    }

    #[test]
    fn test_receive_changes_envelope() {
        let message = ServerMessage::ReceiveChanges {
            payload: Payload::text("hello").unwrap(),
        };
        assert_eq!(
            encode_text(&message).unwrap(),
            r#"{"event":"receive-changes","data":"hello"}"#
        );
    }

    #[test]
    fn test_binary_frames_use_lib0_strings() {
        let mut frame = Vec::new();
        lib0::encoding::Write::write_string(&mut frame, r#"{"event":"send-changes","data":"x"}"#);

        let message = decode_message(&frame).unwrap();
        assert_eq!(
            message,
            ClientMessage::SendChanges {
                payload: Payload::text("x").unwrap()
            }
        );

        let encoded = encode_message(&ServerMessage::ReceiveChanges {
            payload: Payload::text("x").unwrap(),
        })
        .unwrap();
        let mut decoder = lib0::decoding::Cursor::new(&encoded);
        let json = lib0::decoding::Read::read_string(&mut decoder).unwrap();
        assert_eq!(json, r#"{"event":"receive-changes","data":"x"}"#);
    }

    #[test]
    fn test_framing_defaults_to_text() {
        assert_eq!(Framing::default(), Framing::Text);
        let framing: Framing = serde_json::from_str(r#""binary""#).unwrap();
        assert_eq!(framing, Framing::Binary);
    }
}
