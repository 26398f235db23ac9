//! Message envelope and the marshalling seam.
//!
//! The dispatch core never interprets payload bytes. Entity decoding is an
//! external collaborator's job; [`Marshaller`] is the contract a method
//! descriptor carries for each direction.

use std::fmt;

use bytes::Bytes;

/// A single RPC message as seen by the dispatch core.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    payload: Bytes,
}

impl Message {
    /// Wrap payload bytes in a message envelope.
    pub fn new(payload: impl Into<Bytes>) -> Self {
        Message {
            payload: payload.into(),
        }
    }

    /// Payload bytes.
    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    /// Consume the message, returning its payload.
    pub fn into_payload(self) -> Bytes {
        self.payload
    }

    /// Payload length in bytes.
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    /// Whether the payload is empty.
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

impl From<Bytes> for Message {
    fn from(payload: Bytes) -> Self {
        Message::new(payload)
    }
}

impl From<Vec<u8>> for Message {
    fn from(payload: Vec<u8>) -> Self {
        Message::new(payload)
    }
}

impl From<&'static str> for Message {
    fn from(payload: &'static str) -> Self {
        Message::new(Bytes::from_static(payload.as_bytes()))
    }
}

/// Error produced by a marshaller while encoding or decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError(String);

impl CodecError {
    pub fn new(detail: impl Into<String>) -> Self {
        CodecError(detail.into())
    }
}

impl fmt::Display for CodecError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "codec error: {}", self.0)
    }
}

impl std::error::Error for CodecError {}

/// Byte-level codec for one message direction of a method.
///
/// Implementations translate between wire bytes and [`Message`] values.
/// The registry stores one marshaller per direction on every method
/// descriptor; the core itself only threads them through.
pub trait Marshaller: Send + Sync {
    /// Serialize a message into wire bytes.
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError>;

    /// Parse wire bytes into a message.
    fn decode(&self, bytes: Bytes) -> Result<Message, CodecError>;
}

/// Passthrough marshaller for payloads that are already wire bytes.
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityMarshaller;

impl Marshaller for IdentityMarshaller {
    fn encode(&self, message: &Message) -> Result<Bytes, CodecError> {
        Ok(message.payload().clone())
    }

    fn decode(&self, bytes: Bytes) -> Result<Message, CodecError> {
        Ok(Message::new(bytes))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_roundtrip() {
        let marshaller = IdentityMarshaller;
        let message = Message::from("hello");

        let bytes = marshaller.encode(&message).unwrap();
        assert_eq!(&bytes[..], b"hello");

        let decoded = marshaller.decode(bytes).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn message_accessors() {
        let message = Message::from(vec![1u8, 2, 3]);
        assert_eq!(message.len(), 3);
        assert!(!message.is_empty());
        assert_eq!(message.into_payload(), Bytes::from(vec![1u8, 2, 3]));

        assert!(Message::default().is_empty());
    }
}
