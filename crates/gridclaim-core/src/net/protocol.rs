use bytes::Bytes;

use super::messages::{ClientMessage, ServerMessage};

/// Subprotocol clients must offer during the WebSocket handshake.
pub const DEFAULT_SUBPROTOCOL: &str = "echo-protocol";

/// Maximum encoded message size in bytes.
pub const MAX_MESSAGE_SIZE: usize = 16 * 1024; // 16 KiB

#[derive(Debug)]
pub enum ProtocolError {
    EmptyMessage,
    PayloadTooLarge(usize),
    SerializeError(String),
    DeserializeError(String),
}

impl std::fmt::Display for ProtocolError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EmptyMessage => write!(f, "empty message"),
            Self::PayloadTooLarge(size) => {
                write!(
                    f,
                    "payload too large: {size} bytes (max {MAX_MESSAGE_SIZE})"
                )
            },
            Self::SerializeError(e) => write!(f, "serialize error: {e}"),
            Self::DeserializeError(e) => write!(f, "deserialize error: {e}"),
        }
    }
}

impl std::error::Error for ProtocolError {}

fn encode_json<T: serde::Serialize>(payload: &T) -> Result<Bytes, ProtocolError> {
    let buf =
        serde_json::to_vec(payload).map_err(|e| ProtocolError::SerializeError(e.to_string()))?;
    if buf.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(buf.len()));
    }
    Ok(Bytes::from(buf))
}

fn decode_json<T: for<'de> serde::Deserialize<'de>>(data: &[u8]) -> Result<T, ProtocolError> {
    if data.is_empty() {
        return Err(ProtocolError::EmptyMessage);
    }
    if data.len() > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge(data.len()));
    }
    serde_json::from_slice(data).map_err(|e| ProtocolError::DeserializeError(e.to_string()))
}

/// Encode a `ServerMessage` to a JSON frame.
pub fn encode_server_message(msg: &ServerMessage) -> Result<Bytes, ProtocolError> {
    encode_json(msg)
}

/// Encode a `ClientMessage` to a JSON frame.
pub fn encode_client_message(msg: &ClientMessage) -> Result<Bytes, ProtocolError> {
    encode_json(msg)
}

/// Decode a JSON frame into a `ClientMessage`. Unknown `type` tags and missing
/// fields are deserialize errors.
pub fn decode_client_message(data: &[u8]) -> Result<ClientMessage, ProtocolError> {
    decode_json(data)
}

/// Decode a JSON frame into a `ServerMessage`.
pub fn decode_server_message(data: &[u8]) -> Result<ServerMessage, ProtocolError> {
    decode_json(data)
}
