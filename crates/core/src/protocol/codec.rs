/// JSON framing for signaling events
///
/// Every event is one text frame: `{"event": <name>, "data": <payload>}`.
use hiddendrop_common::config::protocol::MAX_MESSAGE_SIZE;
use hiddendrop_common::{HiddenDropError, Result};
use serde::{de::DeserializeOwned, Serialize};
use tracing::{debug, error};

pub struct MessageCodec;

impl MessageCodec {
    /// Encode an event into a text frame
    pub fn encode<T: Serialize>(message: &T) -> Result<String> {
        let frame = serde_json::to_string(message)
            .map_err(|e| HiddenDropError::serialization(e.to_string()))?;
        debug!("Encoded frame ({} bytes)", frame.len());
        Ok(frame)
    }

    /// Decode a text frame, refusing oversized input before parsing
    pub fn decode<T: DeserializeOwned>(frame: &str) -> Result<T> {
        if frame.len() > MAX_MESSAGE_SIZE {
            error!(
                "Message too large: {} bytes (max {})",
                frame.len(),
                MAX_MESSAGE_SIZE
            );
            return Err(HiddenDropError::protocol("Message too large"));
        }

        serde_json::from_str(frame).map_err(|e| HiddenDropError::serialization(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::messages::{ClientEvent, ServerEvent};
    use hiddendrop_common::ClientId;

    #[test]
    fn test_decode_client_event() {
        let event: ClientEvent = MessageCodec::decode(r#"{"event":"discover"}"#).unwrap();
        assert_eq!(event, ClientEvent::Discover);
    }

    #[test]
    fn test_encode_server_event() {
        let id = ClientId::from([0xaa; 16]);
        let frame = MessageCodec::encode(&ServerEvent::ClientId(id)).unwrap();
        assert_eq!(frame, format!(r#"{{"event":"client-id","data":"{}"}}"#, id));
    }

    #[test]
    fn test_rejects_unknown_event() {
        let err = MessageCodec::decode::<ClientEvent>(r#"{"event":"launch-missiles"}"#)
            .unwrap_err();
        assert!(matches!(err, HiddenDropError::Serialization(_)));
    }

    #[test]
    fn test_rejects_oversized_frame() {
        let frame = "x".repeat(MAX_MESSAGE_SIZE + 1);
        let err = MessageCodec::decode::<ClientEvent>(&frame).unwrap_err();
        assert!(matches!(err, HiddenDropError::Protocol(_)));
    }
}
