use super::model::DiscoveryEvent;
use thiserror::Error;

/// Content type stamped on discovery event messages by supervisors
pub const DISCOVERY_EVENT_CONTENT_TYPE: &str = "application/x-discovery-event-v2-json";

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("empty payload")]
    Empty,

    #[error("malformed discovery event: {0}")]
    Json(#[from] serde_json::Error),
}

/// Decode a transport payload into a discovery event
pub fn decode_event(payload: &[u8]) -> Result<DiscoveryEvent, DecodeError> {
    if payload.iter().all(u8::is_ascii_whitespace) {
        return Err(DecodeError::Empty);
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Encode an event the way supervisors put it on the wire
pub fn encode_event(event: &DiscoveryEvent) -> Result<Vec<u8>, DecodeError> {
    Ok(serde_json::to_vec(event)?)
}
