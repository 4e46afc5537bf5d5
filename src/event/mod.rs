pub mod codec;
pub mod model;

pub use codec::{decode_event, encode_event, DecodeError, DISCOVERY_EVENT_CONTENT_TYPE};
pub use model::{CompletedScan, DiscoveryEvent, DiscoveryResult, EndpointDescriptor};
