use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A single endpoint reported by a supervisor during a scan.
///
/// Only the endpoint URL is interpreted here. Everything else the producer
/// attaches is carried through untouched so the reconciliation side sees the
/// full registration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EndpointDescriptor {
    pub endpoint_url: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_uri: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_mode: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub security_policy: Option<String>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl EndpointDescriptor {
    pub fn new(endpoint_url: impl Into<String>) -> Self {
        Self {
            endpoint_url: endpoint_url.into(),
            application_uri: None,
            security_mode: None,
            security_policy: None,
            extra: Map::new(),
        }
    }
}

/// Scan summary attached to the sentinel event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryResult {
    /// Id of the discovery request that triggered the scan
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    /// The scan was a registration-only run (no active discovery)
    #[serde(default)]
    pub register_only: bool,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub diagnostics: Option<Value>,

    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// One decoded discovery event.
///
/// Events of one scan share `scan_timestamp`. Endpoint events carry indices
/// `0..N-1`; the closing sentinel has no endpoint and carries index `N`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoveryEvent {
    #[serde(alias = "timeStamp")]
    pub scan_timestamp: DateTime<Utc>,

    pub index: u32,

    #[serde(default, alias = "registration")]
    pub endpoint: Option<EndpointDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DiscoveryResult>,
}

impl DiscoveryEvent {
    pub fn endpoint(
        scan_timestamp: DateTime<Utc>,
        index: u32,
        endpoint: EndpointDescriptor,
    ) -> Self {
        Self {
            scan_timestamp,
            index,
            endpoint: Some(endpoint),
            result: None,
        }
    }

    pub fn sentinel(scan_timestamp: DateTime<Utc>, index: u32) -> Self {
        Self {
            scan_timestamp,
            index,
            endpoint: None,
            result: None,
        }
    }

    /// True for the end-of-scan marker
    pub fn is_sentinel(&self) -> bool {
        self.endpoint.is_none()
    }
}

/// A fully reassembled scan, handed to the sink exactly once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CompletedScan {
    pub agent_id: String,
    pub scan_timestamp: DateTime<Utc>,

    /// Sorted ascending by producer index
    pub endpoints: Vec<EndpointDescriptor>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<DiscoveryResult>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_sentinel_has_no_endpoint() {
        let ts = Utc.with_ymd_and_hms(2026, 3, 2, 8, 0, 0).unwrap();
        assert!(DiscoveryEvent::sentinel(ts, 3).is_sentinel());
        assert!(!DiscoveryEvent::endpoint(ts, 0, EndpointDescriptor::new("opc.tcp://a:4840"))
            .is_sentinel());
    }

    #[test]
    fn test_producer_field_aliases() {
        let json = r#"{
            "timeStamp": "2026-03-02T08:00:00Z",
            "index": 0,
            "registration": {
                "endpointUrl": "opc.tcp://plc-1:4840",
                "securityMode": "SignAndEncrypt",
                "siteId": "hall-7"
            }
        }"#;

        let event: DiscoveryEvent = serde_json::from_str(json).unwrap();
        let endpoint = event.endpoint.unwrap();
        assert_eq!(endpoint.endpoint_url, "opc.tcp://plc-1:4840");
        assert_eq!(endpoint.security_mode.as_deref(), Some("SignAndEncrypt"));
        assert_eq!(endpoint.extra.get("siteId"), Some(&Value::from("hall-7")));
    }

    #[test]
    fn test_null_endpoint_is_sentinel() {
        let json = r#"{
            "scanTimestamp": "2026-03-02T08:00:00Z",
            "index": 2,
            "endpoint": null,
            "result": { "id": "req-9", "registerOnly": true }
        }"#;

        let event: DiscoveryEvent = serde_json::from_str(json).unwrap();
        assert!(event.is_sentinel());
        let result = event.result.unwrap();
        assert_eq!(result.id.as_deref(), Some("req-9"));
        assert!(result.register_only);
    }
}
