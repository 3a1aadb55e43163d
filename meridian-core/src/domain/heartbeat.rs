//! Heartbeat schema.
//!
//! Edge servers report their load as a flat key/value record. Newer senders add a
//! `customProperties` entry holding a JSON block with a server weight and a per-vhost
//! address map. Both the flat record and a fully typed JSON form are accepted;
//! every field is parsed on its own so one bad value never discards the others.

use std::collections::HashMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::domain::server::{ServerStatus, VHostAddress};
use crate::error::HeartbeatError;

/// Record key for the connected client count.
pub const FIELD_CONNECT_COUNT: &str = "connectCount";
/// Record key for the inbound byte rate.
pub const FIELD_IN_RATE: &str = "inRate";
/// Record key for the outbound byte rate.
pub const FIELD_OUT_RATE: &str = "outRate";
/// Record key for the default redirect address.
pub const FIELD_REDIRECT: &str = "redirect";
/// Record key for the status code.
pub const FIELD_STATUS: &str = "status";
/// Record key for the structured JSON block.
pub const FIELD_CUSTOM_PROPERTIES: &str = "customProperties";

/// Structured block carried by vhost-aware senders.
///
/// Each entry is read on its own: an unparseable weight reads as `None` and a
/// malformed vhost entry is skipped without discarding its siblings.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CustomProperties {
    /// Server-wide capacity multiplier; `None` when absent or unparseable
    pub weight: Option<i64>,
    /// Redirect address per virtual host
    pub vhosts: HashMap<String, VHostAddress>,
}

impl CustomProperties {
    /// Parse the JSON text of a `customProperties` record entry.
    ///
    /// Returns `None` (and logs) when the text is not a JSON object.
    pub fn parse(raw: &str) -> Option<Self> {
        match serde_json::from_str::<Value>(raw) {
            Ok(value) => Self::from_value(value),
            Err(err) => {
                debug!(error = %err, "ignoring malformed customProperties block");
                None
            }
        }
    }

    /// Build the block from an already decoded JSON value.
    ///
    /// Returns `None` when `value` is not an object.
    pub fn from_value(value: Value) -> Option<Self> {
        let mut fields = match value {
            Value::Object(fields) => fields,
            other => {
                debug!(value = %other, "ignoring customProperties that is not an object");
                return None;
            }
        };

        let weight = fields.remove("weight").and_then(int_value);
        let vhosts = match fields.remove("vhosts") {
            Some(Value::Object(entries)) => entries
                .into_iter()
                .filter_map(|(name, entry)| match serde_json::from_value::<VHostAddress>(entry) {
                    Ok(address) => Some((name, address)),
                    Err(err) => {
                        debug!(vhost = %name, error = %err, "skipping malformed vhost entry");
                        None
                    }
                })
                .collect(),
            Some(Value::Null) | None => HashMap::new(),
            Some(other) => {
                debug!(value = %other, "ignoring vhosts that is not an object");
                HashMap::new()
            }
        };

        Some(Self { weight, vhosts })
    }

    /// Compose the block a vhost-aware edge server advertises.
    ///
    /// A vhost without a configured redirect address advertises the last of its
    /// listeners bound to port 1935 or 80, or no address when it has neither.
    pub fn advertise(weight: i64, vhosts: &[VHostListing]) -> Self {
        let vhosts = vhosts
            .iter()
            .map(|vhost| {
                let configured = vhost
                    .redirect_address
                    .as_deref()
                    .map(str::trim)
                    .filter(|addr| !addr.is_empty());
                let address = configured.or_else(|| {
                    vhost
                        .listeners
                        .iter()
                        .rev()
                        .find(|(_, port)| matches!(port, 1935 | 80))
                        .map(|(host, _)| host.as_str())
                });
                (
                    vhost.name.clone(),
                    VHostAddress {
                        redirect_address: address.map(str::to_string),
                    },
                )
            })
            .collect();

        Self {
            weight: Some(weight),
            vhosts,
        }
    }
}

impl<'de> Deserialize<'de> for CustomProperties {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Self::from_value(value).ok_or_else(|| D::Error::custom("customProperties must be an object"))
    }
}

/// A virtual host as configured on an edge server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VHostListing {
    /// Virtual host name
    pub name: String,
    /// Explicitly configured redirect address
    pub redirect_address: Option<String>,
    /// Host and port of every listener the vhost binds
    pub listeners: Vec<(String, u16)>,
}

/// One status report from an edge server.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Heartbeat {
    /// Reporting server
    pub server_id: String,
    /// Connected clients
    #[serde(default, deserialize_with = "lenient_i64")]
    pub connect_count: Option<i64>,
    /// Inbound bytes/sec
    #[serde(default, deserialize_with = "lenient_i64")]
    pub in_rate: Option<i64>,
    /// Outbound bytes/sec
    #[serde(default, deserialize_with = "lenient_i64")]
    pub out_rate: Option<i64>,
    /// Default redirect address
    #[serde(default, deserialize_with = "lenient_redirect")]
    pub redirect: Option<String>,
    /// Reported liveness
    #[serde(default, deserialize_with = "lenient_status")]
    pub status: ServerStatus,
    /// Optional structured block
    #[serde(default, rename = "customProperties", deserialize_with = "lenient_custom")]
    pub custom: Option<CustomProperties>,
}

impl Heartbeat {
    /// A running heartbeat with the given outbound rate, mostly useful in tests and tools.
    pub fn running(server_id: impl Into<String>, out_rate: i64) -> Self {
        Self {
            server_id: server_id.into(),
            connect_count: Some(0),
            in_rate: Some(0),
            out_rate: Some(out_rate),
            redirect: None,
            status: ServerStatus::Running,
            custom: None,
        }
    }

    /// Parse a flat key/value record received from `server_id`.
    pub fn from_record(
        server_id: &str,
        values: &HashMap<String, String>,
    ) -> Result<Self, HeartbeatError> {
        let server_id = server_id.trim();
        if server_id.is_empty() {
            return Err(HeartbeatError::MissingServerId);
        }

        let status = match values.get(FIELD_STATUS) {
            Some(raw) => ServerStatus::parse(raw).unwrap_or_else(|| {
                debug!(server_id, value = %raw, "unrecognised status, treating as unknown");
                ServerStatus::Unknown
            }),
            None => ServerStatus::Unknown,
        };

        Ok(Self {
            server_id: server_id.to_string(),
            connect_count: int_field(server_id, values, FIELD_CONNECT_COUNT),
            in_rate: int_field(server_id, values, FIELD_IN_RATE),
            out_rate: int_field(server_id, values, FIELD_OUT_RATE),
            redirect: values
                .get(FIELD_REDIRECT)
                .map(|addr| addr.trim())
                .filter(|addr| !addr.is_empty())
                .map(str::to_string),
            status,
            custom: values
                .get(FIELD_CUSTOM_PROPERTIES)
                .and_then(|raw| CustomProperties::parse(raw)),
        })
    }

    /// Attach a per-vhost block.
    pub fn with_custom(mut self, custom: CustomProperties) -> Self {
        self.custom = Some(custom);
        self
    }

    /// Set the default redirect address.
    pub fn with_redirect(mut self, redirect: impl Into<String>) -> Self {
        self.redirect = Some(redirect.into());
        self
    }

    /// Set the reported status.
    pub fn with_status(mut self, status: ServerStatus) -> Self {
        self.status = status;
        self
    }
}

fn int_field(server_id: &str, values: &HashMap<String, String>, key: &str) -> Option<i64> {
    let raw = values.get(key)?;
    match raw.trim().parse::<i64>() {
        Ok(value) => Some(value),
        Err(err) => {
            debug!(server_id, field = key, value = %raw, error = %err, "ignoring unparseable heartbeat field");
            None
        }
    }
}

fn int_value(value: Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Accept integers given as JSON numbers or numeric strings; anything else reads as `None`.
fn lenient_i64<'de, D>(deserializer: D) -> Result<Option<i64>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(int_value(Value::deserialize(deserializer)?))
}

/// Accept a status code, a numeric string or a status name; anything else is unknown.
fn lenient_status<'de, D>(deserializer: D) -> Result<ServerStatus, D::Error>
where
    D: Deserializer<'de>,
{
    let status = match Value::deserialize(deserializer)? {
        Value::Number(n) => n.as_i64().map(ServerStatus::from_code),
        Value::String(s) => ServerStatus::parse(&s),
        _ => None,
    };
    Ok(status.unwrap_or_else(|| {
        debug!("unrecognised status, treating as unknown");
        ServerStatus::Unknown
    }))
}

/// Only a non-blank string is an address.
fn lenient_redirect<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::String(s) => Some(s.trim().to_string()).filter(|addr| !addr.is_empty()),
        _ => None,
    })
}

fn lenient_custom<'de, D>(deserializer: D) -> Result<Option<CustomProperties>, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(match Value::deserialize(deserializer)? {
        Value::Null => None,
        Value::String(raw) => CustomProperties::parse(&raw),
        other => CustomProperties::from_value(other),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_flat_record_parses_all_fields() {
        let values = record(&[
            ("connectCount", "12"),
            ("inRate", "1000"),
            ("outRate", "250000"),
            ("redirect", "10.0.0.7"),
            ("status", "1"),
        ]);

        let hb = Heartbeat::from_record("edge-7", &values).unwrap();
        assert_eq!(hb.server_id, "edge-7");
        assert_eq!(hb.connect_count, Some(12));
        assert_eq!(hb.in_rate, Some(1000));
        assert_eq!(hb.out_rate, Some(250_000));
        assert_eq!(hb.redirect.as_deref(), Some("10.0.0.7"));
        assert_eq!(hb.status, ServerStatus::Running);
        assert!(hb.custom.is_none());
    }

    #[test]
    fn test_bad_field_does_not_abort_record() {
        let values = record(&[
            ("connectCount", "lots"),
            ("inRate", "12.5"),
            ("outRate", "4000"),
            ("status", "1"),
        ]);

        let hb = Heartbeat::from_record("edge-1", &values).unwrap();
        assert_eq!(hb.connect_count, None);
        assert_eq!(hb.in_rate, None);
        assert_eq!(hb.out_rate, Some(4000));
        assert_eq!(hb.status, ServerStatus::Running);
    }

    #[test]
    fn test_custom_properties_block() {
        let values = record(&[
            ("status", "1"),
            (
                "customProperties",
                r#"{"weight":"7","vhosts":{"live":{"redirectAddress":"live.edge-1"},"vod":{"redirectAddress":null}}}"#,
            ),
        ]);

        let hb = Heartbeat::from_record("edge-1", &values).unwrap();
        let custom = hb.custom.unwrap();
        assert_eq!(custom.weight, Some(7));
        assert_eq!(
            custom.vhosts.get("live"),
            Some(&VHostAddress::new("live.edge-1"))
        );
        assert_eq!(custom.vhosts.get("vod"), Some(&VHostAddress::default()));
    }

    #[test]
    fn test_unparseable_weight_keeps_vhosts() {
        let custom = CustomProperties::parse(
            r#"{"weight":"heavy","vhosts":{"live":{"redirectAddress":"a"}}}"#,
        )
        .unwrap();
        assert_eq!(custom.weight, None);
        assert_eq!(custom.vhosts.len(), 1);
    }

    #[test]
    fn test_malformed_vhost_entry_keeps_weight_and_siblings() {
        let custom = CustomProperties::parse(
            r#"{"weight":3,"vhosts":{"live":7,"vod":{"redirectAddress":"vod.edge-1"}}}"#,
        )
        .unwrap();
        assert_eq!(custom.weight, Some(3));
        assert_eq!(custom.vhosts.len(), 1);
        assert_eq!(custom.vhosts.get("vod"), Some(&VHostAddress::new("vod.edge-1")));
    }

    #[test]
    fn test_custom_block_that_is_not_an_object_is_dropped() {
        assert_eq!(CustomProperties::parse("[1, 2]"), None);
        assert_eq!(CustomProperties::parse(r#""weight""#), None);
    }

    #[test]
    fn test_malformed_custom_block_is_dropped() {
        let values = record(&[("status", "1"), ("outRate", "10"), ("customProperties", "{not json")]);
        let hb = Heartbeat::from_record("edge-1", &values).unwrap();
        assert!(hb.custom.is_none());
        assert_eq!(hb.out_rate, Some(10));
    }

    #[test]
    fn test_missing_server_id_is_rejected() {
        let err = Heartbeat::from_record("  ", &HashMap::new()).unwrap_err();
        assert!(matches!(err, HeartbeatError::MissingServerId));
    }

    #[test]
    fn test_typed_json_form() {
        let hb: Heartbeat = serde_json::from_str(
            r#"{"serverId":"edge-2","outRate":"300","connectCount":4,"status":1,
                "customProperties":{"weight":2,"vhosts":{}}}"#,
        )
        .unwrap();
        assert_eq!(hb.server_id, "edge-2");
        assert_eq!(hb.out_rate, Some(300));
        assert_eq!(hb.connect_count, Some(4));
        assert_eq!(hb.in_rate, None);
        assert_eq!(hb.status, ServerStatus::Running);
        assert_eq!(hb.custom.unwrap().weight, Some(2));
    }

    #[test]
    fn test_typed_form_tolerates_loose_values() {
        let hb: Heartbeat = serde_json::from_str(
            r#"{"serverId":"edge-3","status":"1","redirect":42,
                "customProperties":{"weight":3,"vhosts":{"live":5}}}"#,
        )
        .unwrap();
        assert_eq!(hb.status, ServerStatus::Running);
        assert_eq!(hb.redirect, None);
        let custom = hb.custom.unwrap();
        assert_eq!(custom.weight, Some(3));
        assert!(custom.vhosts.is_empty());
    }

    #[test]
    fn test_typed_form_unknown_status_and_blank_redirect() {
        let hb: Heartbeat = serde_json::from_str(
            r#"{"serverId":"edge-4","status":"sleeping","redirect":"  ","customProperties":"oops"}"#,
        )
        .unwrap();
        assert_eq!(hb.status, ServerStatus::Unknown);
        assert_eq!(hb.redirect, None);
        assert_eq!(hb.custom, None);

        let hb: Heartbeat =
            serde_json::from_str(r#"{"serverId":"edge-4","status":"stopped","redirect":" edge4 "}"#)
                .unwrap();
        assert_eq!(hb.status, ServerStatus::Stopped);
        assert_eq!(hb.redirect.as_deref(), Some("edge4"));
    }

    #[test]
    fn test_advertise_prefers_configured_address() {
        let custom = CustomProperties::advertise(
            4,
            &[
                VHostListing {
                    name: "live".to_string(),
                    redirect_address: Some("live.edge-1".to_string()),
                    listeners: vec![("10.0.0.1".to_string(), 1935)],
                },
                VHostListing {
                    name: "vod".to_string(),
                    redirect_address: None,
                    listeners: vec![
                        ("10.0.0.2".to_string(), 1935),
                        ("10.0.0.3".to_string(), 8086),
                        ("10.0.0.4".to_string(), 80),
                    ],
                },
                VHostListing {
                    name: "admin".to_string(),
                    redirect_address: Some(String::new()),
                    listeners: vec![("10.0.0.5".to_string(), 8086)],
                },
            ],
        );

        assert_eq!(custom.weight, Some(4));
        assert_eq!(custom.vhosts.get("live"), Some(&VHostAddress::new("live.edge-1")));
        assert_eq!(custom.vhosts.get("vod"), Some(&VHostAddress::new("10.0.0.4")));
        assert_eq!(custom.vhosts.get("admin"), Some(&VHostAddress::default()));
    }

    #[test]
    fn test_advertised_block_reads_back() {
        let advertised = CustomProperties::advertise(
            2,
            &[VHostListing {
                name: "live".to_string(),
                redirect_address: None,
                listeners: vec![("192.168.0.9".to_string(), 80)],
            }],
        );
        let text = serde_json::to_string(&advertised).unwrap();
        assert_eq!(CustomProperties::parse(&text), Some(advertised));
    }
}
