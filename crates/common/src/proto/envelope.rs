//! Broker wire format for processed envelopes.

use crate::domain::ProcessedEnvelope;
use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, TimeZone, Utc};
use prost::Message;
use prost_types::{value::Kind, ListValue, Struct, Timestamp, Value};

/// Message carried on the processed-envelope stream
#[derive(Clone, PartialEq, prost::Message)]
pub struct ProtoProcessedEnvelope {
    #[prost(string, tag = "1")]
    pub organization_id: String,
    #[prost(string, tag = "2")]
    pub end_device_id: String,
    #[prost(message, optional, tag = "3")]
    pub occurred_at: Option<Timestamp>,
    #[prost(message, optional, tag = "4")]
    pub processed_at: Option<Timestamp>,
    #[prost(message, optional, tag = "5")]
    pub data: Option<Struct>,
}

pub fn encode_processed_envelope(envelope: &ProcessedEnvelope) -> Vec<u8> {
    domain_to_proto_envelope(envelope).encode_to_vec()
}

pub fn decode_processed_envelope(bytes: &[u8]) -> Result<ProcessedEnvelope> {
    let proto = ProtoProcessedEnvelope::decode(bytes)
        .context("Failed to decode ProcessedEnvelope protobuf")?;
    proto_to_domain_envelope(proto)
}

pub fn domain_to_proto_envelope(envelope: &ProcessedEnvelope) -> ProtoProcessedEnvelope {
    ProtoProcessedEnvelope {
        organization_id: envelope.organization_id.clone(),
        end_device_id: envelope.end_device_id.clone(),
        occurred_at: Some(datetime_to_timestamp(&envelope.occurred_at)),
        processed_at: Some(datetime_to_timestamp(&envelope.processed_at)),
        data: Some(json_map_to_prost_struct(&envelope.data)),
    }
}

pub fn proto_to_domain_envelope(proto: ProtoProcessedEnvelope) -> Result<ProcessedEnvelope> {
    let occurred_at = timestamp_to_datetime(
        proto
            .occurred_at
            .ok_or_else(|| anyhow!("Missing occurred_at timestamp"))?,
    )?;

    let processed_at = timestamp_to_datetime(
        proto
            .processed_at
            .ok_or_else(|| anyhow!("Missing processed_at timestamp"))?,
    )?;

    let data = proto
        .data
        .map(|s| prost_struct_to_json_map(&s))
        .unwrap_or_default();

    Ok(ProcessedEnvelope {
        organization_id: proto.organization_id,
        end_device_id: proto.end_device_id,
        occurred_at,
        processed_at,
        data,
    })
}

fn datetime_to_timestamp(dt: &DateTime<Utc>) -> Timestamp {
    Timestamp {
        seconds: dt.timestamp(),
        nanos: dt.timestamp_subsec_nanos() as i32,
    }
}

fn timestamp_to_datetime(ts: Timestamp) -> Result<DateTime<Utc>> {
    u32::try_from(ts.nanos)
        .ok()
        .and_then(|nanos| Utc.timestamp_opt(ts.seconds, nanos).single())
        .ok_or_else(|| anyhow!("Invalid timestamp: {} seconds, {} nanos", ts.seconds, ts.nanos))
}

fn json_map_to_prost_struct(map: &serde_json::Map<String, serde_json::Value>) -> Struct {
    Struct {
        fields: map
            .iter()
            .map(|(key, value)| (key.clone(), json_to_prost_value(value)))
            .collect(),
    }
}

fn json_to_prost_value(value: &serde_json::Value) -> Value {
    let kind = match value {
        serde_json::Value::Null => Kind::NullValue(0),
        serde_json::Value::Bool(b) => Kind::BoolValue(*b),
        // Struct only carries doubles
        serde_json::Value::Number(n) => n.as_f64().map_or(Kind::NullValue(0), Kind::NumberValue),
        serde_json::Value::String(s) => Kind::StringValue(s.clone()),
        serde_json::Value::Array(arr) => Kind::ListValue(ListValue {
            values: arr.iter().map(json_to_prost_value).collect(),
        }),
        serde_json::Value::Object(map) => Kind::StructValue(json_map_to_prost_struct(map)),
    };

    Value { kind: Some(kind) }
}

fn prost_struct_to_json_map(s: &Struct) -> serde_json::Map<String, serde_json::Value> {
    s.fields
        .iter()
        .filter_map(|(k, v)| prost_value_to_json(v).map(|json| (k.clone(), json)))
        .collect()
}

fn prost_value_to_json(value: &Value) -> Option<serde_json::Value> {
    value.kind.as_ref().map(|kind| match kind {
        Kind::NullValue(_) => serde_json::Value::Null,
        Kind::NumberValue(n) => serde_json::json!(n),
        Kind::StringValue(s) => serde_json::Value::String(s.clone()),
        Kind::BoolValue(b) => serde_json::Value::Bool(*b),
        Kind::StructValue(s) => serde_json::Value::Object(prost_struct_to_json_map(s)),
        Kind::ListValue(list) => {
            serde_json::Value::Array(list.values.iter().filter_map(prost_value_to_json).collect())
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_envelope() -> ProcessedEnvelope {
        let data = serde_json::json!({
            "temp": 21.5,
            "status": "ok",
            "armed": false,
            "location": {"lat": 52.1, "lon": 4.3},
            "readings": [1.0, 2.0],
        });

        ProcessedEnvelope {
            organization_id: "org-1".to_string(),
            end_device_id: "device-1".to_string(),
            occurred_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 0).unwrap()
                + chrono::Duration::milliseconds(250),
            processed_at: Utc.with_ymd_and_hms(2025, 3, 1, 12, 0, 1).unwrap(),
            data: data.as_object().unwrap().clone(),
        }
    }

    #[test]
    fn test_wire_format_preserves_envelope() {
        let envelope = sample_envelope();

        let decoded = decode_processed_envelope(&encode_processed_envelope(&envelope)).unwrap();

        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_integers_travel_as_doubles() {
        let mut envelope = sample_envelope();
        envelope.data = serde_json::json!({"count": 3}).as_object().unwrap().clone();

        let decoded = decode_processed_envelope(&encode_processed_envelope(&envelope)).unwrap();

        assert_eq!(decoded.data["count"].as_f64(), Some(3.0));
    }

    #[test]
    fn test_missing_timestamp_is_rejected() {
        let mut proto = domain_to_proto_envelope(&sample_envelope());
        proto.occurred_at = None;

        let err = proto_to_domain_envelope(proto).unwrap_err();
        assert!(err.to_string().contains("occurred_at"));
    }

    #[test]
    fn test_garbage_bytes_fail_to_decode() {
        assert!(decode_processed_envelope(&[0xff, 0xff, 0xff]).is_err());
    }

    #[test]
    fn test_negative_nanos_rejected() {
        let ts = Timestamp {
            seconds: 1,
            nanos: -5,
        };
        assert!(timestamp_to_datetime(ts).is_err());
    }
}
