//! Sparkplug B payload codec: wire protobuf <-> the host's typed metric model.
//!
//! Grounded on `original_source/src/host.py`'s `metric()` / `generate_metric()` /
//! `get_metric_type_string()` helpers, which build and read Sparkplug payloads with a
//! fixed set of supported datatypes (string, int64, double, boolean). The generated
//! protobuf types live under `generated/` (see `build.rs`).

#[allow(clippy::all)]
pub mod generated {
    include!(concat!(env!("OUT_DIR"), "/org.eclipse.tahu.protobuf.rs"));
}

use crate::error::HostError;
use prost::Message;

pub use generated::payload::Metric as WireMetric;
pub use generated::Payload as WirePayload;

/// Sparkplug datatype codes this host understands. The wire format defines many
/// more (Tahu's full datatype table runs to 20+ variants); we only ever birth or
/// decode the four an edge node actually sends in this deployment.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricDatatype {
    Int64,
    Double,
    Boolean,
    String,
}

impl MetricDatatype {
    /// Tahu datatype numbers, per the Sparkplug B spec's datatype table.
    const INT64: u32 = 4;
    const DOUBLE: u32 = 10;
    const BOOLEAN: u32 = 11;
    const STRING: u32 = 12;

    pub fn from_wire(code: u32) -> Result<Self, HostError> {
        match code {
            Self::INT64 => Ok(MetricDatatype::Int64),
            Self::DOUBLE => Ok(MetricDatatype::Double),
            Self::BOOLEAN => Ok(MetricDatatype::Boolean),
            Self::STRING => Ok(MetricDatatype::String),
            other => Err(HostError::Decode(format!("unsupported datatype code {other}"))),
        }
    }

    pub fn to_wire(self) -> u32 {
        match self {
            MetricDatatype::Int64 => Self::INT64,
            MetricDatatype::Double => Self::DOUBLE,
            MetricDatatype::Boolean => Self::BOOLEAN,
            MetricDatatype::String => Self::STRING,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            MetricDatatype::Int64 => "Int64",
            MetricDatatype::Double => "Double",
            MetricDatatype::Boolean => "Boolean",
            MetricDatatype::String => "String",
        }
    }
}

/// A decoded metric value, already dispatched to its concrete Rust type. The
/// datatype is implied by the variant, so callers never have to re-check it
/// against a separate `MetricDatatype` once they hold one of these.
#[derive(Debug, Clone, PartialEq)]
pub enum MetricValue {
    Int64(i64),
    Double(f64),
    Boolean(bool),
    String(String),
}

impl MetricValue {
    pub fn datatype(&self) -> MetricDatatype {
        match self {
            MetricValue::Int64(_) => MetricDatatype::Int64,
            MetricValue::Double(_) => MetricDatatype::Double,
            MetricValue::Boolean(_) => MetricDatatype::Boolean,
            MetricValue::String(_) => MetricDatatype::String,
        }
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            MetricValue::Int64(v) => serde_json::json!(v),
            MetricValue::Double(v) => serde_json::json!(v),
            MetricValue::Boolean(v) => serde_json::json!(v),
            MetricValue::String(v) => serde_json::json!(v),
        }
    }
}

/// A metric as read off the wire: name (present on birth, absent when the sender
/// relies on alias compression), optional alias, timestamp, and typed value.
#[derive(Debug, Clone)]
pub struct DecodedMetric {
    pub name: Option<String>,
    pub alias: Option<u64>,
    pub timestamp: u64,
    pub value: MetricValue,
}

/// A decoded NBIRTH/DBIRTH/NDATA/DDATA/NDEATH/DDEATH payload: the sequence
/// number used for gap detection and the metrics it carries.
#[derive(Debug, Clone)]
pub struct DecodedPayload {
    pub timestamp: Option<u64>,
    pub seq: Option<u64>,
    pub metrics: Vec<DecodedMetric>,
}

pub fn decode(bytes: &[u8]) -> Result<DecodedPayload, HostError> {
    let wire = WirePayload::decode(bytes).map_err(|e| HostError::Decode(e.to_string()))?;
    let mut metrics = Vec::with_capacity(wire.metrics.len());
    for m in &wire.metrics {
        metrics.push(decode_metric(m)?);
    }
    Ok(DecodedPayload {
        timestamp: wire.timestamp,
        seq: wire.seq,
        metrics,
    })
}

fn decode_metric(m: &WireMetric) -> Result<DecodedMetric, HostError> {
    use generated::payload::metric::Value as WireValue;

    // `datatype` is an optional hint, not the source of truth: an edge node
    // addressing a metric purely by alias after the birth certificate often
    // omits it. The populated oneof field always tells us the real type; we
    // only consult `datatype` to catch a sender claiming one type while
    // sending another.
    let value = match &m.value {
        Some(WireValue::LongValue(v)) => MetricValue::Int64(*v as i64),
        Some(WireValue::DoubleValue(v)) => MetricValue::Double(*v),
        Some(WireValue::BooleanValue(v)) => MetricValue::Boolean(*v),
        Some(WireValue::StringValue(v)) => MetricValue::String(v.clone()),
        None => return Err(HostError::Decode("metric carries no value".into())),
    };

    if let Some(code) = m.datatype {
        let declared = MetricDatatype::from_wire(code)?;
        if declared != value.datatype() {
            return Err(HostError::Decode(format!(
                "declared datatype {} disagrees with the populated value ({})",
                declared.as_str(),
                value.datatype().as_str()
            )));
        }
    }

    Ok(DecodedMetric {
        name: m.name.clone(),
        alias: m.alias,
        timestamp: m.timestamp.unwrap_or(0),
        value,
    })
}

fn encode_metric(name: Option<String>, alias: Option<u64>, timestamp: u64, value: &MetricValue) -> WireMetric {
    use generated::payload::metric::Value as WireValue;
    let wire_value = match value {
        MetricValue::Int64(v) => WireValue::LongValue(*v as u64),
        MetricValue::Double(v) => WireValue::DoubleValue(*v),
        MetricValue::Boolean(v) => WireValue::BooleanValue(*v),
        MetricValue::String(v) => WireValue::StringValue(v.clone()),
    };
    WireMetric {
        name,
        alias,
        timestamp: Some(timestamp),
        datatype: Some(value.datatype().to_wire()),
        is_historical: None,
        is_transient: None,
        is_null: Some(false),
        value: Some(wire_value),
    }
}

/// Encodes a birth metric: name always present, no alias yet (aliases are
/// established by position in the birth certificate and reused afterward by
/// the engine, not baked into the wire metric itself here).
pub fn encode_birth_metric(name: &str, timestamp: u64, value: &MetricValue) -> WireMetric {
    encode_metric(Some(name.to_string()), None, timestamp, value)
}

/// Encodes a data metric addressed purely by alias, as a Sparkplug sender
/// does after the birth certificate has established name<->alias mapping.
pub fn encode_data_metric(alias: u64, timestamp: u64, value: &MetricValue) -> WireMetric {
    encode_metric(None, Some(alias), timestamp, value)
}

pub fn encode_payload(timestamp: u64, seq: Option<u64>, metrics: Vec<WireMetric>) -> Vec<u8> {
    let payload = WirePayload {
        timestamp: Some(timestamp),
        metrics,
        seq,
        uuid: None,
        body: None,
    };
    payload.encode_to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_birth_payload() {
        let metrics = vec![
            encode_birth_metric("temperature", 1000, &MetricValue::Double(21.5)),
            encode_birth_metric("running", 1000, &MetricValue::Boolean(true)),
        ];
        let bytes = encode_payload(1000, Some(0), metrics);
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.seq, Some(0));
        assert_eq!(decoded.metrics.len(), 2);
        assert_eq!(decoded.metrics[0].name.as_deref(), Some("temperature"));
        assert_eq!(decoded.metrics[0].value, MetricValue::Double(21.5));
        assert_eq!(decoded.metrics[1].value, MetricValue::Boolean(true));
    }

    #[test]
    fn data_metric_resolves_by_alias_not_name() {
        let metrics = vec![encode_data_metric(7, 2000, &MetricValue::Int64(42))];
        let bytes = encode_payload(2000, Some(1), metrics);
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.metrics[0].name, None);
        assert_eq!(decoded.metrics[0].alias, Some(7));
        assert_eq!(decoded.metrics[0].value, MetricValue::Int64(42));
    }

    #[test]
    fn decode_accepts_a_missing_datatype_by_reading_the_populated_value() {
        // An edge node sending DATA by alias after the birth certificate often
        // omits `datatype` entirely; the populated oneof field is enough.
        let metric = WireMetric {
            name: None,
            alias: Some(5),
            timestamp: Some(1002),
            datatype: None,
            is_historical: None,
            is_transient: None,
            is_null: None,
            value: Some(generated::payload::metric::Value::DoubleValue(22.0)),
        };
        let bytes = encode_payload(1002, Some(2), vec![metric]);
        let decoded = decode(&bytes).expect("decode");
        assert_eq!(decoded.metrics[0].value, MetricValue::Double(22.0));
    }

    #[test]
    fn decode_rejects_a_datatype_that_disagrees_with_the_populated_value() {
        let bad = WireMetric {
            name: Some("x".into()),
            alias: None,
            timestamp: Some(0),
            datatype: Some(MetricDatatype::Int64.to_wire()),
            is_historical: None,
            is_transient: None,
            is_null: None,
            value: Some(generated::payload::metric::Value::StringValue("y".into())),
        };
        let bytes = encode_payload(0, None, vec![bad]);
        assert!(decode(&bytes).is_err());
    }

    #[test]
    fn decode_rejects_a_metric_with_no_value_at_all() {
        let bad = WireMetric {
            name: Some("x".into()),
            alias: None,
            timestamp: Some(0),
            datatype: Some(MetricDatatype::String.to_wire()),
            is_historical: None,
            is_transient: None,
            is_null: None,
            value: None,
        };
        let bytes = encode_payload(0, None, vec![bad]);
        assert!(decode(&bytes).is_err());
    }
}
