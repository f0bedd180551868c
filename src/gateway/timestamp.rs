//! JSON encoding for `google.protobuf.Timestamp` fields.
//!
//! Used through `#[serde(with = "crate::gateway::timestamp")]` on the
//! generated messages. Present timestamps encode as RFC 3339 UTC strings,
//! absent ones as `null`.

use chrono::{DateTime, SecondsFormat, Utc};
use prost_types::Timestamp;
use serde::de::Error as _;
use serde::ser::Error as _;
use serde::{Deserialize, Deserializer, Serializer};

/// Formats a timestamp as RFC 3339, `None` when out of chrono's range.
pub fn format(ts: &Timestamp) -> Option<String> {
    let nanos = u32::try_from(ts.nanos).ok()?;
    DateTime::<Utc>::from_timestamp(ts.seconds, nanos)
        .map(|dt| dt.to_rfc3339_opts(SecondsFormat::AutoSi, true))
}

/// Parses an RFC 3339 string with any offset.
pub fn parse(raw: &str) -> Result<Timestamp, chrono::ParseError> {
    let dt = DateTime::parse_from_rfc3339(raw)?.with_timezone(&Utc);
    Ok(Timestamp {
        seconds: dt.timestamp(),
        nanos: i32::try_from(dt.timestamp_subsec_nanos()).unwrap_or(0),
    })
}

pub fn serialize<S>(value: &Option<Timestamp>, serializer: S) -> Result<S::Ok, S::Error>
where
    S: Serializer,
{
    match value {
        Some(ts) => {
            let text = format(ts).ok_or_else(|| S::Error::custom("timestamp out of range"))?;
            serializer.serialize_some(&text)
        }
        None => serializer.serialize_none(),
    }
}

pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Timestamp>, D::Error>
where
    D: Deserializer<'de>,
{
    Option::<String>::deserialize(deserializer)?
        .map(|raw| parse(&raw).map_err(D::Error::custom))
        .transpose()
}
