//! The routed message unit exchanged between clients and the server.

use chrono::{DateTime, Datelike, FixedOffset, SecondsFormat, TimeZone};
use serde::{Deserialize, Serialize};
use serde_json::value::RawValue;

use crate::ids::ClientId;

/// Receiver value addressing every connection. An empty receiver means the same.
pub const BROADCAST: &str = "*";
/// Control type that starts the server tick stream.
pub const DEMO_START: &str = "demo-start";
/// Type of the envelopes the tick stream produces.
pub const SERVER_TICK: &str = "server-tick";
/// Sender stamped on server-originated envelopes.
pub const SERVER_SENDER: &str = "server";

/// Wire envelope: `{sender, receiver, timestamp, type, payload}`.
///
/// `payload` is kept as raw JSON so it reaches receivers byte-for-byte.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(default)]
    pub sender: String,
    #[serde(default)]
    pub receiver: String,
    /// Kept in the offset it arrived with.
    #[serde(default, with = "timestamp")]
    pub timestamp: Option<DateTime<FixedOffset>>,
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default)]
    pub payload: Option<Box<RawValue>>,
}

impl Envelope {
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            sender: sender.into(),
            receiver: receiver.into(),
            kind: kind.into(),
            ..Self::default()
        }
    }

    /// Attach a payload serialized from `value`.
    pub fn with_payload<T: Serialize>(mut self, value: &T) -> Result<Self, serde_json::Error> {
        self.payload = Some(serde_json::value::to_raw_value(value)?);
        Ok(self)
    }

    pub fn at<Tz: TimeZone>(mut self, timestamp: DateTime<Tz>) -> Self {
        self.timestamp = Some(timestamp.fixed_offset());
        self
    }

    /// `""` and `"*"` both address every connection.
    pub fn is_broadcast(&self) -> bool {
        self.receiver.is_empty() || self.receiver == BROADCAST
    }

    pub fn is_addressed_to(&self, id: &ClientId) -> bool {
        self.is_broadcast() || self.receiver == id.as_str()
    }

    /// Fill in a missing timestamp.
    pub fn stamp_time<Tz: TimeZone>(&mut self, now: DateTime<Tz>) {
        if self.timestamp.is_none() {
            self.timestamp = Some(now.fixed_offset());
        }
    }

    /// Fill in a missing timestamp and sender, as the inbound relay does.
    pub fn stamp<Tz: TimeZone>(&mut self, sender: &ClientId, now: DateTime<Tz>) {
        self.stamp_time(now);
        if self.sender.is_empty() {
            self.sender = sender.as_str().to_owned();
        }
    }

    /// Raw payload text, `None` when absent.
    pub fn payload_str(&self) -> Option<&str> {
        self.payload.as_deref().map(RawValue::get)
    }
}

/// RFC 3339 timestamps where `null`, `""` and the year-1 zero instant all mean "absent".
mod timestamp {
    use super::{DateTime, Datelike, FixedOffset, SecondsFormat};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<DateTime<FixedOffset>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::AutoSi, true)),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<DateTime<FixedOffset>>, D::Error> {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        let Some(raw) = raw.filter(|s| !s.trim().is_empty()) else {
            return Ok(None);
        };
        let parsed =
            DateTime::parse_from_rfc3339(raw.trim()).map_err(serde::de::Error::custom)?;
        if parsed.year() <= 1 {
            return Ok(None);
        }
        Ok(Some(parsed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    #[test]
    fn decodes_full_envelope() {
        let raw = r#"{"sender":"a","receiver":"b","timestamp":"2026-01-02T03:04:05Z","type":"chat","payload":"hi"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.sender, "a");
        assert_eq!(env.receiver, "b");
        assert_eq!(env.kind, "chat");
        assert_eq!(env.payload_str(), Some("\"hi\""));
        assert_eq!(
            env.timestamp,
            Some(Utc.with_ymd_and_hms(2026, 1, 2, 3, 4, 5).unwrap().fixed_offset())
        );
    }

    #[test]
    fn missing_fields_default() {
        let env: Envelope = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert!(env.sender.is_empty());
        assert!(env.receiver.is_empty());
        assert!(env.timestamp.is_none());
        assert!(env.payload.is_none());
    }

    #[test]
    fn zero_and_empty_timestamps_are_absent() {
        for ts in [r#""""#, "null", r#""0001-01-01T00:00:00Z""#] {
            let raw = format!(r#"{{"type":"x","timestamp":{ts}}}"#);
            let env: Envelope = serde_json::from_str(&raw).unwrap();
            assert!(env.timestamp.is_none(), "timestamp {ts} should be absent");
        }
    }

    #[test]
    fn malformed_timestamp_is_rejected() {
        let result = serde_json::from_str::<Envelope>(r#"{"timestamp":"yesterday"}"#);
        assert!(result.is_err());
    }

    #[test]
    fn offset_timestamp_keeps_its_offset() {
        let raw = r#"{"type":"x","timestamp":"2026-06-01T10:00:00+02:00"}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        let ts = env.timestamp.unwrap();
        assert_eq!(ts.offset().local_minus_utc(), 2 * 3600);
        assert_eq!(ts, Utc.with_ymd_and_hms(2026, 6, 1, 8, 0, 0).unwrap());

        let value: Value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["timestamp"], "2026-06-01T10:00:00+02:00");
    }

    #[test]
    fn payload_bytes_are_preserved() {
        let raw = r#"{"type":"data","payload":{"z": 1,  "a":[3,2,1]}}"#;
        let env: Envelope = serde_json::from_str(raw).unwrap();
        assert_eq!(env.payload_str(), Some(r#"{"z": 1,  "a":[3,2,1]}"#));

        let out = serde_json::to_string(&env).unwrap();
        assert!(out.contains(r#""payload":{"z": 1,  "a":[3,2,1]}"#), "got: {out}");
    }

    #[test]
    fn serializes_type_and_rfc3339() {
        let env = Envelope::new("server", "*", SERVER_TICK)
            .at(Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap());
        let value: Value = serde_json::to_value(&env).unwrap();
        assert_eq!(value["type"], "server-tick");
        assert_eq!(value["timestamp"], "2026-03-01T12:00:00Z");
        assert_eq!(value["payload"], Value::Null);
    }

    #[test]
    fn broadcast_matching() {
        let alice = ClientId::new("alice");
        let bob = ClientId::new("bob");

        let all = Envelope::new("x", "", "chat");
        assert!(all.is_broadcast());
        assert!(all.is_addressed_to(&alice) && all.is_addressed_to(&bob));

        let star = Envelope::new("x", BROADCAST, "chat");
        assert!(star.is_addressed_to(&alice) && star.is_addressed_to(&bob));

        let direct = Envelope::new("x", "bob", "chat");
        assert!(!direct.is_broadcast());
        assert!(direct.is_addressed_to(&bob));
        assert!(!direct.is_addressed_to(&alice));
    }

    #[test]
    fn stamp_fills_only_missing_fields() {
        let now = Utc.with_ymd_and_hms(2026, 5, 5, 5, 5, 5).unwrap();
        let earlier = Utc.with_ymd_and_hms(2020, 1, 1, 0, 0, 0).unwrap();

        let mut blank = Envelope::new("", "bob", "chat");
        blank.stamp(&ClientId::new("alice"), now);
        assert_eq!(blank.sender, "alice");
        assert_eq!(blank.timestamp, Some(now.fixed_offset()));

        let mut filled = Envelope::new("mallory", "bob", "chat").at(earlier);
        filled.stamp(&ClientId::new("alice"), now);
        assert_eq!(filled.sender, "mallory");
        assert_eq!(filled.timestamp, Some(earlier.fixed_offset()));
    }

    #[test]
    fn with_payload_serializes_value() {
        let env = Envelope::new("server", "*", SERVER_TICK)
            .with_payload(&json!({"message": "server tick #1"}))
            .unwrap();
        let payload: Value = serde_json::from_str(env.payload_str().unwrap()).unwrap();
        assert_eq!(payload["message"], "server tick #1");
    }
}
