//! Wire types: the persisted [`Event`] and the [`RetryEnvelope`] that carries
//! failed records across the retry and dead-letter topics.

use chrono::{DateTime, Utc};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::value::RawValue;
use serde_json::{Map, Value};

/// A user event as produced upstream and persisted by the pipeline.
///
/// All four fields are required; serde rejects missing or null values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Opaque identifier, not unique at the store level
    pub event_id: String,
    /// Open-ended category, e.g. `login`
    pub event_type: String,
    /// When the event happened (ISO-8601 on the wire)
    pub timestamp: DateTime<Utc>,
    /// Arbitrary key-value payload
    pub payload: Map<String, Value>,
}

/// The record carried inside an envelope.
///
/// A `Document` holds the upstream JSON text exactly as received, event-shaped
/// or not, and is written back out byte for byte. `Raw` is the best-effort
/// text of a record that was not a JSON document; on the wire it is a JSON
/// string.
#[derive(Debug, Clone)]
pub enum OriginalMessage {
    /// Undecodable input, kept as text
    Raw(String),
    /// JSON input, kept verbatim
    Document(Box<RawValue>),
}

impl OriginalMessage {
    /// Best-effort text for input that could not be decoded as UTF-8 or JSON.
    pub fn raw_from_bytes(bytes: &[u8]) -> Self {
        OriginalMessage::Raw(String::from_utf8_lossy(bytes).into_owned())
    }

    /// Validate `text` as JSON and keep it verbatim, minus surrounding
    /// whitespace.
    ///
    /// A bare JSON string becomes `Raw`, which is how it reads back from an
    /// envelope.
    pub fn document(text: &str) -> Result<Self, serde_json::Error> {
        let raw = RawValue::from_string(text.trim().to_string())?;
        Self::from_raw(raw)
    }

    fn from_raw(raw: Box<RawValue>) -> Result<Self, serde_json::Error> {
        if raw.get().starts_with('"') {
            Ok(OriginalMessage::Raw(serde_json::from_str(raw.get())?))
        } else {
            Ok(OriginalMessage::Document(raw))
        }
    }

    /// JSON text of the message as it appears inside an envelope.
    pub fn to_json(&self) -> String {
        match self {
            OriginalMessage::Document(raw) => raw.get().to_string(),
            OriginalMessage::Raw(text) => Value::String(text.clone()).to_string(),
        }
    }

    /// Attempt to read an [`Event`] out of the carried message.
    pub fn to_event(&self) -> Result<Event, String> {
        match self {
            OriginalMessage::Document(raw) => {
                serde_json::from_str(raw.get()).map_err(|e| format!("Invalid event: {}", e))
            }
            OriginalMessage::Raw(_) => Err("Invalid event: original message is not JSON".into()),
        }
    }
}

impl PartialEq for OriginalMessage {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (OriginalMessage::Raw(a), OriginalMessage::Raw(b)) => a == b,
            (OriginalMessage::Document(a), OriginalMessage::Document(b)) => a.get() == b.get(),
            _ => false,
        }
    }
}

impl Serialize for OriginalMessage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            OriginalMessage::Raw(text) => serializer.serialize_str(text),
            OriginalMessage::Document(raw) => raw.serialize(serializer),
        }
    }
}

impl<'de> Deserialize<'de> for OriginalMessage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = Box::<RawValue>::deserialize(deserializer)?;
        Self::from_raw(raw).map_err(D::Error::custom)
    }
}

/// Envelope published to the retry and dead-letter topics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RetryEnvelope {
    /// The record that failed, unchanged
    pub original_message: OriginalMessage,
    /// Number of times the record has entered the retry path
    pub retry_count: u32,
    /// Description of the most recent failure
    pub error: String,
    /// Epoch milliseconds of the failure that produced this envelope
    pub timestamp: i64,
}

impl RetryEnvelope {
    /// Create an envelope stamped with the current time.
    pub fn new(
        original_message: OriginalMessage,
        retry_count: u32,
        error: impl Into<String>,
    ) -> Self {
        Self {
            original_message,
            retry_count,
            error: error.into(),
            timestamp: Utc::now().timestamp_millis(),
        }
    }

    /// Decode an envelope from raw record bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }

    /// Encode the envelope as UTF-8 JSON.
    pub fn to_vec(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    // Keys deliberately out of alphabetical order.
    const LOGIN_EVENT: &str = r#"{"eventType":"login","eventId":"e1","timestamp":"2024-01-01T00:00:00Z","payload":{"z":1,"a":2}}"#;

    fn event(value: Value) -> Result<Event, serde_json::Error> {
        serde_json::from_value(value)
    }

    fn login_value() -> Value {
        json!({
            "eventId": "e1",
            "eventType": "login",
            "timestamp": "2024-01-01T00:00:00Z",
            "payload": {"userId": "u1"}
        })
    }

    #[test]
    fn test_event_from_json() {
        let event = event(login_value()).unwrap();
        assert_eq!(event.event_id, "e1");
        assert_eq!(event.event_type, "login");
        assert_eq!(event.timestamp.to_rfc3339(), "2024-01-01T00:00:00+00:00");
        assert_eq!(event.payload.get("userId"), Some(&json!("u1")));
    }

    #[test]
    fn test_event_requires_all_fields() {
        let mut doc = login_value();
        doc.as_object_mut().unwrap().remove("eventType");
        assert!(event(doc).is_err());

        let mut doc = login_value();
        doc["payload"] = Value::Null;
        assert!(event(doc).is_err());

        let mut doc = login_value();
        doc["timestamp"] = json!("yesterday");
        assert!(event(doc).is_err());
    }

    #[test]
    fn test_event_serializes_camel_case() {
        let value = serde_json::to_value(event(login_value()).unwrap()).unwrap();
        assert_eq!(value, login_value());
    }

    #[test]
    fn test_envelope_keeps_document_bytes() {
        let envelope = RetryEnvelope {
            original_message: OriginalMessage::document(LOGIN_EVENT).unwrap(),
            retry_count: 2,
            error: "store unavailable".into(),
            timestamp: 1_704_067_200_000,
        };

        let wire = String::from_utf8(envelope.to_vec().unwrap()).unwrap();
        assert_eq!(
            wire,
            format!(
                r#"{{"originalMessage":{},"retryCount":2,"error":"store unavailable","timestamp":1704067200000}}"#,
                LOGIN_EVENT
            )
        );

        let decoded = RetryEnvelope::from_slice(wire.as_bytes()).unwrap();
        assert_eq!(decoded.original_message.to_json(), LOGIN_EVENT);
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_raw_original_message_is_a_json_string() {
        let envelope = RetryEnvelope::new(OriginalMessage::Raw("not-json".into()), 1, "bad");
        let value: Value = serde_json::from_slice(&envelope.to_vec().unwrap()).unwrap();
        assert_eq!(value["originalMessage"], json!("not-json"));

        let decoded = RetryEnvelope::from_slice(&envelope.to_vec().unwrap()).unwrap();
        assert_eq!(decoded.original_message, OriginalMessage::Raw("not-json".into()));
    }

    #[test]
    fn test_json_string_document_reads_as_raw() {
        let msg = OriginalMessage::document(r#""hello""#).unwrap();
        assert_eq!(msg, OriginalMessage::Raw("hello".into()));
        assert_eq!(msg.to_json(), r#""hello""#);
        assert!(OriginalMessage::document("not-json").is_err());
    }

    #[test]
    fn test_envelope_rejects_negative_retry_count() {
        let bytes = br#"{"originalMessage":"x","retryCount":-1,"error":"e","timestamp":0}"#;
        assert!(RetryEnvelope::from_slice(bytes).is_err());
    }

    #[test]
    fn test_original_message_to_event() {
        let login = OriginalMessage::document(LOGIN_EVENT).unwrap();
        assert_eq!(login.to_event().unwrap().payload.len(), 2);
        assert!(OriginalMessage::Raw("{}".into()).to_event().is_err());
        assert!(OriginalMessage::document(r#"{"eventId": "e1"}"#)
            .unwrap()
            .to_event()
            .is_err());
    }

    #[test]
    fn test_raw_from_invalid_utf8() {
        let msg = OriginalMessage::raw_from_bytes(&[0x66, 0x6f, 0xff]);
        assert_eq!(msg, OriginalMessage::Raw("fo\u{fffd}".into()));
    }
}
