//! JSON wire codec shared by every record on the bus.

use serde::{de::DeserializeOwned, Deserialize, Deserializer, Serialize};
use sha2::{Digest, Sha256};

use super::names::QueueName;
use crate::error::QueueError;

/// A record with a canonical JSON encoding.
///
/// Field names are the wire contract. `decode(encode(r)) == r` holds for
/// every record.
pub trait WireRecord: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Schema name used in errors and logs.
    const RECORD: &'static str;

    fn encode(&self) -> Result<Vec<u8>, QueueError> {
        serde_json::to_vec(self).map_err(|source| QueueError::Encode {
            record: Self::RECORD,
            source,
        })
    }

    fn decode(bytes: &[u8]) -> Result<Self, QueueError> {
        serde_json::from_slice(bytes).map_err(|source| QueueError::Decode {
            record: Self::RECORD,
            source,
        })
    }

    /// User the work is billed to, when the schema names one.
    fn user_name(&self) -> Option<&str> {
        None
    }

    fn network_name(&self) -> Option<&str> {
        None
    }

    fn credit_cost(&self) -> Option<f64> {
        None
    }
}

/// A record bound to exactly one queue of the catalogue.
pub trait QueueMessage: WireRecord {
    const QUEUE: QueueName;
}

/// Fingerprint of an encoded body: the first 32 hex chars of its SHA-256.
///
/// Identical payloads share a fingerprint.
pub fn payload_fingerprint(body: &[u8]) -> String {
    let digest = Sha256::digest(body);
    let mut fingerprint = hex::encode(digest);
    fingerprint.truncate(32);
    fingerprint
}

/// Message id for one publish of an encoded body.
///
/// The payload fingerprint followed by a random 64-bit suffix, so two
/// publishes of the same payload never share an id while duplicates stay
/// easy to spot in the logs by their common prefix.
pub fn message_id(body: &[u8]) -> String {
    format!("{}-{:016x}", payload_fingerprint(body), rand::random::<u64>())
}

/// Deserializes JSON `null` as the field type's empty value.
///
/// Producers that encode a nil list or map send `null` rather than `[]` or
/// `{}`. The field itself stays required.
pub(crate) fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

/// `std::time::Duration` as integer nanoseconds.
pub(crate) mod duration_nanos {
    use std::time::Duration;

    use serde::{de::Error as _, ser::Error as _, Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        let nanos = i64::try_from(value.as_nanos())
            .map_err(|_| S::Error::custom("duration exceeds i64 nanoseconds"))?;
        serializer.serialize_i64(nanos)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let nanos = i64::deserialize(deserializer)?;
        let nanos = u64::try_from(nanos).map_err(|_| D::Error::custom("negative duration"))?;
        Ok(Duration::from_nanos(nanos))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_fingerprint_is_stable() {
        let a = payload_fingerprint(br#"{"cid":"Qm123"}"#);
        let b = payload_fingerprint(br#"{"cid":"Qm123"}"#);
        let c = payload_fingerprint(br#"{"cid":"Qm124"}"#);

        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_eq!(a.len(), 32);
        assert!(a.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[test]
    fn test_message_id_is_unique_per_publish() {
        let body = br#"{"cid":"Qm123"}"#;
        let a = message_id(body);
        let b = message_id(body);

        assert_ne!(a, b);
        assert_eq!(a.len(), 32 + 1 + 16);

        let (prefix, suffix) = a.split_once('-').unwrap();
        assert_eq!(prefix, payload_fingerprint(body));
        assert!(b.starts_with(prefix));
        assert_eq!(suffix.len(), 16);
        assert!(suffix.chars().all(|ch| ch.is_ascii_hexdigit()));
    }

    #[derive(Debug, Deserialize)]
    struct Lists {
        #[serde(deserialize_with = "null_as_default")]
        names: Vec<String>,
    }

    #[test]
    fn test_null_as_default() {
        let null: Lists = serde_json::from_str(r#"{"names":null}"#).unwrap();
        assert!(null.names.is_empty());

        let set: Lists = serde_json::from_str(r#"{"names":["a"]}"#).unwrap();
        assert_eq!(set.names, vec!["a"]);

        // Still required when absent
        assert!(serde_json::from_str::<Lists>("{}").is_err());
    }
}
