//! Error types for the task bus.

use thiserror::Error;

use crate::queue::QueueName;

/// Errors raised by the queue catalogue, the codecs and the [`Manager`].
///
/// [`Manager`]: crate::queue::Manager
#[derive(Debug, Error)]
pub enum QueueError {
    /// Broker unreachable, authentication refused, or queue declare/bind
    /// rejected. The handle is unusable and must be reopened.
    #[error("broker connection failed: {0}")]
    Connection(String),

    /// Channel closed or delivery rejected by the broker.
    #[error("failed to publish to {queue}: {reason}")]
    Publish { queue: QueueName, reason: String },

    /// Payload does not match the record schema.
    #[error("failed to decode {record}: {source}")]
    Decode {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },

    #[error("failed to encode {record}: {source}")]
    Encode {
        record: &'static str,
        #[source]
        source: serde_json::Error,
    },

    /// The channel backing the handle has been closed.
    #[error("channel closed")]
    ChannelClosed,

    #[error("failed to acknowledge delivery: {0}")]
    Acknowledge(String),

    /// A record was sent through a handle bound to a different queue.
    #[error("{record} belongs on {expected}, not {actual}")]
    SchemaMismatch {
        record: &'static str,
        expected: QueueName,
        actual: QueueName,
    },

    #[error("unknown queue name: {0}")]
    UnknownQueue(String),
}

impl QueueError {
    /// True when the failure concerns a single message and the consume loop
    /// should carry on with the next one.
    pub fn is_message_local(&self) -> bool {
        matches!(self, QueueError::Decode { .. } | QueueError::Acknowledge(_))
    }

    /// True when the handle has to be reopened before it can be used again.
    pub fn requires_reopen(&self) -> bool {
        matches!(
            self,
            QueueError::Connection(_) | QueueError::Publish { .. } | QueueError::ChannelClosed
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_error_is_message_local() {
        let source = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
        let err = QueueError::Decode {
            record: "IPFSPin",
            source,
        };
        assert!(err.is_message_local());
        assert!(!err.requires_reopen());
        assert!(err.to_string().starts_with("failed to decode IPFSPin"));
    }

    #[test]
    fn test_connection_level_errors_require_reopen() {
        assert!(QueueError::ChannelClosed.requires_reopen());
        assert!(QueueError::Connection("refused".into()).requires_reopen());
        assert!(QueueError::Publish {
            queue: QueueName::IpfsPin,
            reason: "nack".into()
        }
        .requires_reopen());
        assert!(!QueueError::ChannelClosed.is_message_local());
    }

    #[test]
    fn test_schema_mismatch_message() {
        let err = QueueError::SchemaMismatch {
            record: "IPFSPin",
            expected: QueueName::IpfsPin,
            actual: QueueName::EmailSend,
        };
        assert_eq!(
            err.to_string(),
            "IPFSPin belongs on ipfs-pin-queue, not email-send-queue"
        );
    }
}
