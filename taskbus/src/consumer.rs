//! Consume loop shared by every worker on the bus.
//!
//! [`run_consumer`] pulls records from a [`Manager`], hands each one to a
//! [`Handler`] and settles the delivery with the broker according to the
//! handler's result. It does not retry on its own: a handler that wants a
//! second attempt returns [`HandlerError::Retry`] and the broker redelivers.

use std::future::Future;

use async_trait::async_trait;
use thiserror::Error;
use tracing::{error, info, warn};

use crate::error::QueueError;
use crate::queue::{Manager, QueueMessage, Transport};

/// Outcome of a failed handler call.
#[derive(Debug, Error)]
pub enum HandlerError {
    /// Put the message back on the queue.
    #[error("retryable failure: {0}")]
    Retry(String),

    /// Drop (or dead-letter) the message.
    #[error("permanent failure: {0}")]
    Reject(String),
}

/// Domain logic for one record type.
#[async_trait]
pub trait Handler<M: QueueMessage>: Send + Sync {
    async fn handle(&self, message: &M) -> Result<(), HandlerError>;
}

/// Counters reported when the loop exits.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ConsumerStats {
    pub acked: usize,
    pub requeued: usize,
    pub rejected: usize,
    pub decode_failures: usize,
}

/// Run `handler` over every record on the manager's queue.
///
/// Returns `Ok` when the channel closes, whether before the first message or
/// mid-loop, or when `shutdown` resolves; in the latter case the manager is
/// closed first. Decode and acknowledgement failures are logged and skipped,
/// and a delivery only counts towards the stats once the broker accepted its
/// ack or nack. Connection-level failures end the loop with an error.
pub async fn run_consumer<T, M, H, S>(
    manager: &Manager<T>,
    handler: &H,
    shutdown: S,
) -> Result<ConsumerStats, QueueError>
where
    T: Transport,
    M: QueueMessage,
    H: Handler<M>,
    S: Future<Output = ()>,
{
    let queue = manager.queue();
    let mut stats = ConsumerStats::default();
    let mut consumer = match manager.consume::<M>() {
        Ok(consumer) => consumer,
        Err(QueueError::ChannelClosed) => {
            warn!(queue = %queue, "consumer_channel_closed");
            return Ok(stats);
        }
        Err(e) => return Err(e),
    };

    tokio::pin!(shutdown);

    info!(queue = %queue, record = M::RECORD, "consumer_ready");

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!(queue = %queue, "consumer_stopping");
                manager.close().await?;
                break;
            }
            delivery = consumer.next() => {
                let delivery = match delivery {
                    Ok(delivery) => delivery,
                    Err(QueueError::ChannelClosed) => {
                        warn!(queue = %queue, "consumer_channel_closed");
                        break;
                    }
                    Err(e) if e.is_message_local() => {
                        stats.decode_failures += 1;
                        continue;
                    }
                    Err(e) => {
                        error!(queue = %queue, error = %e, "consumer_failed");
                        return Err(e);
                    }
                };

                let message_id = delivery
                    .message_id
                    .clone()
                    .unwrap_or_else(|| "unknown".to_string());

                let (settled, counter) = match handler.handle(&delivery.message).await {
                    Ok(()) => (delivery.ack().await, &mut stats.acked),
                    Err(HandlerError::Retry(reason)) => {
                        warn!(queue = %queue, message_id = %message_id, reason = %reason, "consumer_message_requeued");
                        (delivery.nack(true).await, &mut stats.requeued)
                    }
                    Err(HandlerError::Reject(reason)) => {
                        error!(queue = %queue, message_id = %message_id, reason = %reason, "consumer_message_rejected");
                        (delivery.nack(false).await, &mut stats.rejected)
                    }
                };

                match settled {
                    Ok(()) => {
                        *counter += 1;
                        info!(queue = %queue, message_id = %message_id, "consumer_message_settled");
                    }
                    Err(e) => error!(queue = %queue, message_id = %message_id, error = %e, "consumer_ack_failed"),
                }
            }
        }
    }

    info!(
        queue = %queue,
        acked = stats.acked,
        requeued = stats.requeued,
        rejected = stats.rejected,
        decode_failures = stats.decode_failures,
        "consumer_shutdown_complete"
    );

    Ok(stats)
}
