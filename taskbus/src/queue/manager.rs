//! Producer/consumer handle for one queue.
//!
//! A [`Manager`] pairs a [`Transport`] with the schema codec: it publishes
//! [`QueueMessage`] records on the queue it was opened for and yields decoded
//! [`Delivery`] values to consumers. It owns its channel; the broker
//! connection may be shared with other managers.

use std::marker::PhantomData;
use std::sync::Arc;

use futures::Stream;
use tracing::{error, info, info_span, warn, Instrument, Span};

use super::codec::{message_id, QueueMessage};
use super::names::QueueName;
use super::transport::{
    Acknowledge, AmqpTransport, Binding, ConnectionTarget, MemoryBroker, MemoryTransport,
    Transport,
};
use crate::error::QueueError;

/// Handle bound to one queue.
pub struct Manager<T: Transport> {
    transport: Arc<T>,
    span: Span,
}

/// Manager backed by RabbitMQ.
pub type AmqpManager = Manager<AmqpTransport>;

impl Manager<AmqpTransport> {
    /// Connect to the broker, open a channel and declare `queue`.
    ///
    /// `service` identifies the owning subsystem and doubles as the consumer
    /// tag; an empty `exchange` publishes through the default exchange.
    pub async fn open(
        target: ConnectionTarget,
        queue: QueueName,
        service: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Result<Self, QueueError> {
        let binding = Binding::new(queue, service, exchange);
        let span = manager_span(&binding);
        let transport = AmqpTransport::open(target, binding)
            .instrument(span.clone())
            .await?;
        Ok(Self::with_transport(transport, span))
    }

    pub async fn set_prefetch(&self, count: u16) -> Result<(), QueueError> {
        self.transport.set_prefetch(count).instrument(self.span.clone()).await
    }

    /// Target for opening further managers on the same connection.
    pub fn share_connection(&self) -> ConnectionTarget {
        ConnectionTarget::Shared(self.transport.connection())
    }
}

impl Manager<MemoryTransport> {
    /// Bind a manager to `queue` on an in-process broker.
    pub fn open_in_memory(
        broker: &MemoryBroker,
        queue: QueueName,
        service: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        let binding = Binding::new(queue, service, exchange);
        let span = manager_span(&binding);
        Self::with_transport(broker.open(binding), span)
    }
}

fn manager_span(binding: &Binding) -> Span {
    info_span!(
        "queue_manager",
        queue = %binding.queue,
        service = %binding.service,
        exchange = %binding.exchange
    )
}

impl<T: Transport> Manager<T> {
    fn with_transport(transport: T, span: Span) -> Self {
        Self {
            transport: Arc::new(transport),
            span,
        }
    }

    /// Wrap an already bound transport.
    pub fn from_transport(transport: T) -> Self {
        let span = manager_span(transport.binding());
        Self::with_transport(transport, span)
    }

    pub fn queue(&self) -> QueueName {
        self.transport.binding().queue
    }

    pub fn service(&self) -> &str {
        &self.transport.binding().service
    }

    pub fn exchange(&self) -> &str {
        &self.transport.binding().exchange
    }

    /// Span carrying queue, service and exchange for this handle.
    pub fn span(&self) -> &Span {
        &self.span
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }

    /// Encode `record` and publish it on the bound queue.
    pub async fn publish<M: QueueMessage>(&self, record: &M) -> Result<(), QueueError> {
        let queue = self.queue();
        if M::QUEUE != queue {
            error!(
                parent: &self.span,
                record = M::RECORD,
                expected = %M::QUEUE,
                "queue_schema_mismatch"
            );
            return Err(QueueError::SchemaMismatch {
                record: M::RECORD,
                expected: M::QUEUE,
                actual: queue,
            });
        }

        let body = record.encode()?;
        let message_id = message_id(&body);
        let body_length = body.len();

        self.transport
            .publish(body, &message_id)
            .instrument(self.span.clone())
            .await?;

        info!(
            parent: &self.span,
            message_id = %message_id,
            body_length = body_length,
            "queue_message_published"
        );

        Ok(())
    }

    /// Start pulling decoded `M` records off the bound queue.
    ///
    /// Fails with [`QueueError::ChannelClosed`] once the manager is closed;
    /// a closed manager cannot be consumed again.
    pub fn consume<M: QueueMessage>(&self) -> Result<Consumer<T, M>, QueueError> {
        let queue = self.queue();
        if M::QUEUE != queue {
            return Err(QueueError::SchemaMismatch {
                record: M::RECORD,
                expected: M::QUEUE,
                actual: queue,
            });
        }
        if self.is_closed() {
            return Err(QueueError::ChannelClosed);
        }

        Ok(Consumer {
            transport: Arc::clone(&self.transport),
            span: self.span.clone(),
            _record: PhantomData,
        })
    }

    /// Release the channel, and the connection when this manager owns it.
    ///
    /// Closing twice is a no-op. Pending [`Consumer::next`] calls return
    /// [`QueueError::ChannelClosed`].
    pub async fn close(&self) -> Result<(), QueueError> {
        self.transport.close().instrument(self.span.clone()).await
    }
}

/// Lazy, unbounded sequence of deliveries from one queue.
pub struct Consumer<T: Transport, M: QueueMessage> {
    transport: Arc<T>,
    span: Span,
    _record: PhantomData<fn() -> M>,
}

impl<T: Transport, M: QueueMessage> Consumer<T, M> {
    /// Wait for the next record.
    ///
    /// A payload that does not decode is rejected without requeue and
    /// returned as [`QueueError::Decode`]; the consumer stays usable.
    /// [`QueueError::ChannelClosed`] is terminal.
    pub async fn next(&mut self) -> Result<Delivery<M>, QueueError> {
        let raw = self
            .transport
            .receive()
            .instrument(self.span.clone())
            .await?;

        let message_id = raw
            .message_id
            .clone()
            .unwrap_or_else(|| "unknown".to_string());

        info!(
            parent: &self.span,
            message_id = %message_id,
            body_length = raw.data.len(),
            redelivered = raw.redelivered,
            "queue_message_received"
        );

        match M::decode(&raw.data) {
            Ok(message) => Ok(Delivery {
                message,
                message_id: raw.message_id,
                redelivered: raw.redelivered,
                acker: raw.acker,
            }),
            Err(e) => {
                error!(
                    parent: &self.span,
                    message_id = %message_id,
                    error = %e,
                    body_preview = %String::from_utf8_lossy(&raw.data[..raw.data.len().min(500)]),
                    "queue_message_decode_failed"
                );

                if let Err(nack_err) = raw.acker.nack(false).await {
                    error!(parent: &self.span, error = %nack_err, "queue_nack_failed");
                }

                Err(e)
            }
        }
    }

    /// Adapt into a stream that ends after the channel closes.
    pub fn into_stream(self) -> impl Stream<Item = Result<Delivery<M>, QueueError>> {
        futures::stream::unfold(Some(self), |state| async move {
            let mut consumer = state?;
            match consumer.next().await {
                Err(QueueError::ChannelClosed) => {
                    warn!(parent: &consumer.span, "queue_consumer_closed");
                    None
                }
                item => Some((item, Some(consumer))),
            }
        })
    }
}

/// A decoded record together with its acknowledgement handle.
pub struct Delivery<M> {
    pub message: M,
    pub message_id: Option<String>,
    pub redelivered: bool,
    acker: Box<dyn Acknowledge>,
}

impl<M> Delivery<M> {
    /// Confirm the record was processed.
    pub async fn ack(self) -> Result<(), QueueError> {
        self.acker.ack().await
    }

    /// Refuse the record, putting it back on the queue when `requeue` is set.
    pub async fn nack(self, requeue: bool) -> Result<(), QueueError> {
        self.acker.nack(requeue).await
    }
}

impl<M: std::fmt::Debug> std::fmt::Debug for Delivery<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Delivery")
            .field("message", &self.message)
            .field("message_id", &self.message_id)
            .field("redelivered", &self.redelivered)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::types::{DatabaseFileAdd, EmailSend, IpfsPin};
    use futures::StreamExt;
    use std::time::Duration;

    fn pin(cid: &str) -> IpfsPin {
        IpfsPin {
            cid: cid.to_string(),
            network_name: "public".to_string(),
            user_name: "alice".to_string(),
            hold_time_in_months: 6,
            credit_cost: 1.5,
        }
    }

    fn pin_manager(broker: &MemoryBroker) -> Manager<MemoryTransport> {
        Manager::open_in_memory(broker, QueueName::IpfsPin, "pin-service", "")
    }

    #[tokio::test]
    async fn test_publish_and_consume() {
        let broker = MemoryBroker::new();
        let producer = pin_manager(&broker);
        let consumer_manager = pin_manager(&broker);

        producer.publish(&pin("QmA")).await.unwrap();

        let mut consumer = consumer_manager.consume::<IpfsPin>().unwrap();
        let delivery = consumer.next().await.unwrap();
        assert_eq!(delivery.message, pin("QmA"));
        assert_eq!(delivery.message_id.as_deref().map(str::len), Some(49));

        delivery.ack().await.unwrap();
        assert_eq!(broker.acked(QueueName::IpfsPin), 1);
    }

    #[tokio::test]
    async fn test_identical_publishes_get_distinct_ids() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);

        manager.publish(&pin("QmSame")).await.unwrap();
        manager.publish(&pin("QmSame")).await.unwrap();

        let mut consumer = manager.consume::<IpfsPin>().unwrap();
        let first = consumer.next().await.unwrap();
        let second = consumer.next().await.unwrap();

        let first_id = first.message_id.clone().unwrap();
        let second_id = second.message_id.clone().unwrap();
        assert_ne!(first_id, second_id);
        assert_eq!(first_id[..32], second_id[..32]);

        first.ack().await.unwrap();
        second.ack().await.unwrap();
    }

    #[tokio::test]
    async fn test_accessors_reflect_binding() {
        let broker = MemoryBroker::new();
        let manager: Manager<MemoryTransport> =
            Manager::open_in_memory(&broker, QueueName::EmailSend, "mailer", "temporal");

        assert_eq!(manager.queue(), QueueName::EmailSend);
        assert_eq!(manager.service(), "mailer");
        assert_eq!(manager.exchange(), "temporal");
        assert!(!manager.is_closed());
    }

    #[tokio::test]
    async fn test_publish_rejects_foreign_schema() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);

        let record = DatabaseFileAdd {
            hash: "Qm123".to_string(),
            hold_time_in_months: 6,
            user_name: "alice".to_string(),
            network_name: "public".to_string(),
            credit_cost: 1.5,
        };

        let err = manager.publish(&record).await.unwrap_err();
        assert!(matches!(
            err,
            QueueError::SchemaMismatch {
                expected: QueueName::DatabaseFileAdd,
                actual: QueueName::IpfsPin,
                ..
            }
        ));
        assert!(manager.consume::<EmailSend>().is_err());
    }

    #[tokio::test]
    async fn test_close_twice_is_noop() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);

        manager.close().await.unwrap();
        manager.close().await.unwrap();
        assert!(manager.is_closed());
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);
        manager.close().await.unwrap();

        let err = manager.publish(&pin("QmA")).await.unwrap_err();
        assert!(matches!(err, QueueError::Publish { queue: QueueName::IpfsPin, .. }));
        assert!(matches!(
            manager.consume::<IpfsPin>(),
            Err(QueueError::ChannelClosed)
        ));
    }

    #[tokio::test]
    async fn test_close_unblocks_pending_consume() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);
        let mut consumer = manager.consume::<IpfsPin>().unwrap();

        let pending = tokio::spawn(async move { consumer.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        manager.close().await.unwrap();

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("consume did not unblock")
            .unwrap();
        assert!(matches!(result, Err(QueueError::ChannelClosed)));
    }

    #[tokio::test]
    async fn test_external_close_unblocks_consume() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);
        let mut consumer = manager.consume::<IpfsPin>().unwrap();

        let pending = tokio::spawn(async move { consumer.next().await });
        tokio::time::sleep(Duration::from_millis(20)).await;

        broker.shutdown_queue(QueueName::IpfsPin);

        let result = tokio::time::timeout(Duration::from_secs(1), pending)
            .await
            .expect("consume did not unblock")
            .unwrap();
        assert!(matches!(result, Err(QueueError::ChannelClosed)));
        assert!(manager.is_closed());
        manager.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_malformed_payload_is_dead_lettered() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);
        let mut consumer = manager.consume::<IpfsPin>().unwrap();

        broker.publish_raw(QueueName::IpfsPin, br#"{"network_name":"public"}"#.to_vec());
        manager.publish(&pin("QmB")).await.unwrap();

        let first = consumer.next().await;
        assert!(matches!(first, Err(QueueError::Decode { record: "IPFSPin", .. })));
        assert_eq!(broker.dead_letters(QueueName::IpfsPin).len(), 1);

        let second = consumer.next().await.unwrap();
        assert_eq!(second.message.cid, "QmB");
    }

    #[tokio::test]
    async fn test_nack_with_requeue_redelivers() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);
        let mut consumer = manager.consume::<IpfsPin>().unwrap();

        manager.publish(&pin("QmC")).await.unwrap();
        consumer.next().await.unwrap().nack(true).await.unwrap();

        let again = consumer.next().await.unwrap();
        assert!(again.redelivered);
        assert_eq!(again.message.cid, "QmC");
    }

    #[tokio::test]
    async fn test_stream_ends_when_closed() {
        let broker = MemoryBroker::new();
        let manager = pin_manager(&broker);

        manager.publish(&pin("Qm1")).await.unwrap();
        manager.publish(&pin("Qm2")).await.unwrap();

        let stream = manager.consume::<IpfsPin>().unwrap().into_stream();
        tokio::pin!(stream);

        let mut seen = Vec::new();
        for _ in 0..2 {
            let delivery = stream.next().await.unwrap().unwrap();
            seen.push(delivery.message.cid.clone());
            delivery.ack().await.unwrap();
        }
        assert_eq!(seen, vec!["Qm1", "Qm2"]);

        manager.close().await.unwrap();
        assert!(stream.next().await.is_none());
    }
}
