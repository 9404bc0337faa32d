//! Broker bindings behind the [`Manager`](super::Manager).
//!
//! A transport is already bound to one queue when it is handed to a
//! manager. It only moves bytes; schema handling stays in the manager.

pub mod amqp;
pub mod memory;

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::QueueError;

pub use amqp::{AmqpTransport, ConnectionTarget};
pub use memory::{MemoryBroker, MemoryTransport};

/// Queue, service and exchange a transport was opened for.
#[derive(Debug, Clone)]
pub struct Binding {
    pub queue: super::QueueName,
    pub service: String,
    /// Empty for the broker's default exchange
    pub exchange: String,
}

impl Binding {
    pub fn new(
        queue: super::QueueName,
        service: impl Into<String>,
        exchange: impl Into<String>,
    ) -> Self {
        Self {
            queue,
            service: service.into(),
            exchange: exchange.into(),
        }
    }
}

/// One raw message pulled from a queue.
pub struct RawDelivery {
    pub data: Vec<u8>,
    pub message_id: Option<String>,
    pub redelivered: bool,
    pub acker: Box<dyn Acknowledge>,
}

/// Settles a single delivery with the broker.
#[async_trait]
pub trait Acknowledge: Send + Sync {
    async fn ack(&self) -> Result<(), QueueError>;

    /// Negative acknowledgement. Without requeue the broker drops or
    /// dead-letters the message.
    async fn nack(&self, requeue: bool) -> Result<(), QueueError>;
}

/// Byte-level access to one bound queue.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn binding(&self) -> &Binding;

    async fn publish(&self, body: Vec<u8>, message_id: &str) -> Result<(), QueueError>;

    /// Wait for the next message. Returns [`QueueError::ChannelClosed`] once
    /// the transport has been closed, including when the close happens while
    /// waiting.
    async fn receive(&self) -> Result<RawDelivery, QueueError>;

    /// Release the channel. Calling it again is a no-op.
    async fn close(&self) -> Result<(), QueueError>;

    fn is_closed(&self) -> bool;
}

/// Resolves once the closed flag flips to true or its sender is dropped.
pub(crate) async fn wait_closed(mut closed: watch::Receiver<bool>) {
    while !*closed.borrow_and_update() {
        if closed.changed().await.is_err() {
            return;
        }
    }
}
