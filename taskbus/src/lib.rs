//! Taskbus - message contracts for the storage platform task bus.
//!
//! This library provides what producers and consumers share:
//! - `queue`: the queue catalogue, one schema per queue and the `Manager` handle
//! - `consumer`: the consume loop domain workers plug a `Handler` into
//! - `notify`: failure report templates delivered over the email queue
//!
//! ## Architecture
//!
//! ```text
//! Producer → Manager::publish → RabbitMQ queue → Manager::consume → Handler
//! ```

pub mod config;
pub mod consumer;
pub mod error;
pub mod notify;
pub mod queue;

// Re-export commonly used types
pub use config::Config;
pub use consumer::{run_consumer, ConsumerStats, Handler, HandlerError};
pub use error::QueueError;
pub use notify::{Notification, ADMIN_EMAIL};
pub use queue::{
    AmqpManager, ConnectionTarget, Consumer, Delivery, Manager, MemoryBroker, QueueMessage,
    QueueName, WireRecord,
};
