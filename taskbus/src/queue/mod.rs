//! Queue module for the task bus.
//!
//! This module provides:
//! - The closed catalogue of queue names
//! - One message schema per queue with its JSON codec
//! - The [`Manager`] handle producers and consumers hold for one queue
//!
//! ## Architecture
//!
//! ```text
//! Producer → Manager::publish → broker queue → Manager::consume → Consumer → domain handler
//! ```

pub mod codec;
pub mod manager;
pub mod names;
pub mod transport;
pub mod types;

pub use codec::{message_id, payload_fingerprint, QueueMessage, WireRecord};
pub use manager::{AmqpManager, Consumer, Delivery, Manager};
pub use names::QueueName;
pub use transport::{
    AmqpTransport, Binding, ConnectionTarget, MemoryBroker, MemoryTransport, Transport,
};
pub use types::{
    DashPaymentConfirmation, DatabaseFileAdd, EmailSend, IpfsClusterPin, IpfsFile,
    IpfsKeyCreation, IpfsPin, IpnsEntry, IpnsUpdate, MongoUpdate, PaymentConfirmation,
    PaymentCreation, RecordCreation, ZoneCreation,
};
