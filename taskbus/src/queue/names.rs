//! Queue catalogue.
//!
//! Every queue on the task bus is a variant of [`QueueName`]. The strings
//! returned by [`QueueName::as_str`] are the names declared on the broker and
//! are part of the wire contract: renaming one orphans every consumer still
//! bound to the old name.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::QueueError;

/// Closed set of queues known to the task bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum QueueName {
    /// Simple file adds recorded straight into the database
    DatabaseFileAdd,
    /// Pin requests against an IPFS node
    IpfsPin,
    /// Object-store backed file adds
    IpfsFile,
    /// Cluster-wide pins
    IpfsClusterPin,
    /// Outbound email notifications
    EmailSend,
    /// IPNS entry creation
    IpnsEntry,
    /// IPFS key generation
    IpfsKeyCreation,
    /// Payment processing
    PaymentCreation,
    /// Payment confirmations
    PaymentConfirmation,
    /// Dash specific payment confirmations
    DashPaymentConfirmation,
    /// Generic document field patches
    MongoUpdate,
    /// Naming system zone creation
    ZoneCreation,
    /// Naming system record creation
    RecordCreation,
}

impl QueueName {
    /// Every queue in the catalogue, in declaration order.
    pub const ALL: [QueueName; 13] = [
        QueueName::DatabaseFileAdd,
        QueueName::IpfsPin,
        QueueName::IpfsFile,
        QueueName::IpfsClusterPin,
        QueueName::EmailSend,
        QueueName::IpnsEntry,
        QueueName::IpfsKeyCreation,
        QueueName::PaymentCreation,
        QueueName::PaymentConfirmation,
        QueueName::DashPaymentConfirmation,
        QueueName::MongoUpdate,
        QueueName::ZoneCreation,
        QueueName::RecordCreation,
    ];

    /// Broker-side name of the queue.
    pub const fn as_str(&self) -> &'static str {
        match self {
            QueueName::DatabaseFileAdd => "dfa-queue",
            QueueName::IpfsPin => "ipfs-pin-queue",
            QueueName::IpfsFile => "ipfs-file-queue",
            QueueName::IpfsClusterPin => "ipfs-cluster-add-queue",
            QueueName::EmailSend => "email-send-queue",
            QueueName::IpnsEntry => "ipns-entry-queue",
            QueueName::IpfsKeyCreation => "ipfs-key-creation-queue",
            QueueName::PaymentCreation => "payment-creation-queue",
            QueueName::PaymentConfirmation => "payment-confirmation-queue",
            QueueName::DashPaymentConfirmation => "dash-payment-confirmation-queue",
            QueueName::MongoUpdate => "mongo-update-queue",
            QueueName::ZoneCreation => "zone-creation-queue",
            QueueName::RecordCreation => "record-creation-queue",
        }
    }

    /// Name of the record type carried by this queue.
    pub const fn record_name(&self) -> &'static str {
        match self {
            QueueName::DatabaseFileAdd => "DatabaseFileAdd",
            QueueName::IpfsPin => "IPFSPin",
            QueueName::IpfsFile => "IPFSFile",
            QueueName::IpfsClusterPin => "IPFSClusterPin",
            QueueName::EmailSend => "EmailSend",
            QueueName::IpnsEntry => "IPNSEntry",
            QueueName::IpfsKeyCreation => "IPFSKeyCreation",
            QueueName::PaymentCreation => "PaymentCreation",
            QueueName::PaymentConfirmation => "PaymentConfirmation",
            QueueName::DashPaymentConfirmation => "DashPaymentConfirmation",
            QueueName::MongoUpdate => "MongoUpdate",
            QueueName::ZoneCreation => "ZoneCreation",
            QueueName::RecordCreation => "RecordCreation",
        }
    }
}

impl FromStr for QueueName {
    type Err = QueueError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        QueueName::ALL
            .iter()
            .copied()
            .find(|q| q.as_str() == s)
            .ok_or_else(|| QueueError::UnknownQueue(s.to_string()))
    }
}

impl TryFrom<String> for QueueName {
    type Error = QueueError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<QueueName> for String {
    fn from(queue: QueueName) -> Self {
        queue.as_str().to_string()
    }
}

impl fmt::Display for QueueName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
