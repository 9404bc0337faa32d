//! Message schemas for every queue on the bus.
//!
//! Each struct is the full payload of one queue. Serde field names are the
//! wire contract shared with producers and consumers written against the
//! same catalogue, so they must not be renamed.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::codec::{duration_nanos, null_as_default, QueueMessage, WireRecord};
use super::names::QueueName;

fn is_zero(value: &i64) -> bool {
    *value == 0
}

// =============================================================================
// Content
// =============================================================================

/// Simple content registration (`dfa-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DatabaseFileAdd {
    pub hash: String,
    pub hold_time_in_months: i64,
    pub user_name: String,
    pub network_name: String,
    pub credit_cost: f64,
}

/// Pin-by-hash request (`ipfs-pin-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfsPin {
    pub cid: String,
    pub network_name: String,
    pub user_name: String,
    pub hold_time_in_months: i64,
    pub credit_cost: f64,
}

/// Object-store backed file add (`ipfs-file-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfsFile {
    /// Address of the object store host holding the upload
    pub minio_host_ip: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub file_name: String,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub file_size: i64,
    pub bucket_name: String,
    pub object_name: String,
    pub user_name: String,
    pub network_name: String,
    /// Kept as a string on this queue only; consumers parse the literal.
    pub hold_time_in_months: String,
    pub credit_cost: f64,
    pub encrypted: bool,
}

/// Cluster-wide pin (`ipfs-cluster-add-queue`). Same shape as [`IpfsPin`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfsClusterPin {
    pub cid: String,
    pub network_name: String,
    pub user_name: String,
    pub hold_time_in_months: i64,
    pub credit_cost: f64,
}

// =============================================================================
// Naming
// =============================================================================

/// IPNS entry creation (`ipns-entry-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpnsEntry {
    pub cid: String,
    #[serde(with = "duration_nanos")]
    pub life_time: Duration,
    #[serde(with = "duration_nanos")]
    pub ttl: Duration,
    pub resolve: bool,
    pub key: String,
    pub user_name: String,
    pub network_name: String,
    pub credit_cost: f64,
}

/// String-typed variant of [`IpnsEntry`] used when republishing an existing
/// name. Not bound to a queue of its own.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpnsUpdate {
    #[serde(rename = "content_hash")]
    pub cid: String,
    pub ipns_hash: String,
    pub life_time: String,
    pub ttl: String,
    pub key: String,
    pub resolve: bool,
    pub user_name: String,
    pub network_name: String,
    pub credit_cost: f64,
}

/// Key generation (`ipfs-key-creation-queue`). Public network only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IpfsKeyCreation {
    pub user_name: String,
    pub name: String,
    #[serde(rename = "type")]
    pub key_type: String,
    pub size: i64,
    pub network_name: String,
    pub credit_cost: f64,
}

/// Naming system zone (`zone-creation-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZoneCreation {
    pub name: String,
    pub manager_key_name: String,
    pub zone_key_name: String,
    pub user_name: String,
}

/// Naming system record (`record-creation-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordCreation {
    pub zone_name: String,
    pub record_name: String,
    pub record_key_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub meta_data: HashMap<String, serde_json::Value>,
    pub user_name: String,
}

// =============================================================================
// Payments
// =============================================================================

/// Payment processing (`payment-creation-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentCreation {
    pub tx_hash: String,
    pub blockchain: String,
    pub user_name: String,
}

/// Payment confirmation (`payment-confirmation-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentConfirmation {
    pub user_name: String,
    pub payment_number: i64,
}

/// Dash payment confirmation (`dash-payment-confirmation-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DashPaymentConfirmation {
    pub user_name: String,
    pub payment_forward_id: String,
    pub payment_number: i64,
}

// =============================================================================
// Database and notifications
// =============================================================================

/// Field patch applied to one collection (`mongo-update-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MongoUpdate {
    pub database_name: String,
    pub collection_name: String,
    #[serde(deserialize_with = "null_as_default")]
    pub fields: HashMap<String, String>,
}

/// Formatted email fan-out (`email-send-queue`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailSend {
    pub subject: String,
    pub content: String,
    pub content_type: String,
    /// May arrive as `null` when only `emails` is set
    #[serde(deserialize_with = "null_as_default")]
    pub user_names: Vec<String>,
    /// Explicit addresses, used instead of user lookups when present
    #[serde(
        default,
        deserialize_with = "null_as_default",
        skip_serializing_if = "Vec::is_empty"
    )]
    pub emails: Vec<String>,
}

impl EmailSend {
    /// Create an email addressed to platform users.
    pub fn new(
        subject: impl Into<String>,
        content: impl Into<String>,
        content_type: impl Into<String>,
        user_names: Vec<String>,
    ) -> Self {
        Self {
            subject: subject.into(),
            content: content.into(),
            content_type: content_type.into(),
            user_names,
            emails: Vec::new(),
        }
    }

    pub fn with_emails(mut self, emails: Vec<String>) -> Self {
        self.emails = emails;
        self
    }
}

// =============================================================================
// Codec bindings
// =============================================================================

macro_rules! attributed {
    ($ty:ty, $record:literal) => {
        impl WireRecord for $ty {
            const RECORD: &'static str = $record;

            fn user_name(&self) -> Option<&str> {
                Some(self.user_name.as_str())
            }

            fn network_name(&self) -> Option<&str> {
                Some(self.network_name.as_str())
            }

            fn credit_cost(&self) -> Option<f64> {
                Some(self.credit_cost)
            }
        }
    };
}

attributed!(DatabaseFileAdd, "DatabaseFileAdd");
attributed!(IpfsPin, "IPFSPin");
attributed!(IpfsFile, "IPFSFile");
attributed!(IpfsClusterPin, "IPFSClusterPin");
attributed!(IpnsEntry, "IPNSEntry");
attributed!(IpnsUpdate, "IPNSUpdate");
attributed!(IpfsKeyCreation, "IPFSKeyCreation");

macro_rules! user_owned {
    ($ty:ty, $record:literal) => {
        impl WireRecord for $ty {
            const RECORD: &'static str = $record;

            fn user_name(&self) -> Option<&str> {
                Some(self.user_name.as_str())
            }
        }
    };
}

user_owned!(PaymentCreation, "PaymentCreation");
user_owned!(PaymentConfirmation, "PaymentConfirmation");
user_owned!(DashPaymentConfirmation, "DashPaymentConfirmation");
user_owned!(ZoneCreation, "ZoneCreation");
user_owned!(RecordCreation, "RecordCreation");

impl WireRecord for MongoUpdate {
    const RECORD: &'static str = "MongoUpdate";
}

impl WireRecord for EmailSend {
    const RECORD: &'static str = "EmailSend";
}

macro_rules! bind_queue {
    ($($ty:ty => $queue:ident),+ $(,)?) => {
        $(
            impl QueueMessage for $ty {
                const QUEUE: QueueName = QueueName::$queue;
            }
        )+
    };
}

bind_queue! {
    DatabaseFileAdd => DatabaseFileAdd,
    IpfsPin => IpfsPin,
    IpfsFile => IpfsFile,
    IpfsClusterPin => IpfsClusterPin,
    IpnsEntry => IpnsEntry,
    IpfsKeyCreation => IpfsKeyCreation,
    PaymentCreation => PaymentCreation,
    PaymentConfirmation => PaymentConfirmation,
    DashPaymentConfirmation => DashPaymentConfirmation,
    MongoUpdate => MongoUpdate,
    ZoneCreation => ZoneCreation,
    RecordCreation => RecordCreation,
    EmailSend => EmailSend,
}
