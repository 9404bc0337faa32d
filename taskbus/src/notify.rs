//! Failure notifications sent through the email queue.
//!
//! Each variant carries its parameters by name, so a report can't be built
//! with arguments in the wrong slot.

use crate::queue::EmailSend;

/// Default recipient for system failure reports.
pub const ADMIN_EMAIL: &str = "temporal.reports@rtradetechnologies.com";

/// Content type used for every notification body.
pub const NOTIFICATION_CONTENT_TYPE: &str = "text/plain";

/// A failure report with its subject and body.
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    PinFailed {
        cid: String,
        network_name: String,
        reason: String,
    },
    FileAddFailed {
        object_name: String,
        network_name: String,
    },
    PrivateNetworkUnauthorized {
        network_name: String,
        user_name: String,
    },
    IpfsInitializationFailed {
        network_name: String,
        reason: String,
    },
    IpnsEntryFailed {
        cid: String,
        key: String,
        reason: String,
    },
    PaymentConfirmationFailed {
        content_hash: String,
        error: String,
    },
}

impl Notification {
    pub fn subject(&self) -> &'static str {
        match self {
            Notification::PinFailed { .. } => "IPFS Pin Failed",
            Notification::FileAddFailed { .. } => "IPFS File Add Failed",
            Notification::PrivateNetworkUnauthorized { .. } => {
                "Unauthorized access to IPFS private network"
            }
            Notification::IpfsInitializationFailed { .. } => "Connection to IPFS failed",
            Notification::IpnsEntryFailed { .. } => "IPNS Entry Creation Failed",
            Notification::PaymentConfirmationFailed { .. } => "Payment Confirmation Failed",
        }
    }

    pub fn content(&self) -> String {
        match self {
            Notification::PinFailed {
                cid,
                network_name,
                reason,
            } => format!(
                "Pin failed for content hash {cid} on IPFS network {network_name}, for reason {reason}"
            ),
            Notification::FileAddFailed {
                object_name,
                network_name,
            } => format!(
                "IPFS File Add Failed for object name {object_name} on IPFS network {network_name}"
            ),
            Notification::PrivateNetworkUnauthorized {
                network_name,
                user_name,
            } => format!("User {user_name} is not authorized to access IPFS network {network_name}"),
            Notification::IpfsInitializationFailed {
                network_name,
                reason,
            } => format!("Connection to IPFS network {network_name} failed for reason {reason}"),
            Notification::IpnsEntryFailed { cid, key, reason } => format!(
                "IPNS Entry creation failed for content hash {cid} using key {key} for reason {reason}"
            ),
            Notification::PaymentConfirmationFailed {
                content_hash,
                error,
            } => format!("Payment failed for content hash {content_hash} with error {error}"),
        }
    }

    /// Address the report to platform users.
    pub fn to_email(&self, user_names: Vec<String>) -> EmailSend {
        EmailSend::new(
            self.subject(),
            self.content(),
            NOTIFICATION_CONTENT_TYPE,
            user_names,
        )
    }

    /// Address the report to the administrative mailbox.
    pub fn to_admin_email(&self) -> EmailSend {
        self.to_admin(ADMIN_EMAIL)
    }

    /// Address the report to an explicit admin address.
    pub fn to_admin(&self, address: &str) -> EmailSend {
        self.to_email(Vec::new())
            .with_emails(vec![address.to_string()])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pin_failed_template() {
        let notification = Notification::PinFailed {
            cid: "QmHash".to_string(),
            network_name: "public".to_string(),
            reason: "timeout".to_string(),
        };

        assert_eq!(notification.subject(), "IPFS Pin Failed");
        assert_eq!(
            notification.content(),
            "Pin failed for content hash QmHash on IPFS network public, for reason timeout"
        );
    }

    #[test]
    fn test_file_add_failed_template() {
        let notification = Notification::FileAddFailed {
            object_name: "obj-1".to_string(),
            network_name: "private-1".to_string(),
        };

        assert_eq!(
            notification.content(),
            "IPFS File Add Failed for object name obj-1 on IPFS network private-1"
        );
    }

    #[test]
    fn test_ipns_and_payment_templates() {
        let ipns = Notification::IpnsEntryFailed {
            cid: "QmName".to_string(),
            key: "alice-key".to_string(),
            reason: "key not found".to_string(),
        };
        assert_eq!(ipns.subject(), "IPNS Entry Creation Failed");
        assert_eq!(
            ipns.content(),
            "IPNS Entry creation failed for content hash QmName using key alice-key for reason key not found"
        );

        let payment = Notification::PaymentConfirmationFailed {
            content_hash: "0xabc".to_string(),
            error: "insufficient confirmations".to_string(),
        };
        assert_eq!(payment.subject(), "Payment Confirmation Failed");
        assert_eq!(
            payment.content(),
            "Payment failed for content hash 0xabc with error insufficient confirmations"
        );
    }

    #[test]
    fn test_connection_subjects() {
        let unauthorized = Notification::PrivateNetworkUnauthorized {
            network_name: "private-1".to_string(),
            user_name: "mallory".to_string(),
        };
        assert_eq!(
            unauthorized.subject(),
            "Unauthorized access to IPFS private network"
        );

        let init = Notification::IpfsInitializationFailed {
            network_name: "public".to_string(),
            reason: "connection refused".to_string(),
        };
        assert_eq!(init.subject(), "Connection to IPFS failed");
    }

    #[test]
    fn test_admin_email() {
        let email = Notification::PinFailed {
            cid: "QmHash".to_string(),
            network_name: "public".to_string(),
            reason: "timeout".to_string(),
        }
        .to_admin_email();

        assert_eq!(email.subject, "IPFS Pin Failed");
        assert_eq!(email.content_type, NOTIFICATION_CONTENT_TYPE);
        assert!(email.user_names.is_empty());
        assert_eq!(email.emails, vec![ADMIN_EMAIL.to_string()]);
    }

    #[test]
    fn test_user_email() {
        let email = Notification::FileAddFailed {
            object_name: "obj".to_string(),
            network_name: "public".to_string(),
        }
        .to_email(vec!["alice".to_string()]);

        assert_eq!(email.user_names, vec!["alice"]);
        assert!(email.emails.is_empty());
    }
}
