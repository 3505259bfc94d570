use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};
use ulid::Ulid;

use crate::dates::DateRange;
use crate::model::Contact;
use crate::pricing::Money;

const CHANNEL_CAPACITY: usize = 256;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationKind {
    BookingConfirmed,
    BookingRejected,
    BookingCancelledByCustomer,
    BookingCancelledByProvider,
}

impl NotificationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationKind::BookingConfirmed => "booking_confirmed",
            NotificationKind::BookingRejected => "booking_rejected",
            NotificationKind::BookingCancelledByCustomer => "booking_cancelled_by_customer",
            NotificationKind::BookingCancelledByProvider => "booking_cancelled_by_provider",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Notification {
    pub kind: NotificationKind,
    pub reservation_id: Ulid,
    pub unit_id: Ulid,
    pub unit_name: String,
    pub recipient: Contact,
    pub range: DateRange,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub fee: Option<Money>,
}

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("no notification subscribers")]
    NoSubscribers,
    #[error("transport: {0}")]
    Transport(String),
}

/// Outbound message channel. Delivery is fire-and-forget from the engine's
/// point of view: an error here never undoes a committed change.
#[async_trait]
pub trait NotificationSender: Send + Sync {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError>;
}

/// Broadcast fan-out to in-process consumers (mail relay, tests).
pub struct NotifyHub {
    sender: broadcast::Sender<Notification>,
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            sender: broadcast::channel(CHANNEL_CAPACITY).0,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    pub fn send(&self, notification: &Notification) -> Result<usize, NotifyError> {
        self.sender
            .send(notification.clone())
            .map_err(|_| NotifyError::NoSubscribers)
    }
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSender for NotifyHub {
    async fn notify(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.send(notification).map(|_| ())
    }
}

/// Drain the hub and hand each message to the mail transport. The transport
/// is external; here each message is rendered as JSON into the log.
pub async fn run_mail_relay(mut rx: broadcast::Receiver<Notification>) {
    loop {
        match rx.recv().await {
            Ok(n) => match serde_json::to_string(&n) {
                Ok(body) => info!(
                    kind = n.kind.as_str(),
                    to = n.recipient.email.as_deref().unwrap_or(&n.recipient.party_id),
                    "mail: {body}"
                ),
                Err(e) => warn!("mail relay could not render notification: {e}"),
            },
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                warn!("mail relay lagged, {skipped} notifications dropped");
            }
            Err(broadcast::error::RecvError::Closed) => break,
        }
    }
    debug!("mail relay stopped");
}
