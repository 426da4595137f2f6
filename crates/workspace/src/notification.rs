//! User-visible notifications.

use serde::Serialize;
use std::fmt;
use tokio::sync::broadcast;

use settings::constants::notifications::CHANNEL_CAPACITY;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Error,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Error => "error",
        })
    }
}

/// A message for whoever presents the workspace to the user.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct Notification {
    pub level: NotificationLevel,
    pub message: String,
}

impl Notification {
    pub fn error(message: impl Into<String>) -> Self {
        Self {
            level: NotificationLevel::Error,
            message: message.into(),
        }
    }
}

/// Fan-out sender. Sending never blocks; with no listener the message is dropped.
#[derive(Clone)]
pub(crate) struct Notifier {
    tx: broadcast::Sender<Notification>,
}

impl Notifier {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { tx }
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    pub(crate) fn send(&self, notification: Notification) {
        if self.tx.send(notification).is_err() {
            tracing::trace!("Notification dropped, no listeners");
        }
    }
}
