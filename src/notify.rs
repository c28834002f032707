//! Fire-and-forget user notifications (toasts).

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
  Info,
  Success,
  /// Something the user tried did not happen
  Destructive,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
  pub severity: Severity,
  pub message: String,
  pub created_at: DateTime<Utc>,
}

impl Notification {
  pub fn new(severity: Severity, message: impl Into<String>) -> Self {
    Self {
      severity,
      message: message.into(),
      created_at: Utc::now(),
    }
  }

  pub fn success(message: impl Into<String>) -> Self {
    Self::new(Severity::Success, message)
  }

  pub fn destructive(message: impl Into<String>) -> Self {
    Self::new(Severity::Destructive, message)
  }
}

/// Sink for notifications. Implementations must not block.
pub trait Notifier: Send + Sync {
  fn notify(&self, notification: Notification);
}

/// Forwards notifications to a channel read by the presentation layer.
#[derive(Clone)]
pub struct ChannelNotifier {
  tx: mpsc::UnboundedSender<Notification>,
}

impl ChannelNotifier {
  pub fn new() -> (Self, mpsc::UnboundedReceiver<Notification>) {
    let (tx, rx) = mpsc::unbounded_channel();
    (Self { tx }, rx)
  }
}

impl Notifier for ChannelNotifier {
  fn notify(&self, notification: Notification) {
    // Nobody listening is fine; notifications are best-effort.
    let _ = self.tx.send(notification);
  }
}

/// Writes notifications to the log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingNotifier;

impl Notifier for TracingNotifier {
  fn notify(&self, notification: Notification) {
    match notification.severity {
      Severity::Destructive => warn!(message = %notification.message, "notification"),
      Severity::Info | Severity::Success => info!(message = %notification.message, "notification"),
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_channel_notifier_delivers_in_order() {
    let (notifier, mut rx) = ChannelNotifier::new();
    notifier.notify(Notification::success("Item added to cart"));
    notifier.notify(Notification::destructive("Failed"));

    let first = rx.try_recv().unwrap();
    assert_eq!(first.severity, Severity::Success);
    assert_eq!(first.message, "Item added to cart");
    assert_eq!(rx.try_recv().unwrap().severity, Severity::Destructive);
  }

  #[test]
  fn test_channel_notifier_tolerates_closed_receiver() {
    let (notifier, rx) = ChannelNotifier::new();
    drop(rx);
    notifier.notify(Notification::success("ignored"));
  }
}
