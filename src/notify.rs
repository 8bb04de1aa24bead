//! Notifications raised by push events.

use color_eyre::Result;
use serde::Serialize;
use tracing::info;

use crate::config::NotificationConfig;

/// A user action offered on a notification
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationAction {
  pub action: String,
  pub title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
  pub title: String,
  pub body: String,
  pub icon: String,
  pub badge: String,
  pub actions: Vec<NotificationAction>,
}

/// Action id that opens the application
pub const ACTION_EXPLORE: &str = "explore";
/// Action id that dismisses the notification
pub const ACTION_CLOSE: &str = "close";

impl Notification {
  /// Build the push notification; `payload` becomes the body.
  pub fn for_push(config: &NotificationConfig, payload: Option<&str>) -> Self {
    Self {
      title: config.title.clone(),
      body: payload
        .filter(|p| !p.is_empty())
        .unwrap_or(&config.default_body)
        .to_string(),
      icon: config.icon.clone(),
      badge: config.badge.clone(),
      actions: vec![
        NotificationAction {
          action: ACTION_EXPLORE.to_string(),
          title: "Open".to_string(),
        },
        NotificationAction {
          action: ACTION_CLOSE.to_string(),
          title: "Dismiss".to_string(),
        },
      ],
    }
  }
}

/// Displays notifications on behalf of the worker
pub trait Notifier: Send + Sync {
  fn show(&self, notification: &Notification) -> Result<()>;
}

/// Writes notifications to the log
pub struct LogNotifier;

impl Notifier for LogNotifier {
  fn show(&self, notification: &Notification) -> Result<()> {
    let actions: Vec<&str> = notification
      .actions
      .iter()
      .map(|a| a.action.as_str())
      .collect();
    info!(
      title = %notification.title,
      body = %notification.body,
      icon = %notification.icon,
      actions = ?actions,
      "Notification"
    );
    Ok(())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_push_payload_becomes_body() {
    let config = NotificationConfig::default();
    let n = Notification::for_push(&config, Some("3 documents synced"));

    assert_eq!(n.title, config.title);
    assert_eq!(n.body, "3 documents synced");
    assert_eq!(n.icon, "/icon-192.png");
    assert_eq!(n.badge, "/icon-192.png");
    let actions: Vec<&str> = n.actions.iter().map(|a| a.action.as_str()).collect();
    assert_eq!(actions, vec![ACTION_EXPLORE, ACTION_CLOSE]);
  }

  #[test]
  fn test_missing_payload_uses_default_body() {
    let config = NotificationConfig::default();
    assert_eq!(Notification::for_push(&config, None).body, config.default_body);
    assert_eq!(Notification::for_push(&config, Some("")).body, config.default_body);
  }
}
