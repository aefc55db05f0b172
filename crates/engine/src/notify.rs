//! User-visible notifications for completed deferred writes.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use waypost_core::AppConfig;

/// Action id that opens the results view.
pub const VIEW_ACTION: &str = "view";

const CHANNEL_CAPACITY: usize = 64;

/// A button on a notification.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct NotificationAction {
    pub action: String,
    pub title: String,
}

/// Payload shown to the user when a queued write goes through.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub tag: String,
    pub actions: Vec<NotificationAction>,
}

impl Notification {
    /// Notification for a replayed write under `tag`.
    pub fn replay_succeeded(tag: &str) -> Self {
        Self {
            title: "Your documents are ready".into(),
            body: "A request made while you were offline has been sent successfully.".into(),
            tag: tag.to_string(),
            actions: vec![NotificationAction { action: VIEW_ACTION.into(), title: "View results".into() }],
        }
    }
}

/// Fans notifications out to every subscriber and resolves clicks to the
/// URL the application should open.
#[derive(Debug, Clone)]
pub struct Notifier {
    sender: broadcast::Sender<Notification>,
    results_url: String,
    default_url: String,
}

impl Notifier {
    pub fn new(results_url: impl Into<String>, default_url: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, results_url: results_url.into(), default_url: default_url.into() }
    }

    pub fn from_config(config: &AppConfig) -> Self {
        Self::new(config.results_url.clone(), config.default_url.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.sender.subscribe()
    }

    /// Publish a notification. Having no subscribers is not an error.
    pub fn emit(&self, notification: Notification) {
        tracing::info!(tag = %notification.tag, title = %notification.title, "notification");
        let _ = self.sender.send(notification);
    }

    /// Where to open the application for a click. `view` goes to the
    /// results view; anything else, including a click on the body, goes to
    /// the default view.
    pub fn click_target(&self, action: Option<&str>) -> &str {
        match action {
            Some(VIEW_ACTION) => &self.results_url,
            _ => &self.default_url,
        }
    }
}
