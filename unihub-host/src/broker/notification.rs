//! Desktop notification sinks

use std::sync::Mutex;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Notification failed: {0}")]
pub struct NotifyError(pub String);

/// Delivers user-visible notifications
pub trait Notifier: Send + Sync {
    fn notify(&self, plugin_id: &str, title: &str, body: &str) -> Result<(), NotifyError>;
}

/// Writes notifications to the log; the default for headless hosts
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, plugin_id: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        tracing::info!(plugin = %plugin_id, title = %title, body = %body, "Notification");
        Ok(())
    }
}

/// A delivered notification
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub plugin_id: String,
    pub title: String,
    pub body: String,
}

/// Records notifications for inspection in tests
#[derive(Debug, Default)]
pub struct MemoryNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl MemoryNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

impl Notifier for MemoryNotifier {
    fn notify(&self, plugin_id: &str, title: &str, body: &str) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Notification {
                plugin_id: plugin_id.to_string(),
                title: title.to_string(),
                body: body.to_string(),
            });
        Ok(())
    }
}
