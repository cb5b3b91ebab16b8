//! Clipboard change monitor
//!
//! Polls the clipboard while at least one [`ClipboardSubscription`] is
//! alive. The first subscriber starts the poll task and dropping the last
//! one stops it.

use crate::broker::ClipboardBackend;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// A detected clipboard change
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ClipboardChange {
    pub content: String,
    /// Milliseconds since the unix epoch
    pub timestamp: i64,
}

struct MonitorState {
    subscribers: usize,
    task: Option<JoinHandle<()>>,
}

struct Shared {
    backend: Arc<dyn ClipboardBackend>,
    interval: Duration,
    changes: broadcast::Sender<ClipboardChange>,
    state: Mutex<MonitorState>,
}

/// Reference-counted clipboard poller
#[derive(Clone)]
pub struct ClipboardMonitor {
    shared: Arc<Shared>,
}

impl ClipboardMonitor {
    pub fn new(backend: Arc<dyn ClipboardBackend>, interval: Duration) -> Self {
        let (changes, _) = broadcast::channel(16);
        Self {
            shared: Arc::new(Shared {
                backend,
                interval,
                changes,
                state: Mutex::new(MonitorState {
                    subscribers: 0,
                    task: None,
                }),
            }),
        }
    }

    /// Start receiving changes; must be called from within a tokio runtime
    pub fn subscribe(&self) -> ClipboardSubscription {
        let receiver = self.shared.changes.subscribe();
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.subscribers += 1;
        if state.task.is_none() {
            tracing::debug!(interval_ms = self.shared.interval.as_millis() as u64, "Starting clipboard monitor");
            state.task = Some(tokio::spawn(poll(
                Arc::clone(&self.shared.backend),
                self.shared.interval,
                self.shared.changes.clone(),
            )));
        }
        ClipboardSubscription {
            receiver,
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .subscribers
    }

    pub fn is_running(&self) -> bool {
        self.shared
            .state
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .task
            .is_some()
    }
}

impl std::fmt::Debug for ClipboardMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClipboardMonitor")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Live subscription; unsubscribes when dropped
pub struct ClipboardSubscription {
    receiver: broadcast::Receiver<ClipboardChange>,
    shared: Arc<Shared>,
}

impl ClipboardSubscription {
    /// Next change; `None` once the monitor is gone
    pub async fn recv(&mut self) -> Option<ClipboardChange> {
        loop {
            match self.receiver.recv().await {
                Ok(change) => return Some(change),
                Err(broadcast::error::RecvError::Lagged(skipped)) => {
                    tracing::debug!(skipped, "Clipboard subscriber lagged");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }
}

impl Drop for ClipboardSubscription {
    fn drop(&mut self) {
        let mut state = self.shared.state.lock().unwrap_or_else(|e| e.into_inner());
        state.subscribers = state.subscribers.saturating_sub(1);
        if state.subscribers == 0 {
            if let Some(task) = state.task.take() {
                task.abort();
                tracing::debug!("Stopped clipboard monitor");
            }
        }
    }
}

async fn poll(
    backend: Arc<dyn ClipboardBackend>,
    interval: Duration,
    changes: broadcast::Sender<ClipboardChange>,
) {
    let mut last = backend.read_text().ok().flatten().unwrap_or_default();
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        ticker.tick().await;
        let current = match backend.read_text() {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(e) => {
                tracing::debug!(error = %e, "Clipboard read failed");
                continue;
            }
        };
        if current.is_empty() || current == last {
            continue;
        }
        last = current.clone();
        let _ = changes.send(ClipboardChange {
            content: current,
            timestamp: chrono::Utc::now().timestamp_millis(),
        });
    }
}
