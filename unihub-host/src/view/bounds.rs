//! Bounds update coalescing
//!
//! Resize storms from the shell are queued here and applied once the queue
//! has been quiet for the debounce period. Only the last rect per plugin
//! survives.

use super::ViewManager;
use std::collections::HashMap;
use std::sync::Weak;
use std::time::Duration;
use tokio::sync::mpsc;
use unihub_plugin_api::Rect;

pub(crate) type BoundsSender = mpsc::UnboundedSender<(String, Rect)>;

/// Start the coalescing task; it ends when the sender is dropped
pub(crate) fn spawn_coalescer(views: Weak<ViewManager>, debounce: Duration) -> BoundsSender {
    let (tx, mut rx) = mpsc::unbounded_channel::<(String, Rect)>();

    tokio::spawn(async move {
        let mut pending: HashMap<String, Rect> = HashMap::new();
        let mut deadline: Option<tokio::time::Instant> = None;

        loop {
            tokio::select! {
                update = rx.recv() => {
                    match update {
                        Some((plugin_id, rect)) => {
                            pending.insert(plugin_id, rect);
                            deadline = Some(tokio::time::Instant::now() + debounce);
                        }
                        None => break,
                    }
                }

                _ = async {
                    if let Some(deadline) = deadline {
                        tokio::time::sleep_until(deadline).await;
                    } else {
                        std::future::pending::<()>().await;
                    }
                } => {
                    deadline = None;
                    let Some(views) = views.upgrade() else { break };
                    for (plugin_id, rect) in pending.drain() {
                        views.apply_bounds(&plugin_id, rect).await;
                    }
                }
            }
        }
        tracing::debug!("Bounds coalescer stopped");
    });

    tx
}
