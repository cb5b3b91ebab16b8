//! View surface abstraction
//!
//! The host never renders anything itself. A [`ViewHost`] owns the actual
//! isolated surfaces (webviews, child windows, headless runners) and the
//! [`ViewManager`](super::ViewManager) drives it.

use crate::channel::PluginChannel;
use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use thiserror::Error;
use unihub_plugin_api::Rect;

/// What a view loads
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum ViewSource {
    /// Live dev-server URL
    Dev { url: String },
    /// Packaged entry served from the plugin directory
    Packaged { url: String, path: PathBuf },
}

impl ViewSource {
    pub fn url(&self) -> &str {
        match self {
            ViewSource::Dev { url } | ViewSource::Packaged { url, .. } => url,
        }
    }

    pub fn is_dev(&self) -> bool {
        matches!(self, ViewSource::Dev { .. })
    }
}

/// Failure reported by a surface implementation
#[derive(Debug, Clone, Error)]
#[error("{0}")]
pub struct SurfaceError(pub String);

/// Owner of the isolated plugin surfaces
///
/// `create` receives the plugin's [`PluginChannel`], which is the only
/// route from plugin code back into the host. Dropping it in `destroy`
/// closes the channel.
#[async_trait]
pub trait ViewHost: Send + Sync {
    async fn create(
        &self,
        plugin_id: &str,
        source: &ViewSource,
        bounds: Rect,
        channel: PluginChannel,
    ) -> Result<(), SurfaceError>;

    async fn set_bounds(&self, plugin_id: &str, bounds: Rect) -> Result<(), SurfaceError>;

    async fn set_visible(&self, plugin_id: &str, visible: bool) -> Result<(), SurfaceError>;

    async fn reload(&self, plugin_id: &str) -> Result<(), SurfaceError>;

    async fn destroy(&self, plugin_id: &str);
}

// ============================================================================
// Headless
// ============================================================================

/// Surface-less host that keeps each view's channel alive
///
/// Useful for command-line tools and for driving plugins from tests.
#[derive(Default)]
pub struct HeadlessViewHost {
    channels: Mutex<HashMap<String, PluginChannel>>,
}

impl HeadlessViewHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// The channel of an open view
    pub fn channel(&self, plugin_id: &str) -> Option<PluginChannel> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin_id)
            .cloned()
    }
}

#[async_trait]
impl ViewHost for HeadlessViewHost {
    async fn create(
        &self,
        plugin_id: &str,
        source: &ViewSource,
        _bounds: Rect,
        channel: PluginChannel,
    ) -> Result<(), SurfaceError> {
        tracing::debug!(plugin = %plugin_id, url = %source.url(), "Headless view created");
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plugin_id.to_string(), channel);
        Ok(())
    }

    async fn set_bounds(&self, _plugin_id: &str, _bounds: Rect) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn set_visible(&self, _plugin_id: &str, _visible: bool) -> Result<(), SurfaceError> {
        Ok(())
    }

    async fn reload(&self, plugin_id: &str) -> Result<(), SurfaceError> {
        tracing::debug!(plugin = %plugin_id, "Headless view reloaded");
        Ok(())
    }

    async fn destroy(&self, plugin_id: &str) {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(plugin_id);
    }
}

// ============================================================================
// Recording
// ============================================================================

/// A call observed by [`RecordingViewHost`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SurfaceCall {
    Create { plugin_id: String, url: String, bounds: Rect },
    SetBounds { plugin_id: String, bounds: Rect },
    SetVisible { plugin_id: String, visible: bool },
    Reload { plugin_id: String },
    Destroy { plugin_id: String },
}

impl SurfaceCall {
    pub fn plugin_id(&self) -> &str {
        match self {
            SurfaceCall::Create { plugin_id, .. }
            | SurfaceCall::SetBounds { plugin_id, .. }
            | SurfaceCall::SetVisible { plugin_id, .. }
            | SurfaceCall::Reload { plugin_id }
            | SurfaceCall::Destroy { plugin_id } => plugin_id,
        }
    }
}

/// View host that records every call (for testing)
#[derive(Default)]
pub struct RecordingViewHost {
    calls: Mutex<Vec<SurfaceCall>>,
    channels: Mutex<HashMap<String, PluginChannel>>,
    failing: Mutex<Vec<String>>,
}

impl RecordingViewHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make `create` fail for a plugin
    pub fn fail_create_for(&self, plugin_id: &str) {
        self.failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(plugin_id.to_string());
    }

    pub fn calls(&self) -> Vec<SurfaceCall> {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn clear(&self) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }

    pub fn channel(&self, plugin_id: &str) -> Option<PluginChannel> {
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(plugin_id)
            .cloned()
    }

    /// Ids with a live surface
    pub fn live(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    fn push(&self, call: SurfaceCall) {
        self.calls.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }
}

#[async_trait]
impl ViewHost for RecordingViewHost {
    async fn create(
        &self,
        plugin_id: &str,
        source: &ViewSource,
        bounds: Rect,
        channel: PluginChannel,
    ) -> Result<(), SurfaceError> {
        self.push(SurfaceCall::Create {
            plugin_id: plugin_id.to_string(),
            url: source.url().to_string(),
            bounds,
        });
        let failing = self
            .failing
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .any(|id| id == plugin_id);
        if failing {
            return Err(SurfaceError(format!("surface for {} failed to load", plugin_id)));
        }
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(plugin_id.to_string(), channel);
        Ok(())
    }

    async fn set_bounds(&self, plugin_id: &str, bounds: Rect) -> Result<(), SurfaceError> {
        self.push(SurfaceCall::SetBounds {
            plugin_id: plugin_id.to_string(),
            bounds,
        });
        Ok(())
    }

    async fn set_visible(&self, plugin_id: &str, visible: bool) -> Result<(), SurfaceError> {
        self.push(SurfaceCall::SetVisible {
            plugin_id: plugin_id.to_string(),
            visible,
        });
        Ok(())
    }

    async fn reload(&self, plugin_id: &str) -> Result<(), SurfaceError> {
        self.push(SurfaceCall::Reload {
            plugin_id: plugin_id.to_string(),
        });
        Ok(())
    }

    async fn destroy(&self, plugin_id: &str) {
        self.push(SurfaceCall::Destroy {
            plugin_id: plugin_id.to_string(),
        });
        self.channels
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(plugin_id);
    }
}
