//! Shell RPC: the request/response surface the shell UI talks to
//!
//! Every request is a [`ShellRequest`] variant and every reply an
//! [`ApiResponse`], the same shape plugins get from the broker.

use crate::context::HostContext;
use crate::storage::kv::DEFAULT_RECENTS_LIMIT;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use unihub_plugin_api::{ApiResponse, Capability, Rect};

/// Requests accepted from the shell
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "method", content = "params", rename_all = "snake_case")]
pub enum ShellRequest {
    InstallFromUrl {
        url: String,
    },
    InstallFromBuffer {
        bytes: Vec<u8>,
        /// File name or url the archive came from
        source: String,
    },
    Uninstall {
        plugin_id: String,
    },
    ListPlugins,
    SetEnabled {
        plugin_id: String,
        enabled: bool,
    },
    OpenPlugin {
        plugin_id: String,
    },
    ClosePlugin {
        plugin_id: String,
    },
    ReloadPlugin {
        plugin_id: String,
    },
    UpdateBounds {
        plugin_id: String,
        bounds: Rect,
    },
    HideForOverlay,
    RestoreAfterOverlay,
    OpenViews,
    AddFavorite {
        plugin_id: String,
    },
    RemoveFavorite {
        plugin_id: String,
    },
    ListFavorites,
    ListRecents {
        #[serde(default)]
        limit: Option<usize>,
    },
    ClearRecents,
    DevRegister {
        plugin_id: String,
        url: String,
        #[serde(default)]
        auto_reload: bool,
    },
    DevUnregister {
        plugin_id: String,
    },
    DevList,
    Permissions {
        plugin_id: String,
    },
}

impl ShellRequest {
    pub fn method(&self) -> &'static str {
        match self {
            ShellRequest::InstallFromUrl { .. } => "install_from_url",
            ShellRequest::InstallFromBuffer { .. } => "install_from_buffer",
            ShellRequest::Uninstall { .. } => "uninstall",
            ShellRequest::ListPlugins => "list_plugins",
            ShellRequest::SetEnabled { .. } => "set_enabled",
            ShellRequest::OpenPlugin { .. } => "open_plugin",
            ShellRequest::ClosePlugin { .. } => "close_plugin",
            ShellRequest::ReloadPlugin { .. } => "reload_plugin",
            ShellRequest::UpdateBounds { .. } => "update_bounds",
            ShellRequest::HideForOverlay => "hide_for_overlay",
            ShellRequest::RestoreAfterOverlay => "restore_after_overlay",
            ShellRequest::OpenViews => "open_views",
            ShellRequest::AddFavorite { .. } => "add_favorite",
            ShellRequest::RemoveFavorite { .. } => "remove_favorite",
            ShellRequest::ListFavorites => "list_favorites",
            ShellRequest::ListRecents { .. } => "list_recents",
            ShellRequest::ClearRecents => "clear_recents",
            ShellRequest::DevRegister { .. } => "dev_register",
            ShellRequest::DevUnregister { .. } => "dev_unregister",
            ShellRequest::DevList => "dev_list",
            ShellRequest::Permissions { .. } => "permissions",
        }
    }
}

impl HostContext {
    /// Serve one shell request
    pub async fn handle(&self, request: ShellRequest) -> ApiResponse<Value> {
        let method = request.method();
        match self.dispatch(request).await {
            Ok(data) => ApiResponse::success(data),
            Err(message) => {
                tracing::warn!(method, error = %message, "Shell request failed");
                ApiResponse::failure(message)
            }
        }
    }

    async fn dispatch(&self, request: ShellRequest) -> Result<Value, String> {
        fn to_value<T: Serialize>(value: T) -> Result<Value, String> {
            serde_json::to_value(value).map_err(|e| e.to_string())
        }

        match request {
            ShellRequest::InstallFromUrl { url } => {
                to_value(self.installer().install_from_url(&url).await.map_err(|e| e.to_string())?)
            }
            ShellRequest::InstallFromBuffer { bytes, source } => to_value(
                self.installer()
                    .install_from_buffer(bytes, &source)
                    .await
                    .map_err(|e| e.to_string())?,
            ),
            ShellRequest::Uninstall { plugin_id } => {
                self.installer()
                    .uninstall_plugin(&plugin_id)
                    .await
                    .map_err(|e| e.to_string())?;
                if let Err(e) = self.kv().remove_recent(&plugin_id) {
                    tracing::debug!(plugin = %plugin_id, error = %e, "Failed to drop recent entry");
                }
                Ok(json!({ "message": format!("Plugin {} uninstalled", plugin_id) }))
            }
            ShellRequest::ListPlugins => to_value(self.installer().list_plugins()),
            ShellRequest::SetEnabled { plugin_id, enabled } => to_value(
                self.installer()
                    .set_enabled(&plugin_id, enabled)
                    .await
                    .map_err(|e| e.to_string())?,
            ),
            ShellRequest::OpenPlugin { plugin_id } => {
                let info = self.views().open(&plugin_id).await.map_err(|e| e.to_string())?;
                if let Err(e) = self.kv().add_recent(&plugin_id) {
                    tracing::warn!(plugin = %plugin_id, error = %e, "Failed to record recent plugin");
                }
                to_value(info)
            }
            ShellRequest::ClosePlugin { plugin_id } => {
                Ok(json!({ "closed": self.views().close(&plugin_id).await }))
            }
            ShellRequest::ReloadPlugin { plugin_id } => {
                Ok(json!({ "reloaded": self.views().reload(&plugin_id).await }))
            }
            ShellRequest::UpdateBounds { plugin_id, bounds } => {
                self.views().update_bounds(&plugin_id, bounds);
                Ok(Value::Null)
            }
            ShellRequest::HideForOverlay => {
                to_value(self.views().hide_current_for_overlay().await)
            }
            ShellRequest::RestoreAfterOverlay => {
                to_value(self.views().restore_after_overlay().await)
            }
            ShellRequest::OpenViews => to_value(self.views().open_views().await),
            ShellRequest::AddFavorite { plugin_id } => {
                self.kv().add_favorite(&plugin_id).map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            ShellRequest::RemoveFavorite { plugin_id } => {
                let removed = self.kv().remove_favorite(&plugin_id).map_err(|e| e.to_string())?;
                Ok(json!({ "removed": removed }))
            }
            ShellRequest::ListFavorites => {
                to_value(self.kv().favorites().map_err(|e| e.to_string())?)
            }
            ShellRequest::ListRecents { limit } => to_value(
                self.kv()
                    .recents(limit.unwrap_or(DEFAULT_RECENTS_LIMIT))
                    .map_err(|e| e.to_string())?,
            ),
            ShellRequest::ClearRecents => {
                self.kv().clear_recents().map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            ShellRequest::DevRegister {
                plugin_id,
                url,
                auto_reload,
            } => {
                self.dev()
                    .register(&plugin_id, &url, auto_reload)
                    .map_err(|e| e.to_string())?;
                Ok(Value::Null)
            }
            ShellRequest::DevUnregister { plugin_id } => {
                self.dev().unregister(&plugin_id);
                Ok(Value::Null)
            }
            ShellRequest::DevList => to_value(self.dev().entries()),
            ShellRequest::Permissions { plugin_id } => {
                let granted: Vec<Value> = self
                    .permissions()
                    .permissions(&plugin_id)
                    .into_iter()
                    .map(describe)
                    .collect();
                Ok(json!({ "pluginId": plugin_id, "permissions": granted }))
            }
        }
    }
}

fn describe(capability: Capability) -> Value {
    json!({
        "capability": capability.tag(),
        "description": capability.description(),
    })
}
