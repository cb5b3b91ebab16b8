//! unihub-plugin-sdk: typed client for plugin code
//!
//! Plugin code never talks to the host directly. It gets a [`Transport`]
//! bound to its own plugin id and wraps it in a [`PluginClient`].
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use unihub_plugin_sdk::prelude::*;
//!
//! async fn run<T: Transport>(transport: T) -> Result<(), ClientError> {
//!     let client = PluginClient::new(transport);
//!
//!     client.write_file("notes/today.txt", "remember the milk").await?;
//!     let text = client.read_file("notes/today.txt").await?;
//!     client.write_clipboard_text(&text).await?;
//!
//!     client.storage_set("last-run", &"today").await?;
//!     Ok(())
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use thiserror::Error;

pub use unihub_plugin_api::*;

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{ClientError, PluginClient};
    pub use unihub_plugin_api::{
        Capability, FileStat, HttpRequest, HttpResponse, SpawnOptions, SpawnOutput, SpawnRequest,
        SystemInfo, Transport,
    };
}

/// Errors seen by plugin code
#[derive(Debug, Error)]
pub enum ClientError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Wire(#[from] WireError),

    /// The host refused or failed the request; the message is user-readable
    #[error("{0}")]
    Host(String),

    #[error("unexpected response data: {0}")]
    UnexpectedResponse(#[from] serde_json::Error),
}

/// Typed access to the host capabilities
pub struct PluginClient<T: Transport> {
    transport: T,
}

impl<T: Transport> PluginClient<T> {
    pub fn new(transport: T) -> Self {
        Self { transport }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send a raw request and return its data
    pub async fn request(&self, request: &CapabilityRequest) -> Result<Value, ClientError> {
        let payload = encode(request)?;
        let reply = self.transport.call(payload).await?;
        let response: ApiResponse<Value> = decode(&reply)?;
        match response.into_result() {
            Ok(data) => Ok(data.unwrap_or(Value::Null)),
            Err(message) => Err(ClientError::Host(message)),
        }
    }

    async fn request_as<R: DeserializeOwned>(
        &self,
        request: CapabilityRequest,
    ) -> Result<R, ClientError> {
        let data = self.request(&request).await?;
        Ok(serde_json::from_value(data)?)
    }

    // ========================================================================
    // Filesystem
    // ========================================================================

    pub async fn read_file(&self, path: &str) -> Result<String, ClientError> {
        self.request_as(CapabilityRequest::Fs(FsRequest::ReadFile { path: path.into() }))
            .await
    }

    pub async fn write_file(&self, path: &str, content: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Fs(FsRequest::WriteFile {
            path: path.into(),
            content: content.into(),
        }))
        .await
        .map(drop)
    }

    pub async fn read_dir(&self, path: &str) -> Result<Vec<String>, ClientError> {
        self.request_as(CapabilityRequest::Fs(FsRequest::ReadDir { path: path.into() }))
            .await
    }

    pub async fn exists(&self, path: &str) -> Result<bool, ClientError> {
        self.request_as(CapabilityRequest::Fs(FsRequest::Exists { path: path.into() }))
            .await
    }

    pub async fn stat(&self, path: &str) -> Result<FileStat, ClientError> {
        self.request_as(CapabilityRequest::Fs(FsRequest::Stat { path: path.into() }))
            .await
    }

    pub async fn mkdir(&self, path: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Fs(FsRequest::Mkdir { path: path.into() }))
            .await
            .map(drop)
    }

    // ========================================================================
    // Clipboard
    // ========================================================================

    pub async fn read_clipboard_text(&self) -> Result<String, ClientError> {
        self.request_as(CapabilityRequest::Clipboard(ClipboardRequest::ReadText))
            .await
    }

    pub async fn write_clipboard_text(&self, text: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Clipboard(ClipboardRequest::WriteText {
            text: text.into(),
        }))
        .await
        .map(drop)
    }

    /// PNG data url of the clipboard image, if any
    pub async fn read_clipboard_image(&self) -> Result<Option<String>, ClientError> {
        self.request_as(CapabilityRequest::Clipboard(ClipboardRequest::ReadImage))
            .await
    }

    pub async fn write_clipboard_image(&self, data_url: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Clipboard(ClipboardRequest::WriteImage {
            data_url: data_url.into(),
        }))
        .await
        .map(drop)
    }

    // ========================================================================
    // Network, notifications, processes, system
    // ========================================================================

    pub async fn http(&self, request: HttpRequest) -> Result<HttpResponse, ClientError> {
        self.request_as(CapabilityRequest::Http(request)).await
    }

    pub async fn http_get(&self, url: &str) -> Result<HttpResponse, ClientError> {
        self.http(HttpRequest::get(url)).await
    }

    pub async fn notify(&self, title: &str, body: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Notification(NotificationRequest {
            title: title.into(),
            body: body.into(),
        }))
        .await
        .map(drop)
    }

    /// Run a sidecar; `command` must start with `./`
    pub async fn spawn(&self, request: SpawnRequest) -> Result<SpawnOutput, ClientError> {
        self.request_as(CapabilityRequest::Spawn(request)).await
    }

    pub async fn system_info(&self) -> Result<SystemInfo, ClientError> {
        self.request_as(CapabilityRequest::System(SystemRequest::Info))
            .await
    }

    /// Open an http(s) or mailto link with the user's default handler
    pub async fn open_external(&self, url: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::System(SystemRequest::OpenExternal {
            url: url.into(),
        }))
        .await
        .map(drop)
    }

    /// Reveal a file from the plugin directory in the file manager
    pub async fn show_in_folder(&self, path: &str) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::System(SystemRequest::ShowInFolder {
            path: path.into(),
        }))
        .await
        .map(drop)
    }

    // ========================================================================
    // Storage
    // ========================================================================

    pub async fn storage_get<V: DeserializeOwned>(&self, key: &str) -> Result<Option<V>, ClientError> {
        let data = self
            .request(&CapabilityRequest::Storage(StorageRequest::Get { key: key.into() }))
            .await?;
        if data.is_null() {
            return Ok(None);
        }
        Ok(Some(serde_json::from_value(data)?))
    }

    pub async fn storage_set<V: Serialize + ?Sized>(&self, key: &str, value: &V) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Storage(StorageRequest::Set {
            key: key.into(),
            value: serde_json::to_value(value)?,
        }))
        .await
        .map(drop)
    }

    /// Returns whether the key existed
    pub async fn storage_delete(&self, key: &str) -> Result<bool, ClientError> {
        self.request_as(CapabilityRequest::Storage(StorageRequest::Delete { key: key.into() }))
            .await
    }

    pub async fn storage_keys(&self) -> Result<Vec<String>, ClientError> {
        self.request_as(CapabilityRequest::Storage(StorageRequest::Keys))
            .await
    }

    pub async fn storage_clear(&self) -> Result<(), ClientError> {
        self.request(&CapabilityRequest::Storage(StorageRequest::Clear))
            .await
            .map(drop)
    }
}

impl<T: Transport> std::fmt::Debug for PluginClient<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PluginClient").finish_non_exhaustive()
    }
}
