//! Capability broker
//!
//! The single place where untrusted plugin requests meet privileged host
//! operations. Each request variant has exactly one handler, and every
//! gated handler runs only after
//! [`PermissionRegistry::require_permission`](crate::permission::PermissionRegistry::require_permission)
//! succeeds for the caller.
//!
//! ```text
//!   PluginChannel (caller id bound at creation)
//!          │  CapabilityRequest
//!          ▼
//!   ┌──────────────────────────────────────────────┐
//!   │ CapabilityBroker::handle                     │
//!   │   1. required_capability → require_permission│
//!   │   2. dispatch to handler                     │
//!   │        fs / clipboard / http / notification  │
//!   │        spawn / system / storage              │
//!   │   3. Result → ApiResponse                    │
//!   └──────────────────────────────────────────────┘
//! ```
//!
//! Handlers never leak lower-layer errors: everything is folded into
//! `ApiResponse { success: false, error }`.

pub mod clipboard;
mod fs;
mod http;
pub mod notification;
pub mod opener;
mod process;

pub use clipboard::{ClipboardBackend, ClipboardError, ImageData, MemoryClipboard};
#[cfg(feature = "system-clipboard")]
pub use clipboard::SystemClipboard;
pub use notification::{LogNotifier, MemoryNotifier, Notification, Notifier};
pub use opener::{LogOpener, MemoryOpener, OpenError, Opened, Opener};

use crate::audit::{self, AuditSink, NullAuditSink};
use crate::config::HostConfig;
use crate::permission::{PermissionDenied, PermissionRegistry};
use crate::sandbox::{PluginSandbox, SandboxError};
use crate::storage::{KvStore, StorageError};
use serde_json::{json, Value};
use std::sync::Arc;
use thiserror::Error;
use unihub_plugin_api::{
    ApiResponse, CapabilityRequest, ClipboardRequest, StorageRequest, SystemInfo, SystemRequest,
};

/// User agent for every outbound request the host makes
pub const USER_AGENT: &str = "UniHub/1.0";

/// Errors raised while serving a plugin request
#[derive(Debug, Error)]
pub enum BrokerError {
    #[error(transparent)]
    PermissionDenied(#[from] PermissionDenied),

    #[error(transparent)]
    Sandbox(#[from] SandboxError),

    #[error("Failed to {operation} '{path}': {source}")]
    Io {
        operation: &'static str,
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Invalid data: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Clipboard error: {0}")]
    Clipboard(String),

    #[error("HTTP error: {0}")]
    Http(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Process '{command}' timed out after {timeout_ms} ms and was killed")]
    ProcessTimeout { command: String, timeout_ms: u64 },

    #[error("Process error: {0}")]
    Process(String),

    #[error(transparent)]
    Open(#[from] OpenError),

    #[error("Background task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl BrokerError {
    pub(crate) fn io(operation: &'static str, path: &str, source: std::io::Error) -> Self {
        Self::Io {
            operation,
            path: path.to_string(),
            source,
        }
    }
}

/// Dispatches plugin requests to permission-gated handlers
pub struct CapabilityBroker {
    config: Arc<HostConfig>,
    permissions: Arc<PermissionRegistry>,
    kv: Arc<KvStore>,
    clipboard: Arc<dyn ClipboardBackend>,
    notifier: Arc<dyn Notifier>,
    opener: Arc<dyn Opener>,
    audit: Arc<dyn AuditSink>,
    http: reqwest::Client,
}

impl CapabilityBroker {
    /// Broker with the default clipboard, log-only notifier and opener, and no audit sink
    pub fn new(
        config: Arc<HostConfig>,
        permissions: Arc<PermissionRegistry>,
        kv: Arc<KvStore>,
    ) -> Self {
        Self {
            config,
            permissions,
            kv,
            clipboard: clipboard::default_backend(),
            notifier: Arc::new(LogNotifier),
            opener: Arc::new(LogOpener),
            audit: Arc::new(NullAuditSink),
            http: default_http_client(),
        }
    }

    pub fn with_clipboard(mut self, clipboard: Arc<dyn ClipboardBackend>) -> Self {
        self.clipboard = clipboard;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_opener(mut self, opener: Arc<dyn Opener>) -> Self {
        self.opener = opener;
        self
    }

    pub fn with_audit(mut self, audit: Arc<dyn AuditSink>) -> Self {
        self.audit = audit;
        self
    }

    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = client;
        self
    }

    pub fn clipboard(&self) -> Arc<dyn ClipboardBackend> {
        Arc::clone(&self.clipboard)
    }

    /// Serve one request on behalf of `plugin_id`
    ///
    /// The id must come from the transport the request arrived on, never
    /// from the request payload.
    pub async fn handle(&self, plugin_id: &str, request: CapabilityRequest) -> ApiResponse<Value> {
        let operation = request.operation();
        match self.dispatch(plugin_id, request).await {
            Ok(data) => ApiResponse::success(data),
            Err(e) => {
                self.record_failure(plugin_id, operation, &e);
                ApiResponse::failure(e.to_string())
            }
        }
    }

    async fn dispatch(
        &self,
        plugin_id: &str,
        request: CapabilityRequest,
    ) -> Result<Value, BrokerError> {
        if let Some(capability) = request.required_capability() {
            self.permissions.require_permission(plugin_id, capability)?;
        }

        match request {
            CapabilityRequest::Fs(request) => {
                let sandbox = self.sandbox(plugin_id)?;
                fs::handle(&sandbox, request).await
            }
            CapabilityRequest::Clipboard(request) => self.clipboard_request(request),
            CapabilityRequest::Http(request) => {
                let response = http::request(&self.http, request).await?;
                Ok(serde_json::to_value(response)?)
            }
            CapabilityRequest::Notification(request) => {
                if let Err(e) = self
                    .notifier
                    .notify(plugin_id, &request.title, &request.body)
                {
                    tracing::warn!(plugin = %plugin_id, error = %e, "Notification not delivered");
                }
                Ok(Value::Null)
            }
            CapabilityRequest::Spawn(request) => {
                let sandbox = self.sandbox(plugin_id)?;
                let output =
                    process::spawn(&sandbox, request, self.config.spawn_timeout()).await?;
                Ok(serde_json::to_value(output)?)
            }
            CapabilityRequest::System(SystemRequest::Info) => {
                let sandbox = self.sandbox(plugin_id)?;
                let info = SystemInfo {
                    platform: std::env::consts::OS.to_string(),
                    arch: std::env::consts::ARCH.to_string(),
                    host_version: self.config.app_version.clone(),
                    plugin_dir: sandbox.root().display().to_string(),
                };
                Ok(serde_json::to_value(info)?)
            }
            CapabilityRequest::System(SystemRequest::OpenExternal { url }) => {
                let url = opener::parse_external_url(&url).map_err(BrokerError::InvalidRequest)?;
                self.opener.open_external(plugin_id, &url)?;
                Ok(Value::Null)
            }
            CapabilityRequest::System(SystemRequest::ShowInFolder { path }) => {
                let resolved = self.sandbox(plugin_id)?.resolve(&path)?;
                if !resolved.exists() {
                    return Err(BrokerError::InvalidRequest(format!("'{path}' does not exist")));
                }
                self.opener.show_in_folder(plugin_id, &resolved)?;
                Ok(Value::Null)
            }
            CapabilityRequest::Storage(request) => self.storage_request(plugin_id, request).await,
        }
    }

    fn clipboard_request(&self, request: ClipboardRequest) -> Result<Value, BrokerError> {
        match request {
            ClipboardRequest::ReadText => {
                let text = self.clipboard.read_text()?;
                Ok(Value::String(text.unwrap_or_default()))
            }
            ClipboardRequest::WriteText { text } => {
                self.clipboard.write_text(&text)?;
                Ok(Value::Null)
            }
            ClipboardRequest::ReadImage => match self.clipboard.read_image()? {
                Some(image) => Ok(Value::String(clipboard::image_to_data_url(&image)?)),
                None => Ok(Value::Null),
            },
            ClipboardRequest::WriteImage { data_url } => {
                let image = clipboard::data_url_to_image(&data_url)?;
                self.clipboard.write_image(image)?;
                Ok(Value::Null)
            }
        }
    }

    /// redb transactions block, so they run off the async workers
    async fn storage_request(
        &self,
        plugin_id: &str,
        request: StorageRequest,
    ) -> Result<Value, BrokerError> {
        let kv = Arc::clone(&self.kv);
        let plugin_id = plugin_id.to_string();
        tokio::task::spawn_blocking(move || -> Result<Value, BrokerError> {
            match request {
                StorageRequest::Get { key } => {
                    Ok(kv.get(&plugin_id, &key)?.unwrap_or(Value::Null))
                }
                StorageRequest::Set { key, value } => {
                    kv.set(&plugin_id, &key, &value)?;
                    Ok(Value::Null)
                }
                StorageRequest::Delete { key } => Ok(Value::Bool(kv.delete(&plugin_id, &key)?)),
                StorageRequest::Keys => Ok(json!(kv.keys(&plugin_id)?)),
                StorageRequest::Clear => {
                    kv.clear(&plugin_id)?;
                    Ok(Value::Null)
                }
            }
        })
        .await?
    }

    fn sandbox(&self, plugin_id: &str) -> Result<PluginSandbox, BrokerError> {
        Ok(PluginSandbox::new(self.config.plugin_dir(plugin_id))?)
    }

    fn record_failure(&self, plugin_id: &str, operation: &str, error: &BrokerError) {
        match error {
            BrokerError::PermissionDenied(_) => {}
            BrokerError::Sandbox(SandboxError::PathTraversal { requested }) => {
                tracing::warn!(plugin = %plugin_id, operation, requested = %requested, "Blocked path traversal");
                audit::emit(
                    self.audit.as_ref(),
                    audit::path_traversal(plugin_id, requested).with_operation(operation),
                );
            }
            BrokerError::ProcessTimeout {
                command,
                timeout_ms,
            } => {
                tracing::warn!(plugin = %plugin_id, command = %command, timeout_ms, "Sidecar timed out");
                audit::emit(
                    self.audit.as_ref(),
                    audit::process_timeout(plugin_id, command, *timeout_ms)
                        .with_operation(operation),
                );
            }
            other => {
                tracing::debug!(plugin = %plugin_id, operation, error = %other, "Plugin request failed");
            }
        }
    }
}

impl std::fmt::Debug for CapabilityBroker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CapabilityBroker")
            .field("data_dir", &self.config.data_dir)
            .finish()
    }
}

/// HTTP client used for plugin requests and package downloads
pub fn default_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .unwrap_or_else(|e| {
            tracing::warn!(error = %e, "Falling back to default HTTP client");
            reqwest::Client::new()
        })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventType, MemoryAuditSink};
    use tempfile::TempDir;
    use unihub_plugin_api::{FsRequest, NotificationRequest};

    struct Fixture {
        _temp: TempDir,
        broker: CapabilityBroker,
        permissions: Arc<PermissionRegistry>,
        clipboard: Arc<MemoryClipboard>,
        notifier: Arc<MemoryNotifier>,
        opener: Arc<MemoryOpener>,
        audit: Arc<MemoryAuditSink>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let config = Arc::new(HostConfig::new(temp.path()));
        let permissions = Arc::new(PermissionRegistry::new());
        let kv = Arc::new(KvStore::open(config.kv_path()).unwrap());
        let clipboard = Arc::new(MemoryClipboard::new());
        let notifier = Arc::new(MemoryNotifier::new());
        let opener = Arc::new(MemoryOpener::new());
        let audit = Arc::new(MemoryAuditSink::new());
        let broker = CapabilityBroker::new(config, permissions.clone(), kv)
            .with_clipboard(clipboard.clone())
            .with_notifier(notifier.clone())
            .with_opener(opener.clone())
            .with_audit(audit.clone());
        Fixture {
            _temp: temp,
            broker,
            permissions,
            clipboard,
            notifier,
            opener,
            audit,
        }
    }

    fn fs(request: FsRequest) -> CapabilityRequest {
        CapabilityRequest::Fs(request)
    }

    #[tokio::test]
    async fn test_denied_without_grant() {
        let f = fixture();
        f.permissions.register_plugin("a", &["http"]);

        let response = f
            .broker
            .handle("a", CapabilityRequest::Clipboard(ClipboardRequest::ReadText))
            .await;
        assert!(!response.success);
        assert!(response.error.unwrap().contains("clipboard"));
    }

    #[tokio::test]
    async fn test_fs_round_trip_inside_plugin_dir() {
        let f = fixture();
        f.permissions.register_plugin("a", &["fs"]);

        let write = f
            .broker
            .handle(
                "a",
                fs(FsRequest::WriteFile {
                    path: "notes/today.txt".into(),
                    content: "hello".into(),
                }),
            )
            .await;
        assert!(write.success, "{:?}", write.error);

        let read = f
            .broker
            .handle(
                "a",
                fs(FsRequest::ReadFile {
                    path: "notes/today.txt".into(),
                }),
            )
            .await;
        assert_eq!(read.data, Some(json!("hello")));

        let listing = f
            .broker
            .handle("a", fs(FsRequest::ReadDir { path: "notes".into() }))
            .await;
        assert_eq!(listing.data, Some(json!(["today.txt"])));

        let stat = f
            .broker
            .handle(
                "a",
                fs(FsRequest::Stat {
                    path: "notes/today.txt".into(),
                }),
            )
            .await
            .data
            .unwrap();
        assert_eq!(stat["isFile"], json!(true));
        assert_eq!(stat["size"], json!(5));
    }

    #[tokio::test]
    async fn test_fs_traversal_is_blocked_and_audited() {
        let f = fixture();
        f.permissions.register_plugin("a", &["fs"]);
        f.permissions.register_plugin("b", &["fs"]);

        let response = f
            .broker
            .handle(
                "b",
                fs(FsRequest::WriteFile {
                    path: "secret.txt".into(),
                    content: "b's data".into(),
                }),
            )
            .await;
        assert!(response.success);

        let response = f
            .broker
            .handle(
                "a",
                fs(FsRequest::ReadFile {
                    path: "../b/secret.txt".into(),
                }),
            )
            .await;
        assert!(!response.success);
        assert!(response.data.is_none());

        let events = f.audit.find_by_type(AuditEventType::PathTraversal);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plugin, "a");
    }

    #[tokio::test]
    async fn test_clipboard_text() {
        let f = fixture();
        f.permissions.register_plugin("a", &["clipboard"]);

        let response = f
            .broker
            .handle(
                "a",
                CapabilityRequest::Clipboard(ClipboardRequest::WriteText {
                    text: "copied".into(),
                }),
            )
            .await;
        assert!(response.success);
        assert_eq!(f.clipboard.read_text().unwrap().as_deref(), Some("copied"));

        let response = f
            .broker
            .handle("a", CapabilityRequest::Clipboard(ClipboardRequest::ReadText))
            .await;
        assert_eq!(response.data, Some(json!("copied")));
    }

    #[tokio::test]
    async fn test_notification_is_delivered() {
        let f = fixture();
        f.permissions.register_plugin("a", &["notification"]);

        let response = f
            .broker
            .handle(
                "a",
                CapabilityRequest::Notification(NotificationRequest {
                    title: "Done".into(),
                    body: "Export finished".into(),
                }),
            )
            .await;
        assert!(response.success);
        assert_eq!(f.notifier.sent()[0].title, "Done");
        assert_eq!(f.notifier.sent()[0].plugin_id, "a");
    }

    #[tokio::test]
    async fn test_storage_is_scoped_and_ungated() {
        let f = fixture();

        let set = |value: Value| {
            CapabilityRequest::Storage(StorageRequest::Set {
                key: "k".into(),
                value,
            })
        };
        assert!(f.broker.handle("a", set(json!(1))).await.success);
        assert!(f.broker.handle("b", set(json!(2))).await.success);

        let get = CapabilityRequest::Storage(StorageRequest::Get { key: "k".into() });
        assert_eq!(f.broker.handle("a", get.clone()).await.data, Some(json!(1)));
        assert_eq!(f.broker.handle("b", get).await.data, Some(json!(2)));
    }

    #[tokio::test]
    async fn test_system_info() {
        let f = fixture();
        f.permissions.register_plugin("a", &["system"]);

        let response = f
            .broker
            .handle("a", CapabilityRequest::System(SystemRequest::Info))
            .await;
        let data = response.data.unwrap();
        assert_eq!(data["platform"], json!(std::env::consts::OS));
        assert!(data["pluginDir"].as_str().unwrap().ends_with("a"));
    }

    fn system(request: SystemRequest) -> CapabilityRequest {
        CapabilityRequest::System(request)
    }

    #[tokio::test]
    async fn test_open_external_requires_system() {
        let f = fixture();
        f.permissions.register_plugin("a", &["fs"]);

        let response = f
            .broker
            .handle(
                "a",
                system(SystemRequest::OpenExternal {
                    url: "https://example.com".into(),
                }),
            )
            .await;
        assert!(!response.success);
        assert!(f.opener.opened().is_empty());
    }

    #[tokio::test]
    async fn test_open_external() {
        let f = fixture();
        f.permissions.register_plugin("a", &["system"]);

        let response = f
            .broker
            .handle(
                "a",
                system(SystemRequest::OpenExternal {
                    url: "https://example.com/docs".into(),
                }),
            )
            .await;
        assert!(response.success, "{:?}", response.error);

        let refused = f
            .broker
            .handle(
                "a",
                system(SystemRequest::OpenExternal {
                    url: "file:///etc/passwd".into(),
                }),
            )
            .await;
        assert!(!refused.success);

        assert_eq!(
            f.opener.opened(),
            vec![Opened::External {
                plugin_id: "a".into(),
                url: "https://example.com/docs".into(),
            }]
        );
    }

    #[tokio::test]
    async fn test_show_in_folder_stays_in_plugin_dir() {
        let f = fixture();
        f.permissions.register_plugin("a", &["fs", "system"]);
        let write = f
            .broker
            .handle(
                "a",
                fs(FsRequest::WriteFile {
                    path: "out/report.txt".into(),
                    content: "done".into(),
                }),
            )
            .await;
        assert!(write.success, "{:?}", write.error);

        let shown = f
            .broker
            .handle(
                "a",
                system(SystemRequest::ShowInFolder {
                    path: "out/report.txt".into(),
                }),
            )
            .await;
        assert!(shown.success, "{:?}", shown.error);

        let escaped = f
            .broker
            .handle(
                "a",
                system(SystemRequest::ShowInFolder {
                    path: "../b/secret.txt".into(),
                }),
            )
            .await;
        assert!(!escaped.success);
        assert_eq!(f.audit.find_by_type(AuditEventType::PathTraversal).len(), 1);

        let opened = f.opener.opened();
        assert_eq!(opened.len(), 1);
        match &opened[0] {
            Opened::Folder { plugin_id, path } => {
                assert_eq!(plugin_id, "a");
                assert!(path.ends_with("out/report.txt"));
            }
            other => panic!("unexpected: {other:?}"),
        }
    }
}
