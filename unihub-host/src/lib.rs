//! unihub-host: plugin lifecycle and isolation runtime for UniHub
//!
//! Installs plugin packages, persists them, grants capabilities from their
//! manifests, and serves their isolated views. Plugin code reaches the host
//! only through a [`PluginChannel`], whose requests are checked by the
//! [`CapabilityBroker`].
//!
//! Everything is wired by [`HostContext`]:
//!
//! ```no_run
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! use unihub_host::{HostConfig, HostContext, ShellRequest};
//!
//! let host = HostContext::builder(HostConfig::default_for_app("unihub")).build()?;
//! let response = host.handle(ShellRequest::ListPlugins).await;
//! assert!(response.success);
//! # Ok(())
//! # }
//! ```

pub mod audit;
pub mod broker;
pub mod channel;
pub mod clipboard_monitor;
pub mod config;
pub mod context;
pub mod dev;
pub mod installer;
pub mod permission;
pub mod rpc;
pub mod sandbox;
pub mod storage;
pub mod view;
pub mod watcher;

pub use audit::{AuditEvent, AuditEventType, AuditSink, FileAuditSink, MemoryAuditSink, NullAuditSink};
pub use broker::{
    BrokerError, CapabilityBroker, ClipboardBackend, MemoryClipboard, MemoryOpener, Notifier,
    Opener,
};
pub use channel::PluginChannel;
pub use clipboard_monitor::{ClipboardChange, ClipboardMonitor, ClipboardSubscription};
pub use config::{ConfigError, HostConfig, RetryPolicy};
pub use context::{HostContext, HostContextBuilder, HostError};
pub use dev::{DevEntry, DevModeRegistry};
pub use installer::{
    FetchError, HttpFetcher, InstallError, InstallEvent, InstallOutcome, InstallPhase,
    PackageFetcher, PluginInstaller,
};
pub use permission::{PermissionDenied, PermissionRegistry};
pub use rpc::ShellRequest;
pub use sandbox::{PluginSandbox, SandboxError};
pub use storage::{KvStore, PluginStore, StorageError};
pub use view::{
    HeadlessViewHost, RecordingViewHost, SurfaceCall, SurfaceError, ViewError, ViewHost,
    ViewInfo, ViewManager, ViewSource, ViewState,
};
pub use watcher::DevReloadWatcher;

pub use unihub_plugin_api::{
    ApiResponse, Capability, CapabilityRequest, InstalledPluginRecord, PluginManifest, Rect,
};
