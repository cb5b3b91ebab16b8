//! unihub-plugin-api: Shared types for the UniHub plugin system
//!
//! This crate defines the manifest format, the capability tags and the
//! protocol between plugin code and the host. Messages on the wire are
//! MessagePack.

pub mod capability;
pub mod manifest;
pub mod protocol;
pub mod transport;

/// API version for compatibility checking
pub const API_VERSION: u32 = 1;

/// URL scheme under which packaged plugin files are served
pub const PLUGIN_PROTOCOL: &str = "plugin://";

pub use capability::{is_privileged, Capability, UnknownCapability, PRIVILEGED_PLUGIN_IDS};
pub use manifest::{
    validate_entry, validate_plugin_id, Author, DevConfig, IconKind, InstalledPluginRecord,
    ManifestError, PluginManifest, PluginSource,
};
pub use protocol::{
    decode, encode, ApiResponse, CapabilityRequest, ClipboardRequest, FileStat, FsRequest,
    HttpRequest, HttpResponse, NotificationRequest, SpawnOptions, SpawnOutput, SpawnRequest,
    StorageRequest, SystemInfo, SystemRequest, WireError,
};
pub use transport::{Transport, TransportError, TransportFuture};

/// Rectangle in window coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}
