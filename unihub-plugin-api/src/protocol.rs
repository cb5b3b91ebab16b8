//! Request/response protocol between plugin code and the host broker
//!
//! Every request a plugin can make is a variant of [`CapabilityRequest`].
//! Payloads are MessagePack with named fields (see [`encode`] / [`decode`]).

use crate::capability::Capability;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Uniform response shape returned for every request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(default = "Option::default", skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    /// Successful response carrying data
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Failed response with a user-readable message
    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(message.into()),
        }
    }

    /// Convert into a `Result`, treating a missing error message as empty
    pub fn into_result(self) -> Result<Option<T>, String> {
        if self.success {
            Ok(self.data)
        } else {
            Err(self.error.unwrap_or_default())
        }
    }
}

/// Plugin-to-host request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityRequest {
    Fs(FsRequest),
    Clipboard(ClipboardRequest),
    Http(HttpRequest),
    Notification(NotificationRequest),
    Spawn(SpawnRequest),
    System(SystemRequest),
    Storage(StorageRequest),
}

impl CapabilityRequest {
    /// Capability gating this request; `None` for ungated operations
    pub fn required_capability(&self) -> Option<Capability> {
        match self {
            CapabilityRequest::Fs(_) => Some(Capability::Filesystem),
            CapabilityRequest::Clipboard(_) => Some(Capability::Clipboard),
            CapabilityRequest::Http(_) => Some(Capability::Http),
            CapabilityRequest::Notification(_) => Some(Capability::Notification),
            CapabilityRequest::Spawn(_) => Some(Capability::ProcessSpawn),
            CapabilityRequest::System(_) => Some(Capability::SystemInfo),
            CapabilityRequest::Storage(_) => None,
        }
    }

    /// Short operation name for logs
    pub fn operation(&self) -> &'static str {
        match self {
            CapabilityRequest::Fs(req) => match req {
                FsRequest::ReadFile { .. } => "fs.read_file",
                FsRequest::WriteFile { .. } => "fs.write_file",
                FsRequest::ReadDir { .. } => "fs.read_dir",
                FsRequest::Exists { .. } => "fs.exists",
                FsRequest::Stat { .. } => "fs.stat",
                FsRequest::Mkdir { .. } => "fs.mkdir",
            },
            CapabilityRequest::Clipboard(req) => match req {
                ClipboardRequest::ReadText => "clipboard.read_text",
                ClipboardRequest::WriteText { .. } => "clipboard.write_text",
                ClipboardRequest::ReadImage => "clipboard.read_image",
                ClipboardRequest::WriteImage { .. } => "clipboard.write_image",
            },
            CapabilityRequest::Http(_) => "http.request",
            CapabilityRequest::Notification(_) => "notification.show",
            CapabilityRequest::Spawn(_) => "spawn",
            CapabilityRequest::System(req) => match req {
                SystemRequest::Info => "system.info",
                SystemRequest::OpenExternal { .. } => "system.open_external",
                SystemRequest::ShowInFolder { .. } => "system.show_in_folder",
            },
            CapabilityRequest::Storage(req) => match req {
                StorageRequest::Get { .. } => "storage.get",
                StorageRequest::Set { .. } => "storage.set",
                StorageRequest::Delete { .. } => "storage.delete",
                StorageRequest::Keys => "storage.keys",
                StorageRequest::Clear => "storage.clear",
            },
        }
    }
}

/// File operations, relative to the plugin's private directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FsRequest {
    ReadFile { path: String },
    WriteFile { path: String, content: String },
    ReadDir { path: String },
    Exists { path: String },
    Stat { path: String },
    Mkdir { path: String },
}

/// Result of `FsRequest::Stat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileStat {
    pub is_file: bool,
    pub is_directory: bool,
    pub size: u64,
    /// Modification time in milliseconds since the Unix epoch
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mtime_ms: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClipboardRequest {
    ReadText,
    WriteText { text: String },
    /// Returns a `data:image/png;base64,...` url, or nothing when empty
    ReadImage,
    WriteImage { data_url: String },
}

fn default_method() -> String {
    "GET".to_string()
}

/// Outbound HTTP request proxied by the host
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpRequest {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Strings are sent verbatim; other values are JSON-encoded
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub body: Option<serde_json::Value>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            method: default_method(),
            headers: BTreeMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HttpResponse {
    pub status: u16,
    pub status_text: String,
    pub headers: BTreeMap<String, String>,
    /// Text body, or a base64 data url when `is_image` is set
    pub body: String,
    pub is_image: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub title: String,
    #[serde(default)]
    pub body: String,
}

/// Run a program shipped inside the plugin directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnRequest {
    /// Must start with `./` or `.\`
    pub command: String,
    #[serde(default)]
    pub args: Vec<String>,
    #[serde(default)]
    pub options: SpawnOptions,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    /// Written to the child's stdin, which is then closed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpawnOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the child was terminated by a signal
    pub exit_code: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SystemRequest {
    Info,
    /// Open an http(s) or mailto link in the user's default handler
    OpenExternal { url: String },
    /// Reveal a file from the plugin directory in the file manager
    ShowInFolder { path: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SystemInfo {
    pub platform: String,
    pub arch: String,
    pub host_version: String,
    /// The calling plugin's own directory
    pub plugin_dir: String,
}

/// Per-plugin key-value storage; always scoped to the caller
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageRequest {
    Get { key: String },
    Set { key: String, value: serde_json::Value },
    Delete { key: String },
    Keys,
    Clear,
}

// ============================================================================
// Wire encoding
// ============================================================================

/// Wire encoding errors
#[derive(Debug, Error)]
pub enum WireError {
    #[error("failed to encode message: {0}")]
    Encode(#[from] rmp_serde::encode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encode a message as MessagePack with named fields
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, WireError> {
    Ok(rmp_serde::to_vec_named(value)?)
}

/// Decode a MessagePack message
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, WireError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_required_capability() {
        let read = CapabilityRequest::Fs(FsRequest::ReadFile {
            path: "notes.txt".into(),
        });
        assert_eq!(read.required_capability(), Some(Capability::Filesystem));
        assert_eq!(read.operation(), "fs.read_file");

        let storage = CapabilityRequest::Storage(StorageRequest::Keys);
        assert_eq!(storage.required_capability(), None);

        let open = CapabilityRequest::System(SystemRequest::OpenExternal {
            url: "https://example.com".into(),
        });
        assert_eq!(open.required_capability(), Some(Capability::SystemInfo));
        assert_eq!(open.operation(), "system.open_external");
    }

    #[test]
    fn test_request_wire_format() {
        let request = CapabilityRequest::Spawn(SpawnRequest {
            command: "./sidecar/tool".into(),
            args: vec!["--json".into()],
            options: SpawnOptions {
                timeout_ms: Some(1000),
                input: None,
            },
        });

        let bytes = encode(&request).unwrap();
        let decoded: CapabilityRequest = decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_storage_value_survives_wire() {
        let request = CapabilityRequest::Storage(StorageRequest::Set {
            key: "theme".into(),
            value: serde_json::json!({"dark": true, "size": 12}),
        });
        let decoded: CapabilityRequest = decode(&encode(&request).unwrap()).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn test_api_response_shape() {
        let ok: ApiResponse<u32> = ApiResponse::success(7);
        let json = serde_json::to_value(&ok).unwrap();
        assert_eq!(json, serde_json::json!({"success": true, "data": 7}));

        let err: ApiResponse<u32> = ApiResponse::failure("nope");
        assert_eq!(err.clone().into_result(), Err("nope".to_string()));
        let json = serde_json::to_value(&err).unwrap();
        assert_eq!(json, serde_json::json!({"success": false, "error": "nope"}));
    }

    #[test]
    fn test_http_request_defaults() {
        let request: HttpRequest =
            serde_json::from_str(r#"{"url":"https://example.com"}"#).unwrap();
        assert_eq!(request.method, "GET");
        assert!(request.headers.is_empty());
        assert!(request.body.is_none());
    }
}
