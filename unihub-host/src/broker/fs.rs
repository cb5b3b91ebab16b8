//! File operations confined to the plugin's private directory

use super::BrokerError;
use crate::sandbox::PluginSandbox;
use serde_json::{json, Value};
use std::time::UNIX_EPOCH;
use unihub_plugin_api::{FileStat, FsRequest};

pub(crate) async fn handle(sandbox: &PluginSandbox, request: FsRequest) -> Result<Value, BrokerError> {
    match request {
        FsRequest::ReadFile { path } => {
            let resolved = sandbox.resolve(&path)?;
            let content = tokio::fs::read_to_string(&resolved)
                .await
                .map_err(|e| BrokerError::io("read file", &path, e))?;
            Ok(Value::String(content))
        }
        FsRequest::WriteFile { path, content } => {
            let resolved = sandbox.resolve(&path)?;
            if let Some(parent) = resolved.parent() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| BrokerError::io("write file", &path, e))?;
            }
            tokio::fs::write(&resolved, content)
                .await
                .map_err(|e| BrokerError::io("write file", &path, e))?;
            Ok(Value::Null)
        }
        FsRequest::ReadDir { path } => {
            let resolved = sandbox.resolve(&path)?;
            let mut entries = tokio::fs::read_dir(&resolved)
                .await
                .map_err(|e| BrokerError::io("read directory", &path, e))?;

            let mut names = Vec::new();
            while let Some(entry) = entries
                .next_entry()
                .await
                .map_err(|e| BrokerError::io("read directory", &path, e))?
            {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
            names.sort();
            Ok(json!(names))
        }
        FsRequest::Exists { path } => {
            let resolved = sandbox.resolve(&path)?;
            let exists = tokio::fs::try_exists(&resolved).await.unwrap_or(false);
            Ok(Value::Bool(exists))
        }
        FsRequest::Stat { path } => {
            let resolved = sandbox.resolve(&path)?;
            let metadata = tokio::fs::metadata(&resolved)
                .await
                .map_err(|e| BrokerError::io("stat", &path, e))?;

            let mtime_ms = metadata
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_millis() as i64);
            let stat = FileStat {
                is_file: metadata.is_file(),
                is_directory: metadata.is_dir(),
                size: metadata.len(),
                mtime_ms,
            };
            Ok(serde_json::to_value(stat)?)
        }
        FsRequest::Mkdir { path } => {
            let resolved = sandbox.resolve(&path)?;
            tokio::fs::create_dir_all(&resolved)
                .await
                .map_err(|e| BrokerError::io("create directory", &path, e))?;
            Ok(Value::Null)
        }
    }
}
