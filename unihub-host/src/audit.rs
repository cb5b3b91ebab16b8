//! Audit trail for security and lifecycle events
//!
//! Permission denials, sandbox escapes, process timeouts and plugin
//! install/uninstall are recorded through an [`AuditSink`]. Applications
//! choose where the events go; the host only emits them.

use serde::Serialize;
use std::fmt;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock};
use thiserror::Error;
use unihub_plugin_api::{Capability, PluginSource};

/// Audit event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    /// RFC 3339 timestamp
    pub timestamp: String,
    pub event_type: AuditEventType,
    pub plugin: String,
    /// Broker operation (if applicable)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<String>,
    pub details: AuditDetails,
}

impl AuditEvent {
    pub fn new(
        event_type: AuditEventType,
        plugin: impl Into<String>,
        details: AuditDetails,
    ) -> Self {
        Self {
            timestamp: chrono::Utc::now().to_rfc3339(),
            event_type,
            plugin: plugin.into(),
            operation: None,
            details,
        }
    }

    pub fn with_operation(mut self, operation: impl Into<String>) -> Self {
        self.operation = Some(operation.into());
        self
    }
}

/// Type of audit event
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AuditEventType {
    PermissionDenied,
    PathTraversal,
    ProcessTimeout,
    PluginInstalled,
    PluginUninstalled,
    PluginEnabled,
    PluginDisabled,
}

/// Details about the audit event
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "type")]
pub enum AuditDetails {
    Permission { capability: Capability },
    /// The path as the plugin supplied it; never the resolved host path
    PathAccess { requested: String },
    Process { command: String, timeout_ms: u64 },
    Lifecycle {
        #[serde(skip_serializing_if = "Option::is_none")]
        version: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source: Option<PluginSource>,
    },
}

/// Error type for audit operations
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("Failed to write audit log: {0}")]
    WriteError(#[from] std::io::Error),

    #[error("Failed to serialize audit event: {0}")]
    SerializationError(#[from] serde_json::Error),
}

/// Destination for audit events
pub trait AuditSink: Send + Sync {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError>;

    fn flush(&self) -> Result<(), AuditError>;
}

/// Record an event, logging (not propagating) sink failures
pub(crate) fn emit(sink: &dyn AuditSink, event: AuditEvent) {
    if let Err(e) = sink.record(event) {
        tracing::warn!(error = %e, "Failed to record audit event");
    }
}

// ============================================================================
// Sinks
// ============================================================================

/// File-based audit sink (JSON Lines)
pub struct FileAuditSink {
    path: PathBuf,
    writer: Mutex<BufWriter<File>>,
}

impl FileAuditSink {
    pub fn new(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&path)?;

        Ok(Self {
            path,
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl AuditSink for FileAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let json = serde_json::to_string(&event)?;
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        let mut writer = self.writer.lock().unwrap_or_else(|e| e.into_inner());
        writer.flush()?;
        Ok(())
    }
}

impl fmt::Debug for FileAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileAuditSink")
            .field("path", &self.path)
            .finish()
    }
}

/// In-memory audit sink for testing
pub struct MemoryAuditSink {
    events: RwLock<Vec<AuditEvent>>,
    max_events: usize,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self::with_capacity(1000)
    }

    pub fn with_capacity(max_events: usize) -> Self {
        Self {
            events: RwLock::new(Vec::with_capacity(max_events.min(1000))),
            max_events,
        }
    }

    pub fn events(&self) -> Vec<AuditEvent> {
        self.events
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn count(&self) -> usize {
        self.events.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn find_by_type(&self, event_type: AuditEventType) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.event_type == event_type)
            .collect()
    }

    pub fn find_by_plugin(&self, plugin: &str) -> Vec<AuditEvent> {
        self.events()
            .into_iter()
            .filter(|e| e.plugin == plugin)
            .collect()
    }
}

impl Default for MemoryAuditSink {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditSink for MemoryAuditSink {
    fn record(&self, event: AuditEvent) -> Result<(), AuditError> {
        let mut events = self.events.write().unwrap_or_else(|e| e.into_inner());
        if events.len() >= self.max_events {
            events.remove(0);
        }
        events.push(event);
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

impl fmt::Debug for MemoryAuditSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryAuditSink")
            .field("count", &self.count())
            .field("max_events", &self.max_events)
            .finish()
    }
}

/// Discards all events
#[derive(Debug, Default)]
pub struct NullAuditSink;

impl AuditSink for NullAuditSink {
    fn record(&self, _event: AuditEvent) -> Result<(), AuditError> {
        Ok(())
    }

    fn flush(&self) -> Result<(), AuditError> {
        Ok(())
    }
}

// ============================================================================
// Helper functions
// ============================================================================

pub fn permission_denied(plugin: &str, capability: Capability) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PermissionDenied,
        plugin,
        AuditDetails::Permission { capability },
    )
}

pub fn path_traversal(plugin: &str, requested: &str) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::PathTraversal,
        plugin,
        AuditDetails::PathAccess {
            requested: requested.to_string(),
        },
    )
}

pub fn process_timeout(plugin: &str, command: &str, timeout_ms: u64) -> AuditEvent {
    AuditEvent::new(
        AuditEventType::ProcessTimeout,
        plugin,
        AuditDetails::Process {
            command: command.to_string(),
            timeout_ms,
        },
    )
}

pub fn lifecycle(
    event_type: AuditEventType,
    plugin: &str,
    version: Option<&str>,
    source: Option<PluginSource>,
) -> AuditEvent {
    AuditEvent::new(
        event_type,
        plugin,
        AuditDetails::Lifecycle {
            version: version.map(str::to_string),
            source,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_sink() {
        let sink = MemoryAuditSink::new();
        sink.record(permission_denied("json-tool", Capability::Clipboard))
            .unwrap();

        assert_eq!(sink.count(), 1);
        let events = sink.find_by_type(AuditEventType::PermissionDenied);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].plugin, "json-tool");
    }

    #[test]
    fn test_memory_sink_eviction() {
        let sink = MemoryAuditSink::with_capacity(2);

        for i in 0..3 {
            sink.record(path_traversal(&format!("plugin-{}", i), "../x"))
                .unwrap();
        }

        assert_eq!(sink.count(), 2);
        let events = sink.events();
        assert_eq!(events[0].plugin, "plugin-1");
        assert_eq!(events[1].plugin, "plugin-2");
    }

    #[test]
    fn test_event_serialization() {
        let event = process_timeout("ffmpeg-tool", "./sidecar/ffmpeg", 30_000)
            .with_operation("spawn");

        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("process_timeout"));
        assert!(json.contains("\"operation\":\"spawn\""));
        assert!(json.contains("\"timeout_ms\":30000"));
    }

    #[test]
    fn test_file_sink() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("audit.jsonl");

        let sink = FileAuditSink::new(&path).unwrap();
        sink.record(lifecycle(
            AuditEventType::PluginInstalled,
            "json-tool",
            Some("1.0.0"),
            Some(PluginSource::Local),
        ))
        .unwrap();
        sink.flush().unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("plugin_installed"));
        assert!(content.contains("\"source\":\"local\""));
    }
}
