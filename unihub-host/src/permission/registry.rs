//! In-memory capability grants, keyed by plugin id

use crate::audit::{self, AuditSink, NullAuditSink};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::{Arc, RwLock};
use thiserror::Error;
use unihub_plugin_api::{is_privileged, Capability};

/// A plugin attempted an operation it was not granted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error(
    "Plugin {plugin_id} is missing permission: {tag}\n\n\
     To fix this:\n\
     1. Declare the permission in package.json:\n   \
     {{\n     \"unihub\": {{\n       \"permissions\": [\"{tag}\"]\n     }}\n   }}\n\n\
     2. Rebuild and repackage the plugin:\n   \
     npm run build && npm run package\n\n\
     3. Uninstall the old version in UniHub and install the new one",
    tag = .capability.tag()
)]
pub struct PermissionDenied {
    pub plugin_id: String,
    pub capability: Capability,
}

/// Capability grants for every registered plugin
///
/// Grants are derived from manifests at install time and at startup; they
/// are never persisted on their own.
pub struct PermissionRegistry {
    grants: RwLock<HashMap<String, HashSet<Capability>>>,
    audit: Arc<dyn AuditSink>,
}

impl PermissionRegistry {
    pub fn new() -> Self {
        Self::with_audit(Arc::new(NullAuditSink))
    }

    /// Create a registry that records denials to `audit`
    pub fn with_audit(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            grants: RwLock::new(HashMap::new()),
            audit,
        }
    }

    /// Replace the grant set for a plugin; unknown tags are dropped
    pub fn register_plugin<S: AsRef<str>>(&self, plugin_id: &str, requested: &[S]) {
        let mut granted = HashSet::new();
        for tag in requested {
            match Capability::from_tag(tag.as_ref()) {
                Some(cap) => {
                    granted.insert(cap);
                }
                None => {
                    tracing::warn!(
                        plugin = %plugin_id,
                        tag = %tag.as_ref(),
                        "Ignoring unknown permission tag"
                    );
                }
            }
        }

        let mut tags: Vec<&str> = granted.iter().map(Capability::tag).collect();
        tags.sort_unstable();
        tracing::info!(plugin = %plugin_id, permissions = ?tags, "Registered plugin permissions");

        self.write().insert(plugin_id.to_string(), granted);
    }

    /// Whether the plugin holds the capability; unregistered plugins hold nothing
    pub fn has_permission(&self, plugin_id: &str, capability: Capability) -> bool {
        if is_privileged(plugin_id) {
            return true;
        }

        match self.read().get(plugin_id) {
            Some(granted) => granted.contains(&capability),
            None => {
                tracing::debug!(plugin = %plugin_id, "Plugin has no registered permissions");
                false
            }
        }
    }

    /// Fail with [`PermissionDenied`] unless the plugin holds the capability
    pub fn require_permission(
        &self,
        plugin_id: &str,
        capability: Capability,
    ) -> Result<(), PermissionDenied> {
        if self.has_permission(plugin_id, capability) {
            return Ok(());
        }

        tracing::warn!(
            plugin = %plugin_id,
            capability = %capability,
            "Permission denied"
        );
        audit::emit(
            self.audit.as_ref(),
            audit::permission_denied(plugin_id, capability),
        );
        Err(PermissionDenied {
            plugin_id: plugin_id.to_string(),
            capability,
        })
    }

    /// Granted capabilities, sorted
    pub fn permissions(&self, plugin_id: &str) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self
            .read()
            .get(plugin_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default();
        caps.sort();
        caps
    }

    /// Remove all grants for a plugin; idempotent
    pub fn unregister_plugin(&self, plugin_id: &str) {
        if self.write().remove(plugin_id).is_some() {
            tracing::info!(plugin = %plugin_id, "Removed plugin permissions");
        }
    }

    /// Ids with a registered grant set, sorted
    pub fn registered_plugins(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.read().keys().cloned().collect();
        ids.sort();
        ids
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, HashSet<Capability>>> {
        self.grants.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<String, HashSet<Capability>>> {
        self.grants.write().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for PermissionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for PermissionRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PermissionRegistry")
            .field("plugins", &self.read().len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{AuditEventType, MemoryAuditSink};

    #[test]
    fn test_register_filters_unknown_tags() {
        let registry = PermissionRegistry::new();
        registry.register_plugin("json-tool", &["clipboard", "teleport", "fs"]);

        assert_eq!(
            registry.permissions("json-tool"),
            vec![Capability::Filesystem, Capability::Clipboard]
        );
        assert!(registry.has_permission("json-tool", Capability::Clipboard));
        assert!(!registry.has_permission("json-tool", Capability::Http));
    }

    #[test]
    fn test_register_replaces_previous_grants() {
        let registry = PermissionRegistry::new();
        registry.register_plugin("a", &["clipboard"]);
        registry.register_plugin("a", &["http"]);

        assert!(!registry.has_permission("a", Capability::Clipboard));
        assert!(registry.has_permission("a", Capability::Http));
    }

    #[test]
    fn test_unregistered_plugin_has_nothing() {
        let registry = PermissionRegistry::new();
        for cap in Capability::ALL {
            assert!(!registry.has_permission("ghost", cap));
        }
    }

    #[test]
    fn test_privileged_ids_bypass() {
        let registry = PermissionRegistry::new();
        for cap in Capability::ALL {
            assert!(registry.has_permission("builtin", cap));
            assert!(registry.require_permission("unknown", cap).is_ok());
        }
    }

    #[test]
    fn test_require_permission_message() {
        let registry = PermissionRegistry::new();
        registry.register_plugin("json-tool", &["fs"]);

        let err = registry
            .require_permission("json-tool", Capability::ProcessSpawn)
            .unwrap_err();
        let message = err.to_string();
        assert!(message.contains("json-tool"));
        assert!(message.contains("\"permissions\": [\"spawn\"]"));
        assert!(message.contains("package.json"));
    }

    #[test]
    fn test_denials_are_audited() {
        let sink = Arc::new(MemoryAuditSink::new());
        let registry = PermissionRegistry::with_audit(sink.clone());
        registry.register_plugin("a", &["fs"]);

        assert!(registry.require_permission("a", Capability::Filesystem).is_ok());
        assert!(registry.require_permission("a", Capability::Http).is_err());

        let denials = sink.find_by_type(AuditEventType::PermissionDenied);
        assert_eq!(denials.len(), 1);
        assert_eq!(denials[0].plugin, "a");
    }

    #[test]
    fn test_unregister_is_idempotent() {
        let registry = PermissionRegistry::new();
        registry.register_plugin("a", &["fs"]);
        registry.unregister_plugin("a");
        registry.unregister_plugin("a");

        assert!(!registry.has_permission("a", Capability::Filesystem));
        assert!(registry.registered_plugins().is_empty());
    }
}
