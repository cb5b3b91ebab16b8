//! Path confinement for plugin file and process access
//!
//! Every path a plugin supplies is resolved against the plugin's private
//! directory and must stay inside it after `..` removal and symlink
//! resolution.
//!
//! # Path Resolution Flow
//!
//! ```text
//! Input: "notes/../../other-plugin/secret"
//!           │
//!           ▼
//! ┌──────────────────────────────────┐
//! │  1. Join onto the plugin root    │
//! └──────────────────────────────────┘
//!           │
//!           ▼
//! ┌──────────────────────────────────┐
//! │  2. Normalize lexically          │
//! │     - drop `.`                   │
//! │     - resolve `..`               │
//! └──────────────────────────────────┘
//!           │
//!           ▼
//! ┌──────────────────────────────────┐
//! │  3. Canonicalize the deepest     │
//! │     existing ancestor            │
//! │     (follows symlinks)           │
//! └──────────────────────────────────┘
//!           │
//!           ▼
//! ┌──────────────────────────────────┐
//! │  4. Must start with the          │
//! │     canonical plugin root        │
//! └──────────────────────────────────┘
//!           │
//!           ▼
//! Output: PathTraversal (fails closed)
//! ```

use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Sandbox violations and resolution failures
///
/// Messages only ever contain the path as the plugin supplied it.
#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Path '{requested}' escapes the plugin directory")]
    PathTraversal { requested: String },

    #[error("Invalid command '{command}': must be a relative path starting with ./ or .\\")]
    InvalidCommand { command: String },

    #[error("Command not found in plugin directory: {command}")]
    CommandNotFound { command: String },

    #[error("Plugin directory is unavailable: {0}")]
    RootUnavailable(#[source] std::io::Error),
}

impl SandboxError {
    pub fn path_traversal(requested: impl Into<String>) -> Self {
        Self::PathTraversal {
            requested: requested.into(),
        }
    }

    /// Check if this is a security-related error
    pub fn is_security_violation(&self) -> bool {
        matches!(self, Self::PathTraversal { .. } | Self::InvalidCommand { .. })
    }
}

/// Resolves plugin-supplied paths inside one plugin directory
#[derive(Debug, Clone)]
pub struct PluginSandbox {
    root: PathBuf,
}

impl PluginSandbox {
    /// Create a sandbox rooted at `root`, creating the directory if needed
    pub fn new(root: impl AsRef<Path>) -> Result<Self, SandboxError> {
        let root = root.as_ref();
        std::fs::create_dir_all(root).map_err(SandboxError::RootUnavailable)?;
        let root = root.canonicalize().map_err(SandboxError::RootUnavailable)?;
        Ok(Self { root })
    }

    /// Canonical plugin directory
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a plugin-relative path, rejecting anything outside the root
    pub fn resolve(&self, requested: &str) -> Result<PathBuf, SandboxError> {
        let unified = requested.replace('\\', "/");
        let joined = self.root.join(&unified);
        let normalized = normalize_path(&joined);

        if !normalized.starts_with(&self.root) {
            return Err(SandboxError::path_traversal(requested));
        }

        let resolved = resolve_existing_prefix(&normalized);
        if !resolved.starts_with(&self.root) {
            return Err(SandboxError::path_traversal(requested));
        }

        Ok(resolved)
    }

    /// Validate a sidecar command and resolve it to an existing file
    pub fn resolve_command(&self, command: &str) -> Result<PathBuf, SandboxError> {
        if !(command.starts_with("./") || command.starts_with(".\\")) {
            return Err(SandboxError::InvalidCommand {
                command: command.to_string(),
            });
        }

        let resolved = self.resolve(command)?;
        if !resolved.is_file() {
            return Err(SandboxError::CommandNotFound {
                command: command.to_string(),
            });
        }
        Ok(resolved)
    }

    /// Express a resolved path relative to the root, for user-facing messages
    pub fn display_relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .map(|p| p.display().to_string())
            .unwrap_or_default()
    }
}

/// Normalize a path without touching the filesystem
///
/// - Removes redundant `.`
/// - Resolves `..` where possible
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut components = Vec::new();

    for component in path.components() {
        match component {
            Component::ParentDir => {
                if matches!(components.last(), Some(Component::Normal(_))) {
                    components.pop();
                } else {
                    components.push(component);
                }
            }
            Component::CurDir => {}
            _ => components.push(component),
        }
    }

    components.iter().collect()
}

/// Canonicalize the deepest existing ancestor and re-append the rest
fn resolve_existing_prefix(path: &Path) -> PathBuf {
    let mut existing = path.to_path_buf();
    let mut rest: Vec<std::ffi::OsString> = Vec::new();

    loop {
        if let Ok(canonical) = existing.canonicalize() {
            let mut resolved = canonical;
            for part in rest.iter().rev() {
                resolved.push(part);
            }
            return resolved;
        }
        match (existing.file_name().map(|n| n.to_os_string()), existing.parent()) {
            (Some(name), Some(parent)) => {
                rest.push(name);
                existing = parent.to_path_buf();
            }
            _ => return path.to_path_buf(),
        }
    }
}
