//! Permission system for plugin capabilities
//!
//! Every privileged broker operation passes through
//! [`PermissionRegistry::require_permission`] before it touches the host.
//!
//! ```text
//!   manifest "permissions": ["fs", "clipboard", "teleport"]
//!                  │
//!                  ▼  register_plugin (unknown tags dropped)
//!   ┌──────────────────────────────────────┐
//!   │ PermissionRegistry                   │
//!   │   json-tool → {fs, clipboard}        │
//!   │   builtin / unknown → (bypass)       │
//!   └──────────────────────────────────────┘
//!                  │
//!                  ▼  require_permission(id, cap)
//!        Ok(())  or  PermissionDenied (audited)
//! ```

pub mod registry;

pub use registry::{PermissionDenied, PermissionRegistry};
pub use unihub_plugin_api::Capability;
