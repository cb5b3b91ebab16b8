//! Capability tags plugins declare in their manifest

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Plugin ids that bypass every capability check.
pub const PRIVILEGED_PLUGIN_IDS: [&str; 2] = ["builtin", "unknown"];

/// Returns true for ids that are never subject to capability checks
pub fn is_privileged(plugin_id: &str) -> bool {
    PRIVILEGED_PLUGIN_IDS.contains(&plugin_id)
}

/// A privileged host operation a plugin may be granted.
///
/// The serialized form is the short tag used in `package.json`
/// (`fs`, `clipboard`, `http`, `notification`, `spawn`, `system`).
/// The long names (`filesystem`, `process-spawn`, `system-info`) are
/// accepted on input.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Capability {
    #[serde(rename = "fs", alias = "filesystem")]
    Filesystem,
    #[serde(rename = "clipboard")]
    Clipboard,
    #[serde(rename = "http")]
    Http,
    #[serde(rename = "notification")]
    Notification,
    #[serde(rename = "spawn", alias = "process-spawn")]
    ProcessSpawn,
    #[serde(rename = "system", alias = "system-info")]
    SystemInfo,
}

impl Capability {
    /// Every capability, in declaration order
    pub const ALL: [Capability; 6] = [
        Capability::Filesystem,
        Capability::Clipboard,
        Capability::Http,
        Capability::Notification,
        Capability::ProcessSpawn,
        Capability::SystemInfo,
    ];

    /// The manifest tag for this capability
    pub fn tag(&self) -> &'static str {
        match self {
            Capability::Filesystem => "fs",
            Capability::Clipboard => "clipboard",
            Capability::Http => "http",
            Capability::Notification => "notification",
            Capability::ProcessSpawn => "spawn",
            Capability::SystemInfo => "system",
        }
    }

    /// Parse a manifest tag, accepting the long aliases
    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag.trim() {
            "fs" | "filesystem" => Some(Capability::Filesystem),
            "clipboard" => Some(Capability::Clipboard),
            "http" => Some(Capability::Http),
            "notification" => Some(Capability::Notification),
            "spawn" | "process-spawn" => Some(Capability::ProcessSpawn),
            "system" | "system-info" => Some(Capability::SystemInfo),
            _ => None,
        }
    }

    /// Human-readable description shown when listing grants
    pub fn description(&self) -> &'static str {
        match self {
            Capability::Filesystem => "Access the file system (read and write files, create directories)",
            Capability::Clipboard => "Access the clipboard (read and write text and images)",
            Capability::Http => "Make HTTP requests (access network resources)",
            Capability::Notification => "Show system notifications",
            Capability::ProcessSpawn => "Run child processes (sidecar programs)",
            Capability::SystemInfo => "Read system information (platform, paths)",
        }
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.tag())
    }
}

/// Error returned when parsing an unknown capability tag
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown capability: {0}")]
pub struct UnknownCapability(pub String);

impl FromStr for Capability {
    type Err = UnknownCapability;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Capability::from_tag(s).ok_or_else(|| UnknownCapability(s.to_string()))
    }
}
