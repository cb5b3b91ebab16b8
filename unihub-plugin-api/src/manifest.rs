//! Plugin manifest and installed-plugin record

use crate::capability::{Capability, PRIVILEGED_PLUGIN_IDS};
use serde::{Deserialize, Serialize};
use std::path::{Component, Path};
use thiserror::Error;

/// Manifest validation errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ManifestError {
    #[error("manifest field '{0}' is missing or empty")]
    MissingField(&'static str),

    #[error("invalid plugin id '{id}': {reason}")]
    InvalidId { id: String, reason: String },

    #[error("invalid entry '{entry}': {reason}")]
    InvalidEntry { entry: String, reason: String },
}

/// Plugin author, either a bare name or a structured record
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Author {
    Name(String),
    Detailed {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        email: Option<String>,
    },
}

impl Author {
    pub fn name(&self) -> &str {
        match self {
            Author::Name(name) => name,
            Author::Detailed { name, .. } => name,
        }
    }
}

impl Default for Author {
    fn default() -> Self {
        Author::Name("Unknown".to_string())
    }
}

/// How the `icon` field should be interpreted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IconKind {
    Emoji,
    Svg,
    Url,
    File,
}

/// Developer redirect declared by the manifest
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DevConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    #[serde(default)]
    pub auto_reload: bool,
}

impl DevConfig {
    /// The dev url, when the redirect is active
    pub fn active_url(&self) -> Option<&str> {
        if self.enabled {
            self.url.as_deref().filter(|u| !u.is_empty())
        } else {
            None
        }
    }
}

fn default_category() -> String {
    "tool".to_string()
}

/// Plugin manifest as stored with an installed plugin (camelCase on disk)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PluginManifest {
    pub id: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub version: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub author: Author,

    /// Launchable resource, relative to the plugin directory
    #[serde(default)]
    pub entry: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon_kind: Option<IconKind>,

    #[serde(default = "default_category")]
    pub category: String,

    #[serde(default)]
    pub keywords: Vec<String>,

    /// Requested capability tags, as written by the author
    #[serde(default)]
    pub permissions: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub homepage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub repository: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub license: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dev: Option<DevConfig>,
}

impl PluginManifest {
    /// Create a manifest with the required fields set
    pub fn new(
        id: impl Into<String>,
        name: impl Into<String>,
        version: impl Into<String>,
        entry: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            version: version.into(),
            description: String::new(),
            author: Author::default(),
            entry: entry.into(),
            icon: None,
            icon_kind: None,
            category: default_category(),
            keywords: Vec::new(),
            permissions: Vec::new(),
            homepage: None,
            repository: None,
            license: None,
            dev: None,
        }
    }

    /// Add a requested permission tag
    pub fn permission(mut self, tag: impl Into<String>) -> Self {
        self.permissions.push(tag.into());
        self
    }

    /// Set the icon
    pub fn icon(mut self, icon: impl Into<String>, kind: Option<IconKind>) -> Self {
        self.icon = Some(icon.into());
        self.icon_kind = kind;
        self
    }

    /// Recognized capabilities; unknown tags are dropped
    pub fn capabilities(&self) -> Vec<Capability> {
        let mut caps: Vec<Capability> = self
            .permissions
            .iter()
            .filter_map(|tag| Capability::from_tag(tag))
            .collect();
        caps.sort();
        caps.dedup();
        caps
    }

    /// Check the invariants an installable manifest must satisfy
    pub fn validate(&self) -> Result<(), ManifestError> {
        validate_plugin_id(&self.id)?;
        if self.name.trim().is_empty() {
            return Err(ManifestError::MissingField("name"));
        }
        if self.version.trim().is_empty() {
            return Err(ManifestError::MissingField("version"));
        }
        validate_entry(&self.entry)
    }
}

/// A plugin id must be one path-safe segment and not a reserved id
pub fn validate_plugin_id(id: &str) -> Result<(), ManifestError> {
    let invalid = |reason: &str| ManifestError::InvalidId {
        id: id.to_string(),
        reason: reason.to_string(),
    };

    if id.is_empty() {
        return Err(ManifestError::MissingField("id"));
    }
    if id == "." || id == ".." {
        return Err(invalid("not a valid directory name"));
    }
    if !id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
    {
        return Err(invalid(
            "only ASCII letters, digits, '-', '_' and '.' are allowed",
        ));
    }
    if PRIVILEGED_PLUGIN_IDS.contains(&id) {
        return Err(invalid("reserved id"));
    }
    Ok(())
}

/// The entry must be a relative path that cannot climb out of the plugin directory
pub fn validate_entry(entry: &str) -> Result<(), ManifestError> {
    if entry.trim().is_empty() {
        return Err(ManifestError::MissingField("entry"));
    }
    let invalid = |reason: &str| ManifestError::InvalidEntry {
        entry: entry.to_string(),
        reason: reason.to_string(),
    };
    let normalized = entry.replace('\\', "/");
    for component in Path::new(&normalized).components() {
        match component {
            Component::Normal(_) | Component::CurDir => {}
            Component::ParentDir => return Err(invalid("must not contain '..'")),
            Component::RootDir | Component::Prefix(_) => {
                return Err(invalid("must be relative to the plugin directory"))
            }
        }
    }
    Ok(())
}

/// Where an installed plugin came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PluginSource {
    Local,
    Url,
}

impl PluginSource {
    /// Classify a source label (`http...` labels are urls)
    pub fn from_label(label: &str) -> Self {
        if label.starts_with("http") {
            PluginSource::Url
        } else {
            PluginSource::Local
        }
    }
}

/// One entry of the installed-plugin registry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstalledPluginRecord {
    pub id: String,
    pub version: String,
    pub enabled: bool,
    /// RFC 3339 timestamp
    pub installed_at: String,
    pub source: PluginSource,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_url: Option<String>,
    /// BLAKE3 digest of the installed archive
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,
    pub metadata: PluginManifest,
}
