//! Manifest discovery and `package.json` merging

use super::InstallError;
use serde::Deserialize;
use std::path::Path;
use unihub_plugin_api::{Author, DevConfig, IconKind, PluginManifest};

pub(crate) const PACKAGE_JSON: &str = "package.json";
pub(crate) const LEGACY_MANIFEST: &str = "manifest.json";
const LEGACY_DEFAULT_ENTRY: &str = "frontend/index.html";

#[derive(Debug, Default, Deserialize)]
struct PackageJson {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    author: Option<Author>,
    keywords: Option<Vec<String>>,
    homepage: Option<String>,
    repository: Option<Repository>,
    license: Option<String>,
    unihub: Option<UnihubSection>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Repository {
    Url(String),
    Detailed {
        #[serde(default)]
        url: Option<String>,
    },
}

impl Repository {
    fn url(self) -> Option<String> {
        match self {
            Repository::Url(url) => Some(url),
            Repository::Detailed { url } => url,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UnihubSection {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    author: Option<Author>,
    entry: Option<String>,
    icon: Option<String>,
    icon_kind: Option<IconKind>,
    category: Option<String>,
    keywords: Option<Vec<String>>,
    permissions: Option<Vec<String>>,
    homepage: Option<String>,
    repository: Option<String>,
    license: Option<String>,
    dev: Option<DevConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LegacyManifest {
    #[serde(default)]
    id: String,
    #[serde(default)]
    name: String,
    #[serde(default)]
    version: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    author: Option<Author>,
    main: Option<String>,
    frontend: Option<LegacyFrontend>,
    icon: Option<String>,
    icon_kind: Option<IconKind>,
    category: Option<String>,
    #[serde(default)]
    keywords: Vec<String>,
    #[serde(default)]
    permissions: Vec<String>,
    homepage: Option<String>,
    repository: Option<String>,
    license: Option<String>,
    dev: Option<DevConfig>,
}

#[derive(Debug, Deserialize)]
struct LegacyFrontend {
    entry: Option<String>,
}

/// Read the effective manifest of an extracted package
///
/// `package.json` takes precedence and must carry a `unihub` object;
/// otherwise a legacy `manifest.json` is used.
pub(crate) fn read_manifest(package_root: &Path) -> Result<PluginManifest, InstallError> {
    let package_json = package_root.join(PACKAGE_JSON);
    if package_json.is_file() {
        let content = std::fs::read_to_string(&package_json)?;
        let package: PackageJson = serde_json::from_str(&content)
            .map_err(|e| InstallError::ManifestInvalid(format!("package.json: {}", e)))?;
        return merge_package_json(package);
    }

    let legacy = package_root.join(LEGACY_MANIFEST);
    if legacy.is_file() {
        let content = std::fs::read_to_string(&legacy)?;
        let manifest: LegacyManifest = serde_json::from_str(&content)
            .map_err(|e| InstallError::ManifestInvalid(format!("manifest.json: {}", e)))?;
        return Ok(from_legacy(manifest));
    }

    Err(InstallError::ManifestMissing)
}

/// Fill the gaps of the `unihub` section from the top-level package fields
fn merge_package_json(package: PackageJson) -> Result<PluginManifest, InstallError> {
    let PackageJson {
        name,
        version,
        description,
        author,
        keywords,
        homepage,
        repository,
        license,
        unihub,
    } = package;
    let unihub = unihub.ok_or_else(|| {
        InstallError::ManifestInvalid("package.json is missing the unihub section".to_string())
    })?;

    Ok(PluginManifest {
        id: unihub.id.unwrap_or_default(),
        name: first_non_empty(unihub.name, name).unwrap_or_default(),
        version: first_non_empty(unihub.version, version).unwrap_or_default(),
        description: first_non_empty(unihub.description, description).unwrap_or_default(),
        author: unihub.author.or(author).unwrap_or_default(),
        entry: unihub.entry.unwrap_or_default(),
        icon: unihub.icon.filter(|icon| !icon.is_empty()),
        icon_kind: unihub.icon_kind,
        category: unihub
            .category
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "tool".to_string()),
        keywords: unihub.keywords.or(keywords).unwrap_or_default(),
        permissions: unihub.permissions.unwrap_or_default(),
        homepage: first_non_empty(unihub.homepage, homepage),
        repository: first_non_empty(unihub.repository, repository.and_then(Repository::url)),
        license: first_non_empty(unihub.license, license),
        dev: unihub.dev,
    })
}

fn from_legacy(legacy: LegacyManifest) -> PluginManifest {
    let entry = legacy
        .main
        .filter(|m| !m.is_empty())
        .or_else(|| legacy.frontend.and_then(|f| f.entry))
        .filter(|e| !e.is_empty())
        .unwrap_or_else(|| LEGACY_DEFAULT_ENTRY.to_string());

    PluginManifest {
        id: legacy.id,
        name: legacy.name,
        version: legacy.version,
        description: legacy.description,
        author: legacy.author.unwrap_or_default(),
        entry,
        icon: legacy.icon.filter(|icon| !icon.is_empty()),
        icon_kind: legacy.icon_kind,
        category: legacy
            .category
            .filter(|c| !c.is_empty())
            .unwrap_or_else(|| "tool".to_string()),
        keywords: legacy.keywords,
        permissions: legacy.permissions,
        homepage: legacy.homepage,
        repository: legacy.repository,
        license: legacy.license,
        dev: legacy.dev,
    }
}

fn first_non_empty(primary: Option<String>, fallback: Option<String>) -> Option<String> {
    primary
        .filter(|s| !s.is_empty())
        .or_else(|| fallback.filter(|s| !s.is_empty()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn read(files: &[(&str, &str)]) -> Result<PluginManifest, InstallError> {
        let temp = TempDir::new().unwrap();
        for (name, content) in files {
            std::fs::write(temp.path().join(name), content).unwrap();
        }
        read_manifest(temp.path())
    }

    #[test]
    fn test_top_level_version_fills_gap() {
        let manifest = read(&[(
            "package.json",
            r#"{
                "name": "json-tool",
                "version": "2.0.0",
                "description": "Format JSON",
                "author": "Ada",
                "keywords": ["json"],
                "license": "MIT",
                "repository": {"type": "git", "url": "https://example.com/repo.git"},
                "unihub": {"id": "json-tool", "entry": "dist/index.html", "permissions": ["clipboard"]}
            }"#,
        )])
        .unwrap();

        assert_eq!(manifest.id, "json-tool");
        assert_eq!(manifest.name, "json-tool");
        assert_eq!(manifest.version, "2.0.0");
        assert_eq!(manifest.description, "Format JSON");
        assert_eq!(manifest.author.name(), "Ada");
        assert_eq!(manifest.keywords, vec!["json"]);
        assert_eq!(manifest.license.as_deref(), Some("MIT"));
        assert_eq!(manifest.repository.as_deref(), Some("https://example.com/repo.git"));
        assert_eq!(manifest.category, "tool");
        assert_eq!(manifest.permissions, vec!["clipboard"]);
    }

    #[test]
    fn test_manifest_version_wins() {
        let manifest = read(&[(
            "package.json",
            r#"{
                "name": "pkg-name",
                "version": "2.0.0",
                "unihub": {"id": "x", "name": "Pretty Name", "version": "3.1.0", "entry": "index.html"}
            }"#,
        )])
        .unwrap();

        assert_eq!(manifest.version, "3.1.0");
        assert_eq!(manifest.name, "Pretty Name");
        assert_eq!(manifest.author.name(), "Unknown");
    }

    #[test]
    fn test_repository_string() {
        let manifest = read(&[(
            "package.json",
            r#"{"version": "1.0.0", "repository": "github:ada/tool",
                "unihub": {"id": "x", "name": "X", "entry": "index.html"}}"#,
        )])
        .unwrap();
        assert_eq!(manifest.repository.as_deref(), Some("github:ada/tool"));
    }

    #[test]
    fn test_package_json_without_unihub_section() {
        let err = read(&[("package.json", r#"{"name": "x", "version": "1.0.0"}"#)]).unwrap_err();
        assert!(err.to_string().contains("missing the unihub section"));
    }

    #[test]
    fn test_legacy_manifest_entry_resolution() {
        let manifest = read(&[(
            "manifest.json",
            r#"{"id": "old", "name": "Old", "version": "0.1.0", "main": "app.html"}"#,
        )])
        .unwrap();
        assert_eq!(manifest.entry, "app.html");

        let manifest = read(&[(
            "manifest.json",
            r#"{"id": "old", "name": "Old", "version": "0.1.0", "frontend": {"entry": "ui/index.html"}}"#,
        )])
        .unwrap();
        assert_eq!(manifest.entry, "ui/index.html");

        let manifest = read(&[(
            "manifest.json",
            r#"{"id": "old", "name": "Old", "version": "0.1.0"}"#,
        )])
        .unwrap();
        assert_eq!(manifest.entry, "frontend/index.html");
    }

    #[test]
    fn test_package_json_takes_precedence() {
        let manifest = read(&[
            (
                "package.json",
                r#"{"version": "1.0.0", "unihub": {"id": "new", "name": "New", "entry": "index.html"}}"#,
            ),
            ("manifest.json", r#"{"id": "old", "name": "Old", "version": "0.1.0"}"#),
        ])
        .unwrap();
        assert_eq!(manifest.id, "new");
    }

    #[test]
    fn test_no_manifest() {
        assert!(matches!(read(&[]), Err(InstallError::ManifestMissing)));
    }

    #[test]
    fn test_malformed_json() {
        assert!(matches!(
            read(&[("package.json", "{ nope")]),
            Err(InstallError::ManifestInvalid(_))
        ));
    }
}
