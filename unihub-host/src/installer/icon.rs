//! Icon reference resolution
//!
//! File icons are rewritten to `plugin://<id>/<path>` so the shell can
//! render them without filesystem access. Everything else passes through.

use std::path::{Component, Path};
use unihub_plugin_api::{IconKind, PLUGIN_PROTOCOL};

/// Resolve a manifest icon into the value stored with the record
///
/// An explicit `kind` wins. Without one the legacy heuristic applies, with
/// anything shaped like a file path always treated as a file. A file icon
/// that escapes the plugin directory is dropped.
pub fn resolve_icon(plugin_id: &str, icon: Option<&str>, kind: Option<IconKind>) -> Option<String> {
    let icon = icon?.trim();
    if icon.is_empty() {
        return None;
    }

    let kind = kind.unwrap_or_else(|| classify(icon));
    match kind {
        IconKind::File => file_reference(plugin_id, icon),
        IconKind::Emoji | IconKind::Svg | IconKind::Url => Some(icon.to_string()),
    }
}

/// Legacy content sniffing for manifests without `iconKind`
pub fn classify(icon: &str) -> IconKind {
    if icon.starts_with("http://") || icon.starts_with("https://") || icon.starts_with("data:") {
        return IconKind::Url;
    }
    if looks_like_path(icon) {
        return IconKind::File;
    }
    if is_svg_path_data(icon) {
        return IconKind::Svg;
    }
    if icon.encode_utf16().count() <= 4 {
        return IconKind::Emoji;
    }
    IconKind::File
}

fn looks_like_path(icon: &str) -> bool {
    if icon.contains('/') || icon.contains('\\') {
        return true;
    }
    match icon.rsplit_once('.') {
        Some((stem, ext)) => {
            !stem.is_empty()
                && (1..=5).contains(&ext.len())
                && ext.chars().all(|c| c.is_ascii_alphanumeric())
        }
        None => false,
    }
}

fn is_svg_path_data(icon: &str) -> bool {
    let mut chars = icon.chars();
    match (chars.next(), chars.next()) {
        (Some('M' | 'm'), Some(next)) => {
            next.is_ascii_digit() || matches!(next, ' ' | '-' | '.' | ',')
        }
        _ => false,
    }
}

fn file_reference(plugin_id: &str, icon: &str) -> Option<String> {
    let normalized = icon.replace('\\', "/");
    let relative = normalized
        .strip_prefix("./")
        .or_else(|| normalized.strip_prefix('/'))
        .unwrap_or(&normalized);

    let escapes = Path::new(relative).components().any(|c| {
        matches!(
            c,
            Component::ParentDir | Component::RootDir | Component::Prefix(_)
        )
    });
    if escapes || relative.is_empty() {
        tracing::warn!(plugin = %plugin_id, icon = %icon, "Dropping icon outside the plugin directory");
        return None;
    }

    Some(format!("{}{}/{}", PLUGIN_PROTOCOL, plugin_id, relative))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_legacy_pass_through() {
        assert_eq!(resolve_icon("p", Some("🔧"), None).as_deref(), Some("🔧"));
        assert_eq!(
            resolve_icon("p", Some("https://cdn.example.com/i.png"), None).as_deref(),
            Some("https://cdn.example.com/i.png")
        );
        assert_eq!(
            resolve_icon("p", Some("data:image/png;base64,AAAA"), None).as_deref(),
            Some("data:image/png;base64,AAAA")
        );
        assert_eq!(
            resolve_icon("p", Some("M12 2L2 7l10 5"), None).as_deref(),
            Some("M12 2L2 7l10 5")
        );
    }

    #[test]
    fn test_legacy_files() {
        assert_eq!(
            resolve_icon("p", Some("./assets/icon.png"), None).as_deref(),
            Some("plugin://p/assets/icon.png")
        );
        assert_eq!(
            resolve_icon("p", Some("/icon.svg"), None).as_deref(),
            Some("plugin://p/icon.svg")
        );
        // short names and names starting with 'm' are still files
        assert_eq!(
            resolve_icon("p", Some("m.png"), None).as_deref(),
            Some("plugin://p/m.png")
        );
        assert_eq!(
            resolve_icon("p", Some("menu.svg"), None).as_deref(),
            Some("plugin://p/menu.svg")
        );
        assert_eq!(
            resolve_icon("p", Some("m/a"), None).as_deref(),
            Some("plugin://p/m/a")
        );
    }

    #[test]
    fn test_explicit_kind_wins() {
        assert_eq!(
            resolve_icon("p", Some("logo"), Some(IconKind::File)).as_deref(),
            Some("plugin://p/logo")
        );
        assert_eq!(
            resolve_icon("p", Some("icon.png"), Some(IconKind::Emoji)).as_deref(),
            Some("icon.png")
        );
    }

    #[test]
    fn test_escaping_file_icon_is_dropped() {
        assert!(resolve_icon("p", Some("../other/icon.png"), None).is_none());
        assert!(resolve_icon("p", Some("assets/../../x.png"), Some(IconKind::File)).is_none());
    }

    #[test]
    fn test_empty_icon() {
        assert!(resolve_icon("p", None, None).is_none());
        assert!(resolve_icon("p", Some("  "), None).is_none());
    }
}
