//! Handing links and files to the desktop
//!
//! Plugins may ask the host to open a link in the user's browser or mail
//! client, or to reveal one of their own files in the file manager. Only
//! `http`, `https` and `mailto` links are accepted; anything else (`file:`,
//! custom schemes registered by other apps) is refused before it reaches
//! an [`Opener`].

use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;

const ALLOWED_SCHEMES: [&str; 3] = ["http", "https", "mailto"];

#[derive(Debug, Error)]
#[error("Open failed: {0}")]
pub struct OpenError(pub String);

/// Opens links and reveals files on behalf of plugins
pub trait Opener: Send + Sync {
    fn open_external(&self, plugin_id: &str, url: &reqwest::Url) -> Result<(), OpenError>;

    /// `path` is already resolved inside the plugin's directory
    fn show_in_folder(&self, plugin_id: &str, path: &Path) -> Result<(), OpenError>;
}

/// Parse a plugin-supplied link, refusing schemes outside the allow list
pub fn parse_external_url(url: &str) -> Result<reqwest::Url, String> {
    let parsed = reqwest::Url::parse(url).map_err(|e| format!("Invalid URL '{url}': {e}"))?;
    if !ALLOWED_SCHEMES.contains(&parsed.scheme()) {
        return Err(format!("URL scheme '{}' cannot be opened", parsed.scheme()));
    }
    Ok(parsed)
}

/// Logs the request instead of opening anything
///
/// The default for headless hosts. Desktop shells install their own
/// [`Opener`] through the host builder.
#[derive(Debug, Default)]
pub struct LogOpener;

impl Opener for LogOpener {
    fn open_external(&self, plugin_id: &str, url: &reqwest::Url) -> Result<(), OpenError> {
        tracing::info!(plugin = %plugin_id, url = %url, "Open external link");
        Ok(())
    }

    fn show_in_folder(&self, plugin_id: &str, path: &Path) -> Result<(), OpenError> {
        tracing::info!(plugin = %plugin_id, path = %path.display(), "Show in folder");
        Ok(())
    }
}

/// Something a plugin asked the desktop to open
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Opened {
    External { plugin_id: String, url: String },
    Folder { plugin_id: String, path: PathBuf },
}

/// Records requests for inspection in tests
#[derive(Debug, Default)]
pub struct MemoryOpener {
    opened: Mutex<Vec<Opened>>,
}

impl MemoryOpener {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn opened(&self) -> Vec<Opened> {
        self.opened.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn push(&self, entry: Opened) {
        self.opened
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(entry);
    }
}

impl Opener for MemoryOpener {
    fn open_external(&self, plugin_id: &str, url: &reqwest::Url) -> Result<(), OpenError> {
        self.push(Opened::External {
            plugin_id: plugin_id.to_string(),
            url: url.to_string(),
        });
        Ok(())
    }

    fn show_in_folder(&self, plugin_id: &str, path: &Path) -> Result<(), OpenError> {
        self.push(Opened::Folder {
            plugin_id: plugin_id.to_string(),
            path: path.to_path_buf(),
        });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allowed_schemes() {
        assert!(parse_external_url("https://example.com/docs").is_ok());
        assert!(parse_external_url("http://localhost:5173").is_ok());
        assert!(parse_external_url("mailto:someone@example.com").is_ok());
    }

    #[test]
    fn test_rejected_links() {
        assert!(parse_external_url("file:///etc/passwd").is_err());
        assert!(parse_external_url("javascript:alert(1)").is_err());
        assert!(parse_external_url("vscode://open?file=x").is_err());
        assert!(parse_external_url("not a url").is_err());
    }
}
