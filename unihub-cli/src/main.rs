//! `unihub`: manage installed plugins without the desktop shell
//!
//! ```text
//! unihub install https://example.com/calc.zip
//! unihub install ./calc.zip
//! unihub list
//! unihub disable calc
//! unihub permissions calc
//! unihub uninstall calc
//! ```
//!
//! Every command prints the host's `{success, data, error}` response as JSON
//! on stdout and exits non-zero when `success` is false.

mod logging;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use logging::LogFormat;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use unihub_host::{
    FileAuditSink, HeadlessViewHost, HostConfig, HostContext, MemoryClipboard, ShellRequest,
};

#[derive(Parser, Debug)]
#[command(name = "unihub", version, about = "Manage UniHub plugins")]
struct Cli {
    /// Root directory for plugins and host state
    #[arg(long, global = true, env = "UNIHUB_DATA_DIR")]
    data_dir: Option<PathBuf>,

    /// JSON file with host settings
    #[arg(long, global = true, env = "UNIHUB_CONFIG")]
    config: Option<PathBuf>,

    #[arg(long, global = true, value_enum, default_value_t = LogFormat::Compact)]
    log_format: LogFormat,

    /// Enable debug logs
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Install a plugin package from a URL or a local zip file
    Install {
        /// http(s) URL or path to a .zip
        source: String,
    },
    /// Remove an installed plugin and its files
    Uninstall { plugin_id: String },
    /// List installed plugins
    List,
    Enable { plugin_id: String },
    Disable { plugin_id: String },
    /// Show the capabilities granted to a plugin
    Permissions { plugin_id: String },
    #[command(subcommand)]
    Favorites(FavoritesCommand),
    /// Show recently opened plugins
    Recents {
        #[arg(long)]
        limit: Option<usize>,
        /// Forget the history instead of printing it
        #[arg(long)]
        clear: bool,
    },
}

#[derive(Subcommand, Debug)]
enum FavoritesCommand {
    Add { plugin_id: String },
    Remove { plugin_id: String },
    List,
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

impl Command {
    fn into_request(self) -> Result<ShellRequest> {
        let request = match self {
            Command::Install { source } if is_remote(&source) => {
                ShellRequest::InstallFromUrl { url: source }
            }
            Command::Install { source } => {
                let path = Path::new(&source);
                let bytes = std::fs::read(path)
                    .with_context(|| format!("Cannot read package {}", path.display()))?;
                let label = path
                    .file_name()
                    .map(|name| name.to_string_lossy().into_owned())
                    .unwrap_or(source);
                ShellRequest::InstallFromBuffer {
                    bytes,
                    source: label,
                }
            }
            Command::Uninstall { plugin_id } => ShellRequest::Uninstall { plugin_id },
            Command::List => ShellRequest::ListPlugins,
            Command::Enable { plugin_id } => ShellRequest::SetEnabled {
                plugin_id,
                enabled: true,
            },
            Command::Disable { plugin_id } => ShellRequest::SetEnabled {
                plugin_id,
                enabled: false,
            },
            Command::Permissions { plugin_id } => ShellRequest::Permissions { plugin_id },
            Command::Favorites(FavoritesCommand::Add { plugin_id }) => {
                ShellRequest::AddFavorite { plugin_id }
            }
            Command::Favorites(FavoritesCommand::Remove { plugin_id }) => {
                ShellRequest::RemoveFavorite { plugin_id }
            }
            Command::Favorites(FavoritesCommand::List) => ShellRequest::ListFavorites,
            Command::Recents { clear: true, .. } => ShellRequest::ClearRecents,
            Command::Recents { limit, .. } => ShellRequest::ListRecents { limit },
        };
        Ok(request)
    }
}

fn load_config(cli: &Cli) -> Result<HostConfig> {
    let mut config = match &cli.config {
        Some(path) => HostConfig::load(path)?,
        None => HostConfig::default_for_app("unihub"),
    };
    if let Some(dir) = &cli.data_dir {
        config.data_dir = dir.clone();
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    logging::init(cli.log_format, if cli.verbose { "debug" } else { "info" });

    let config = load_config(&cli)?;
    tracing::debug!(data_dir = %config.data_dir.display(), "Using data directory");

    let audit = FileAuditSink::new(config.audit_log_path())
        .with_context(|| format!("Cannot open audit log {}", config.audit_log_path().display()))?;
    let host = HostContext::builder(config)
        .view_host(Arc::new(HeadlessViewHost::new()))
        .clipboard(Arc::new(MemoryClipboard::new()))
        .audit(Arc::new(audit))
        .watch_dev(false)
        .build()
        .context("Cannot start plugin host")?;

    let request = cli.command.into_request()?;
    let method = request.method();
    let response = host.handle(request).await;
    host.shutdown().await;

    println!("{}", serde_json::to_string_pretty(&response)?);
    if !response.success {
        bail!(
            "{} failed: {}",
            method,
            response.error.unwrap_or_else(|| "unknown error".into())
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(std::iter::once("unihub").chain(args.iter().copied()))
            .expect("parse")
    }

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_url_install() {
        let cli = parse(&["install", "https://example.com/calc.zip"]);
        assert_eq!(
            cli.command.into_request().unwrap(),
            ShellRequest::InstallFromUrl {
                url: "https://example.com/calc.zip".into()
            }
        );
    }

    #[test]
    fn test_file_install_reads_bytes() {
        let dir = std::env::temp_dir().join(format!("unihub-cli-test-{}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        let package = dir.join("calc.zip");
        std::fs::write(&package, b"PK").unwrap();

        let cli = parse(&["install", package.to_str().unwrap()]);
        let request = cli.command.into_request().unwrap();
        std::fs::remove_dir_all(&dir).ok();

        assert_eq!(
            request,
            ShellRequest::InstallFromBuffer {
                bytes: b"PK".to_vec(),
                source: "calc.zip".into()
            }
        );
    }

    #[test]
    fn test_missing_file() {
        let cli = parse(&["install", "/definitely/not/here.zip"]);
        assert!(cli.command.into_request().is_err());
    }

    #[test]
    fn test_toggle_and_recents() {
        assert_eq!(
            parse(&["disable", "calc"]).command.into_request().unwrap(),
            ShellRequest::SetEnabled {
                plugin_id: "calc".into(),
                enabled: false
            }
        );
        assert_eq!(
            parse(&["recents", "--limit", "3"]).command.into_request().unwrap(),
            ShellRequest::ListRecents { limit: Some(3) }
        );
        assert_eq!(
            parse(&["recents", "--clear"]).command.into_request().unwrap(),
            ShellRequest::ClearRecents
        );
    }

    #[test]
    fn test_data_dir_overrides_config() {
        let cli = parse(&["--data-dir", "/tmp/unihub-data", "list"]);
        let config = load_config(&cli).unwrap();
        assert_eq!(config.data_dir, PathBuf::from("/tmp/unihub-data"));
    }
}
