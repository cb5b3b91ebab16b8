//! Shared fixtures for host integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use serde_json::json;
use std::io::{Cursor, Write};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use unihub_host::{
    FetchError, HostConfig, HostContext, MemoryAuditSink, MemoryClipboard, PackageFetcher,
    RecordingViewHost,
};
use zip::write::SimpleFileOptions;
use zip::ZipWriter;

/// Build a zip archive from `(name, content)` pairs
pub fn build_zip(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, content) in entries {
        writer
            .start_file(*name, SimpleFileOptions::default())
            .expect("start zip entry");
        writer.write_all(content).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// A minimal installable package
pub fn plugin_zip(id: &str, version: &str, permissions: &[&str]) -> Vec<u8> {
    let package = json!({
        "name": id,
        "version": version,
        "description": "test plugin",
        "unihub": {
            "id": id,
            "name": format!("{id} plugin"),
            "entry": "dist/index.html",
            "icon": "assets/icon.png",
            "permissions": permissions,
        }
    });
    build_zip(&[
        ("package.json", package.to_string().as_bytes()),
        ("dist/index.html", b"<html><body>hi</body></html>"),
        ("assets/icon.png", b"png"),
    ])
}

/// Fetcher replaying scripted results and counting calls
pub struct ScriptedFetcher {
    results: Mutex<Vec<Result<Vec<u8>, FetchError>>>,
    calls: Mutex<Vec<tokio::time::Instant>>,
}

impl ScriptedFetcher {
    pub fn new(mut results: Vec<Result<Vec<u8>, FetchError>>) -> Self {
        results.reverse();
        Self {
            results: Mutex::new(results),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<tokio::time::Instant> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PackageFetcher for ScriptedFetcher {
    async fn fetch(&self, _url: &str) -> Result<Vec<u8>, FetchError> {
        self.calls.lock().unwrap().push(tokio::time::Instant::now());
        self.results
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Err(FetchError::Other("no more scripted results".into())))
    }
}

pub struct TestHost {
    pub temp: TempDir,
    pub host: HostContext,
    pub views: Arc<RecordingViewHost>,
    pub audit: Arc<MemoryAuditSink>,
    pub clipboard: Arc<MemoryClipboard>,
}

pub fn test_host() -> TestHost {
    test_host_with(|builder| builder)
}

pub fn test_host_with(
    customize: impl FnOnce(unihub_host::HostContextBuilder) -> unihub_host::HostContextBuilder,
) -> TestHost {
    let temp = TempDir::new().expect("temp dir");
    host_in(temp, customize)
}

/// Build a host over an existing data directory
pub fn host_in(
    temp: TempDir,
    customize: impl FnOnce(unihub_host::HostContextBuilder) -> unihub_host::HostContextBuilder,
) -> TestHost {
    let views = Arc::new(RecordingViewHost::new());
    let audit = Arc::new(MemoryAuditSink::new());
    let clipboard = Arc::new(MemoryClipboard::new());

    let builder = HostContext::builder(HostConfig::new(temp.path()))
        .view_host(views.clone())
        .audit(audit.clone())
        .clipboard(clipboard.clone())
        .watch_dev(false);
    let host = customize(builder).build().expect("build host");

    TestHost {
        temp,
        host,
        views,
        audit,
        clipboard,
    }
}
