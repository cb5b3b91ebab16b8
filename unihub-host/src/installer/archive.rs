//! Archive extraction and package directory moves

use super::InstallError;
use std::fs::{self, File};
use std::io::{self, Cursor};
use std::path::{Path, PathBuf};
use zip::ZipArchive;

const S_IFMT: u32 = 0o170000;
const S_IFLNK: u32 = 0o120000;

/// Extract a zip archive into `dest`
///
/// Entries whose names escape `dest` and symlink entries are skipped.
/// Returns the number of files written.
pub(crate) fn extract_zip(bytes: &[u8], dest: &Path) -> Result<usize, InstallError> {
    let mut archive = ZipArchive::new(Cursor::new(bytes))
        .map_err(|e| InstallError::ArchiveInvalid(e.to_string()))?;
    fs::create_dir_all(dest)?;

    let mut written = 0;
    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| InstallError::ArchiveInvalid(e.to_string()))?;

        let Some(relative) = entry.enclosed_name() else {
            tracing::warn!(entry = %entry.name(), "Skipping archive entry outside the package root");
            continue;
        };
        if entry
            .unix_mode()
            .is_some_and(|mode| mode & S_IFMT == S_IFLNK)
        {
            tracing::warn!(entry = %entry.name(), "Skipping symlink in archive");
            continue;
        }

        let out = dest.join(&relative);
        if entry.is_dir() {
            fs::create_dir_all(&out)?;
            continue;
        }
        if let Some(parent) = out.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut file = File::create(&out)?;
        io::copy(&mut entry, &mut file)?;
        written += 1;
    }

    if written == 0 {
        return Err(InstallError::ArchiveInvalid("archive is empty".to_string()));
    }
    Ok(written)
}

/// Directory holding the manifest: the root itself, or a single wrapping folder
pub(crate) fn locate_package_root(extracted: &Path) -> Result<PathBuf, InstallError> {
    if has_manifest(extracted) {
        return Ok(extracted.to_path_buf());
    }

    let mut dirs = Vec::new();
    let mut files = 0;
    for entry in fs::read_dir(extracted)? {
        let entry = entry?;
        if entry.file_type()?.is_dir() {
            dirs.push(entry.path());
        } else {
            files += 1;
        }
    }
    if let ([only], 0) = (dirs.as_slice(), files) {
        if has_manifest(only) {
            return Ok(only.clone());
        }
    }

    Err(InstallError::ManifestMissing)
}

fn has_manifest(dir: &Path) -> bool {
    dir.join(super::manifest::PACKAGE_JSON).is_file()
        || dir.join(super::manifest::LEGACY_MANIFEST).is_file()
}

/// Move a staged package to its permanent home
///
/// Tries a rename first and falls back to a recursive copy. A copy that
/// fails part-way removes whatever it wrote.
pub(crate) fn promote(staged: &Path, dest: &Path) -> Result<(), InstallError> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)?;
    }
    match fs::rename(staged, dest) {
        Ok(()) => return Ok(()),
        Err(e) => {
            tracing::debug!(error = %e, "Rename failed, copying package instead");
        }
    }

    if let Err(e) = copy_dir_recursive(staged, dest) {
        if let Err(cleanup) = fs::remove_dir_all(dest) {
            tracing::warn!(path = %dest.display(), error = %cleanup, "Failed to clean up partial copy");
        }
        return Err(e.into());
    }
    Ok(())
}

fn copy_dir_recursive(from: &Path, to: &Path) -> io::Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let target = to.join(entry.file_name());
        let file_type = entry.file_type()?;
        if file_type.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

/// Mark bundled executables under `sidecar/` as executable
///
/// Files ending in `.exe` or without an extension qualify. Failures are
/// logged and do not abort the install.
pub(crate) fn mark_sidecars_executable(plugin_dir: &Path) -> usize {
    let sidecar = plugin_dir.join("sidecar");
    let Ok(entries) = fs::read_dir(&sidecar) else {
        return 0;
    };

    let mut marked = 0;
    for entry in entries.flatten() {
        let path = entry.path();
        if !path.is_file() {
            continue;
        }
        let name = entry.file_name().to_string_lossy().into_owned();
        if !(name.ends_with(".exe") || !name.contains('.')) {
            continue;
        }
        match set_executable(&path) {
            Ok(()) => marked += 1,
            Err(e) => {
                tracing::warn!(file = %name, error = %e, "Failed to mark sidecar executable");
            }
        }
    }
    marked
}

#[cfg(unix)]
fn set_executable(path: &Path) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o755))
}

#[cfg(not(unix))]
fn set_executable(_path: &Path) -> io::Result<()> {
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::TempDir;
    use zip::write::SimpleFileOptions;
    use zip::ZipWriter;

    fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (name, content) in entries {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(content.as_bytes()).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    #[test]
    fn test_extract_writes_files() {
        let temp = TempDir::new().unwrap();
        let bytes = build_zip(&[("package.json", "{}"), ("dist/index.html", "<p>")]);

        let written = extract_zip(&bytes, temp.path()).unwrap();
        assert_eq!(written, 2);
        assert_eq!(
            fs::read_to_string(temp.path().join("dist/index.html")).unwrap(),
            "<p>"
        );
    }

    #[test]
    fn test_extract_skips_escaping_entries() {
        let temp = TempDir::new().unwrap();
        let dest = temp.path().join("out");
        let bytes = build_zip(&[("package.json", "{}"), ("../evil.txt", "x")]);

        extract_zip(&bytes, &dest).unwrap();
        assert!(!temp.path().join("evil.txt").exists());
        assert!(dest.join("package.json").exists());
    }

    #[test]
    fn test_extract_rejects_garbage() {
        let temp = TempDir::new().unwrap();
        assert!(matches!(
            extract_zip(b"not a zip", temp.path()),
            Err(InstallError::ArchiveInvalid(_))
        ));
    }

    #[test]
    fn test_locate_root_in_wrapping_folder() {
        let temp = TempDir::new().unwrap();
        let bytes = build_zip(&[("my-plugin/package.json", "{}"), ("my-plugin/index.html", "")]);
        extract_zip(&bytes, temp.path()).unwrap();

        let root = locate_package_root(temp.path()).unwrap();
        assert_eq!(root, temp.path().join("my-plugin"));
    }

    #[test]
    fn test_locate_root_without_manifest() {
        let temp = TempDir::new().unwrap();
        let bytes = build_zip(&[("index.html", "")]);
        extract_zip(&bytes, temp.path()).unwrap();
        assert!(matches!(
            locate_package_root(temp.path()),
            Err(InstallError::ManifestMissing)
        ));
    }

    #[test]
    fn test_promote_moves_directory() {
        let temp = TempDir::new().unwrap();
        let staged = temp.path().join("staged");
        fs::create_dir_all(staged.join("sub")).unwrap();
        fs::write(staged.join("sub/a.txt"), "a").unwrap();

        let dest = temp.path().join("plugins/p");
        promote(&staged, &dest).unwrap();
        assert!(!staged.exists());
        assert_eq!(fs::read_to_string(dest.join("sub/a.txt")).unwrap(), "a");
    }

    #[cfg(unix)]
    #[test]
    fn test_mark_sidecars_executable() {
        use std::os::unix::fs::PermissionsExt;

        let temp = TempDir::new().unwrap();
        let sidecar = temp.path().join("sidecar");
        fs::create_dir_all(&sidecar).unwrap();
        fs::write(sidecar.join("tool"), "#!/bin/sh").unwrap();
        fs::write(sidecar.join("tool.exe"), "").unwrap();
        fs::write(sidecar.join("README.md"), "").unwrap();

        assert_eq!(mark_sidecars_executable(temp.path()), 2);
        let mode = fs::metadata(sidecar.join("tool")).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        let mode = fs::metadata(sidecar.join("README.md")).unwrap().permissions().mode();
        assert_ne!(mode & 0o111, 0o111);
    }
}
