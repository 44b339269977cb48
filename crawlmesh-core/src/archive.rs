//! Bundle archive packing and unpacking
//!
//! Bundles travel as zip archives. A crawler packs its staging directory,
//! the coordinator and every worker unpack it into a per-client directory.

use std::fs::File;
use std::path::Path;
use thiserror::Error;

/// Errors raised while building, unpacking or reading a bundle
#[derive(Debug, Error)]
pub enum BundleError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Failed to walk bundle directory: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("Failed to parse manifest: {0}")]
    ManifestParse(#[from] serde_json::Error),

    #[error("Invalid manifest: {0}")]
    InvalidManifest(String),
}

/// Zips every file below `src_dir` into `archive_path`
///
/// Entry names are relative to `src_dir` and always use forward slashes.
/// Returns the number of files written.
pub fn pack_dir(src_dir: &Path, archive_path: &Path) -> Result<usize, BundleError> {
    let file = File::create(archive_path)?;
    let mut zip = zip::ZipWriter::new(file);

    let options = zip::write::SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated)
        .unix_permissions(0o644);

    let mut count = 0;
    for entry in walkdir::WalkDir::new(src_dir).sort_by_file_name() {
        let entry = entry?;
        if !entry.file_type().is_file() || entry.path() == archive_path {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(src_dir)
            .map_err(|e| BundleError::InvalidManifest(e.to_string()))?;
        let name = relative
            .to_str()
            .ok_or_else(|| {
                BundleError::InvalidManifest(format!(
                    "non UTF-8 path in bundle: {}",
                    relative.display()
                ))
            })?
            .replace('\\', "/");

        zip.start_file(name.as_str(), options)?;
        let mut source = File::open(entry.path())?;
        std::io::copy(&mut source, &mut zip)?;
        count += 1;
    }

    zip.finish()?;
    tracing::debug!("Packed {} file(s) into {}", count, archive_path.display());

    Ok(count)
}

/// Replaces `dest_dir` with the contents of the archive
///
/// Entries that would escape `dest_dir` are rejected by the zip reader.
pub fn unpack_archive(archive_path: &Path, dest_dir: &Path) -> Result<(), BundleError> {
    let file = File::open(archive_path)?;
    let mut archive = zip::ZipArchive::new(file)?;

    if dest_dir.exists() {
        std::fs::remove_dir_all(dest_dir)?;
    }
    std::fs::create_dir_all(dest_dir)?;

    archive.extract(dest_dir)?;
    tracing::debug!(
        "Unpacked {} entries into {}",
        archive.len(),
        dest_dir.display()
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pack_and_unpack_nested_dir() {
        let src = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(src.path().join("tasks")).unwrap();
        std::fs::write(src.path().join("bundle.json"), "{}").unwrap();
        std::fs::write(src.path().join("tasks/echo.lua"), "return {}").unwrap();

        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("bundle.zip");
        assert_eq!(pack_dir(src.path(), &archive).unwrap(), 2);

        let dest = out.path().join("unpacked");
        unpack_archive(&archive, &dest).unwrap();
        assert_eq!(
            std::fs::read_to_string(dest.join("tasks/echo.lua")).unwrap(),
            "return {}"
        );
    }

    #[test]
    fn test_unpack_replaces_stale_files() {
        let src = tempfile::tempdir().unwrap();
        std::fs::write(src.path().join("new.lua"), "return 1").unwrap();

        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("bundle.zip");
        pack_dir(src.path(), &archive).unwrap();

        let dest = out.path().join("unpacked");
        std::fs::create_dir_all(&dest).unwrap();
        std::fs::write(dest.join("old.lua"), "return 0").unwrap();

        unpack_archive(&archive, &dest).unwrap();
        assert!(dest.join("new.lua").exists());
        assert!(!dest.join("old.lua").exists());
    }

    #[test]
    fn test_unpack_rejects_garbage() {
        let out = tempfile::tempdir().unwrap();
        let archive = out.path().join("bundle.zip");
        std::fs::write(&archive, b"not a zip").unwrap();

        let result = unpack_archive(&archive, &out.path().join("unpacked"));
        assert!(matches!(result, Err(BundleError::Archive(_))));
    }
}
