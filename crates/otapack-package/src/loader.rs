use std::io;
use std::path::PathBuf;

use thiserror::Error;
use tracing::info;

use crate::archive::{ArchiveError, ArchiveHandle, ArchiveOpener, PackageArchive};
use crate::mapping::MappedPackage;

pub const SCRIPT_PATH: &str = "META-INF/com/google/android/updater-script";

#[derive(Debug, Error)]
pub enum PackageError {
    #[error("failed to map {}: {source}", .path.display())]
    MapFailed { path: PathBuf, source: io::Error },
    #[error("failed to open package {}: {detail}", .path.display())]
    OpenFailed { path: PathBuf, detail: String },
    #[error("failed to find {} in {}: {detail}", SCRIPT_PATH, .path.display())]
    ScriptNotFound { path: PathBuf, detail: String },
    #[error("failed to read {}: {detail}", SCRIPT_PATH)]
    ExtractFailed { detail: String },
}

/// An open package together with its update script.
#[derive(Debug)]
pub struct LoadedPackage<A: PackageArchive> {
    pub archive: ArchiveHandle<A>,
    pub script: String,
}

/// Opens `package` with `opener` and extracts the update script.
///
/// Once the archive is open, every error path drops the handle and with it
/// closes the archive.
pub fn load_package<'m, O: ArchiveOpener>(
    opener: &O,
    package: &'m MappedPackage,
) -> Result<LoadedPackage<O::Archive<'m>>, PackageError> {
    let archive = opener
        .open(package.bytes())
        .map_err(|err| PackageError::OpenFailed {
            path: package.source().to_path_buf(),
            detail: err.to_string(),
        })?;
    let archive = ArchiveHandle::new(archive);
    let script = read_script(&*archive, package)?;
    info!("loaded {} byte update script", script.len());
    Ok(LoadedPackage { archive, script })
}

fn read_script<A: PackageArchive>(
    archive: &A,
    package: &MappedPackage,
) -> Result<String, PackageError> {
    let entry = archive
        .find_entry(SCRIPT_PATH)
        .map_err(|err| PackageError::ScriptNotFound {
            path: package.source().to_path_buf(),
            detail: err.to_string(),
        })?;

    let bytes = archive
        .extract_to_memory(SCRIPT_PATH)
        .map_err(|err| PackageError::ExtractFailed {
            detail: err.to_string(),
        })?;
    if bytes.len() as u64 != entry.uncompressed_length {
        return Err(PackageError::ExtractFailed {
            detail: ArchiveError::Corrupt(format!(
                "expected {} bytes, got {}",
                entry.uncompressed_length,
                bytes.len()
            ))
            .to_string(),
        });
    }

    String::from_utf8(bytes).map_err(|err| PackageError::ExtractFailed {
        detail: format!("script is not valid UTF-8: {err}"),
    })
}
