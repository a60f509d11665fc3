//! Access to update packages: the memory mapping, the archive reader and the
//! update-script loader.

mod archive;
mod loader;
mod mapping;
mod zip_archive;

pub use archive::{ArchiveError, ArchiveHandle, ArchiveOpener, EntryInfo, PackageArchive};
pub use loader::{load_package, LoadedPackage, PackageError, SCRIPT_PATH};
pub use mapping::MappedPackage;
pub use zip_archive::{ZipOpener, ZipPackage};
