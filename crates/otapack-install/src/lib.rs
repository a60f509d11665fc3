//! Installation primitives available to update scripts and the
//! configuration they run against.

mod binder;
mod blockimg;
mod config;
mod fs_ops;
mod install;
mod labels;

pub use binder::{build_registry, DeviceExtensions, NoDeviceExtensions};
pub use blockimg::{hash_ranges, RangeSet, RangeSetError, BLOCKIMG_NAMESPACE, BLOCK_SIZE};
pub use config::UpdaterConfig;
pub use fs_ops::FS_NAMESPACE;
pub use install::INSTALL_NAMESPACE;
pub use labels::{FileContexts, FileKind, LabelError, DEFAULT_FILE_CONTEXTS, FILE_CONTEXTS_ENV};

#[cfg(test)]
mod tests;
