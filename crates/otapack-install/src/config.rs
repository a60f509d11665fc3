use std::fmt;
use std::path::Path;

use otapack_core::{CommandChannel, ProtocolVersion};
use otapack_package::PackageArchive;

use crate::labels::{FileContexts, FileKind};

/// Everything installation primitives reach through the execution context.
pub struct UpdaterConfig<'p> {
    pub channel: CommandChannel,
    pub archive: &'p dyn PackageArchive,
    pub protocol_version: ProtocolVersion,
    pub package: &'p [u8],
    pub labels: Option<FileContexts>,
}

impl<'p> UpdaterConfig<'p> {
    pub fn new(
        channel: CommandChannel,
        archive: &'p dyn PackageArchive,
        protocol_version: ProtocolVersion,
        package: &'p [u8],
    ) -> Self {
        Self {
            channel,
            archive,
            protocol_version,
            package,
            labels: None,
        }
    }

    pub fn with_labels(mut self, labels: Option<FileContexts>) -> Self {
        self.labels = labels;
        self
    }

    /// Applies the security context for `path` when labels are loaded.
    pub fn label(&self, path: &Path, kind: FileKind) {
        if let Some(labels) = &self.labels {
            labels.apply(path, kind);
        }
    }
}

impl fmt::Debug for UpdaterConfig<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpdaterConfig")
            .field("protocol_version", &self.protocol_version)
            .field("package_len", &self.package.len())
            .field("labels", &self.labels.as_ref().map(FileContexts::len))
            .finish_non_exhaustive()
    }
}

pub(crate) type InstallCall<'c, 'p> = otapack_edify::CallContext<'c, UpdaterConfig<'p>>;
