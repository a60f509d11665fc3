use std::io::{self, Write};
use std::ops::Deref;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ArchiveError {
    #[error("not a valid archive: {0}")]
    Invalid(String),
    #[error("no entry named '{0}'")]
    EntryNotFound(String),
    #[error("entry is corrupt: {0}")]
    Corrupt(String),
    #[error("failed writing extracted data: {0}")]
    Write(#[source] io::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntryInfo {
    pub name: String,
    pub uncompressed_length: u64,
}

/// Random-access reader over an opened update package.
pub trait PackageArchive {
    fn find_entry(&self, name: &str) -> Result<EntryInfo, ArchiveError>;

    fn extract_to_memory(&self, name: &str) -> Result<Vec<u8>, ArchiveError>;

    /// Streams an entry into `writer`. Failures of `writer` are reported as
    /// [`ArchiveError::Write`] so callers can tell them from bad input.
    fn extract_to_writer(&self, name: &str, writer: &mut dyn Write) -> Result<u64, ArchiveError>;

    fn entry_names(&self) -> Vec<String>;

    /// Releases the archive. Called once, by [`ArchiveHandle`].
    fn close(&mut self) {}
}

/// Opens archives over a borrowed byte buffer.
pub trait ArchiveOpener {
    type Archive<'m>: PackageArchive;

    fn open<'m>(&self, bytes: &'m [u8]) -> Result<Self::Archive<'m>, ArchiveError>;
}

/// Owns an open archive and closes it exactly once when dropped.
#[derive(Debug)]
pub struct ArchiveHandle<A: PackageArchive> {
    archive: A,
}

impl<A: PackageArchive> ArchiveHandle<A> {
    pub fn new(archive: A) -> Self {
        Self { archive }
    }
}

impl<A: PackageArchive> Deref for ArchiveHandle<A> {
    type Target = A;

    fn deref(&self) -> &A {
        &self.archive
    }
}

impl<A: PackageArchive> Drop for ArchiveHandle<A> {
    fn drop(&mut self) {
        self.archive.close();
    }
}
