use std::io::{Cursor, Read, Write};

use tracing::debug;
use zip::result::ZipError;
use zip::ZipArchive;

use crate::archive::{ArchiveError, ArchiveOpener, EntryInfo, PackageArchive};

const COPY_BUFFER_SIZE: usize = 64 * 1024;

/// Zip reader over package bytes that stay mapped for its lifetime.
#[derive(Debug, Clone)]
pub struct ZipPackage<'m> {
    archive: ZipArchive<Cursor<&'m [u8]>>,
}

impl<'m> ZipPackage<'m> {
    pub fn new(bytes: &'m [u8]) -> Result<Self, ArchiveError> {
        let archive = ZipArchive::new(Cursor::new(bytes))
            .map_err(|err| ArchiveError::Invalid(err.to_string()))?;
        debug!("opened zip archive with {} entries", archive.len());
        Ok(Self { archive })
    }

    pub fn len(&self) -> usize {
        self.archive.len()
    }

    pub fn is_empty(&self) -> bool {
        self.archive.is_empty()
    }
}

fn lookup_error(name: &str, err: ZipError) -> ArchiveError {
    match err {
        ZipError::FileNotFound => ArchiveError::EntryNotFound(name.to_string()),
        other => ArchiveError::Corrupt(format!("{name}: {other}")),
    }
}

impl PackageArchive for ZipPackage<'_> {
    fn find_entry(&self, name: &str) -> Result<EntryInfo, ArchiveError> {
        // Entry readers borrow the archive mutably; the clone shares the
        // central directory.
        let mut archive = self.archive.clone();
        let entry = archive.by_name(name).map_err(|err| lookup_error(name, err))?;
        Ok(EntryInfo {
            name: entry.name().to_string(),
            uncompressed_length: entry.size(),
        })
    }

    fn extract_to_memory(&self, name: &str) -> Result<Vec<u8>, ArchiveError> {
        let mut archive = self.archive.clone();
        let mut entry = archive.by_name(name).map_err(|err| lookup_error(name, err))?;
        let expected = entry.size();
        let mut bytes = Vec::with_capacity(usize::try_from(expected).unwrap_or_default());
        entry
            .read_to_end(&mut bytes)
            .map_err(|err| ArchiveError::Corrupt(format!("{name}: {err}")))?;
        if bytes.len() as u64 != expected {
            return Err(ArchiveError::Corrupt(format!(
                "{name}: expected {expected} bytes, got {}",
                bytes.len()
            )));
        }
        Ok(bytes)
    }

    fn extract_to_writer(&self, name: &str, writer: &mut dyn Write) -> Result<u64, ArchiveError> {
        let mut archive = self.archive.clone();
        let mut entry = archive.by_name(name).map_err(|err| lookup_error(name, err))?;
        let mut buffer = vec![0_u8; COPY_BUFFER_SIZE];
        let mut written = 0_u64;
        loop {
            let read = entry
                .read(&mut buffer)
                .map_err(|err| ArchiveError::Corrupt(format!("{name}: {err}")))?;
            if read == 0 {
                break;
            }
            writer
                .write_all(&buffer[..read])
                .map_err(ArchiveError::Write)?;
            written += read as u64;
        }
        writer.flush().map_err(ArchiveError::Write)?;
        Ok(written)
    }

    fn entry_names(&self) -> Vec<String> {
        self.archive.file_names().map(str::to_string).collect()
    }
}

/// Opens package bytes as a zip archive.
#[derive(Debug, Clone, Copy, Default)]
pub struct ZipOpener;

impl ArchiveOpener for ZipOpener {
    type Archive<'m> = ZipPackage<'m>;

    fn open<'m>(&self, bytes: &'m [u8]) -> Result<ZipPackage<'m>, ArchiveError> {
        ZipPackage::new(bytes)
    }
}
