use std::fs::{self, File};
use std::io;
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use memmap2::{Mmap, MmapMut};
use tracing::info;

use crate::loader::PackageError;

/// Read-only view of an update package's bytes, released on drop.
///
/// A path of the form `@<block map>` names a block map produced by
/// uncrypt: the package is then assembled from the listed block ranges of
/// the raw device instead of being read through a filesystem.
#[derive(Debug)]
pub struct MappedPackage {
    source: PathBuf,
    map: Mmap,
    len: usize,
}

impl MappedPackage {
    pub fn map(path: impl AsRef<Path>) -> Result<Self, PackageError> {
        let path = path.as_ref();
        let mapped = match path.to_str().and_then(|raw| raw.strip_prefix('@')) {
            Some(block_map) => map_block_map(Path::new(block_map)),
            None => map_file(path),
        };
        let (map, len) = mapped.map_err(|source| PackageError::MapFailed {
            path: path.to_path_buf(),
            source,
        })?;

        Ok(Self {
            source: path.to_path_buf(),
            map,
            len,
        })
    }

    pub fn bytes(&self) -> &[u8] {
        &self.map[..self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn source(&self) -> &Path {
        &self.source
    }
}

fn map_file(path: &Path) -> io::Result<(Mmap, usize)> {
    let file = File::open(path)?;
    // SAFETY: the mapping is read-only and nothing in this process writes
    // the package while the updater runs.
    let map = unsafe { Mmap::map(&file)? };
    let len = map.len();
    Ok((map, len))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BlockMap {
    pub device: PathBuf,
    pub file_size: usize,
    pub block_size: usize,
    pub ranges: Vec<(u64, u64)>,
}

fn invalid(message: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, message)
}

fn parse_number<T: std::str::FromStr>(field: Option<&str>, what: &str) -> io::Result<T> {
    let field = field.ok_or_else(|| invalid(format!("block map is missing {what}")))?;
    field
        .parse::<T>()
        .map_err(|_| invalid(format!("block map has invalid {what}: {field}")))
}

pub(crate) fn parse_block_map(content: &str) -> io::Result<BlockMap> {
    let mut lines = content.lines();
    let device = lines
        .next()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .ok_or_else(|| invalid("block map is missing the block device".to_string()))?;

    let mut header = lines.next().unwrap_or_default().split_whitespace();
    let file_size: usize = parse_number(header.next(), "file size")?;
    let block_size: usize = parse_number(header.next(), "block size")?;
    if file_size == 0 || block_size == 0 {
        return Err(invalid(format!(
            "block map has invalid sizes: file {file_size}, block {block_size}"
        )));
    }

    let range_count: usize = parse_number(lines.next().map(str::trim), "range count")?;
    let mut ranges = Vec::with_capacity(range_count.min(1024));
    for index in 0..range_count {
        let mut fields = lines.next().unwrap_or_default().split_whitespace();
        let start: u64 = parse_number(fields.next(), "range start")?;
        let end: u64 = parse_number(fields.next(), "range end")?;
        if start >= end {
            return Err(invalid(format!(
                "block map range {index} is empty or reversed: {start} {end}"
            )));
        }
        ranges.push((start, end));
    }

    let total_blocks: u128 = ranges
        .iter()
        .map(|(start, end)| u128::from(end - start))
        .sum();
    let capacity = total_blocks * block_size as u128;
    if capacity < file_size as u128 {
        return Err(invalid(format!(
            "block map ranges cover {capacity} bytes but the file is {file_size} bytes"
        )));
    }

    Ok(BlockMap {
        device: PathBuf::from(device),
        file_size,
        block_size,
        ranges,
    })
}

fn map_block_map(path: &Path) -> io::Result<(Mmap, usize)> {
    let block_map = parse_block_map(&fs::read_to_string(path)?)?;
    let block_size = block_map.block_size as u128;
    let total_bytes: u128 = block_map
        .ranges
        .iter()
        .map(|(start, end)| u128::from(end - start) * block_size)
        .sum();
    let too_large = || invalid(format!("block map is too large: {total_bytes} bytes"));
    let total_bytes = usize::try_from(total_bytes).map_err(|_| too_large())?;

    let device = File::open(&block_map.device)?;
    let mut buffer = MmapMut::map_anon(total_bytes)?;
    let mut offset = 0_usize;
    for (start, end) in &block_map.ranges {
        let len = usize::try_from(u128::from(end - start) * block_size).map_err(|_| too_large())?;
        let position =
            u64::try_from(u128::from(*start) * block_size).map_err(|_| too_large())?;
        device.read_exact_at(&mut buffer[offset..offset + len], position)?;
        offset += len;
    }

    info!(
        "mapped {} ranges from {} for {}",
        block_map.ranges.len(),
        block_map.device.display(),
        path.display()
    );
    Ok((buffer.make_read_only()?, block_map.file_size))
}
