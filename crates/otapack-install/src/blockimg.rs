use std::fs::File;
use std::io;
use std::os::unix::fs::FileExt;

use otapack_core::CauseCode;
use otapack_edify::{EvalResult, Expr, FunctionRegistry};
use sha2::{Digest, Sha256};
use thiserror::Error;

use crate::config::{InstallCall, UpdaterConfig};

pub const BLOCKIMG_NAMESPACE: &str = "blockimg";
pub const BLOCK_SIZE: u64 = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid range set \"{0}\"")]
pub struct RangeSetError(String);

/// Half-open block ranges in the `<count>,<start>,<end>,...` text form,
/// where `count` is the number of integers that follow.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeSet {
    ranges: Vec<(u64, u64)>,
}

impl RangeSet {
    pub fn parse(text: &str) -> Result<Self, RangeSetError> {
        let invalid = || RangeSetError(text.to_string());
        let numbers = text
            .split(',')
            .map(|field| field.trim().parse::<u64>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| invalid())?;
        let (count, values) = numbers.split_first().ok_or_else(invalid)?;
        if *count == 0 || count % 2 != 0 || *count != values.len() as u64 {
            return Err(invalid());
        }

        let ranges = values
            .chunks_exact(2)
            .map(|pair| (pair[0], pair[1]))
            .collect::<Vec<_>>();
        if ranges.iter().any(|(start, end)| start >= end) {
            return Err(invalid());
        }
        Ok(Self { ranges })
    }

    pub fn ranges(&self) -> &[(u64, u64)] {
        &self.ranges
    }

    pub fn blocks(&self) -> u64 {
        self.ranges.iter().map(|(start, end)| end - start).sum()
    }
}

pub fn register_blockimg_functions(registry: &mut FunctionRegistry<UpdaterConfig<'_>>) {
    registry.register(BLOCKIMG_NAMESPACE, "range_sha256", range_sha256_fn);
}

/// SHA-256 of the given blocks of `file`, read in order.
pub fn hash_ranges(file: &File, ranges: &RangeSet) -> io::Result<String> {
    let mut hasher = Sha256::new();
    let mut block = vec![0_u8; BLOCK_SIZE as usize];
    for (start, end) in ranges.ranges() {
        for index in *start..*end {
            let offset = index.checked_mul(BLOCK_SIZE).ok_or_else(|| {
                io::Error::new(io::ErrorKind::InvalidInput, format!("block {index} is out of range"))
            })?;
            file.read_exact_at(&mut block, offset)?;
            hasher.update(&block);
        }
    }
    Ok(hex::encode(hasher.finalize()))
}

/// `range_sha256(path, ranges)`.
fn range_sha256_fn(call: &mut InstallCall<'_, '_>, args: &[Expr]) -> EvalResult {
    let values = call.expect_args(args, 2)?;
    let (path, ranges) = (&values[0], &values[1]);
    let ranges = match RangeSet::parse(ranges) {
        Ok(ranges) => ranges,
        Err(err) => {
            let message = format!("{}(): {err}", call.name());
            return Err(call.abort_with_cause(CauseCode::ARGS_PARSING_FAILURE, message));
        }
    };
    let file = match File::open(path) {
        Ok(file) => file,
        Err(err) => {
            let message = format!("{}(): failed to open {path}: {err}", call.name());
            return Err(call.abort_with_cause(CauseCode::FILE_OPEN_FAILURE, message));
        }
    };
    hash_ranges(&file, &ranges).map_err(|err| {
        let message = format!("{}(): failed to read {path}: {err}", call.name());
        call.abort_with_cause(CauseCode::FREAD_FAILURE, message)
    })
}
