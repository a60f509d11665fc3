use std::fmt;

/// Reason an update attempt failed, reported to the parent as `log error: <code>`.
///
/// Abort messages may embed arbitrary codes (`E30: ...`), so this is an open
/// newtype rather than a closed enum; the named constants are the ones the
/// recovery protocol assigns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub i32);

impl ErrorCode {
    pub const NO_ERROR: Self = Self(-1);
    pub const LOW_BATTERY: Self = Self(20);
    pub const ZIP_VERIFICATION_FAILURE: Self = Self(21);
    pub const ZIP_OPEN_FAILURE: Self = Self(22);
    pub const BOOTREASON_IN_BLACKLIST: Self = Self(23);
    pub const PACKAGE_COMPATIBILITY_FAILURE: Self = Self(24);
    pub const SCRIPT_EXECUTION_FAILURE: Self = Self(25);
    pub const MAP_FILE_FAILURE: Self = Self(26);
    pub const FORK_UPDATE_BINARY_FAILURE: Self = Self(27);
    pub const UPDATE_BINARY_COMMAND_FAILURE: Self = Self(28);

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self != Self::NO_ERROR
    }
}

impl Default for ErrorCode {
    fn default() -> Self {
        Self::NO_ERROR
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Finer-grained failure category, reported as `log cause: <code>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CauseCode(pub i32);

impl CauseCode {
    pub const NO_CAUSE: Self = Self(-1);
    pub const ARGS_PARSING_FAILURE: Self = Self(100);
    pub const STASH_CREATION_FAILURE: Self = Self(101);
    pub const FILE_OPEN_FAILURE: Self = Self(102);
    pub const LSEEK_FAILURE: Self = Self(103);
    pub const FREAD_FAILURE: Self = Self(104);
    pub const FWRITE_FAILURE: Self = Self(105);
    pub const FSYNC_FAILURE: Self = Self(106);
    pub const LIBFEC_FAILURE: Self = Self(107);
    pub const FILE_GETPROP_FAILURE: Self = Self(108);
    pub const FILE_RENAME_FAILURE: Self = Self(109);
    pub const SYMLINK_FAILURE: Self = Self(110);
    pub const SET_METADATA_FAILURE: Self = Self(111);
    pub const TUNE2FS_FAILURE: Self = Self(112);
    pub const REBOOT_FAILURE: Self = Self(113);
    pub const PACKAGE_EXTRACT_FILE_FAILURE: Self = Self(114);
    pub const PATCH_APPLICATION_FAILURE: Self = Self(200);
    pub const EIO_FAILURE: Self = Self(201);

    pub fn value(self) -> i32 {
        self.0
    }

    pub fn is_set(self) -> bool {
        self != Self::NO_CAUSE
    }

    /// Causes for which the parent should re-run the whole update.
    pub fn warrants_retry(self) -> bool {
        self == Self::PATCH_APPLICATION_FAILURE || self == Self::EIO_FAILURE
    }

    /// Picks the cause for a failed write: `EIO` is retryable, anything else
    /// falls back to `fallback`.
    pub fn for_write_error(err: &std::io::Error, fallback: Self) -> Self {
        if err.raw_os_error() == Some(libc::EIO) {
            Self::EIO_FAILURE
        } else {
            fallback
        }
    }
}

impl Default for CauseCode {
    fn default() -> Self {
        Self::NO_CAUSE
    }
}

impl fmt::Display for CauseCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
