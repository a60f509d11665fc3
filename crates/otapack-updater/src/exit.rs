use std::fmt;

use otapack_core::InvocationError;
use otapack_package::PackageError;

/// Process exit status of one updater run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdaterExit {
    Success,
    BadArity,
    UnsupportedVersion,
    PackageOpenFailed,
    ScriptNotFound,
    ScriptExtractFailed,
    ParseFailed,
    ScriptAborted,
    ChannelFailed,
}

impl UpdaterExit {
    pub fn code(self) -> i32 {
        match self {
            Self::Success => 0,
            Self::BadArity => 1,
            Self::UnsupportedVersion => 2,
            Self::PackageOpenFailed => 3,
            Self::ScriptNotFound => 4,
            Self::ScriptExtractFailed => 5,
            Self::ParseFailed => 6,
            Self::ScriptAborted => 7,
            Self::ChannelFailed => 8,
        }
    }
}

impl fmt::Display for UpdaterExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?} ({})", self.code())
    }
}

impl From<&InvocationError> for UpdaterExit {
    fn from(err: &InvocationError) -> Self {
        match err {
            InvocationError::BadArity(_) => Self::BadArity,
            InvocationError::UnsupportedVersion(_) => Self::UnsupportedVersion,
        }
    }
}

impl From<&PackageError> for UpdaterExit {
    fn from(err: &PackageError) -> Self {
        match err {
            PackageError::MapFailed { .. } | PackageError::OpenFailed { .. } => {
                Self::PackageOpenFailed
            }
            PackageError::ScriptNotFound { .. } => Self::ScriptNotFound,
            PackageError::ExtractFailed { .. } => Self::ScriptExtractFailed,
        }
    }
}
