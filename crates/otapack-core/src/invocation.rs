use std::ffi::OsStr;
use std::path::PathBuf;

use thiserror::Error;
use tracing::warn;

/// Updater API version the parent speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V1,
    V2,
    V3,
}

impl ProtocolVersion {
    pub fn parse(input: &str) -> Option<Self> {
        match input {
            "1" => Some(Self::V1),
            "2" => Some(Self::V2),
            "3" => Some(Self::V3),
            _ => None,
        }
    }

    pub fn as_u32(self) -> u32 {
        match self {
            Self::V1 => 1,
            Self::V2 => 2,
            Self::V3 => 3,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvocationError {
    #[error("unexpected number of arguments: {0}")]
    BadArity(usize),
    #[error("wrong updater binary API; expected 1, 2, or 3; got {0}")]
    UnsupportedVersion(String),
}

/// Validated `updater <version> <pipe-fd> <package> [retry]` command line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invocation {
    pub protocol_version: ProtocolVersion,
    pub pipe_fd: i32,
    pub package_path: PathBuf,
    pub retry: bool,
}

impl Invocation {
    /// Parses the full argument vector, program name included.
    ///
    /// The package path is taken as raw bytes; it need not be UTF-8.
    pub fn parse<S: AsRef<OsStr>>(args: &[S]) -> Result<Self, InvocationError> {
        if args.len() != 4 && args.len() != 5 {
            return Err(InvocationError::BadArity(args.len()));
        }

        let version = args[1].as_ref().to_string_lossy();
        let protocol_version = ProtocolVersion::parse(&version)
            .ok_or_else(|| InvocationError::UnsupportedVersion(version.to_string()))?;

        // An unparsable descriptor is kept as -1 so the channel open fails.
        let pipe_fd = args[2]
            .as_ref()
            .to_str()
            .and_then(|fd| fd.trim().parse::<i32>().ok())
            .unwrap_or(-1);
        let package_path = PathBuf::from(args[3].as_ref());

        let mut retry = false;
        if let Some(extra) = args.get(4) {
            if extra.as_ref() == "retry" {
                retry = true;
            } else {
                warn!("unexpected argument: {}", extra.as_ref().to_string_lossy());
            }
        }

        Ok(Self {
            protocol_version,
            pipe_fd,
            package_path,
            retry,
        })
    }
}
