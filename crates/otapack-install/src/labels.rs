use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

pub const FILE_CONTEXTS_ENV: &str = "UPDATER_FILE_CONTEXTS";
pub const DEFAULT_FILE_CONTEXTS: [&str; 3] = [
    "/plat_file_contexts",
    "/vendor_file_contexts",
    "/file_contexts",
];

const SELINUX_XATTR: &str = "security.selinux";
const NO_LABEL: &str = "<<none>>";

#[derive(Debug, Error)]
pub enum LabelError {
    #[error("no file_contexts found (tried {tried})")]
    NotFound { tried: String },
    #[error("failed to read {}: {source}", .path.display())]
    Read { path: PathBuf, source: io::Error },
    #[error("{}:{line}: {message}", .path.display())]
    InvalidRule {
        path: PathBuf,
        line: usize,
        message: String,
    },
}

/// File type qualifier of a `file_contexts` rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Regular,
    Directory,
    Symlink,
    CharDevice,
    BlockDevice,
    Socket,
    Pipe,
}

impl FileKind {
    fn from_flag(flag: &str) -> Option<Self> {
        match flag {
            "--" => Some(Self::Regular),
            "-d" => Some(Self::Directory),
            "-l" => Some(Self::Symlink),
            "-c" => Some(Self::CharDevice),
            "-b" => Some(Self::BlockDevice),
            "-s" => Some(Self::Socket),
            "-p" => Some(Self::Pipe),
            _ => None,
        }
    }
}

#[derive(Debug)]
struct ContextRule {
    pattern: Regex,
    kind: Option<FileKind>,
    context: String,
}

/// Path -> security context lookup table loaded from `file_contexts` files.
#[derive(Debug, Default)]
pub struct FileContexts {
    rules: Vec<ContextRule>,
    sources: Vec<PathBuf>,
}

impl FileContexts {
    /// Loads the files named by `UPDATER_FILE_CONTEXTS`, or the system
    /// defaults when it is unset.
    pub fn from_env() -> Result<Self, LabelError> {
        let paths = match env::var_os(FILE_CONTEXTS_ENV) {
            Some(value) => env::split_paths(&value).collect::<Vec<_>>(),
            None => DEFAULT_FILE_CONTEXTS.iter().map(PathBuf::from).collect(),
        };
        Self::load(&paths)
    }

    /// Loads every existing file in `paths`; at least one must exist.
    pub fn load(paths: &[PathBuf]) -> Result<Self, LabelError> {
        let mut contexts = Self::default();
        for path in paths {
            let text = match fs::read_to_string(path) {
                Ok(text) => text,
                Err(err) if err.kind() == io::ErrorKind::NotFound => continue,
                Err(source) => {
                    return Err(LabelError::Read {
                        path: path.clone(),
                        source,
                    })
                }
            };
            contexts.add_rules(path, &text)?;
            contexts.sources.push(path.clone());
        }

        if contexts.sources.is_empty() {
            let tried = paths
                .iter()
                .map(|path| path.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            return Err(LabelError::NotFound { tried });
        }
        debug!(
            "loaded {} file_contexts rules from {} files",
            contexts.rules.len(),
            contexts.sources.len()
        );
        Ok(contexts)
    }

    pub fn parse(origin: impl AsRef<Path>, text: &str) -> Result<Self, LabelError> {
        let mut contexts = Self::default();
        contexts.add_rules(origin.as_ref(), text)?;
        contexts.sources.push(origin.as_ref().to_path_buf());
        Ok(contexts)
    }

    fn add_rules(&mut self, path: &Path, text: &str) -> Result<(), LabelError> {
        for (index, raw) in text.lines().enumerate() {
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let invalid = |message: String| LabelError::InvalidRule {
                path: path.to_path_buf(),
                line: index + 1,
                message,
            };

            let fields = line.split_whitespace().collect::<Vec<_>>();
            let (pattern, kind, context) = match fields.as_slice() {
                [pattern, context] => (*pattern, None, *context),
                [pattern, flag, context] => {
                    let kind = FileKind::from_flag(flag)
                        .ok_or_else(|| invalid(format!("unknown file type '{flag}'")))?;
                    (*pattern, Some(kind), *context)
                }
                _ => return Err(invalid(format!("expected 2 or 3 fields, got {}", fields.len()))),
            };
            let pattern = Regex::new(&format!("^(?:{pattern})$"))
                .map_err(|err| invalid(format!("bad path regex: {err}")))?;
            self.rules.push(ContextRule {
                pattern,
                kind,
                context: context.to_string(),
            });
        }
        Ok(())
    }

    pub fn sources(&self) -> &[PathBuf] {
        &self.sources
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Context for `path`: the last rule whose regex matches and whose file
    /// type, if any, equals `kind`. `<<none>>` means "leave unlabeled".
    pub fn lookup(&self, path: &str, kind: FileKind) -> Option<&str> {
        self.rules
            .iter()
            .rev()
            .find(|rule| rule.kind.map_or(true, |wanted| wanted == kind) && rule.pattern.is_match(path))
            .map(|rule| rule.context.as_str())
            .filter(|context| *context != NO_LABEL)
    }

    /// Labels `path` with its looked-up context. Failures are logged.
    pub fn apply(&self, path: &Path, kind: FileKind) {
        let Some(lookup_path) = path.to_str() else {
            warn!("not labeling non UTF-8 path {}", path.display());
            return;
        };
        let Some(context) = self.lookup(lookup_path, kind) else {
            debug!("no context for {lookup_path}");
            return;
        };
        if let Err(err) = set_context(path, context) {
            warn!("failed to set context {context} on {lookup_path}: {err}");
        }
    }
}

#[cfg(any(target_os = "linux", target_os = "android"))]
fn set_context(path: &Path, context: &str) -> io::Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let c_name = std::ffi::CString::new(SELINUX_XATTR)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let c_value = std::ffi::CString::new(context)
        .map_err(|err| io::Error::new(io::ErrorKind::InvalidInput, err))?;
    let value = c_value.as_bytes_with_nul();
    // SAFETY: all pointers come from live CStrings and the length matches
    // the value buffer.
    let result = unsafe {
        libc::lsetxattr(
            c_path.as_ptr(),
            c_name.as_ptr(),
            value.as_ptr().cast(),
            value.len(),
            0,
        )
    };
    if result == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

#[cfg(not(any(target_os = "linux", target_os = "android")))]
fn set_context(_path: &Path, _context: &str) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "security labels are only supported on Linux",
    ))
}
