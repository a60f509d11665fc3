use std::cell::RefCell;
use std::fmt;
use std::fs::File;
use std::io::{self, LineWriter, Write};
use std::os::fd::{FromRawFd, RawFd};
use std::rc::Rc;

use thiserror::Error;
use tracing::{info, warn};

use crate::{CauseCode, ErrorCode};

#[derive(Debug, Error)]
pub enum ChannelError {
    #[error("invalid command pipe descriptor {fd}: {source}")]
    InvalidDescriptor { fd: RawFd, source: io::Error },
}

/// One line of the updater -> parent protocol.
#[derive(Debug, Clone, PartialEq)]
pub enum ChannelCommand {
    UiPrint(String),
    Progress { fraction: f64, seconds: u32 },
    SetProgress(f64),
    WipeCache,
    LogError(ErrorCode),
    LogCause(CauseCode),
    RetryUpdate,
}

impl fmt::Display for ChannelCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UiPrint(text) => write!(f, "ui_print {text}"),
            Self::Progress { fraction, seconds } => write!(f, "progress {fraction:.6} {seconds}"),
            Self::SetProgress(fraction) => write!(f, "set_progress {fraction:.6}"),
            Self::WipeCache => f.write_str("wipe_cache"),
            Self::LogError(code) => write!(f, "log error: {code}"),
            Self::LogCause(code) => write!(f, "log cause: {code}"),
            Self::RetryUpdate => f.write_str("retry_update"),
        }
    }
}

/// Line-oriented writer to the parent process.
///
/// Every command is written as a single newline-terminated line and flushed
/// before `send` returns, so the parent observes lines in emission order even
/// if this process exits right afterwards.
pub struct CommandChannel {
    writer: LineWriter<Box<dyn Write>>,
}

impl CommandChannel {
    pub fn new(sink: impl Write + 'static) -> Self {
        Self {
            writer: LineWriter::new(Box::new(sink)),
        }
    }

    /// Channel backed by memory; the transcript sees every flushed line.
    pub fn in_memory() -> (Self, ChannelTranscript) {
        let transcript = ChannelTranscript::default();
        (Self::new(transcript.clone()), transcript)
    }

    /// Takes ownership of a descriptor inherited from the parent.
    pub fn from_raw_fd(fd: RawFd) -> Result<Self, ChannelError> {
        if fd < 0 {
            return Err(ChannelError::InvalidDescriptor {
                fd,
                source: io::Error::from_raw_os_error(libc::EBADF),
            });
        }
        // SAFETY: F_GETFD only inspects the descriptor table entry.
        if unsafe { libc::fcntl(fd, libc::F_GETFD) } == -1 {
            return Err(ChannelError::InvalidDescriptor {
                fd,
                source: io::Error::last_os_error(),
            });
        }
        // SAFETY: the descriptor is open, and the parent hands its write end
        // to this process exclusively.
        let file = unsafe { File::from_raw_fd(fd) };
        Ok(Self::new(file))
    }

    pub fn try_send(&mut self, command: &ChannelCommand) -> io::Result<()> {
        writeln!(self.writer, "{command}")?;
        self.writer.flush()
    }

    /// Sends a command; a broken pipe is logged, not propagated.
    pub fn send(&mut self, command: ChannelCommand) {
        if let Err(err) = self.try_send(&command) {
            warn!("failed to send '{command}' to the command pipe: {err}");
        }
    }

    /// Shows `message` on the recovery UI, one `ui_print` per line.
    pub fn ui_print(&mut self, message: &str) {
        for line in message.split('\n') {
            self.send(ChannelCommand::UiPrint(line.to_string()));
        }
        info!("{message}");
    }
}

impl fmt::Debug for CommandChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandChannel").finish_non_exhaustive()
    }
}

/// Shared view of the lines written to an in-memory channel.
#[derive(Debug, Clone, Default)]
pub struct ChannelTranscript {
    bytes: Rc<RefCell<Vec<u8>>>,
}

impl ChannelTranscript {
    pub fn lines(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.bytes.borrow())
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn contents(&self) -> String {
        String::from_utf8_lossy(&self.bytes.borrow()).into_owned()
    }
}

impl Write for ChannelTranscript {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.bytes.borrow_mut().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}
