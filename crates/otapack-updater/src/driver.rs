use std::ffi::OsStr;
use std::os::fd::RawFd;

use otapack_core::{ChannelCommand, ChannelError, CommandChannel, Invocation};
use otapack_edify::{parse_script, run, ExecutionContext, Outcome};
use otapack_install::{build_registry, DeviceExtensions, FileContexts, NoDeviceExtensions, UpdaterConfig};
use otapack_package::{load_package, ArchiveOpener, LoadedPackage, MappedPackage, ZipOpener};
use tracing::{error, info, warn};

use crate::classify::{classify, send_report};
use crate::exit::UpdaterExit;

pub const NO_FILE_CONTEXTS_WARNING: &str = "Warning: No file_contexts";

/// Turns the inherited descriptor into the command channel.
pub trait ChannelOpener {
    fn open(&self, fd: RawFd) -> Result<CommandChannel, ChannelError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PipeChannelOpener;

impl ChannelOpener for PipeChannelOpener {
    fn open(&self, fd: RawFd) -> Result<CommandChannel, ChannelError> {
        CommandChannel::from_raw_fd(fd)
    }
}

/// Supplies the security label handle, if the device has one.
pub trait LabelSource {
    fn load(&self) -> Option<FileContexts>;
}

/// Reads `file_contexts` from `UPDATER_FILE_CONTEXTS` or the system paths.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemLabelSource;

impl LabelSource for SystemLabelSource {
    fn load(&self) -> Option<FileContexts> {
        match FileContexts::from_env() {
            Ok(contexts) => Some(contexts),
            Err(err) => {
                warn!("{err}");
                None
            }
        }
    }
}

/// The collaborators one updater run uses.
pub struct Updater<'a, O: ArchiveOpener> {
    pub archives: O,
    pub channels: &'a dyn ChannelOpener,
    pub labels: &'a dyn LabelSource,
    pub extensions: &'a dyn DeviceExtensions,
}

impl Updater<'static, ZipOpener> {
    /// Zip packages, the inherited pipe, system labels, no extensions.
    pub fn stock() -> Self {
        Self {
            archives: ZipOpener,
            channels: &PipeChannelOpener,
            labels: &SystemLabelSource,
            extensions: &NoDeviceExtensions,
        }
    }
}

impl<O: ArchiveOpener> Updater<'_, O> {
    /// Runs one update from the full argument vector (program name first).
    pub fn run<S: AsRef<OsStr>>(&self, args: &[S]) -> UpdaterExit {
        let invocation = match Invocation::parse(args) {
            Ok(invocation) => invocation,
            Err(err) => {
                error!("{err}");
                return UpdaterExit::from(&err);
            }
        };

        let mut channel = match self.channels.open(invocation.pipe_fd) {
            Ok(channel) => channel,
            Err(err) => {
                error!("{err}");
                return UpdaterExit::ChannelFailed;
            }
        };

        let package = match MappedPackage::map(&invocation.package_path) {
            Ok(package) => package,
            Err(err) => {
                error!("{err}");
                return UpdaterExit::from(&err);
            }
        };

        let LoadedPackage { archive, script } = match load_package(&self.archives, &package) {
            Ok(loaded) => loaded,
            Err(err) => {
                error!("{err}");
                return UpdaterExit::from(&err);
            }
        };

        let registry = build_registry(self.extensions);
        let root = match parse_script(&script, &registry) {
            Ok(root) => root,
            Err(errors) => {
                for parse_error in &errors.errors {
                    error!("{parse_error}");
                }
                error!("{errors}");
                return UpdaterExit::ParseFailed;
            }
        };

        let labels = self.labels.load();
        if labels.is_none() {
            channel.send(ChannelCommand::UiPrint(NO_FILE_CONTEXTS_WARNING.to_string()));
        }

        let config = UpdaterConfig::new(
            channel,
            &*archive,
            invocation.protocol_version,
            package.bytes(),
        )
        .with_labels(labels);
        let mut ctx = ExecutionContext::new(script, config);
        ctx.retry_requested = invocation.retry;

        match run(&mut ctx, &registry, &root) {
            Outcome::Success(result) => {
                info!("script succeeded");
                ctx.host.channel.send(ChannelCommand::UiPrint(format!(
                    "script succeeded: result was [{result}]"
                )));
                UpdaterExit::Success
            }
            Outcome::Failure(message) => {
                let report = classify(&message, ctx.error_code, ctx.cause_code);
                send_report(&mut ctx.host.channel, &report);
                UpdaterExit::ScriptAborted
            }
        }
    }
}
