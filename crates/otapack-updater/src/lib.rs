//! The updater driver: validates the invocation, loads the package's update
//! script, evaluates it and reports the outcome to the parent process.

mod classify;
mod driver;
mod exit;
mod logging;

pub use classify::{classify, scan_error_code, send_report, FailureReport, LineCode, NO_MESSAGE_LINE};
pub use driver::{
    ChannelOpener, LabelSource, PipeChannelOpener, SystemLabelSource, Updater,
    NO_FILE_CONTEXTS_WARNING,
};
pub use exit::UpdaterExit;
pub use logging::{init_logging, LOG_FILTER_ENV};
