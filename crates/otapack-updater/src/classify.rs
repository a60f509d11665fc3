use std::sync::LazyLock;

use otapack_core::{CauseCode, ChannelCommand, CommandChannel, ErrorCode};
use regex::Regex;
use tracing::{error, info};

pub const NO_MESSAGE_LINE: &str = "script aborted (no error message)";

static ERROR_CODE_REGEX: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^E(\d+): ").expect("error code regex is valid"));

/// How a failed run is reported to the parent.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    /// Lines shown with `ui_print`, in order.
    pub lines: Vec<String>,
    pub error_code: ErrorCode,
    pub cause_code: CauseCode,
    pub retry: bool,
}

/// What an abort message line says about the error code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineCode {
    Untagged,
    Code(ErrorCode),
    Unparsable,
}

/// Scans for an error code at the start of `line`, as in
/// `E30: This package is for a different device.`
pub fn scan_error_code(line: &str) -> LineCode {
    if !line.starts_with('E') {
        return LineCode::Untagged;
    }
    ERROR_CODE_REGEX
        .captures(line)
        .and_then(|captures| captures[1].parse::<i32>().ok())
        .map_or(LineCode::Unparsable, |code| LineCode::Code(ErrorCode(code)))
}

/// Decides the final codes for an aborted script.
pub fn classify(message: &str, error_code: ErrorCode, cause_code: CauseCode) -> FailureReport {
    let mut error_code = error_code;
    let lines = if message.is_empty() {
        error!("{NO_MESSAGE_LINE}");
        vec![NO_MESSAGE_LINE.to_string()]
    } else {
        error!("script aborted: {message}");
        let lines = message.split('\n').map(str::to_string).collect::<Vec<_>>();
        for line in &lines {
            match scan_error_code(line) {
                LineCode::Code(code) => error_code = code,
                LineCode::Untagged => {}
                LineCode::Unparsable => error!("Failed to parse error code: [{line}]"),
            }
        }
        lines
    };

    if !error_code.is_set() {
        error_code = ErrorCode::SCRIPT_EXECUTION_FAILURE;
    }
    FailureReport {
        lines,
        error_code,
        cause_code,
        retry: cause_code.warrants_retry(),
    }
}

/// Sends a failure report: the message lines, the error code, then the
/// cause and retry signal when a cause is set.
pub fn send_report(channel: &mut CommandChannel, report: &FailureReport) {
    for line in &report.lines {
        channel.send(ChannelCommand::UiPrint(line.clone()));
    }
    channel.send(ChannelCommand::LogError(report.error_code));
    if report.cause_code.is_set() {
        channel.send(ChannelCommand::LogCause(report.cause_code));
        if report.retry {
            if report.cause_code == CauseCode::EIO_FAILURE {
                info!("Update failed due to EIO, retry update.");
            } else {
                info!("Patch application failed, retry update.");
            }
            channel.send(ChannelCommand::RetryUpdate);
        }
    }
}
