use otapack_core::{CauseCode, ErrorCode};

use crate::expr::Span;

/// Marker returned when evaluation stops; the reason lives in
/// [`ExecutionContext::abort_message`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Aborted;

pub type EvalResult = Result<String, Aborted>;

/// Result of running a whole script.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    Success(String),
    Failure(String),
}

/// Mutable state shared by the evaluator and every primitive for one run.
///
/// `host` carries whatever the embedding program hands to its primitives
/// (command channel, package archive, labels).
#[derive(Debug)]
pub struct ExecutionContext<H> {
    pub script: String,
    pub host: H,
    pub retry_requested: bool,
    pub abort_message: String,
    pub error_code: ErrorCode,
    pub cause_code: CauseCode,
}

impl<H> ExecutionContext<H> {
    pub fn new(script: impl Into<String>, host: H) -> Self {
        Self {
            script: script.into(),
            host,
            retry_requested: false,
            abort_message: String::new(),
            error_code: ErrorCode::NO_ERROR,
            cause_code: CauseCode::NO_CAUSE,
        }
    }

    pub fn abort(&mut self, message: impl Into<String>) -> Aborted {
        self.abort_message = message.into();
        Aborted
    }

    pub fn abort_with_cause(&mut self, cause: CauseCode, message: impl Into<String>) -> Aborted {
        self.cause_code = cause;
        self.abort(message)
    }

    /// Source text of `span`, or an empty string if it does not fall on
    /// character boundaries of the script.
    pub fn source_text(&self, span: Span) -> &str {
        self.script.get(span.start..span.end).unwrap_or_default()
    }
}

pub fn is_truthy(value: &str) -> bool {
    !value.is_empty()
}

pub fn bool_value(value: bool) -> String {
    if value {
        "t".to_string()
    } else {
        String::new()
    }
}
