use std::fmt;
use std::path::PathBuf;

use thiserror::Error;

/// A guest error rendered to plain text: the stringified exception plus the
/// guest stack traceback (empty when the runtime did not attach one).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RenderedError {
    pub message: String,
    pub backtrace: String,
}

impl fmt::Display for RenderedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.backtrace.is_empty() {
            write!(f, "{}", self.message)
        } else {
            write!(f, "{}\n{}", self.message, self.backtrace)
        }
    }
}

/// Marker for "a guest error is now parked in the pending slot".
#[derive(Debug)]
pub(crate) struct Raised;

/// The application entry file could not be loaded. Not recoverable; the
/// embedding should abort startup.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("could not read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("application failed to load: {0}")]
    Guest(RenderedError),
}

/// The application returned something the calling convention does not
/// recognize. Scoped to one request; the process carries on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("malformed response: {0}")]
    MalformedResponse(String),

    #[error("response status is not numeric: {0}")]
    NonNumericStatus(String),

    #[error("response header is not stringifiable: {0}")]
    UnstringifiableHeader(String),
}

#[derive(Debug, Error, Clone)]
pub enum CallError {
    #[error("application not found: {0}")]
    AppNotFound(RenderedError),

    #[error("application raised: {0}")]
    AppRaised(RenderedError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("request environment could not be marshalled: {0}")]
    Marshal(RenderedError),
}

/// Render a guest error into message + backtrace text.
pub(crate) fn render(err: &mlua::Error) -> RenderedError {
    match err {
        mlua::Error::RuntimeError(raw) | mlua::Error::MemoryError(raw) => split_traceback(raw),
        mlua::Error::SyntaxError { message, .. } => split_traceback(message),
        mlua::Error::CallbackError { traceback, cause } => RenderedError {
            message: cause.to_string(),
            backtrace: traceback.clone(),
        },
        other => RenderedError {
            message: other.to_string(),
            backtrace: String::new(),
        },
    }
}

/// The runtime appends the traceback to the error text; split it back out so
/// the two can be surfaced independently.
fn split_traceback(raw: &str) -> RenderedError {
    match raw.split_once("\nstack traceback:") {
        Some((message, rest)) => RenderedError {
            message: message.trim_end().to_string(),
            backtrace: format!("stack traceback:{rest}"),
        },
        None => RenderedError {
            message: raw.to_string(),
            backtrace: String::new(),
        },
    }
}
