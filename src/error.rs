use crate::protocol::ParamPair;
use crate::transport::TransportError;
use std::path::PathBuf;
use thiserror::Error;

/// Parameter names whose values never appear in diagnostics.
pub const REDACTED_PARAMS: &[&str] = &["apiKey", "apiSig", "password"];

const REDACTED: &str = "<hidden>";

/// Values longer than this are abbreviated in diagnostics (file contents, sources).
const MAX_DISPLAY_VALUE_LEN: usize = 64;

/// Request context attached to errors: where the request went and what it carried.
///
/// The `Display` of an error never prints credential values; see [`REDACTED_PARAMS`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    /// Target address (e.g. "https://polygon.codeforces.com/api/problem.info")
    pub url: Option<String>,
    /// Parameters sent with the request, in wire order
    pub parameters: Vec<ParamPair>,
    /// Component that raised the error (e.g. "retry_engine", "builder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    pub fn with_parameters(mut self, parameters: impl Into<Vec<ParamPair>>) -> Self {
        self.parameters = parameters.into();
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Parameters as they may be shown to a human: credentials hidden, long values shortened.
    pub fn redacted_parameters(&self) -> String {
        let body = self
            .parameters
            .iter()
            .map(|p| format!("\"{}\": \"{}\"", p.name, display_value(p)))
            .collect::<Vec<_>>()
            .join(", ");
        format!("{{{}}}", body)
    }
}

fn display_value(pair: &ParamPair) -> String {
    if REDACTED_PARAMS.contains(&pair.name.as_str()) {
        return REDACTED.to_string();
    }
    if pair.value.chars().count() > MAX_DISPLAY_VALUE_LEN {
        let head: String = pair.value.chars().take(MAX_DISPLAY_VALUE_LEN).collect();
        format!("{}... ({} bytes)", head, pair.value.len())
    } else {
        pair.value.clone()
    }
}

/// Unified error type for Polygon API calls.
///
/// Every variant is terminal for the call that produced it. Undecodable
/// responses are retried internally and only surface as
/// [`Error::ServiceUnavailable`] once the backoff budget is spent.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Cannot read file for parameter '{parameter}' ({}): {source}", path.display())]
    Marshalling {
        parameter: String,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Network transport error: {source}{}", format_context(.context))]
    Transport {
        #[source]
        source: TransportError,
        context: ErrorContext,
    },

    #[error(
        "Polygon API is unavailable, giving up after {attempts} attempts and {waited_ms} ms of backoff{}",
        format_context(.context)
    )]
    ServiceUnavailable {
        attempts: u32,
        waited_ms: u64,
        context: ErrorContext,
    },

    #[error("Request returned status FAILED, comment: {comment}{}", format_context(.context))]
    RequestRejected {
        comment: String,
        context: ErrorContext,
    },

    #[error("Request cancelled{}", format_context(.context))]
    Cancelled { context: ErrorContext },

    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("I/O error: {source}{}", format_context(.context))]
    Io {
        #[source]
        source: std::io::Error,
        context: ErrorContext,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref url) = ctx.url {
        parts.push(format!("url: {}", url));
    }
    if !ctx.parameters.is_empty() {
        parts.push(format!("parameters: {}", ctx.redacted_parameters()));
    }
    if let Some(ref source) = ctx.source {
        parts.push(format!("source: {}", source));
    }
    if parts.is_empty() {
        String::new()
    } else {
        format!(" ({})", parts.join(", "))
    }
}

impl Error {
    pub fn transport(source: impl Into<TransportError>, context: ErrorContext) -> Self {
        Error::Transport {
            source: source.into(),
            context,
        }
    }

    pub fn rejected(comment: impl Into<String>, context: ErrorContext) -> Self {
        Error::RequestRejected {
            comment: comment.into(),
            context,
        }
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new().with_source("builder"),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Transport { context, .. }
            | Error::ServiceUnavailable { context, .. }
            | Error::RequestRejected { context, .. }
            | Error::Cancelled { context }
            | Error::Configuration { context, .. }
            | Error::Io { context, .. } => Some(context),
            _ => None,
        }
    }

    /// Service-provided comment of a `FAILED` envelope.
    pub fn comment(&self) -> Option<&str> {
        match self {
            Error::RequestRejected { comment, .. } => Some(comment),
            _ => None,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Whether a network exchange ran out of time.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Transport { source, .. } if source.is_timeout())
    }
}

impl From<std::io::Error> for Error {
    fn from(source: std::io::Error) -> Self {
        Error::Io {
            source,
            context: ErrorContext::new(),
        }
    }
}
