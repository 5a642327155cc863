use crate::credentials::CredentialError;
use crate::transport::TransportError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Placeholder written wherever a secret would otherwise appear.
pub const REDACTED: &str = "[REDACTED]";

/// Structured error context for better error handling and debugging.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorContext {
    /// Field path that caused the error (e.g., "request.model", "choices[0].delta.tool_calls")
    pub field_path: Option<String>,
    /// Additional context about the error (e.g., expected type, actual value)
    pub details: Option<String>,
    /// Source of the error (e.g., "request_builder", "anthropic_decoder")
    pub source: Option<String>,
}

impl ErrorContext {
    pub fn new() -> Self {
        Self {
            field_path: None,
            details: None,
            source: None,
        }
    }

    pub fn with_field_path(mut self, path: impl Into<String>) -> Self {
        self.field_path = Some(path.into());
        self
    }

    pub fn with_details(mut self, details: impl Into<String>) -> Self {
        self.details = Some(details.into());
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }
}

impl Default for ErrorContext {
    fn default() -> Self {
        Self::new()
    }
}

/// Coarse failure category carried by `UnifiedEvent::StreamFailed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Missing/invalid model or secret, detected before any network call.
    Configuration,
    /// Connection refused, TLS failure, time-to-first-byte or idle-read timeout.
    Network,
    /// Non-2xx response status.
    Http,
    /// A frame or payload that does not match the provider's expected shape.
    Protocol,
    /// Buffered function-call arguments are not valid structured data.
    FunctionCallParse,
    /// An error event reported by the provider inside an otherwise healthy stream.
    Provider,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Configuration => "configuration",
            ErrorKind::Network => "network",
            ErrorKind::Http => "http",
            ErrorKind::Protocol => "protocol",
            ErrorKind::FunctionCallParse => "function_call_parse",
            ErrorKind::Provider => "provider",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unified error type for the gateway.
///
/// Only `Configuration` (and credential lookups, which are configuration
/// problems from the caller's point of view) escape `Gateway::send` as a
/// `Result`. Everything else is folded into a single `StreamFailed` event.
#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {message}{}", format_context(.context))]
    Configuration {
        message: String,
        context: ErrorContext,
    },

    #[error("Credential store error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Network transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("HTTP {status}: {message}")]
    Http { status: u16, message: String },

    #[error("Protocol error: {message}{}", format_context(.context))]
    Protocol {
        message: String,
        context: ErrorContext,
    },

    #[error("Function call '{call_id}' has invalid arguments: {reason}")]
    FunctionCallParse { call_id: String, reason: String },

    #[error("Provider error: {message}")]
    Provider { message: String },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A `StreamFailed` event turned back into an error (see `EventStream::collect_response`).
    #[error("Stream failed ({kind}): {message}")]
    Stream { kind: ErrorKind, message: String },
}

// Helper function to format error context for display
fn format_context(ctx: &ErrorContext) -> String {
    let mut parts = Vec::new();
    if let Some(ref field) = ctx.field_path {
        parts.push(format!("field: {}", field));
    }
    if let Some(ref details) = ctx.details {
        parts.push(format!("details: {}", details));
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
    pub fn configuration(msg: impl Into<String>) -> Self {
        Error::Configuration {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn configuration_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Configuration {
            message: msg.into(),
            context,
        }
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        Error::Protocol {
            message: msg.into(),
            context: ErrorContext::new(),
        }
    }

    pub fn protocol_with_context(msg: impl Into<String>, context: ErrorContext) -> Self {
        Error::Protocol {
            message: msg.into(),
            context,
        }
    }

    /// Category used when this error is surfaced as `StreamFailed`.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Configuration { .. } | Error::Credential(_) => ErrorKind::Configuration,
            Error::Transport(_) => ErrorKind::Network,
            Error::Http { .. } => ErrorKind::Http,
            Error::Protocol { .. } | Error::Serialization(_) => ErrorKind::Protocol,
            Error::FunctionCallParse { .. } => ErrorKind::FunctionCallParse,
            Error::Provider { .. } => ErrorKind::Provider,
            Error::Stream { kind, .. } => *kind,
        }
    }

    /// Message placed in `StreamFailed`. HTTP and provider errors carry the
    /// provider's own text verbatim; the rest use the display form.
    pub fn event_message(&self) -> String {
        match self {
            Error::Http { message, .. }
            | Error::Provider { message }
            | Error::Stream { message, .. } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Extract error context if available
    pub fn context(&self) -> Option<&ErrorContext> {
        match self {
            Error::Configuration { context, .. } | Error::Protocol { context, .. } => Some(context),
            _ => None,
        }
    }
}

/// Replace every occurrence of `secret` in `message`.
///
/// Empty secrets are ignored so that a blank key cannot blank out a message.
pub fn redact(message: &str, secret: &str) -> String {
    if secret.is_empty() || !message.contains(secret) {
        return message.to_string();
    }
    message.replace(secret, REDACTED)
}
