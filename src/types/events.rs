//! Unified streaming events: the only thing callers ever receive from a call.

use crate::error::ErrorKind;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Normal end-of-stream reason.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishReason {
    Stop,
    Length,
    ToolCall,
}

/// Unified streaming event enum
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event_type")]
pub enum UnifiedEvent {
    /// Generated text fragment.
    TextChunk { text: String },

    /// A function call was announced; its arguments follow as deltas.
    FunctionCallStarted { call_id: String, name: String },

    /// Raw argument fragment, forwarded for progressive display only.
    FunctionCallArgumentDelta {
        call_id: String,
        partial_text: String,
    },

    /// Arguments fully received and parsed.
    FunctionCallCompleted {
        call_id: String,
        name: String,
        arguments: Map<String, Value>,
    },

    /// Terminal: the provider finished normally.
    StreamEnded { reason: FinishReason },

    /// Terminal: the call failed.
    StreamFailed { kind: ErrorKind, message: String },
}

impl UnifiedEvent {
    pub fn text(text: impl Into<String>) -> Self {
        UnifiedEvent::TextChunk { text: text.into() }
    }

    pub fn ended(reason: FinishReason) -> Self {
        UnifiedEvent::StreamEnded { reason }
    }

    pub fn failed(kind: ErrorKind, message: impl Into<String>) -> Self {
        UnifiedEvent::StreamFailed {
            kind,
            message: message.into(),
        }
    }

    /// `StreamEnded` and `StreamFailed` close the stream; nothing follows them.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            UnifiedEvent::StreamEnded { .. } | UnifiedEvent::StreamFailed { .. }
        )
    }
}
