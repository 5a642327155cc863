//! Provider 驱动抽象层 — 通过 trait 实现多厂商 API 适配的动态分发
//!
//! Provider driver abstraction. Each vendor wire format has one driver that maps
//! a [`UnifiedRequest`] to the vendor body and hands out a fresh
//! [`ResponseDecoder`] per call. The orchestrator only ever talks to these two
//! traits, so adding a vendor never touches the call loop.

pub mod anthropic;
pub mod gemini;
pub mod openai;

use serde_json::Value;

use crate::error::Error;
use crate::pipeline::{FunctionCallAccumulator, SseFrame};
use crate::registry::ProviderId;
use crate::types::{FinishReason, UnifiedEvent, UnifiedRequest};

pub use anthropic::AnthropicDriver;
pub use gemini::GeminiDriver;
pub use openai::OpenAiDriver;

/// Request-side adaptation for one vendor.
///
/// Object-safe; registry entries hold it as `Arc<dyn ProviderDriver>`.
pub trait ProviderDriver: Send + Sync + std::fmt::Debug {
    fn provider_id(&self) -> ProviderId;

    /// Endpoint path (and query) appended to the entry's base URL.
    fn path(&self, model: &str) -> String;

    /// Vendor-specific model id checks. Empty models are rejected before this is called.
    fn validate_model(&self, _model: &str) -> Result<(), Error> {
        Ok(())
    }

    /// Serialize the request into the vendor's JSON body.
    fn map_body(&self, request: &UnifiedRequest) -> Result<Value, Error>;

    /// Human-readable message from an error response body, if it has one.
    fn error_message(&self, body: &[u8]) -> Option<String> {
        extract_error_message(body)
    }

    /// A decoder for one call. Decoders are never shared between calls.
    fn new_decoder(&self) -> Box<dyn ResponseDecoder>;
}

/// Response-side adaptation: frames in, unified events out.
pub trait ResponseDecoder: Send {
    /// Decode one frame. Errors terminate the stream.
    fn decode(
        &mut self,
        frame: &SseFrame,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error>;

    /// The byte stream closed (or the `[DONE]` sentinel arrived). Emits the
    /// terminal `StreamEnded` if none was emitted yet.
    fn finish(
        &mut self,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error>;
}

/// Tracks whether the terminal event has been produced. Shared by all decoders
/// so that `[DONE]`, `message_stop` and connection close stay idempotent.
#[derive(Debug, Default)]
pub(crate) struct EndGuard {
    ended: bool,
}

impl EndGuard {
    pub(crate) fn is_ended(&self) -> bool {
        self.ended
    }

    /// Flush pending calls, then emit `StreamEnded(reason)` once.
    pub(crate) fn end(
        &mut self,
        reason: FinishReason,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        if self.ended {
            return Ok(());
        }
        calls.resolve_all(out)?;
        self.ended = true;
        out.push(UnifiedEvent::ended(reason));
        Ok(())
    }

    /// End without an explicit reason from the vendor.
    pub(crate) fn end_on_close(
        &mut self,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        if self.ended {
            return Ok(());
        }
        calls.resolve_all(out)?;
        let reason = if calls.completed_count() > 0 {
            FinishReason::ToolCall
        } else {
            FinishReason::Stop
        };
        self.end(reason, calls, out)
    }
}

/// Parse a frame payload as a JSON object.
pub(crate) fn parse_payload(frame: &SseFrame, source: &str) -> Result<Value, Error> {
    let value: Value = serde_json::from_str(&frame.data).map_err(|e| {
        Error::protocol_with_context(
            format!("frame is not valid JSON: {}", e),
            crate::ErrorContext::new().with_source(source),
        )
    })?;
    if !value.is_object() {
        return Err(Error::protocol_with_context(
            "frame payload is not a JSON object",
            crate::ErrorContext::new().with_source(source),
        ));
    }
    Ok(value)
}

/// `error.message`, a bare `error` string, then a top-level `message`.
/// Array-wrapped bodies (`[{"error": ...}]`) are unwrapped first.
pub fn extract_error_message(body: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(body).ok()?;
    let value = match value {
        Value::Array(mut items) if !items.is_empty() => items.swap_remove(0),
        other => other,
    };
    error_message_from_value(&value)
}

pub(crate) fn error_message_from_value(value: &Value) -> Option<String> {
    let non_empty = |v: Option<&Value>| {
        v.and_then(Value::as_str)
            .filter(|s| !s.trim().is_empty())
            .map(str::to_string)
    };
    non_empty(value.pointer("/error/message"))
        .or_else(|| non_empty(value.get("error")))
        .or_else(|| non_empty(value.get("message")))
}
