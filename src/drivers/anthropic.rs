//! Anthropic Messages API 驱动 — 实现 Anthropic 特有的请求/响应格式转换
//!
//! Anthropic Messages API driver. Handles the key differences from OpenAI:
//! - The system prompt is a top-level `system` parameter, not part of `messages`.
//! - `messages` must alternate `user`/`assistant`; consecutive turns with the
//!   same role are merged.
//! - `max_tokens` is required, not optional.
//! - Streaming frames are typed by `event:` (`content_block_start`,
//!   `content_block_delta`, `message_delta`, ...). Tool-call arguments arrive as
//!   `input_json_delta` fragments addressed by content block index.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{error_message_from_value, parse_payload, EndGuard, ProviderDriver, ResponseDecoder};
use crate::error::Error;
use crate::pipeline::{FunctionCallAccumulator, SseFrame};
use crate::registry::ProviderId;
use crate::types::{FinishReason, Role, UnifiedEvent, UnifiedRequest};
use crate::ErrorContext;

pub const ANTHROPIC_VERSION: &str = "2023-06-01";
const DEFAULT_MAX_TOKENS: u32 = 4096;

/// Anthropic Messages API driver.
#[derive(Debug, Default)]
pub struct AnthropicDriver;

impl AnthropicDriver {
    pub fn new() -> Self {
        Self
    }

    /// Map turns onto strictly alternating roles. Tool results travel as user
    /// text; empty turns are dropped.
    fn alternating_messages(request: &UnifiedRequest) -> Vec<Value> {
        let mut merged: Vec<(&'static str, String)> = Vec::new();
        for (role, content, _) in request.turns() {
            if content.trim().is_empty() {
                continue;
            }
            let role = match role {
                Role::Assistant => "assistant",
                Role::User | Role::Tool => "user",
            };
            match merged.last_mut() {
                Some((last_role, text)) if *last_role == role => {
                    text.push_str("\n\n");
                    text.push_str(content);
                }
                _ => merged.push((role, content.to_string())),
            }
        }
        merged
            .into_iter()
            .map(|(role, text)| {
                json!({
                    "role": role,
                    "content": [{ "type": "text", "text": text }],
                })
            })
            .collect()
    }
}

impl ProviderDriver for AnthropicDriver {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Anthropic
    }

    fn path(&self, _model: &str) -> String {
        "/messages".to_string()
    }

    fn map_body(&self, request: &UnifiedRequest) -> Result<Value, Error> {
        let params = request.generation_params();
        let mut body = json!({
            "model": request.model(),
            "messages": Self::alternating_messages(request),
            "max_tokens": params.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
            "stream": true,
        });

        if !request.system_prompt().is_empty() {
            body["system"] = Value::String(request.system_prompt().to_string());
        }
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }

        let functions = request.available_functions();
        if !functions.is_empty() {
            let tools: Vec<Value> = functions
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "description": f.description,
                        "input_schema": f.parameters,
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
        }

        Ok(body)
    }

    fn new_decoder(&self) -> Box<dyn ResponseDecoder> {
        Box::new(AnthropicDecoder::new())
    }
}

/// Per-call Anthropic stream state: content block index -> tool call id.
#[derive(Debug, Default)]
pub struct AnthropicDecoder {
    tool_blocks: HashMap<u64, String>,
    guard: EndGuard,
}

impl AnthropicDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn block_index(v: &Value) -> Result<u64, Error> {
        v.get("index").and_then(Value::as_u64).ok_or_else(|| {
            Error::protocol_with_context(
                "content block event without an index",
                ErrorContext::new()
                    .with_field_path("index")
                    .with_source("anthropic_decoder"),
            )
        })
    }

    fn on_block_start(
        &mut self,
        v: &Value,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        let index = Self::block_index(v)?;
        let Some(block) = v.get("content_block") else {
            return Ok(());
        };
        match block.get("type").and_then(Value::as_str) {
            Some("tool_use") => {
                let id = block
                    .get("id")
                    .and_then(Value::as_str)
                    .filter(|s| !s.is_empty())
                    .map(str::to_string)
                    .unwrap_or_else(|| format!("toolu_block_{}", index));
                let name = block.get("name").and_then(Value::as_str);
                calls.on_start(&id, name, out);
                self.tool_blocks.insert(index, id);
            }
            Some("text") => {
                if let Some(text) = block.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        out.push(UnifiedEvent::text(text));
                    }
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn on_block_delta(
        &mut self,
        v: &Value,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        let Some(delta) = v.get("delta") else {
            return Ok(());
        };
        match delta.get("type").and_then(Value::as_str) {
            Some("text_delta") => {
                if let Some(text) = delta.get("text").and_then(Value::as_str) {
                    if !text.is_empty() {
                        out.push(UnifiedEvent::text(text));
                    }
                }
            }
            Some("input_json_delta") => {
                let index = Self::block_index(v)?;
                let call_id = self.tool_blocks.get(&index).ok_or_else(|| {
                    Error::protocol_with_context(
                        format!("input_json_delta for unknown content block {}", index),
                        ErrorContext::new()
                            .with_field_path("index")
                            .with_source("anthropic_decoder"),
                    )
                })?;
                let fragment = delta.get("partial_json").and_then(Value::as_str).unwrap_or("");
                calls.on_argument_fragment(call_id, fragment, out);
            }
            other => {
                debug!(delta_type = ?other, "skipping Anthropic delta");
            }
        }
        Ok(())
    }

    fn on_block_stop(
        &mut self,
        v: &Value,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        let index = Self::block_index(v)?;
        if let Some(call_id) = self.tool_blocks.remove(&index) {
            calls.on_resolve(&call_id, out)?;
        }
        Ok(())
    }
}

impl ResponseDecoder for AnthropicDecoder {
    fn decode(
        &mut self,
        frame: &SseFrame,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        if self.guard.is_ended() {
            return Ok(());
        }
        if frame.is_done() {
            return self.finish(calls, out);
        }
        if frame.data.trim().is_empty() {
            return Ok(());
        }

        let v = parse_payload(frame, "anthropic_decoder")?;
        // The SSE event name is authoritative; the payload's `type` mirrors it.
        let event_type = frame
            .event
            .as_deref()
            .or_else(|| v.get("type").and_then(Value::as_str))
            .unwrap_or("");

        match event_type {
            "content_block_start" => self.on_block_start(&v, calls, out),
            "content_block_delta" => self.on_block_delta(&v, calls, out),
            "content_block_stop" => self.on_block_stop(&v, calls, out),
            "message_delta" => {
                if let Some(reason) = v.pointer("/delta/stop_reason").and_then(Value::as_str) {
                    let reason = match reason {
                        "end_turn" | "stop_sequence" => FinishReason::Stop,
                        "max_tokens" => FinishReason::Length,
                        "tool_use" => FinishReason::ToolCall,
                        other => {
                            warn!(provider = "anthropic", finish_reason = other, "unrecognized stop reason, treating as stop");
                            FinishReason::Stop
                        }
                    };
                    self.guard.end(reason, calls, out)?;
                }
                Ok(())
            }
            "message_stop" => self.finish(calls, out),
            "error" => Err(Error::Provider {
                message: error_message_from_value(&v)
                    .unwrap_or_else(|| "provider reported an error".to_string()),
            }),
            "message_start" | "ping" => Ok(()),
            other => {
                debug!(event = other, "skipping unrecognized Anthropic event");
                Ok(())
            }
        }
    }

    fn finish(
        &mut self,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        self.tool_blocks.clear();
        self.guard.end_on_close(calls, out)
    }
}
