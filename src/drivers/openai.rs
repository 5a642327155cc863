//! OpenAI Chat Completions 驱动 — 同时服务 OpenRouter
//!
//! OpenAI-compatible driver. Also used for OpenRouter, whose model ids carry a
//! vendor prefix (`anthropic/claude-3.5-sonnet`).
//!
//! Streaming chunks look like
//! `{"choices":[{"delta":{"content":"Hi","tool_calls":[...]},"finish_reason":null}]}`.
//! Tool-call fragments are keyed by `index`; the `id` is only present on the
//! first fragment of each call.

use serde_json::{json, Value};
use std::collections::HashMap;
use tracing::{debug, warn};

use super::{error_message_from_value, parse_payload, EndGuard, ProviderDriver, ResponseDecoder};
use crate::error::Error;
use crate::pipeline::{FunctionCallAccumulator, SseFrame};
use crate::registry::ProviderId;
use crate::types::{FinishReason, Role, UnifiedEvent, UnifiedRequest};
use crate::ErrorContext;

#[derive(Debug)]
pub struct OpenAiDriver {
    provider_id: ProviderId,
}

impl OpenAiDriver {
    pub fn new(provider_id: ProviderId) -> Self {
        Self { provider_id }
    }
}

impl ProviderDriver for OpenAiDriver {
    fn provider_id(&self) -> ProviderId {
        self.provider_id
    }

    fn path(&self, _model: &str) -> String {
        "/chat/completions".to_string()
    }

    fn validate_model(&self, model: &str) -> Result<(), Error> {
        if self.provider_id == ProviderId::OpenRouter {
            let prefixed = model
                .split_once('/')
                .map(|(vendor, name)| !vendor.is_empty() && !name.is_empty())
                .unwrap_or(false);
            if !prefixed {
                return Err(Error::configuration_with_context(
                    format!(
                        "OpenRouter model '{}' must carry a vendor prefix (vendor/model)",
                        model
                    ),
                    ErrorContext::new()
                        .with_field_path("request.model")
                        .with_source("openrouter_driver"),
                ));
            }
        }
        Ok(())
    }

    fn map_body(&self, request: &UnifiedRequest) -> Result<Value, Error> {
        let mut messages = Vec::new();
        if !request.system_prompt().is_empty() {
            messages.push(json!({ "role": "system", "content": request.system_prompt() }));
        }
        for (role, content, tool_call_id) in request.turns() {
            let message = match (role, tool_call_id) {
                (Role::User, _) => json!({ "role": "user", "content": content }),
                (Role::Assistant, _) => json!({ "role": "assistant", "content": content }),
                // The API requires tool_call_id for role "tool".
                (Role::Tool, Some(id)) => {
                    json!({ "role": "tool", "tool_call_id": id, "content": content })
                }
                (Role::Tool, None) => json!({ "role": "user", "content": content }),
            };
            messages.push(message);
        }

        let mut body = json!({
            "model": request.model(),
            "messages": messages,
            "stream": true,
        });

        let params = request.generation_params();
        if let Some(t) = params.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = params.max_tokens {
            body["max_tokens"] = json!(mt);
        }

        let functions = request.available_functions();
        if !functions.is_empty() {
            let tools: Vec<Value> = functions
                .iter()
                .map(|f| {
                    json!({
                        "type": "function",
                        "function": {
                            "name": f.name,
                            "description": f.description,
                            "parameters": f.parameters,
                        }
                    })
                })
                .collect();
            body["tools"] = Value::Array(tools);
            body["tool_choice"] = json!("auto");
        }

        Ok(body)
    }

    fn new_decoder(&self) -> Box<dyn ResponseDecoder> {
        Box::new(OpenAiDecoder::new(self.provider_id))
    }
}

/// Legacy single `function_call` deltas share one synthetic slot.
const LEGACY_FUNCTION_CALL_INDEX: u64 = u64::MAX;

#[derive(Debug)]
pub struct OpenAiDecoder {
    provider_id: ProviderId,
    call_ids: HashMap<u64, String>,
    guard: EndGuard,
}

impl OpenAiDecoder {
    pub fn new(provider_id: ProviderId) -> Self {
        Self {
            provider_id,
            call_ids: HashMap::new(),
            guard: EndGuard::default(),
        }
    }

    fn source(&self) -> &'static str {
        match self.provider_id {
            ProviderId::OpenRouter => "openrouter_decoder",
            _ => "openai_decoder",
        }
    }

    fn call_id_for(&mut self, index: u64, id: Option<&str>) -> String {
        if let Some(existing) = self.call_ids.get(&index) {
            return existing.clone();
        }
        let call_id = match id.filter(|s| !s.is_empty()) {
            Some(id) => id.to_string(),
            None if index == LEGACY_FUNCTION_CALL_INDEX => "function_call".to_string(),
            None => format!("call_{}", index),
        };
        self.call_ids.insert(index, call_id.clone());
        call_id
    }

    fn route_call_fragment(
        &mut self,
        index: u64,
        id: Option<&str>,
        function: Option<&Value>,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) {
        let call_id = self.call_id_for(index, id);
        let name = function
            .and_then(|f| f.get("name"))
            .and_then(Value::as_str);
        calls.on_start(&call_id, name, out);
        if let Some(args) = function
            .and_then(|f| f.get("arguments"))
            .and_then(Value::as_str)
        {
            calls.on_argument_fragment(&call_id, args, out);
        }
    }
}

impl ResponseDecoder for OpenAiDecoder {
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
            debug!(provider = %self.provider_id, "skipping empty frame");
            return Ok(());
        }

        let v = parse_payload(frame, self.source())?;

        if v.get("error").is_some() {
            return Err(Error::Provider {
                message: error_message_from_value(&v)
                    .unwrap_or_else(|| "provider reported an error".to_string()),
            });
        }

        let Some(choices) = v.get("choices") else {
            // Usage-only and keep-alive chunks carry no choices.
            debug!(provider = %self.provider_id, "skipping frame without choices");
            return Ok(());
        };
        let choices = choices.as_array().ok_or_else(|| {
            Error::protocol_with_context(
                "'choices' is not an array",
                ErrorContext::new()
                    .with_field_path("choices")
                    .with_source(self.source()),
            )
        })?;
        let Some(choice) = choices.first() else {
            return Ok(());
        };

        if let Some(delta) = choice.get("delta") {
            if let Some(text) = delta.get("content").and_then(Value::as_str) {
                if !text.is_empty() {
                    out.push(UnifiedEvent::text(text));
                }
            }

            if let Some(tool_calls) = delta.get("tool_calls").and_then(Value::as_array) {
                for (position, tc) in tool_calls.iter().enumerate() {
                    let index = tc
                        .get("index")
                        .and_then(Value::as_u64)
                        .unwrap_or(position as u64);
                    let id = tc.get("id").and_then(Value::as_str);
                    self.route_call_fragment(index, id, tc.get("function"), calls, out);
                }
            }

            if let Some(function) = delta.get("function_call").filter(|f| f.is_object()) {
                self.route_call_fragment(LEGACY_FUNCTION_CALL_INDEX, None, Some(function), calls, out);
            }
        }

        if let Some(reason) = choice.get("finish_reason").and_then(Value::as_str) {
            let reason = match reason {
                "stop" => FinishReason::Stop,
                "length" => FinishReason::Length,
                "tool_calls" | "function_call" => FinishReason::ToolCall,
                other => {
                    warn!(provider = %self.provider_id, finish_reason = other, "unrecognized finish reason, treating as stop");
                    FinishReason::Stop
                }
            };
            self.guard.end(reason, calls, out)?;
        }

        Ok(())
    }

    fn finish(
        &mut self,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        self.guard.end_on_close(calls, out)
    }
}
