//! Gemini Generate API 驱动 — 实现 Google Gemini 特有的请求/响应格式转换
//!
//! Google Gemini `streamGenerateContent` driver. Key differences:
//! - Uses `contents` with `parts`; roles are `user` and `model`.
//! - The system prompt goes into `systemInstruction`.
//! - `generationConfig` wraps temperature and `maxOutputTokens`.
//! - Streaming (`?alt=sse`) sends full response objects per frame and has no
//!   `[DONE]` sentinel; completion comes from `finishReason` or connection close.
//! - Function calls arrive whole (`{"functionCall":{"name":..,"args":{..}}}`),
//!   never fragmented.

use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{error_message_from_value, parse_payload, EndGuard, ProviderDriver, ResponseDecoder};
use crate::error::Error;
use crate::pipeline::{FunctionCallAccumulator, SseFrame};
use crate::registry::ProviderId;
use crate::types::{FinishReason, Role, UnifiedEvent, UnifiedRequest};
use crate::ErrorContext;

#[derive(Debug, Default)]
pub struct GeminiDriver;

impl GeminiDriver {
    pub fn new() -> Self {
        Self
    }
}

impl ProviderDriver for GeminiDriver {
    fn provider_id(&self) -> ProviderId {
        ProviderId::Gemini
    }

    fn path(&self, model: &str) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        format!("/models/{}:streamGenerateContent?alt=sse", model)
    }

    fn map_body(&self, request: &UnifiedRequest) -> Result<Value, Error> {
        let contents: Vec<Value> = request
            .turns()
            .map(|(role, content, _)| {
                let role = match role {
                    Role::Assistant => "model",
                    Role::User | Role::Tool => "user",
                };
                json!({ "role": role, "parts": [{ "text": content }] })
            })
            .collect();

        let mut body = json!({ "contents": contents });

        if !request.system_prompt().is_empty() {
            body["systemInstruction"] = json!({
                "parts": [{ "text": request.system_prompt() }]
            });
        }

        let functions = request.available_functions();
        if !functions.is_empty() {
            let declarations: Vec<Value> = functions
                .iter()
                .map(|f| {
                    json!({
                        "name": f.name,
                        "description": f.description,
                        "parameters": f.parameters,
                    })
                })
                .collect();
            body["tools"] = json!([{ "functionDeclarations": declarations }]);
        }

        let params = request.generation_params();
        let mut gen_config = serde_json::Map::new();
        if let Some(t) = params.temperature {
            gen_config.insert("temperature".into(), json!(t));
        }
        if let Some(mt) = params.max_tokens {
            gen_config.insert("maxOutputTokens".into(), json!(mt));
        }
        if !gen_config.is_empty() {
            body["generationConfig"] = Value::Object(gen_config);
        }

        Ok(body)
    }

    fn new_decoder(&self) -> Box<dyn ResponseDecoder> {
        Box::new(GeminiDecoder::new())
    }
}

#[derive(Debug, Default)]
pub struct GeminiDecoder {
    synthesized_ids: usize,
    guard: EndGuard,
}

impl GeminiDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_call_id(&mut self) -> String {
        self.synthesized_ids += 1;
        format!("gemini-call-{}", self.synthesized_ids)
    }

    fn decode_part(
        &mut self,
        part: &Value,
        calls: &mut FunctionCallAccumulator,
        out: &mut Vec<UnifiedEvent>,
    ) -> Result<(), Error> {
        // Thought summaries are not part of the answer.
        if part.get("thought").and_then(Value::as_bool) == Some(true) {
            return Ok(());
        }
        if let Some(text) = part.get("text").and_then(Value::as_str) {
            if !text.is_empty() {
                out.push(UnifiedEvent::text(text));
            }
            return Ok(());
        }
        if let Some(call) = part.get("functionCall") {
            let name = call.get("name").and_then(Value::as_str).ok_or_else(|| {
                Error::protocol_with_context(
                    "functionCall without a name",
                    ErrorContext::new()
                        .with_field_path("candidates[0].content.parts[].functionCall.name")
                        .with_source("gemini_decoder"),
                )
            })?;
            let call_id = match call.get("id").and_then(Value::as_str) {
                Some(id) if !id.is_empty() => id.to_string(),
                _ => self.next_call_id(),
            };
            let args = call.get("args").cloned().unwrap_or_else(|| json!({}));
            return calls.resolve_structured(&call_id, name, &args, out);
        }
        debug!("skipping unrecognized Gemini part");
        Ok(())
    }
}

impl ResponseDecoder for GeminiDecoder {
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

        let v = parse_payload(frame, "gemini_decoder")?;

        if v.get("error").is_some() {
            return Err(Error::Provider {
                message: error_message_from_value(&v)
                    .unwrap_or_else(|| "provider reported an error".to_string()),
            });
        }

        let candidate = v
            .get("candidates")
            .and_then(Value::as_array)
            .and_then(|c| c.first());

        let Some(candidate) = candidate else {
            if let Some(reason) = v.pointer("/promptFeedback/blockReason").and_then(Value::as_str) {
                return Err(Error::Provider {
                    message: format!("prompt blocked: {}", reason),
                });
            }
            debug!("skipping Gemini frame without candidates");
            return Ok(());
        };

        if let Some(parts) = candidate.pointer("/content/parts") {
            let parts = parts.as_array().ok_or_else(|| {
                Error::protocol_with_context(
                    "'parts' is not an array",
                    ErrorContext::new()
                        .with_field_path("candidates[0].content.parts")
                        .with_source("gemini_decoder"),
                )
            })?;
            for part in parts {
                self.decode_part(part, calls, out)?;
            }
        }

        if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
            let reason = match reason {
                "STOP" if calls.completed_count() > 0 => FinishReason::ToolCall,
                "STOP" => FinishReason::Stop,
                "MAX_TOKENS" => FinishReason::Length,
                other => {
                    warn!(provider = "gemini", finish_reason = other, "unrecognized finish reason, treating as stop");
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
