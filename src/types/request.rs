//! Unified request: one conversational turn, built once and never mutated.

use crate::registry::ProviderId;
use crate::types::tool::FunctionSchema;
use serde::{Deserialize, Serialize};

/// Role of a prior turn. The system prompt travels separately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    Tool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: Role,
    pub content: String,
    /// Only meaningful for `Role::Tool`: the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl HistoryMessage {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            tool_call_id: None,
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: text.into(),
            tool_call_id: None,
        }
    }

    pub fn tool(text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: text.into(),
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: text.into(),
            tool_call_id: Some(call_id.into()),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerationParams {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

/// Provider-agnostic chat request for a single turn.
///
/// Fields are read-only; use [`UnifiedRequest::builder`] to construct one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnifiedRequest {
    system_prompt: String,
    history: Vec<HistoryMessage>,
    user_message: String,
    #[serde(default)]
    available_functions: Vec<FunctionSchema>,
    provider: ProviderId,
    model: String,
    #[serde(default)]
    generation_params: GenerationParams,
}

impl UnifiedRequest {
    pub fn builder(provider: ProviderId, model: impl Into<String>) -> UnifiedRequestBuilder {
        UnifiedRequestBuilder::new(provider, model)
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn history(&self) -> &[HistoryMessage] {
        &self.history
    }

    pub fn user_message(&self) -> &str {
        &self.user_message
    }

    pub fn available_functions(&self) -> &[FunctionSchema] {
        &self.available_functions
    }

    pub fn provider(&self) -> ProviderId {
        self.provider
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    /// Copy of this request aimed at `model`.
    pub(crate) fn with_model(&self, model: &str) -> Self {
        Self {
            model: model.to_string(),
            ..self.clone()
        }
    }

    pub fn generation_params(&self) -> GenerationParams {
        self.generation_params
    }

    /// History followed by the current user message, in send order.
    pub fn turns(&self) -> impl Iterator<Item = (Role, &str, Option<&str>)> + '_ {
        self.history
            .iter()
            .map(|m| (m.role, m.content.as_str(), m.tool_call_id.as_deref()))
            .chain(std::iter::once((Role::User, self.user_message.as_str(), None)))
    }
}

/// Builder for [`UnifiedRequest`].
#[derive(Debug, Clone)]
pub struct UnifiedRequestBuilder {
    inner: UnifiedRequest,
}

impl UnifiedRequestBuilder {
    pub fn new(provider: ProviderId, model: impl Into<String>) -> Self {
        Self {
            inner: UnifiedRequest {
                system_prompt: String::new(),
                history: Vec::new(),
                user_message: String::new(),
                available_functions: Vec::new(),
                provider,
                model: model.into(),
                generation_params: GenerationParams::default(),
            },
        }
    }

    pub fn system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.inner.system_prompt = prompt.into();
        self
    }

    pub fn history(mut self, history: Vec<HistoryMessage>) -> Self {
        self.inner.history = history;
        self
    }

    pub fn push_history(mut self, message: HistoryMessage) -> Self {
        self.inner.history.push(message);
        self
    }

    pub fn user_message(mut self, text: impl Into<String>) -> Self {
        self.inner.user_message = text.into();
        self
    }

    pub fn functions(mut self, functions: Vec<FunctionSchema>) -> Self {
        self.inner.available_functions = functions;
        self
    }

    pub fn function(mut self, function: FunctionSchema) -> Self {
        self.inner.available_functions.push(function);
        self
    }

    pub fn temperature(mut self, temperature: f64) -> Self {
        self.inner.generation_params.temperature = Some(temperature);
        self
    }

    pub fn max_tokens(mut self, max_tokens: u32) -> Self {
        self.inner.generation_params.max_tokens = Some(max_tokens);
        self
    }

    pub fn generation_params(mut self, params: GenerationParams) -> Self {
        self.inner.generation_params = params;
        self
    }

    pub fn build(self) -> UnifiedRequest {
        self.inner
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn turns_append_user_message_last() {
        let req = UnifiedRequest::builder(ProviderId::Gemini, "gemini-2.0-flash")
            .history(vec![
                HistoryMessage::user("a"),
                HistoryMessage::assistant("b"),
            ])
            .user_message("c")
            .build();
        let turns: Vec<_> = req.turns().map(|(r, t, _)| (r, t)).collect();
        assert_eq!(
            turns,
            vec![(Role::User, "a"), (Role::Assistant, "b"), (Role::User, "c")]
        );
    }

    #[test]
    fn builder_sets_generation_params() {
        let req = UnifiedRequest::builder(ProviderId::OpenAi, "gpt-4o")
            .temperature(0.3)
            .max_tokens(128)
            .build();
        assert_eq!(req.generation_params().temperature, Some(0.3));
        assert_eq!(req.generation_params().max_tokens, Some(128));
        assert!(req.available_functions().is_empty());
    }
}
