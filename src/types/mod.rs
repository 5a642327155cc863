//! 类型系统模块：网关的输入请求与输出事件。
//!
//! # Types Module
//!
//! | Type | Description |
//! |------|-------------|
//! | [`UnifiedRequest`] | One conversational turn, provider-agnostic |
//! | [`HistoryMessage`] | Prior turn with role and text |
//! | [`FunctionSchema`] | Function the model may call |
//! | [`UnifiedEvent`] | The single output contract of a call |
//! | [`FinishReason`] | Why a stream ended normally |
//!
//! ## Example
//!
//! ```rust
//! use ai_stream_gateway::registry::ProviderId;
//! use ai_stream_gateway::types::{HistoryMessage, UnifiedRequest};
//!
//! let request = UnifiedRequest::builder(ProviderId::OpenAi, "gpt-4o-mini")
//!     .system_prompt("You are terse.")
//!     .history(vec![HistoryMessage::user("Hi"), HistoryMessage::assistant("Hello.")])
//!     .user_message("Say hi.")
//!     .temperature(0.2)
//!     .build();
//! assert_eq!(request.history().len(), 2);
//! ```

pub mod events;
pub mod request;
pub mod tool;

pub use events::{FinishReason, UnifiedEvent};
pub use request::{GenerationParams, HistoryMessage, Role, UnifiedRequest, UnifiedRequestBuilder};
pub use tool::{CompletedFunctionCall, FunctionSchema};
