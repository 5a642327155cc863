//! # ai-stream-gateway
//!
//! 多厂商流式对话网关：一种请求形态输入，一种事件流输出。
//!
//! Multi-provider streaming chat gateway. A caller describes one conversational
//! turn as a [`UnifiedRequest`]; the gateway sends it to OpenAI, OpenRouter,
//! Gemini or Anthropic and turns the vendor's SSE stream into a single ordered
//! sequence of [`UnifiedEvent`]s.
//!
//! ## Core Philosophy
//!
//! - **One contract**: callers never see vendor JSON, only `UnifiedEvent`s
//! - **Streaming-First**: bytes are framed and decoded as they arrive
//! - **Pull-based**: the consumer drives reads; cancellation closes the connection
//! - **Secrets stay secret**: keys live in the OS keyring and are redacted from
//!   every error message and log line
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ai_stream_gateway::{Gateway, GatewayConfig, ProviderId, UnifiedEvent, UnifiedRequest};
//! use futures::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> ai_stream_gateway::Result<()> {
//!     let gateway = Gateway::new(GatewayConfig::from_env())?;
//!     let request = UnifiedRequest::builder(ProviderId::Anthropic, "claude-3-5-haiku-latest")
//!         .user_message("Hello, how are you?")
//!         .build();
//!
//!     let mut events = gateway.send(request)?;
//!     while let Some(event) = events.next().await {
//!         if let UnifiedEvent::TextChunk { text } = event {
//!             print!("{}", text);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`gateway`] | Per-call orchestration, event stream, cancellation |
//! | [`registry`] | Provider identities, endpoints and auth schemes |
//! | [`drivers`] | Per-vendor body mappers and response decoders |
//! | [`pipeline`] | SSE framing and function-call reassembly |
//! | [`request`] | Outbound HTTP request assembly |
//! | [`transport`] | Streaming HTTP transport |
//! | [`credentials`] | OS keyring backed secret storage |
//! | [`types`] | Requests and events |
//! | [`config`] | Timeouts, limits and endpoint overrides |

pub mod config;
pub mod credentials;
pub mod drivers;
pub mod error;
pub mod gateway;
pub mod pipeline;
pub mod registry;
pub mod request;
pub mod transport;
pub mod types;

pub use config::GatewayConfig;
pub use credentials::{CredentialStore, KeyringCredentialStore, MemoryCredentialStore, ProviderCredential};
pub use error::{redact, Error, ErrorContext, ErrorKind};
pub use gateway::{CallProbe, CallState, CancelHandle, EventStream, Gateway, GatewayBuilder, GatewayResponse};
pub use registry::{ProviderEntry, ProviderId, ProviderRegistry};
pub use types::{
    CompletedFunctionCall, FinishReason, FunctionSchema, GenerationParams, HistoryMessage, Role,
    UnifiedEvent, UnifiedRequest,
};

use futures::Stream;
use std::pin::Pin;

/// Result type alias for the crate
pub type Result<T> = std::result::Result<T, Error>;

/// A unified pinned, boxed stream that emits `Result<T>`
pub type BoxStream<'a, T> = Pin<Box<dyn Stream<Item = Result<T>> + Send + 'a>>;
