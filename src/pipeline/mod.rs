//! 流水线处理模块：将原始字节流转换为统一事件。
//!
//! # Streaming Pipeline
//!
//! ```text
//! Raw Bytes → SseFrameParser → ResponseDecoder → FunctionCallAccumulator → UnifiedEvent
//!     │             │                 │                     │
//!   HTTP      line framing     provider JSON shape    argument buffering
//! ```
//!
//! The parser and accumulator are provider-agnostic. Provider-specific frame
//! shapes live in [`crate::drivers`].
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`sse`] | Incremental SSE line/frame parsing |
//! | [`accumulate`] | Function-call argument reassembly |

pub mod accumulate;
pub mod sse;

pub use accumulate::{FunctionCallAccumulator, PendingFunctionCall};
pub use sse::{ParserState, SseFrame, SseFrameParser, DEFAULT_MAX_FRAME_BYTES, DONE_SENTINEL};
