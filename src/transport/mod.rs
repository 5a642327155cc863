//! 传输层：打开 HTTP 连接并以增量字节流形式暴露响应体。
//!
//! Transport layer. A [`Transport`] sends an [`HttpRequest`] and hands back the
//! status plus an incremental byte stream; the body is never buffered whole.
//! Dropping the stream closes the underlying connection.

pub mod http;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use std::time::Duration;

use crate::request::HttpRequest;
use crate::{BoxStream, Result};

pub use http::HttpTransport;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("no data received within {}s ({phase})", .after.as_secs_f64())]
    Timeout { phase: TimeoutPhase, after: Duration },

    #[error("Transport error: {0}")]
    Other(String),
}

/// Which per-call deadline expired.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPhase {
    /// Waiting for response headers or the first body byte.
    FirstByte,
    /// Waiting between two body chunks.
    Idle,
}

impl std::fmt::Display for TimeoutPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TimeoutPhase::FirstByte => f.write_str("time to first byte"),
            TimeoutPhase::Idle => f.write_str("idle read"),
        }
    }
}

/// Status and streamed body of an opened request.
pub struct TransportResponse {
    pub status: u16,
    pub body: BoxStream<'static, Bytes>,
}

impl TransportResponse {
    pub fn is_error(&self) -> bool {
        self.status >= 400
    }
}

impl std::fmt::Debug for TransportResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportResponse")
            .field("status", &self.status)
            .finish_non_exhaustive()
    }
}

/// Opens one streamed HTTP exchange. Implementations must be shareable across
/// concurrent calls.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Resolves once response headers are in. Connection failures surface as
    /// `Error::Transport`.
    async fn open(&self, request: HttpRequest) -> Result<TransportResponse>;
}

/// Read at most `limit` bytes of `body`. Anything beyond the limit is dropped
/// unread.
pub async fn read_bounded(body: &mut BoxStream<'static, Bytes>, limit: usize) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    while buf.len() < limit {
        match body.next().await {
            Some(chunk) => {
                let chunk = chunk?;
                let take = chunk.len().min(limit - buf.len());
                buf.extend_from_slice(&chunk[..take]);
            }
            None => break,
        }
    }
    Ok(buf)
}
