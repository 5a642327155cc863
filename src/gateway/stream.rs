//! Caller-facing side of a call: the event stream and its cancel handle.

use futures::stream::{self, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use tokio_util::sync::CancellationToken;

use super::call::{Call, CallProbe, CallResources, CallState};
use crate::types::{CompletedFunctionCall, FinishReason, UnifiedEvent};
use crate::{Error, Result};

/// Requests cancellation of a call from anywhere (another task, a UI handler).
///
/// Cancellation is local: the connection is closed and buffered state is
/// discarded; the provider is not asked to stop.
#[derive(Clone, Debug)]
pub struct CancelHandle {
    token: CancellationToken,
    resources: Arc<CallResources>,
}

impl CancelHandle {
    pub(crate) fn new(token: CancellationToken, resources: Arc<CallResources>) -> Self {
        Self { token, resources }
    }

    /// Cancel the call. The connection and buffered function calls are
    /// released before this returns, even if the stream is never polled again.
    pub fn cancel(&self) {
        self.token.cancel();
        self.resources.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves when cancellation is requested.
    pub fn cancelled(&self) -> tokio_util::sync::WaitForCancellationFuture<'_> {
        self.token.cancelled()
    }
}

/// Everything a finished stream produced, aggregated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GatewayResponse {
    pub text: String,
    pub function_calls: Vec<CompletedFunctionCall>,
    /// `None` if the call was cancelled before it ended.
    pub finish_reason: Option<FinishReason>,
}

/// Ordered events of one call, ending with exactly one `StreamEnded` or
/// `StreamFailed` unless cancelled.
///
/// Events are produced on demand: nothing is read from the network until the
/// stream is polled. Dropping the stream cancels the call.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = UnifiedEvent> + Send>>,
    cancel: CancelHandle,
    probe: CallProbe,
}

impl EventStream {
    pub(crate) fn new(
        call: Call,
        token: CancellationToken,
        resources: Arc<CallResources>,
        probe: CallProbe,
    ) -> Self {
        let inner = stream::unfold(call, |mut call| async move {
            let event = call.next_event().await?;
            Some((event, call))
        })
        .fuse();
        Self {
            inner: Box::pin(inner),
            cancel: CancelHandle::new(token, resources),
            probe,
        }
    }

    pub fn cancel_handle(&self) -> CancelHandle {
        self.cancel.clone()
    }

    /// Cancel now. The connection and pending function calls are released
    /// before this returns; no further events are produced.
    pub fn cancel(&mut self) {
        self.cancel.cancel();
        // Dropping the call closes the byte stream and marks it cancelled.
        self.inner = Box::pin(stream::empty());
    }

    pub fn probe(&self) -> &CallProbe {
        &self.probe
    }

    pub fn call_id(&self) -> &str {
        self.probe.call_id()
    }

    pub fn state(&self) -> CallState {
        self.probe.state()
    }

    /// Drain the stream into a [`GatewayResponse`]. A `StreamFailed` event is
    /// returned as `Error::Stream` carrying its kind and message.
    pub async fn collect_response(mut self) -> Result<GatewayResponse> {
        let mut response = GatewayResponse::default();
        while let Some(event) = self.next().await {
            match event {
                UnifiedEvent::TextChunk { text } => response.text.push_str(&text),
                UnifiedEvent::FunctionCallCompleted {
                    call_id,
                    name,
                    arguments,
                } => response.function_calls.push(CompletedFunctionCall {
                    call_id,
                    name,
                    arguments,
                }),
                UnifiedEvent::StreamEnded { reason } => response.finish_reason = Some(reason),
                UnifiedEvent::StreamFailed { kind, message } => {
                    return Err(Error::Stream { kind, message })
                }
                UnifiedEvent::FunctionCallStarted { .. }
                | UnifiedEvent::FunctionCallArgumentDelta { .. } => {}
            }
        }
        Ok(response)
    }
}

impl Stream for EventStream {
    type Item = UnifiedEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.inner.as_mut().poll_next(cx)
    }
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("call_id", &self.probe.call_id())
            .field("state", &self.probe.state())
            .finish_non_exhaustive()
    }
}
