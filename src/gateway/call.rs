//! One gateway call: open, read, frame, decode, accumulate.
//!
//! A [`Call`] owns every piece of per-call state (parser, decoder, accumulator,
//! byte stream). It is driven by pulling events from it, so nothing is read
//! from the network faster than the consumer takes events.

use bytes::Bytes;
use futures::StreamExt;
use secrecy::{ExposeSecret, SecretString};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::drivers::ResponseDecoder;
use crate::error::redact;
use crate::pipeline::{FunctionCallAccumulator, SseFrame, SseFrameParser};
use crate::registry::{ProviderEntry, ProviderId};
use crate::request::HttpRequest;
use crate::transport::{read_bounded, TimeoutPhase, Transport, TransportError};
use crate::types::{FinishReason, UnifiedEvent};
use crate::{BoxStream, Error, Result};

/// Lifecycle of a call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallState {
    Idle,
    Building,
    Streaming,
    Completed,
    Failed,
    Cancelled,
}

impl CallState {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CallState::Completed | CallState::Failed | CallState::Cancelled
        )
    }

    fn to_u8(self) -> u8 {
        match self {
            CallState::Idle => 0,
            CallState::Building => 1,
            CallState::Streaming => 2,
            CallState::Completed => 3,
            CallState::Failed => 4,
            CallState::Cancelled => 5,
        }
    }

    fn from_u8(v: u8) -> Self {
        match v {
            1 => CallState::Building,
            2 => CallState::Streaming,
            3 => CallState::Completed,
            4 => CallState::Failed,
            5 => CallState::Cancelled,
            _ => CallState::Idle,
        }
    }
}

#[derive(Debug)]
struct ProbeInner {
    call_id: String,
    state: AtomicU8,
    pending_calls: AtomicUsize,
    transport_open: AtomicBool,
    events_emitted: AtomicUsize,
}

/// Read-only view of a call's state, shareable across tasks.
#[derive(Debug, Clone)]
pub struct CallProbe {
    inner: Arc<ProbeInner>,
}

impl CallProbe {
    pub(crate) fn new(call_id: String) -> Self {
        Self {
            inner: Arc::new(ProbeInner {
                call_id,
                state: AtomicU8::new(CallState::Idle.to_u8()),
                pending_calls: AtomicUsize::new(0),
                transport_open: AtomicBool::new(false),
                events_emitted: AtomicUsize::new(0),
            }),
        }
    }

    /// Correlation id used in log lines for this call.
    pub fn call_id(&self) -> &str {
        &self.inner.call_id
    }

    pub fn state(&self) -> CallState {
        CallState::from_u8(self.inner.state.load(Ordering::SeqCst))
    }

    /// Function calls whose arguments are still buffered.
    pub fn pending_calls(&self) -> usize {
        self.inner.pending_calls.load(Ordering::SeqCst)
    }

    pub fn transport_open(&self) -> bool {
        self.inner.transport_open.load(Ordering::SeqCst)
    }

    pub fn events_emitted(&self) -> usize {
        self.inner.events_emitted.load(Ordering::SeqCst)
    }

    pub(crate) fn set_state(&self, state: CallState) {
        self.inner.state.store(state.to_u8(), Ordering::SeqCst);
    }

    /// Moves to `Cancelled` unless the call already reached a terminal state.
    fn mark_cancelled(&self) -> bool {
        self.inner
            .state
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |v| {
                if CallState::from_u8(v).is_terminal() {
                    None
                } else {
                    Some(CallState::Cancelled.to_u8())
                }
            })
            .is_ok()
    }

    fn set_pending(&self, n: usize) {
        self.inner.pending_calls.store(n, Ordering::SeqCst);
    }

    fn set_transport_open(&self, open: bool) {
        self.inner.transport_open.store(open, Ordering::SeqCst);
    }

    fn record_event(&self) {
        self.inner.events_emitted.fetch_add(1, Ordering::SeqCst);
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// The parts of a call that must be released the moment it is cancelled,
/// whether or not anyone is polling the stream.
pub(crate) struct CallResources {
    body: Mutex<Option<BoxStream<'static, Bytes>>>,
    calls: Mutex<FunctionCallAccumulator>,
    probe: CallProbe,
}

impl CallResources {
    pub(crate) fn new(probe: CallProbe) -> Arc<Self> {
        Arc::new(Self {
            body: Mutex::new(None),
            calls: Mutex::new(FunctionCallAccumulator::new()),
            probe,
        })
    }

    fn store_body(&self, body: BoxStream<'static, Bytes>) {
        *lock(&self.body) = Some(body);
        self.probe.set_transport_open(true);
    }

    /// Poll the byte stream; an already released stream reads as closed.
    fn poll_body(&self, cx: &mut Context<'_>) -> Poll<Option<Result<Bytes>>> {
        match lock(&self.body).as_mut() {
            Some(body) => body.poll_next_unpin(cx),
            None => Poll::Ready(None),
        }
    }

    fn release_transport(&self) {
        let body = lock(&self.body).take();
        drop(body);
        self.probe.set_transport_open(false);
    }

    /// Close the connection and drop buffered function calls. Returns how many
    /// calls were abandoned.
    fn release_all(&self) -> usize {
        self.release_transport();
        let abandoned = lock(&self.calls).clear();
        self.probe.set_pending(0);
        abandoned
    }

    /// Release everything now and mark the call cancelled if it was still live.
    pub(crate) fn cancel(&self) {
        let abandoned = self.release_all();
        if self.probe.mark_cancelled() {
            info!(
                call_id = %self.probe.call_id(),
                abandoned,
                events = self.probe.events_emitted(),
                "call cancelled"
            );
        }
    }
}

impl std::fmt::Debug for CallResources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallResources")
            .field("call_id", &self.probe.call_id())
            .field("transport_open", &self.probe.transport_open())
            .finish_non_exhaustive()
    }
}

/// Deadlines and limits applied to one call.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CallLimits {
    pub ttfb: Duration,
    pub idle: Duration,
    pub max_error_body: usize,
    pub max_frame_bytes: usize,
}

enum Read {
    Chunk(Bytes),
    Eof,
    Cancelled,
}

pub(crate) struct Call {
    provider: ProviderId,
    model: String,
    entry: Arc<ProviderEntry>,
    transport: Arc<dyn Transport>,
    request: Option<HttpRequest>,
    secret: SecretString,
    limits: CallLimits,
    token: CancellationToken,
    probe: CallProbe,

    decoder: Box<dyn ResponseDecoder>,
    parser: SseFrameParser,
    resources: Arc<CallResources>,
    queue: VecDeque<UnifiedEvent>,

    terminal_queued: bool,
    terminal_delivered: bool,
    first_byte_deadline: Option<Instant>,
    saw_first_byte: bool,
    started: Instant,
}

impl Call {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        provider: ProviderId,
        model: String,
        entry: Arc<ProviderEntry>,
        transport: Arc<dyn Transport>,
        request: HttpRequest,
        secret: SecretString,
        limits: CallLimits,
        token: CancellationToken,
        resources: Arc<CallResources>,
    ) -> Self {
        let decoder = entry.driver().new_decoder();
        let probe = resources.probe.clone();
        Self {
            provider,
            model,
            entry,
            transport,
            request: Some(request),
            secret,
            limits,
            token,
            probe,
            decoder,
            parser: SseFrameParser::with_max_frame_bytes(limits.max_frame_bytes),
            resources,
            queue: VecDeque::new(),
            terminal_queued: false,
            terminal_delivered: false,
            first_byte_deadline: None,
            saw_first_byte: false,
            started: Instant::now(),
        }
    }

    /// Next event, or `None` once the terminal event was delivered or the call
    /// was cancelled.
    pub(crate) async fn next_event(&mut self) -> Option<UnifiedEvent> {
        loop {
            if self.token.is_cancelled() {
                self.cancel_now();
                return None;
            }
            if let Some(event) = self.queue.pop_front() {
                self.probe.record_event();
                if event.is_terminal() {
                    self.terminal_delivered = true;
                    self.queue.clear();
                    self.log_finished();
                }
                return Some(event);
            }
            if self.terminal_queued {
                return None;
            }

            if self.request.is_some() {
                self.open().await;
                continue;
            }

            match self.read_chunk().await {
                Ok(Read::Chunk(chunk)) => match self.parser.push(&chunk) {
                    Ok(frames) => self.absorb(frames, false),
                    Err(e) => self.fail(e),
                },
                Ok(Read::Eof) => {
                    debug!(call_id = %self.probe.call_id(), "byte stream closed");
                    let frames: Vec<SseFrame> = self.parser.finish().into_iter().collect();
                    self.absorb(frames, true);
                }
                Ok(Read::Cancelled) => {
                    self.cancel_now();
                    return None;
                }
                Err(e) => self.fail(e),
            }
        }
    }

    async fn open(&mut self) {
        let Some(request) = self.request.take() else {
            return;
        };
        let deadline = Instant::now() + self.limits.ttfb;
        self.first_byte_deadline = Some(deadline);

        info!(
            call_id = %self.probe.call_id(),
            provider = %self.provider,
            model = %self.model,
            "dispatching streaming request"
        );

        let transport = self.transport.clone();
        let opened = tokio::select! {
            biased;
            _ = self.token.cancelled() => return,
            r = tokio::time::timeout_at(deadline, transport.open(request)) => r,
        };

        let mut response = match opened {
            Err(_) => {
                self.fail(Error::Transport(TransportError::Timeout {
                    phase: TimeoutPhase::FirstByte,
                    after: self.limits.ttfb,
                }));
                return;
            }
            Ok(Err(e)) => {
                self.fail(e);
                return;
            }
            Ok(Ok(response)) => response,
        };

        if self.token.is_cancelled() {
            return;
        }
        self.probe.set_transport_open(true);
        self.probe.set_state(CallState::Streaming);
        info!(
            call_id = %self.probe.call_id(),
            http_status = response.status,
            ttfb_ms = self.started.elapsed().as_millis() as u64,
            "response headers received"
        );

        if response.is_error() {
            let status = response.status;
            let limit = self.limits.max_error_body;
            let body = tokio::select! {
                biased;
                _ = self.token.cancelled() => return,
                r = tokio::time::timeout_at(deadline, read_bounded(&mut response.body, limit)) => r,
            };
            // A body we cannot read still yields a status-based message.
            let body = match body {
                Ok(Ok(bytes)) => bytes,
                _ => Vec::new(),
            };
            let message = self
                .entry
                .driver()
                .error_message(&body)
                .unwrap_or_else(|| format!("HTTP {}", status));
            drop(response);
            self.fail(Error::Http { status, message });
            return;
        }

        self.resources.store_body(response.body);
    }

    async fn read_chunk(&mut self) -> Result<Read> {
        let (deadline, phase, after) = if self.saw_first_byte {
            (Instant::now() + self.limits.idle, TimeoutPhase::Idle, self.limits.idle)
        } else {
            let deadline = self
                .first_byte_deadline
                .unwrap_or_else(|| Instant::now() + self.limits.ttfb);
            (deadline, TimeoutPhase::FirstByte, self.limits.ttfb)
        };

        let resources = self.resources.clone();
        let body = futures::future::poll_fn(|cx| resources.poll_body(cx));
        let next = tokio::select! {
            biased;
            _ = self.token.cancelled() => return Ok(Read::Cancelled),
            r = tokio::time::timeout_at(deadline, body) => r,
        };

        match next {
            Err(_) => Err(Error::Transport(TransportError::Timeout { phase, after })),
            Ok(None) if self.token.is_cancelled() => Ok(Read::Cancelled),
            Ok(None) => {
                self.resources.release_transport();
                Ok(Read::Eof)
            }
            Ok(Some(Err(e))) => Err(e),
            Ok(Some(Ok(chunk))) => {
                if !chunk.is_empty() {
                    self.saw_first_byte = true;
                }
                Ok(Read::Chunk(chunk))
            }
        }
    }

    /// Decode frames into the queue, stopping at the first terminal event. At
    /// end of input the decoder is told the stream closed.
    fn absorb(&mut self, frames: Vec<SseFrame>, eof: bool) {
        let mut out = Vec::new();
        let mut result = Ok(());

        let mut calls = lock(&self.resources.calls);
        for frame in &frames {
            result = self.decoder.decode(frame, &mut *calls, &mut out);
            if result.is_err() || out.iter().any(UnifiedEvent::is_terminal) {
                break;
            }
        }
        let ended = out.iter().any(UnifiedEvent::is_terminal);
        if result.is_ok() && !ended && (eof || self.parser.is_terminated()) {
            result = self.decoder.finish(&mut *calls, &mut out);
        }
        self.probe.set_pending(calls.len());
        drop(calls);

        if let Some(pos) = out.iter().position(UnifiedEvent::is_terminal) {
            out.truncate(pos + 1);
        }
        let ended = out.iter().any(UnifiedEvent::is_terminal);
        self.queue.extend(out);

        match result {
            Err(e) => self.fail(e),
            Ok(()) if ended => self.complete(),
            Ok(()) if eof => {
                // Closed without any end marker and nothing left to flush.
                self.queue.push_back(UnifiedEvent::ended(FinishReason::Stop));
                self.complete();
            }
            Ok(()) => {}
        }
    }

    fn release_all(&mut self) {
        let abandoned = self.resources.release_all();
        if abandoned > 0 {
            debug!(call_id = %self.probe.call_id(), abandoned, "discarded pending function calls");
        }
    }

    fn complete(&mut self) {
        self.terminal_queued = true;
        self.release_all();
        self.probe.set_state(CallState::Completed);
    }

    /// Queue the single `StreamFailed` event for `err`, secret redacted.
    fn fail(&mut self, err: Error) {
        if self.terminal_queued {
            return;
        }
        let kind = err.kind();
        let message = redact(&err.event_message(), self.secret.expose_secret());
        match &err {
            Error::Http { status, .. } => {
                info!(call_id = %self.probe.call_id(), http_status = *status, error = %message, "provider returned an error status")
            }
            _ => warn!(call_id = %self.probe.call_id(), error_kind = %kind, error = %message, "call failed"),
        }
        self.queue.push_back(UnifiedEvent::failed(kind, message));
        self.terminal_queued = true;
        self.release_all();
        self.probe.set_state(CallState::Failed);
    }

    fn cancel_now(&mut self) {
        self.queue.clear();
        self.request = None;
        self.release_all();
        if !self.terminal_delivered && self.probe.state() != CallState::Cancelled {
            self.probe.set_state(CallState::Cancelled);
            info!(
                call_id = %self.probe.call_id(),
                events = self.probe.events_emitted(),
                duration_ms = self.started.elapsed().as_millis() as u64,
                "call cancelled"
            );
        }
        self.terminal_queued = true;
        self.terminal_delivered = true;
    }

    fn log_finished(&self) {
        info!(
            call_id = %self.probe.call_id(),
            state = ?self.probe.state(),
            events = self.probe.events_emitted(),
            duration_ms = self.started.elapsed().as_millis() as u64,
            "call finished"
        );
    }
}

impl Drop for Call {
    /// Dropping an unfinished call is a cancellation.
    fn drop(&mut self) {
        if !self.terminal_delivered {
            self.cancel_now();
        }
        self.token.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_encoding_round_trips() {
        for state in [
            CallState::Idle,
            CallState::Building,
            CallState::Streaming,
            CallState::Completed,
            CallState::Failed,
            CallState::Cancelled,
        ] {
            assert_eq!(CallState::from_u8(state.to_u8()), state);
        }
        assert!(CallState::Cancelled.is_terminal());
        assert!(!CallState::Streaming.is_terminal());
    }

    #[test]
    fn probe_starts_idle_and_closed() {
        let probe = CallProbe::new("c-1".into());
        assert_eq!(probe.state(), CallState::Idle);
        assert!(!probe.transport_open());
        assert_eq!(probe.pending_calls(), 0);
        assert_eq!(probe.call_id(), "c-1");
    }

    #[test]
    fn resources_cancel_closes_body_and_marks_cancelled() {
        let probe = CallProbe::new("c-2".into());
        probe.set_state(CallState::Streaming);
        let resources = CallResources::new(probe.clone());
        resources.store_body(Box::pin(futures::stream::pending::<Result<Bytes>>()));
        assert!(probe.transport_open());

        resources.cancel();
        assert_eq!(probe.state(), CallState::Cancelled);
        assert!(!probe.transport_open());
        assert!(lock(&resources.body).is_none());
    }

    #[test]
    fn resources_cancel_keeps_terminal_state() {
        let probe = CallProbe::new("c-3".into());
        probe.set_state(CallState::Failed);
        CallResources::new(probe.clone()).cancel();
        assert_eq!(probe.state(), CallState::Failed);
    }
}
