//! Shared fixtures for gateway integration tests.

#![allow(dead_code)]

use ai_stream_gateway::request::HttpRequest;
use ai_stream_gateway::transport::{Transport, TransportResponse};
use ai_stream_gateway::{
    Gateway, GatewayConfig, MemoryCredentialStore, ProviderId, Result, UnifiedEvent,
};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{stream, StreamExt};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

pub const SECRET: &str = "sk-test-0123456789";

/// Build an SSE body from `data:` payloads.
pub fn sse_body(frames: &[&str]) -> String {
    frames.iter().map(|f| format!("data: {}\n\n", f)).collect()
}

/// Build an SSE body from `(event, data)` pairs.
pub fn sse_events(frames: &[(&str, &str)]) -> String {
    frames
        .iter()
        .map(|(event, data)| format!("event: {}\ndata: {}\n\n", event, data))
        .collect()
}

pub fn all_keys() -> MemoryCredentialStore {
    MemoryCredentialStore::with(&[
        (ProviderId::OpenAi, SECRET),
        (ProviderId::OpenRouter, SECRET),
        (ProviderId::Gemini, SECRET),
        (ProviderId::Anthropic, SECRET),
    ])
}

/// Gateway whose every provider points at `base_url`.
pub fn gateway_for_server(base_url: &str) -> Gateway {
    let mut config = GatewayConfig::default();
    for id in ProviderId::ALL {
        config
            .base_url_overrides
            .insert(id.as_str().to_string(), base_url.to_string());
    }
    Gateway::builder()
        .config(config)
        .credentials(Arc::new(all_keys()))
        .build()
        .unwrap()
}

/// Gateway over a scripted transport with 1s first-byte and idle deadlines.
pub fn gateway_for_transport(transport: Arc<ScriptedTransport>) -> Gateway {
    gateway_with_store(transport, all_keys())
}

/// Same as [`gateway_for_transport`], with the given stored keys.
pub fn gateway_with_store(
    transport: Arc<ScriptedTransport>,
    store: MemoryCredentialStore,
) -> Gateway {
    transport_gateway(transport, store, GatewayConfig::default())
}

/// Scripted-transport gateway built from `config` with the 1s deadlines applied.
pub fn transport_gateway(
    transport: Arc<ScriptedTransport>,
    store: MemoryCredentialStore,
    config: GatewayConfig,
) -> Gateway {
    let config = GatewayConfig {
        ttfb_timeout_secs: 1,
        idle_timeout_secs: 1,
        ..config
    };
    Gateway::builder()
        .config(config)
        .credentials(Arc::new(store))
        .transport(transport)
        .build()
        .unwrap()
}

pub async fn collect(mut events: ai_stream_gateway::EventStream) -> Vec<UnifiedEvent> {
    let mut out = Vec::new();
    while let Some(event) = events.next().await {
        out.push(event);
    }
    out
}

/// What the scripted transport does after its chunks run out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tail {
    Close,
    Hang,
}

/// Transport that replays fixed chunks and records what it was asked to send.
pub struct ScriptedTransport {
    status: u16,
    chunks: Vec<Bytes>,
    tail: Tail,
    hang_on_open: bool,
    opened: AtomicUsize,
    body_dropped: Arc<AtomicBool>,
    last_request: Mutex<Option<HttpRequest>>,
}

impl ScriptedTransport {
    pub fn new(chunks: Vec<String>) -> Self {
        Self {
            status: 200,
            chunks: chunks.into_iter().map(Bytes::from).collect(),
            tail: Tail::Close,
            hang_on_open: false,
            opened: AtomicUsize::new(0),
            body_dropped: Arc::new(AtomicBool::new(false)),
            last_request: Mutex::new(None),
        }
    }

    /// Split `body` into pieces of at most `size` bytes.
    pub fn chunked(body: &str, size: usize) -> Self {
        let mut transport = Self::new(Vec::new());
        transport.chunks = body
            .as_bytes()
            .chunks(size)
            .map(Bytes::copy_from_slice)
            .collect();
        transport
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = status;
        self
    }

    pub fn then_hang(mut self) -> Self {
        self.tail = Tail::Hang;
        self
    }

    pub fn hang_on_open(mut self) -> Self {
        self.hang_on_open = true;
        self
    }

    pub fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    pub fn body_dropped(&self) -> bool {
        self.body_dropped.load(Ordering::SeqCst)
    }

    pub fn last_request(&self) -> Option<HttpRequest> {
        self.last_request.lock().unwrap().clone()
    }
}

struct DropFlag(Arc<AtomicBool>);

impl Drop for DropFlag {
    fn drop(&mut self) {
        self.0.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl Transport for ScriptedTransport {
    async fn open(&self, request: HttpRequest) -> Result<TransportResponse> {
        self.opened.fetch_add(1, Ordering::SeqCst);
        *self.last_request.lock().unwrap() = Some(request);
        if self.hang_on_open {
            futures::future::pending::<()>().await;
        }

        let flag = DropFlag(self.body_dropped.clone());
        let chunks = stream::iter(self.chunks.clone().into_iter().map(Ok::<Bytes, ai_stream_gateway::Error>));
        let body = match self.tail {
            Tail::Close => chunks.boxed(),
            Tail::Hang => chunks.chain(stream::pending()).boxed(),
        };
        let body = body.map(move |chunk| {
            let _guard = &flag;
            chunk
        });
        Ok(TransportResponse {
            status: self.status,
            body: Box::pin(body),
        })
    }
}
