//! 网关编排层：每次调用独立，串联凭据、注册表、请求构建、传输与解码。
//!
//! # Gateway
//!
//! [`Gateway::send`] validates a [`UnifiedRequest`] and returns an
//! [`EventStream`]. Configuration problems (unknown provider, empty model,
//! missing key) are returned synchronously, before any network activity; every
//! other failure arrives as a single `StreamFailed` event.
//!
//! ```text
//! send ─► Building ─► (headers) Streaming ─► Completed | Failed
//!    any state ─► Cancelled (cancel handle or drop)
//! ```
//!
//! ```rust,no_run
//! use ai_stream_gateway::{Gateway, GatewayConfig, ProviderId, UnifiedRequest};
//! use futures::StreamExt;
//!
//! # async fn run() -> ai_stream_gateway::Result<()> {
//! let gateway = Gateway::new(GatewayConfig::from_env())?;
//! let request = UnifiedRequest::builder(ProviderId::OpenAi, "gpt-4o-mini")
//!     .system_prompt("You are terse.")
//!     .user_message("Say hi.")
//!     .build();
//!
//! let mut events = gateway.send(request)?;
//! while let Some(event) = events.next().await {
//!     println!("{:?}", event);
//! }
//! # Ok(())
//! # }
//! ```

mod call;
mod stream;

pub use call::{CallProbe, CallState};
pub use stream::{CancelHandle, EventStream, GatewayResponse};

use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::credentials::{CredentialError, CredentialStore, KeyringCredentialStore};
use crate::registry::{ProviderId, ProviderRegistry};
use crate::request::RequestBuilder;
use crate::transport::{HttpTransport, Transport};
use crate::types::UnifiedRequest;
use crate::Result;
use call::{Call, CallLimits, CallResources};

/// Shared, immutable wiring. Cheap to clone; calls made through clones are
/// independent of each other.
#[derive(Clone)]
pub struct Gateway {
    registry: Arc<ProviderRegistry>,
    credentials: Arc<dyn CredentialStore>,
    transport: Arc<dyn Transport>,
    config: GatewayConfig,
}

impl std::fmt::Debug for Gateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Gateway")
            .field("providers", &self.registry.ids())
            .field("ttfb_timeout", &self.config.ttfb_timeout())
            .field("idle_timeout", &self.config.idle_timeout())
            .field("proxy", &self.config.proxy_url.is_some())
            .finish_non_exhaustive()
    }
}

impl Gateway {
    /// Production wiring: built-in providers adjusted by `config`, OS keyring,
    /// `reqwest` transport.
    pub fn new(config: GatewayConfig) -> Result<Self> {
        GatewayBuilder::new().config(config).build()
    }

    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }

    pub fn registry(&self) -> &ProviderRegistry {
        &self.registry
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn credentials(&self) -> &dyn CredentialStore {
        self.credentials.as_ref()
    }

    /// Registered providers that currently have a stored key, in registration order.
    pub fn available_providers(&self) -> Vec<ProviderId> {
        self.registry
            .ids()
            .iter()
            .copied()
            .filter(|id| self.credentials.contains(*id))
            .collect()
    }

    /// Start one call. The returned stream is single-use and owns all per-call
    /// state; nothing is sent until it is first polled.
    pub fn send(&self, request: UnifiedRequest) -> Result<EventStream> {
        let call_id = uuid::Uuid::new_v4().to_string();
        let probe = CallProbe::new(call_id);
        probe.set_state(CallState::Building);

        let provider = request.provider();
        let entry = self.registry.lookup(provider)?;

        let credential = match self.credentials.lookup(provider) {
            Ok(credential) => Some(credential),
            Err(CredentialError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };
        // The key is sent trimmed, so the trimmed form is what gets redacted.
        let secret = credential.map(|c| SecretString::from(c.expose().trim().to_string()));
        let http_request = RequestBuilder::build(
            &request,
            &entry,
            secret.as_ref().map(|s| s.expose_secret()),
        )?;
        let secret = secret.unwrap_or_else(|| SecretString::from(String::new()));

        debug!(
            call_id = %probe.call_id(),
            provider = %provider,
            model = %request.model().trim(),
            functions = request.available_functions().len(),
            "request built"
        );

        let token = CancellationToken::new();
        let resources = CallResources::new(probe.clone());
        let call = Call::new(
            provider,
            request.model().trim().to_string(),
            entry,
            self.transport.clone(),
            http_request,
            secret,
            CallLimits {
                ttfb: self.config.ttfb_timeout(),
                idle: self.config.idle_timeout(),
                max_error_body: self.config.max_error_body_bytes,
                max_frame_bytes: self.config.max_frame_bytes,
            },
            token.clone(),
            resources.clone(),
        );
        Ok(EventStream::new(call, token, resources, probe))
    }
}

/// Assembles a [`Gateway`]. Unset parts fall back to production defaults.
#[derive(Default)]
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    registry: Option<Arc<ProviderRegistry>>,
    credentials: Option<Arc<dyn CredentialStore>>,
    transport: Option<Arc<dyn Transport>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    pub fn registry(mut self, registry: ProviderRegistry) -> Self {
        self.registry = Some(Arc::new(registry));
        self
    }

    pub fn credentials(mut self, store: Arc<dyn CredentialStore>) -> Self {
        self.credentials = Some(store);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    pub fn build(self) -> Result<Gateway> {
        let config = self.config.unwrap_or_default();
        config.validate()?;

        let registry = match self.registry {
            Some(r) => r,
            None => Arc::new(ProviderRegistry::from_config(&config)?),
        };
        let credentials = match self.credentials {
            Some(c) => c,
            None => Arc::new(KeyringCredentialStore::new(config.keyring_service.clone())),
        };
        let transport = match self.transport {
            Some(t) => t,
            None => Arc::new(HttpTransport::new(&config)?),
        };

        Ok(Gateway {
            registry,
            credentials,
            transport,
            config,
        })
    }
}
