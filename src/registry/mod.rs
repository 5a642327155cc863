//! Provider 注册表 — 启动时注册，之后只读
//!
//! Provider registry. Each entry binds a provider identity to its base endpoint,
//! authentication scheme, static headers and driver (path template, body mapper,
//! response decoder). The table is built once and shared behind an `Arc`;
//! concurrent calls read the same entries without synchronization.

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::config::GatewayConfig;
use crate::drivers::{AnthropicDriver, GeminiDriver, OpenAiDriver, ProviderDriver};
use crate::{Error, ErrorContext, Result};

/// Stable provider identity. The lowercase form doubles as the keyring account name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderId {
    #[serde(rename = "openai")]
    OpenAi,
    #[serde(rename = "openrouter")]
    OpenRouter,
    Gemini,
    Anthropic,
}

impl ProviderId {
    pub const ALL: [ProviderId; 4] = [
        ProviderId::OpenAi,
        ProviderId::OpenRouter,
        ProviderId::Gemini,
        ProviderId::Anthropic,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenAi => "openai",
            ProviderId::OpenRouter => "openrouter",
            ProviderId::Gemini => "gemini",
            ProviderId::Anthropic => "anthropic",
        }
    }

    /// Case-insensitive; `None` for unknown ids.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        Self::ALL
            .into_iter()
            .find(|id| id.as_str().eq_ignore_ascii_case(s))
    }
}

impl fmt::Display for ProviderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProviderId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        ProviderId::parse(s).ok_or_else(|| {
            Error::configuration_with_context(
                format!("unknown provider '{}'", s),
                ErrorContext::new().with_source("provider_registry"),
            )
        })
    }
}

/// How the secret is attached to outbound requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// `Authorization: Bearer <secret>`
    Bearer,
    /// `<header>: <secret>`
    ApiKeyHeader(&'static str),
}

impl AuthScheme {
    pub fn headers(&self, secret: &str) -> Vec<(String, String)> {
        match self {
            AuthScheme::Bearer => vec![("Authorization".to_string(), format!("Bearer {}", secret))],
            AuthScheme::ApiKeyHeader(name) => vec![(name.to_string(), secret.to_string())],
        }
    }
}

/// One registered provider. Immutable once inserted into a registry.
#[derive(Debug, Clone)]
pub struct ProviderEntry {
    pub id: ProviderId,
    pub base_url: String,
    pub auth: AuthScheme,
    /// Non-secret headers sent with every request (e.g. API version pins).
    pub static_headers: Vec<(String, String)>,
    driver: Arc<dyn ProviderDriver>,
}

impl ProviderEntry {
    pub fn new(
        id: ProviderId,
        base_url: impl Into<String>,
        auth: AuthScheme,
        driver: Arc<dyn ProviderDriver>,
    ) -> Self {
        Self {
            id,
            base_url: base_url.into(),
            auth,
            static_headers: Vec::new(),
            driver,
        }
    }

    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.static_headers.push((name.into(), value.into()));
        self
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn driver(&self) -> &dyn ProviderDriver {
        self.driver.as_ref()
    }

    /// Auth headers followed by the static headers.
    pub fn auth_headers(&self, secret: &str) -> Vec<(String, String)> {
        let mut headers = self.auth.headers(secret);
        headers.extend(self.static_headers.iter().cloned());
        headers
    }

    /// `base_url` joined with the driver's path for `model`.
    pub fn endpoint(&self, model: &str) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.driver.path(model)
        )
    }
}

/// Read-only provider table.
#[derive(Debug, Clone, Default)]
pub struct ProviderRegistry {
    entries: HashMap<ProviderId, Arc<ProviderEntry>>,
    order: Vec<ProviderId>,
}

static BUILTIN: Lazy<ProviderRegistry> = Lazy::new(|| {
    let mut builder = ProviderRegistry::builder();
    for entry in builtin_entries() {
        builder = builder.register(entry);
    }
    builder.build()
});

fn builtin_entries() -> Vec<ProviderEntry> {
    vec![
        ProviderEntry::new(
            ProviderId::OpenAi,
            "https://api.openai.com/v1",
            AuthScheme::Bearer,
            Arc::new(OpenAiDriver::new(ProviderId::OpenAi)),
        ),
        ProviderEntry::new(
            ProviderId::OpenRouter,
            "https://openrouter.ai/api/v1",
            AuthScheme::Bearer,
            Arc::new(OpenAiDriver::new(ProviderId::OpenRouter)),
        ),
        ProviderEntry::new(
            ProviderId::Gemini,
            "https://generativelanguage.googleapis.com/v1beta",
            AuthScheme::ApiKeyHeader("x-goog-api-key"),
            Arc::new(GeminiDriver::new()),
        ),
        ProviderEntry::new(
            ProviderId::Anthropic,
            "https://api.anthropic.com/v1",
            AuthScheme::ApiKeyHeader("x-api-key"),
            Arc::new(AnthropicDriver::new()),
        )
        .with_header("anthropic-version", crate::drivers::anthropic::ANTHROPIC_VERSION),
    ]
}

impl ProviderRegistry {
    pub fn builder() -> ProviderRegistryBuilder {
        ProviderRegistryBuilder::default()
    }

    /// The four built-in providers with their public endpoints.
    pub fn builtin() -> &'static ProviderRegistry {
        &BUILTIN
    }

    /// Built-in providers adjusted by `config` (base URL overrides, OpenRouter
    /// attribution headers).
    pub fn from_config(config: &GatewayConfig) -> Result<Self> {
        config.validate()?;
        let mut builder = Self::builder();
        for mut entry in builtin_entries() {
            if let Some(url) = config.base_url_override(entry.id) {
                url::Url::parse(url).map_err(|e| {
                    Error::configuration_with_context(
                        format!("invalid base URL for '{}': {}", entry.id, e),
                        ErrorContext::new()
                            .with_field_path("base_url_overrides")
                            .with_source("provider_registry"),
                    )
                })?;
                entry = entry.with_base_url(url.to_string());
            }
            if entry.id == ProviderId::OpenRouter {
                if let Some(referer) = &config.openrouter_referer {
                    entry = entry.with_header("HTTP-Referer", referer.clone());
                }
                if let Some(title) = &config.openrouter_title {
                    entry = entry.with_header("X-Title", title.clone());
                }
            }
            builder = builder.register(entry);
        }
        Ok(builder.build())
    }

    pub fn lookup(&self, id: ProviderId) -> Result<Arc<ProviderEntry>> {
        self.entries.get(&id).cloned().ok_or_else(|| {
            Error::configuration_with_context(
                format!("provider '{}' is not registered", id),
                ErrorContext::new().with_source("provider_registry"),
            )
        })
    }

    /// Registered ids in registration order.
    pub fn ids(&self) -> &[ProviderId] {
        &self.order
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

/// Collects entries; `build` freezes them.
#[derive(Debug, Default)]
pub struct ProviderRegistryBuilder {
    entries: HashMap<ProviderId, Arc<ProviderEntry>>,
    order: Vec<ProviderId>,
}

impl ProviderRegistryBuilder {
    /// Registering an id twice replaces the earlier entry.
    pub fn register(mut self, entry: ProviderEntry) -> Self {
        let id = entry.id;
        if self.entries.insert(id, Arc::new(entry)).is_none() {
            self.order.push(id);
        }
        self
    }

    pub fn build(self) -> ProviderRegistry {
        ProviderRegistry {
            entries: self.entries,
            order: self.order,
        }
    }
}
