//! Gateway configuration
//!
//! Defaults are production-friendly and env-overridable. A YAML file can be used
//! instead of (or before) the environment.

use crate::error::REDACTED;
use crate::pipeline::DEFAULT_MAX_FRAME_BYTES;
use crate::registry::ProviderId;
use crate::{Error, ErrorContext, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

pub const DEFAULT_KEYRING_SERVICE: &str = "ai-stream-gateway";

/// Per-process gateway settings. Read once when the gateway is built.
///
/// `Debug` output hides the proxy URL, which may carry credentials.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    /// Time allowed between dispatch and the first body byte.
    pub ttfb_timeout_secs: u64,
    /// Time allowed between two body chunks once streaming has started.
    pub idle_timeout_secs: u64,
    pub connect_timeout_secs: u64,
    /// Upper bound on how much of a >= 400 response body is read.
    pub max_error_body_bytes: usize,
    /// Largest SSE line or frame accepted before the call fails.
    pub max_frame_bytes: usize,
    pub keyring_service: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxy_url: Option<String>,
    /// Provider id (`openai`, `gemini`, ...) -> base URL.
    pub base_url_overrides: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openrouter_referer: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub openrouter_title: Option<String>,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            ttfb_timeout_secs: 30,
            idle_timeout_secs: 60,
            connect_timeout_secs: 10,
            max_error_body_bytes: 64 * 1024,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
            keyring_service: DEFAULT_KEYRING_SERVICE.to_string(),
            proxy_url: None,
            base_url_overrides: HashMap::new(),
            openrouter_referer: None,
            openrouter_title: None,
        }
    }
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("ttfb_timeout_secs", &self.ttfb_timeout_secs)
            .field("idle_timeout_secs", &self.idle_timeout_secs)
            .field("connect_timeout_secs", &self.connect_timeout_secs)
            .field("max_error_body_bytes", &self.max_error_body_bytes)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("keyring_service", &self.keyring_service)
            .field("proxy_url", &self.proxy_url.as_ref().map(|_| REDACTED))
            .field("base_url_overrides", &self.base_url_overrides)
            .field("openrouter_referer", &self.openrouter_referer)
            .field("openrouter_title", &self.openrouter_title)
            .finish()
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    env::var(name).ok().and_then(|s| s.trim().parse::<T>().ok())
}

impl GatewayConfig {
    /// Defaults overlaid with `AI_GATEWAY_*` environment variables.
    pub fn from_env() -> Self {
        Self::default().with_env_overrides()
    }

    /// Apply `AI_GATEWAY_*` environment variables on top of `self`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Some(v) = env_parse("AI_GATEWAY_TTFB_TIMEOUT_SECS") {
            self.ttfb_timeout_secs = v;
        }
        if let Some(v) = env_parse("AI_GATEWAY_IDLE_TIMEOUT_SECS") {
            self.idle_timeout_secs = v;
        }
        if let Some(v) = env_parse("AI_GATEWAY_CONNECT_TIMEOUT_SECS") {
            self.connect_timeout_secs = v;
        }
        if let Some(v) = env_parse("AI_GATEWAY_MAX_ERROR_BODY_BYTES") {
            self.max_error_body_bytes = v;
        }
        if let Some(v) = env_parse("AI_GATEWAY_MAX_FRAME_BYTES") {
            self.max_frame_bytes = v;
        }
        if let Ok(v) = env::var("AI_GATEWAY_KEYRING_SERVICE") {
            if !v.trim().is_empty() {
                self.keyring_service = v;
            }
        }
        if let Ok(v) = env::var("AI_GATEWAY_PROXY_URL") {
            self.proxy_url = Some(v);
        }
        for id in ProviderId::ALL {
            let name = format!("AI_GATEWAY_{}_BASE_URL", id.as_str().to_uppercase());
            if let Ok(v) = env::var(&name) {
                self.base_url_overrides.insert(id.as_str().to_string(), v);
            }
        }
        self
    }

    pub fn from_yaml_str(content: &str) -> Result<Self> {
        let cfg: GatewayConfig = serde_yaml::from_str(content).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid gateway config: {}", e),
                ErrorContext::new().with_source("config_loader"),
            )
        })?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::configuration_with_context(
                format!("cannot read gateway config: {}", e),
                ErrorContext::new()
                    .with_field_path(path.display().to_string())
                    .with_source("config_loader"),
            )
        })?;
        Self::from_yaml_str(&content)
    }

    pub fn validate(&self) -> Result<()> {
        let checks = [
            ("ttfb_timeout_secs", self.ttfb_timeout_secs),
            ("idle_timeout_secs", self.idle_timeout_secs),
            ("connect_timeout_secs", self.connect_timeout_secs),
        ];
        for (field, value) in checks {
            if value == 0 {
                return Err(Error::configuration_with_context(
                    "timeouts must be greater than zero",
                    ErrorContext::new().with_field_path(field),
                ));
            }
        }
        if self.max_frame_bytes == 0 {
            return Err(Error::configuration_with_context(
                "max_frame_bytes must be greater than zero",
                ErrorContext::new().with_field_path("max_frame_bytes"),
            ));
        }
        for key in self.base_url_overrides.keys() {
            if ProviderId::parse(key).is_none() {
                return Err(Error::configuration_with_context(
                    format!("unknown provider '{}'", key),
                    ErrorContext::new().with_field_path("base_url_overrides"),
                ));
            }
        }
        Ok(())
    }

    pub fn ttfb_timeout(&self) -> Duration {
        Duration::from_secs(self.ttfb_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn base_url_override(&self, id: ProviderId) -> Option<&str> {
        self.base_url_overrides.get(id.as_str()).map(String::as_str)
    }
}
