use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::Proxy;
use std::env;
use std::time::Duration;
use tracing::debug;

use super::{Transport, TransportError, TransportResponse};
use crate::config::GatewayConfig;
use crate::request::HttpRequest;
use crate::{Error, ErrorContext, Result};

/// `reqwest`-backed transport. One client (and connection pool) is shared by
/// every call made through it.
///
/// No overall request timeout is set: streams legitimately run for minutes.
/// First-byte and idle deadlines are enforced per call by the gateway.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(config: &GatewayConfig) -> Result<Self> {
        let mut builder = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout())
            .pool_max_idle_per_host(
                env::var("AI_GATEWAY_POOL_MAX_IDLE_PER_HOST")
                    .ok()
                    .and_then(|s| s.parse::<usize>().ok())
                    .unwrap_or(32),
            )
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            // Conservative HTTP/2 keepalive defaults for long-lived connections.
            .http2_adaptive_window(true)
            .http2_keep_alive_interval(Some(Duration::from_secs(30)))
            .http2_keep_alive_timeout(Duration::from_secs(10));

        if let Some(proxy_url) = &config.proxy_url {
            let proxy = Proxy::all(proxy_url).map_err(|e| {
                Error::configuration_with_context(
                    format!("invalid proxy URL: {}", e),
                    ErrorContext::new().with_field_path("proxy_url"),
                )
            })?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| Error::Transport(TransportError::Other(e.to_string())))?;

        Ok(Self { client })
    }

    /// Wrap an already-configured client.
    pub fn with_client(client: reqwest::Client) -> Self {
        Self { client }
    }

    fn header_map(headers: &[(String, String)]) -> Result<HeaderMap> {
        let mut map = HeaderMap::with_capacity(headers.len());
        for (name, value) in headers {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| {
                Error::configuration_with_context(
                    format!("invalid header name '{}'", name),
                    ErrorContext::new().with_source("http_transport"),
                )
            })?;
            // The value may be a secret; keep it out of the message.
            let mut value = HeaderValue::from_str(value).map_err(|_| {
                Error::configuration_with_context(
                    format!("invalid value for header '{}'", name),
                    ErrorContext::new().with_source("http_transport"),
                )
            })?;
            if is_sensitive(name.as_str()) {
                value.set_sensitive(true);
            }
            map.insert(name, value);
        }
        Ok(map)
    }
}

fn is_sensitive(name: &str) -> bool {
    matches!(name, "authorization" | "x-api-key" | "x-goog-api-key")
}

#[async_trait]
impl Transport for HttpTransport {
    async fn open(&self, request: HttpRequest) -> Result<TransportResponse> {
        let headers = Self::header_map(&request.headers)?;
        debug!(url = %request.url, body_len = request.body.len(), "opening stream");

        let response = self
            .client
            .post(request.url)
            .headers(headers)
            .body(request.body)
            .send()
            .await
            .map_err(|e| Error::Transport(TransportError::Http(e.without_url())))?;

        let status = response.status().as_u16();
        let body = response
            .bytes_stream()
            .map_err(|e| Error::Transport(TransportError::Http(e.without_url())));

        Ok(TransportResponse {
            status,
            body: Box::pin(body),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secret_headers_are_marked_sensitive() {
        let map = HttpTransport::header_map(&[
            ("Authorization".into(), "Bearer sk-1".into()),
            ("Accept".into(), "text/event-stream".into()),
        ])
        .unwrap();
        assert!(map["authorization"].is_sensitive());
        assert!(!map["accept"].is_sensitive());
    }

    #[test]
    fn bad_header_value_error_hides_value() {
        let err = HttpTransport::header_map(&[("x-api-key".into(), "bad\nsecret".into())]).unwrap_err();
        assert!(!err.to_string().contains("secret"));
    }

    #[test]
    fn invalid_proxy_is_configuration_error() {
        let cfg = GatewayConfig {
            proxy_url: Some("::not a proxy::".into()),
            ..GatewayConfig::default()
        };
        assert!(HttpTransport::new(&cfg).is_err());
    }
}
