//! Outbound request assembly: URL, headers and body for one call.

use bytes::Bytes;
use std::fmt;
use url::Url;

use crate::registry::ProviderEntry;
use crate::types::UnifiedRequest;
use crate::{Error, ErrorContext, Result};

/// Fully-formed HTTP request, ready for a [`crate::transport::Transport`].
///
/// `Debug` lists header names only; values may hold the provider secret.
#[derive(Clone)]
pub struct HttpRequest {
    pub url: Url,
    pub headers: Vec<(String, String)>,
    pub body: Bytes,
}

impl HttpRequest {
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn body_json(&self) -> Result<serde_json::Value> {
        Ok(serde_json::from_slice(&self.body)?)
    }
}

impl fmt::Debug for HttpRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names: Vec<&str> = self.headers.iter().map(|(k, _)| k.as_str()).collect();
        f.debug_struct("HttpRequest")
            .field("url", &self.url.as_str())
            .field("headers", &names)
            .field("body_len", &self.body.len())
            .finish()
    }
}

/// Builds [`HttpRequest`]s from a request, a registry entry and a secret.
pub struct RequestBuilder;

impl RequestBuilder {
    /// Fails with a configuration error, before any network activity, when the
    /// model is empty or invalid for the provider, the secret is missing, or
    /// the entry belongs to a different provider.
    pub fn build(
        request: &UnifiedRequest,
        entry: &ProviderEntry,
        secret: Option<&str>,
    ) -> Result<HttpRequest> {
        if entry.id != request.provider() {
            return Err(Error::configuration_with_context(
                format!(
                    "request targets '{}' but entry is for '{}'",
                    request.provider(),
                    entry.id
                ),
                ErrorContext::new().with_source("request_builder"),
            ));
        }

        let model = request.model().trim();
        if model.is_empty() {
            return Err(Error::configuration_with_context(
                "model must not be empty",
                ErrorContext::new()
                    .with_field_path("request.model")
                    .with_source("request_builder"),
            ));
        }
        entry.driver().validate_model(model)?;
        // Path and body must name the same model.
        let normalized;
        let request = if model.len() == request.model().len() {
            request
        } else {
            normalized = request.with_model(model);
            &normalized
        };

        let secret = secret.map(str::trim).filter(|s| !s.is_empty()).ok_or_else(|| {
            Error::configuration_with_context(
                format!("no API key available for provider '{}'", entry.id),
                ErrorContext::new()
                    .with_field_path("credential")
                    .with_source("request_builder"),
            )
        })?;

        let endpoint = entry.endpoint(model);
        let url = Url::parse(&endpoint).map_err(|e| {
            Error::configuration_with_context(
                format!("invalid endpoint URL '{}': {}", endpoint, e),
                ErrorContext::new().with_source("request_builder"),
            )
        })?;

        let mut headers = vec![
            ("Content-Type".to_string(), "application/json".to_string()),
            ("Accept".to_string(), "text/event-stream".to_string()),
        ];
        headers.extend(entry.auth_headers(secret));

        let body = entry.driver().map_body(request)?;
        let body = Bytes::from(serde_json::to_vec(&body)?);

        Ok(HttpRequest { url, headers, body })
    }
}
