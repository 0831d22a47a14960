use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use easel_config::{Config, ProviderType};
use easel_core::{GeneratedImage, GenerationRequest, ProviderError};

use crate::credentials::CredentialProvider;
use crate::gemini::GeminiAdapter;
use crate::openrouter::OpenRouterAdapter;
use crate::requesty::RequestyAdapter;

/// Trait implemented by each image generation backend
#[async_trait]
pub trait ImageProvider: Send + Sync {
    /// Provider name as configured
    fn name(&self) -> &str;

    /// Run one generation attempt
    ///
    /// The timeout covers the whole provider call; expiry is classified as
    /// [`ProviderError::Transient`] so the retry policy treats it like any
    /// other transient failure.
    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GeneratedImage, ProviderError>;
}

/// Build an adapter for every active provider in the configuration
pub fn build_providers(
    config: &Config,
    credentials: Arc<dyn CredentialProvider>,
) -> HashMap<String, Arc<dyn ImageProvider>> {
    let mut providers: HashMap<String, Arc<dyn ImageProvider>> = HashMap::new();

    for (name, provider_config) in config.active_providers() {
        tracing::debug!(provider = name, "initializing provider adapter");

        let adapter: Arc<dyn ImageProvider> = match provider_config.provider_type {
            ProviderType::Gemini => Arc::new(GeminiAdapter::new(
                name.to_owned(),
                Arc::clone(&credentials),
                provider_config.base_url.clone(),
            )),
            ProviderType::Openrouter => Arc::new(OpenRouterAdapter::new(
                name.to_owned(),
                Arc::clone(&credentials),
                provider_config.base_url.clone(),
                provider_config.referer.clone(),
                provider_config.app_title.clone(),
            )),
            ProviderType::Requesty => Arc::new(RequestyAdapter::new(
                name.to_owned(),
                Arc::clone(&credentials),
                provider_config.base_url.clone(),
                provider_config.referer.clone(),
                provider_config.app_title.clone(),
            )),
        };

        providers.insert(name.to_owned(), adapter);
    }

    providers
}

/// Classify an HTTP error status into the shared taxonomy
///
/// `body` is the provider's error text, already truncated by the caller;
/// it never contains our credentials.
pub(crate) fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> ProviderError {
    match status {
        401 | 403 => ProviderError::Auth(body.to_owned()),
        400 | 404 | 413 | 422 => ProviderError::InvalidRequest(body.to_owned()),
        429 => ProviderError::RateLimited { retry_after },
        500..=599 => ProviderError::Transient(format!("provider returned {status}: {body}")),
        _ => ProviderError::Unknown(format!("provider returned {status}: {body}")),
    }
}

/// Classify a transport-level failure
pub(crate) fn classify_transport(error: &reqwest::Error) -> ProviderError {
    if error.is_timeout() {
        ProviderError::Transient("provider call timed out".to_owned())
    } else if error.is_connect() || error.is_request() {
        ProviderError::Transient(format!("connection failure: {error}"))
    } else if error.is_decode() {
        ProviderError::Unknown(format!("undecodable provider response: {error}"))
    } else {
        ProviderError::Unknown(error.to_string())
    }
}

/// Parse a `Retry-After` header value in seconds
pub(crate) fn parse_retry_after(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)?
        .to_str()
        .ok()?
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Load template bytes when the request references one
///
/// Template references are local paths in this deployment shape; a missing
/// or unreadable file is the caller's mistake, not a provider failure.
pub(crate) async fn load_template(request: &GenerationRequest) -> Result<Option<Vec<u8>>, ProviderError> {
    let Some(template) = &request.template else {
        return Ok(None);
    };
    match tokio::fs::read(&template.reference).await {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) => Err(ProviderError::InvalidRequest(format!(
            "template '{}' unreadable: {e}",
            template.reference
        ))),
    }
}

/// Bound provider error text so messages stay log-friendly
pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 512;
    if body.len() <= MAX {
        body.to_owned()
    } else {
        let mut end = MAX;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}…", &body[..end])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn auth_statuses_are_terminal() {
        assert!(matches!(classify_status(401, None, "bad key"), ProviderError::Auth(_)));
        assert!(matches!(classify_status(403, None, "forbidden"), ProviderError::Auth(_)));
        assert!(!classify_status(401, None, "").is_retryable());
    }

    #[test]
    fn client_errors_are_invalid_request() {
        assert!(matches!(
            classify_status(400, None, "bad prompt"),
            ProviderError::InvalidRequest(_)
        ));
        assert!(matches!(
            classify_status(422, None, "bad params"),
            ProviderError::InvalidRequest(_)
        ));
    }

    #[test]
    fn throttling_keeps_the_providers_hint() {
        let err = classify_status(429, Some(Duration::from_secs(7)), "slow down");
        let ProviderError::RateLimited { retry_after } = err else {
            panic!("expected RateLimited");
        };
        assert_eq!(retry_after, Some(Duration::from_secs(7)));
    }

    #[test]
    fn server_errors_are_transient() {
        assert!(classify_status(500, None, "oops").is_retryable());
        assert!(classify_status(503, None, "maintenance").is_retryable());
    }

    #[test]
    fn unexpected_statuses_are_unknown() {
        assert!(matches!(classify_status(302, None, ""), ProviderError::Unknown(_)));
    }

    #[test]
    fn long_bodies_are_truncated() {
        let body = "x".repeat(2048);
        assert!(truncate_body(&body).len() < 600);
        assert_eq!(truncate_body("short"), "short");
    }
}
