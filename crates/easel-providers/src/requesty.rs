use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use easel_core::{GeneratedImage, GenerationRequest, ProviderError};

use crate::adapter::{ImageProvider, load_template};
use crate::chat::{self, ChatEndpoint};
use crate::credentials::CredentialProvider;

/// Default Requesty router base URL
const DEFAULT_BASE_URL: &str = "https://router.requesty.ai/v1";

/// Gemini-family image generation routed through Requesty
pub struct RequestyAdapter {
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    endpoint: ChatEndpoint,
}

impl RequestyAdapter {
    pub fn new(
        name: String,
        credentials: Arc<dyn CredentialProvider>,
        base_url: Option<String>,
        referer: Option<String>,
        app_title: Option<String>,
    ) -> Self {
        let base = base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned());
        Self {
            client: reqwest::Client::new(),
            credentials,
            endpoint: ChatEndpoint {
                name,
                url: format!("{}/chat/completions", base.trim_end_matches('/')),
                referer,
                title: app_title,
            },
        }
    }
}

#[async_trait]
impl ImageProvider for RequestyAdapter {
    fn name(&self) -> &str {
        &self.endpoint.name
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GeneratedImage, ProviderError> {
        let api_key = self
            .credentials
            .get(self.name())
            .map_err(|e| ProviderError::Auth(e.to_string()))?;
        let template = load_template(request).await?;

        chat::generate(&self.client, &self.endpoint, &api_key, request, template, timeout).await
    }
}
