use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use easel_core::{GeneratedImage, GenerationRequest, ProviderError, Usage};
use secrecy::ExposeSecret;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{
    ImageProvider, classify_status, classify_transport, load_template, parse_retry_after, truncate_body,
};
use crate::credentials::CredentialProvider;

/// Default Google Generative Language API base URL
const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com";

/// Direct Gemini image generation
pub struct GeminiAdapter {
    name: String,
    client: reqwest::Client,
    credentials: Arc<dyn CredentialProvider>,
    base_url: String,
}

impl GeminiAdapter {
    pub fn new(name: String, credentials: Arc<dyn CredentialProvider>, base_url: Option<String>) -> Self {
        Self {
            name,
            client: reqwest::Client::new(),
            credentials,
            base_url: base_url.unwrap_or_else(|| DEFAULT_BASE_URL.to_owned()),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<Content>,
    generation_config: GenerationConfig,
}

#[derive(Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
enum Part {
    Text(String),
    InlineData(InlineData),
}

#[derive(Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct InlineData {
    mime_type: String,
    data: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_modalities: [&'static str; 1],
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default)]
    response_id: Option<String>,
    #[serde(default)]
    usage_metadata: Option<UsageMetadata>,
}

#[derive(Deserialize)]
struct Candidate {
    content: CandidateContent,
}

#[derive(Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct ResponsePart {
    #[serde(default)]
    inline_data: Option<InlineData>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
}

#[async_trait]
impl ImageProvider for GeminiAdapter {
    fn name(&self) -> &str {
        &self.name
    }

    async fn generate(
        &self,
        request: &GenerationRequest,
        timeout: Duration,
    ) -> Result<GeneratedImage, ProviderError> {
        let api_key = self
            .credentials
            .get(&self.name)
            .map_err(|e| ProviderError::Auth(e.to_string()))?;

        let mut parts = vec![Part::Text(request.prompt.clone())];
        if let Some(bytes) = load_template(request).await? {
            parts.push(Part::InlineData(InlineData {
                mime_type: "image/png".to_owned(),
                data: BASE64.encode(bytes),
            }));
        }

        let wire = GeminiRequest {
            contents: vec![Content { parts }],
            generation_config: GenerationConfig {
                response_modalities: ["IMAGE"],
                seed: request.seed,
            },
        };
        let body = build_body(&wire, request)?;

        let url = format!(
            "{}/v1beta/models/{}:generateContent",
            self.base_url.trim_end_matches('/'),
            request.model
        );

        tracing::debug!(provider = %self.name, model = %request.model, "sending generation request");

        let response = self
            .client
            .post(&url)
            .timeout(timeout)
            .header("x-goog-api-key", api_key.expose_secret())
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                tracing::warn!(provider = %self.name, error = %e, "generation request failed");
                classify_transport(&e)
            })?;

        let status = response.status();
        if !status.is_success() {
            let retry_after = parse_retry_after(&response);
            let body = response.text().await.unwrap_or_default();
            tracing::warn!(provider = %self.name, status = %status, "provider returned error status");
            return Err(classify_status(status.as_u16(), retry_after, &truncate_body(&body)));
        }

        let wire_response: GeminiResponse = response.json().await.map_err(|e| classify_transport(&e))?;
        let (bytes, mime_type) = extract_image(&wire_response)?;

        tracing::debug!(provider = %self.name, bytes = bytes.len(), "generation complete");

        Ok(GeneratedImage {
            bytes,
            mime_type,
            response_id: wire_response.response_id.clone(),
            usage: wire_response.usage_metadata.as_ref().map(|u| Usage {
                prompt_tokens: u.prompt_token_count,
                completion_tokens: u.candidates_token_count,
            }),
        })
    }
}

/// Build the request body, passing extra parameters through into
/// `generationConfig` without clobbering the fields the adapter owns
fn build_body(wire: &GeminiRequest, request: &GenerationRequest) -> Result<Value, ProviderError> {
    let mut body =
        serde_json::to_value(wire).map_err(|e| ProviderError::Unknown(format!("request serialization: {e}")))?;
    if let Value::Object(map) = &mut body
        && let Some(Value::Object(config)) = map.get_mut("generationConfig")
    {
        for (key, value) in &request.params {
            config.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }
    Ok(body)
}

/// Pull the first inline image out of a Gemini response
fn extract_image(response: &GeminiResponse) -> Result<(Vec<u8>, Option<String>), ProviderError> {
    for candidate in &response.candidates {
        for part in &candidate.content.parts {
            if let Some(inline) = &part.inline_data {
                let bytes = BASE64
                    .decode(&inline.data)
                    .map_err(|e| ProviderError::Unknown(format!("undecodable inline image: {e}")))?;
                return Ok((bytes, Some(inline.mime_type.clone())));
            }
        }
    }
    Err(ProviderError::Unknown("no image in provider response".to_owned()))
}
