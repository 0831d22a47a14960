//! Shared wire handling for OpenAI-compatible chat-completion routers
//!
//! OpenRouter and Requesty both front Gemini-family image models through a
//! `chat/completions` endpoint that returns images as data URLs. The two
//! adapters differ only in endpoint and attribution headers.

use std::time::Duration;

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use easel_core::{GeneratedImage, GenerationRequest, ProviderError, Usage};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::adapter::{classify_status, classify_transport, parse_retry_after, truncate_body};

/// One router's identity: where to send requests and how to attribute them
pub(crate) struct ChatEndpoint {
    pub name: String,
    pub url: String,
    pub referer: Option<String>,
    pub title: Option<String>,
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message<'a>>,
    modalities: [&'static str; 2],
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
}

#[derive(Serialize)]
struct Message<'a> {
    role: &'static str,
    content: Vec<ContentPart<'a>>,
}

#[derive(Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum ContentPart<'a> {
    Text { text: &'a str },
    ImageUrl { image_url: ImageUrlRef },
}

#[derive(Serialize)]
struct ImageUrlRef {
    url: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<WireUsage>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    #[serde(default)]
    content: Option<Value>,
    #[serde(default)]
    images: Vec<ImageEntry>,
}

#[derive(Deserialize)]
struct ImageEntry {
    image_url: ImageUrl,
}

#[derive(Deserialize)]
struct ImageUrl {
    url: String,
}

#[derive(Deserialize)]
struct WireUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
}

/// Run one generation through a chat-completions router
pub(crate) async fn generate(
    client: &reqwest::Client,
    endpoint: &ChatEndpoint,
    api_key: &SecretString,
    request: &GenerationRequest,
    template_bytes: Option<Vec<u8>>,
    timeout: Duration,
) -> Result<GeneratedImage, ProviderError> {
    let mut content = vec![ContentPart::Text { text: &request.prompt }];
    if let Some(bytes) = template_bytes {
        content.push(ContentPart::ImageUrl {
            image_url: ImageUrlRef {
                url: format!("data:image/png;base64,{}", BASE64.encode(bytes)),
            },
        });
    }

    let wire = ChatRequest {
        model: &request.model,
        messages: vec![Message { role: "user", content }],
        modalities: ["image", "text"],
        seed: request.seed,
    };

    // Extra parameters pass through verbatim, without clobbering the fields
    // the adapter owns
    let mut body = serde_json::to_value(&wire)
        .map_err(|e| ProviderError::Unknown(format!("request serialization: {e}")))?;
    if let Value::Object(map) = &mut body {
        for (key, value) in &request.params {
            map.entry(key.clone()).or_insert_with(|| value.clone());
        }
    }

    tracing::debug!(provider = %endpoint.name, model = %request.model, "sending generation request");

    let mut builder = client
        .post(&endpoint.url)
        .timeout(timeout)
        .bearer_auth(api_key.expose_secret())
        .json(&body);
    if let Some(referer) = &endpoint.referer {
        builder = builder.header("HTTP-Referer", referer);
    }
    if let Some(title) = &endpoint.title {
        builder = builder.header("X-Title", title);
    }

    let response = builder.send().await.map_err(|e| {
        tracing::warn!(provider = %endpoint.name, error = %e, "generation request failed");
        classify_transport(&e)
    })?;

    let status = response.status();
    if !status.is_success() {
        let retry_after = parse_retry_after(&response);
        let body = response.text().await.unwrap_or_default();
        tracing::warn!(provider = %endpoint.name, status = %status, "provider returned error status");
        return Err(classify_status(status.as_u16(), retry_after, &truncate_body(&body)));
    }

    let wire_response: ChatResponse = response.json().await.map_err(|e| classify_transport(&e))?;
    let (bytes, mime_type) = extract_image(&wire_response)?;

    tracing::debug!(provider = %endpoint.name, bytes = bytes.len(), "generation complete");

    Ok(GeneratedImage {
        bytes,
        mime_type,
        response_id: wire_response.id,
        usage: wire_response.usage.map(|u| Usage {
            prompt_tokens: u.prompt_tokens,
            completion_tokens: u.completion_tokens,
        }),
    })
}

/// Pull the first image out of a chat response
///
/// Routers vary: newer ones attach a `message.images` array, older ones
/// inline a data URL in the content array, and some return bare base64 as
/// the content string.
fn extract_image(response: &ChatResponse) -> Result<(Vec<u8>, Option<String>), ProviderError> {
    let message = &response
        .choices
        .first()
        .ok_or_else(|| ProviderError::Unknown("response contained no choices".to_owned()))?
        .message;

    for entry in &message.images {
        if let Some(decoded) = decode_data_url(&entry.image_url.url) {
            return Ok(decoded);
        }
    }

    match &message.content {
        Some(Value::Array(parts)) => {
            for part in parts {
                if let Some(url) = part.pointer("/image_url/url").and_then(Value::as_str)
                    && let Some(decoded) = decode_data_url(url)
                {
                    return Ok(decoded);
                }
            }
        }
        Some(Value::String(content)) => {
            if let Ok(bytes) = BASE64.decode(content.trim()) {
                return Ok((bytes, None));
            }
        }
        _ => {}
    }

    Err(ProviderError::Unknown("no image in provider response".to_owned()))
}

/// Decode a `data:<mime>;base64,<payload>` URL
fn decode_data_url(url: &str) -> Option<(Vec<u8>, Option<String>)> {
    let rest = url.strip_prefix("data:")?;
    let (header, payload) = rest.split_once(',')?;
    let mime = header.strip_suffix(";base64").filter(|m| !m.is_empty());
    let bytes = BASE64.decode(payload).ok()?;
    Some((bytes, mime.map(str::to_owned)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn png_data_url() -> String {
        format!("data:image/png;base64,{}", BASE64.encode(b"fake png"))
    }

    #[test]
    fn decodes_data_urls() {
        let (bytes, mime) = decode_data_url(&png_data_url()).unwrap();
        assert_eq!(bytes, b"fake png");
        assert_eq!(mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn rejects_non_data_urls() {
        assert!(decode_data_url("https://example.com/a.png").is_none());
    }

    #[test]
    fn image_from_images_array() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "id": "gen-1",
            "choices": [{
                "message": {
                    "content": "here you go",
                    "images": [{"image_url": {"url": png_data_url()}}]
                }
            }]
        }))
        .unwrap();

        let (bytes, mime) = extract_image(&response).unwrap();
        assert_eq!(bytes, b"fake png");
        assert_eq!(mime.as_deref(), Some("image/png"));
    }

    #[test]
    fn image_from_content_parts() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{
                "message": {
                    "content": [
                        {"type": "text", "text": "done"},
                        {"type": "image_url", "image_url": {"url": png_data_url()}}
                    ]
                }
            }]
        }))
        .unwrap();

        assert_eq!(extract_image(&response).unwrap().0, b"fake png");
    }

    #[test]
    fn image_from_bare_base64_content() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": BASE64.encode(b"fake png")}}]
        }))
        .unwrap();

        assert_eq!(extract_image(&response).unwrap().0, b"fake png");
    }

    #[test]
    fn missing_image_is_unclassified() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({
            "choices": [{"message": {"content": "sorry, text only!?"}}]
        }))
        .unwrap();

        assert!(matches!(extract_image(&response), Err(ProviderError::Unknown(_))));
    }

    #[test]
    fn empty_choices_is_unclassified() {
        let response: ChatResponse = serde_json::from_value(serde_json::json!({"choices": []})).unwrap();
        assert!(matches!(extract_image(&response), Err(ProviderError::Unknown(_))));
    }
}
