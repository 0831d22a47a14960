use secrecy::SecretString;
use serde::Deserialize;

/// Configuration for a single image generation provider
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Provider wire protocol
    #[serde(rename = "type")]
    pub provider_type: ProviderType,
    /// API key
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Base URL override
    #[serde(default)]
    pub base_url: Option<String>,
    /// Model used when a request names none
    #[serde(default)]
    pub default_model: Option<String>,
    /// Whether the provider is selectable; inactive providers get no
    /// limiter bucket and reject submissions
    #[serde(default = "default_active")]
    pub active: bool,
    /// Outbound token-bucket limits
    #[serde(default)]
    pub rate: Option<RateConfig>,
    /// `HTTP-Referer` attribution header for router-style providers
    #[serde(default)]
    pub referer: Option<String>,
    /// `X-Title` attribution header for router-style providers
    #[serde(default)]
    pub app_title: Option<String>,
}

/// Supported provider wire protocols
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderType {
    /// Google Generative Language API
    Gemini,
    /// OpenRouter chat-completions routing
    Openrouter,
    /// Requesty chat-completions routing
    Requesty,
}

/// Token-bucket rate limit for outbound calls to one provider
#[derive(Debug, Clone, Copy, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RateConfig {
    /// Bucket capacity (burst size)
    pub capacity: u32,
    /// Steady refill rate in tokens per second
    pub per_second: f64,
}

fn default_active() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_from_toml() {
        let config: ProviderConfig = toml::from_str(
            r#"
            type = "openrouter"
            api_key = "sk-test"
            default_model = "google/gemini-2.5-flash-image"
            referer = "https://example.com"

            [rate]
            capacity = 2
            per_second = 0.5
            "#,
        )
        .unwrap();

        assert_eq!(config.provider_type, ProviderType::Openrouter);
        assert!(config.active);
        assert_eq!(config.rate.unwrap().capacity, 2);
    }

    #[test]
    fn unknown_field_rejected() {
        let result: Result<ProviderConfig, _> = toml::from_str(
            r#"
            type = "gemini"
            api_keey = "oops"
            "#,
        );
        assert!(result.is_err());
    }
}
