use std::path::Path;

use crate::Config;

impl Config {
    /// Load configuration from a TOML file
    ///
    /// Reads the file, expands `{{ env.VAR }}` placeholders, then
    /// deserializes and validates the result.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, environment variable
    /// expansion fails, TOML parsing fails, or validation fails
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("failed to read config file {}: {e}", path.display()))?;

        let expanded =
            crate::env::expand_env(&raw).map_err(|e| anyhow::anyhow!("config variable expansion failed: {e}"))?;

        let config: Self = toml::from_str(&expanded).map_err(|e| anyhow::anyhow!("failed to parse config: {e}"))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate that the configuration is internally consistent
    ///
    /// # Errors
    ///
    /// Returns an error if no provider is active or numeric settings are
    /// out of range
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.active_providers().next().is_none() {
            anyhow::bail!("at least one active provider must be configured");
        }

        for (name, provider) in &self.providers {
            if let Some(rate) = &provider.rate {
                if rate.capacity == 0 {
                    anyhow::bail!("rate capacity for provider '{name}' must be > 0");
                }
                if rate.per_second <= 0.0 {
                    anyhow::bail!("rate per_second for provider '{name}' must be > 0");
                }
            }
        }

        if self.dispatcher.concurrency == 0 {
            anyhow::bail!("dispatcher concurrency must be > 0");
        }
        if self.dispatcher.queue_depth == 0 {
            anyhow::bail!("dispatcher queue_depth must be > 0");
        }
        if self.dispatcher.retry.max_attempts == 0 {
            anyhow::bail!("retry max_attempts must be > 0");
        }
        if self.dispatcher.retry.multiplier < 1.0 {
            anyhow::bail!("retry multiplier must be >= 1.0");
        }

        // Fail fast on malformed durations rather than at first use
        self.dispatcher.request_timeout()?;
        self.dispatcher.retry.base_delay()?;
        self.dispatcher.retry.max_delay()?;
        self.dispatcher.retry.jitter()?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> anyhow::Result<Config> {
        let config: Config = toml::from_str(toml_str)?;
        config.validate()?;
        Ok(config)
    }

    #[test]
    fn minimal_config_validates() {
        let config = parse(
            r#"
            [providers.gemini]
            type = "gemini"
            api_key = "test-key"
            "#,
        )
        .unwrap();
        assert_eq!(config.active_providers().count(), 1);
    }

    #[test]
    fn no_active_provider_rejected() {
        let err = parse(
            r#"
            [providers.gemini]
            type = "gemini"
            active = false
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("active provider"));
    }

    #[test]
    fn zero_rate_capacity_rejected() {
        let err = parse(
            r#"
            [providers.gemini]
            type = "gemini"

            [providers.gemini.rate]
            capacity = 0
            per_second = 1.0
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("capacity"));
    }

    #[test]
    fn sub_unit_multiplier_rejected() {
        let err = parse(
            r#"
            [dispatcher.retry]
            multiplier = 0.5

            [providers.gemini]
            type = "gemini"
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("multiplier"));
    }
}
