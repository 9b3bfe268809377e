use serde::Deserialize;

const DEFAULT_OPENAI_BASE_URL: &str = "https://api.openai.com/v1";
const DEFAULT_OPENAI_MODEL: &str = "gpt-4o-mini";
const DEFAULT_WRITE_PACING_MS: u64 = 100;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub port: u16,
    /// Kommo API root, e.g. `https://acme.kommo.com/api/v4`.
    pub kommo_base_url: String,
    pub kommo_api_key: String,
    pub openai_api_key: String,
    pub openai_base_url: String,
    pub openai_model: String,
    /// Constant spacing between consecutive CRM writes.
    pub write_pacing_ms: u64,
    /// When set, control routes require a matching `x-api-key` header.
    pub control_api_key: Option<String>,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary variable source.
    pub fn from_lookup<F>(lookup: F) -> anyhow::Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = Self {
            port: lookup("PORT")
                .unwrap_or_else(|| "3000".to_string())
                .parse()
                .map_err(|_| anyhow::anyhow!("PORT must be a valid number between 1-65535"))?,
            kommo_base_url: lookup("KOMMO_BASE_URL")
                .ok_or_else(|| anyhow::anyhow!("KOMMO_BASE_URL environment variable required"))
                .and_then(|url| require_http_url("KOMMO_BASE_URL", url))?,
            kommo_api_key: lookup("KOMMO_API_KEY")
                .ok_or_else(|| anyhow::anyhow!("KOMMO_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("KOMMO_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            openai_api_key: lookup("OPENAI_API_KEY")
                .ok_or_else(|| anyhow::anyhow!("OPENAI_API_KEY environment variable required"))
                .and_then(|key| {
                    if key.trim().is_empty() {
                        anyhow::bail!("OPENAI_API_KEY cannot be empty");
                    }
                    Ok(key)
                })?,
            openai_base_url: lookup("OPENAI_BASE_URL")
                .filter(|s| !s.trim().is_empty())
                .map(|url| require_http_url("OPENAI_BASE_URL", url))
                .transpose()?
                .unwrap_or_else(|| DEFAULT_OPENAI_BASE_URL.to_string()),
            openai_model: lookup("OPENAI_MODEL")
                .filter(|s| !s.trim().is_empty())
                .unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string()),
            write_pacing_ms: lookup("WRITE_PACING_MS")
                .map(|ms| {
                    ms.parse()
                        .map_err(|_| anyhow::anyhow!("WRITE_PACING_MS must be a whole number"))
                })
                .transpose()?
                .unwrap_or(DEFAULT_WRITE_PACING_MS),
            control_api_key: lookup("CONTROL_API_KEY").filter(|s| !s.trim().is_empty()),
        };

        // Log successful configuration load (without sensitive values)
        tracing::info!("Configuration loaded successfully");
        tracing::debug!("Kommo Base URL: {}", config.kommo_base_url);
        tracing::debug!(
            "Language model: {} via {}",
            config.openai_model,
            config.openai_base_url
        );
        tracing::debug!("CRM write pacing: {}ms", config.write_pacing_ms);
        if config.control_api_key.is_some() {
            tracing::info!("Control API key configured");
        }
        tracing::debug!("Server Port: {}", config.port);

        Ok(config)
    }
}

fn require_http_url(name: &str, raw: String) -> anyhow::Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        anyhow::bail!("{} cannot be empty", name);
    }
    let parsed =
        url::Url::parse(trimmed).map_err(|e| anyhow::anyhow!("{} is not a valid URL: {}", name, e))?;
    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        anyhow::bail!("{} must start with http:// or https://", name);
    }
    Ok(trimmed.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| vars.get(key).cloned()
    }

    #[test]
    fn test_defaults_applied() {
        let config = Config::from_lookup(lookup_from(&[
            ("KOMMO_BASE_URL", "https://acme.kommo.com/api/v4/"),
            ("KOMMO_API_KEY", "kommo-token"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap();

        assert_eq!(config.port, 3000);
        assert_eq!(config.kommo_base_url, "https://acme.kommo.com/api/v4");
        assert_eq!(config.openai_base_url, "https://api.openai.com/v1");
        assert_eq!(config.openai_model, "gpt-4o-mini");
        assert_eq!(config.write_pacing_ms, 100);
        assert!(config.control_api_key.is_none());
    }

    #[test]
    fn test_missing_kommo_key_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("KOMMO_BASE_URL", "https://acme.kommo.com/api/v4"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("KOMMO_API_KEY"));
    }

    #[test]
    fn test_non_http_url_rejected() {
        let err = Config::from_lookup(lookup_from(&[
            ("KOMMO_BASE_URL", "ftp://acme.kommo.com"),
            ("KOMMO_API_KEY", "kommo-token"),
            ("OPENAI_API_KEY", "sk-test"),
        ]))
        .unwrap_err();

        assert!(err.to_string().contains("http://"));
    }

    #[test]
    fn test_invalid_pacing_rejected() {
        let result = Config::from_lookup(lookup_from(&[
            ("KOMMO_BASE_URL", "https://acme.kommo.com/api/v4"),
            ("KOMMO_API_KEY", "kommo-token"),
            ("OPENAI_API_KEY", "sk-test"),
            ("WRITE_PACING_MS", "fast"),
        ]));

        assert!(result.is_err());
    }
}
