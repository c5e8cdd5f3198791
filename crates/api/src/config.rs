use std::fmt;
use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use extract::llm::{DEFAULT_GEMINI_BASE_URL, DEFAULT_GEMINI_MODEL};

#[derive(Debug, Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Pretty,
    Json,
}

#[derive(Clone, Serialize)]
pub struct GeminiConfig {
    #[serde(skip_serializing)]
    pub api_key: String,
    pub model: String,
    pub base_url: String,
}

#[derive(Clone, Serialize)]
pub struct DocumentAiConfig {
    pub processor_name: String,
    pub endpoint: Option<String>,
    #[serde(skip_serializing)]
    pub access_token: String,
}

impl fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"<redacted>")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .finish()
    }
}

impl fmt::Debug for DocumentAiConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentAiConfig")
            .field("processor_name", &self.processor_name)
            .field("endpoint", &self.endpoint)
            .field("access_token", &"<redacted>")
            .finish()
    }
}

/// Everything the service reads from its environment, resolved once at startup.
#[derive(Debug, Clone, Serialize)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub gemini: Option<GeminiConfig>,
    pub document_ai: Option<DocumentAiConfig>,
    /// Include raw model output in error bodies. Never enable in production.
    pub diagnostics: bool,
    pub log_format: LogFormat,
    pub upstream_timeout_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            gemini: None,
            document_ai: None,
            diagnostics: false,
            log_format: LogFormat::Pretty,
            upstream_timeout_secs: 60,
        }
    }
}

fn parse_bool(key: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        _ => Err(ConfigError::InvalidValue { key, value }),
    }
}

fn parse_num<T: std::str::FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

impl AppConfig {
    /// Load configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build configuration from any key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        // Treat empty values as unset.
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = match get("PORT") {
            Some(v) => parse_num("PORT", v)?,
            None => defaults.port,
        };

        let gemini = get("GEMINI_API_KEY").map(|api_key| GeminiConfig {
            api_key,
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.to_string()),
            base_url: get("GEMINI_BASE_URL").unwrap_or_else(|| DEFAULT_GEMINI_BASE_URL.to_string()),
        });

        let document_ai = match (get("DOCUMENT_AI_PROCESSOR"), get("GOOGLE_ACCESS_TOKEN")) {
            (Some(processor_name), Some(access_token)) => Some(DocumentAiConfig {
                processor_name,
                endpoint: get("DOCUMENT_AI_ENDPOINT"),
                access_token,
            }),
            _ => None,
        };

        let diagnostics = match get("DIAGNOSTICS") {
            Some(v) => parse_bool("DIAGNOSTICS", v)?,
            None => defaults.diagnostics,
        };

        let log_format = match get("LOG_FORMAT") {
            Some(v) => match v.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                _ => return Err(ConfigError::InvalidValue { key: "LOG_FORMAT", value: v }),
            },
            None => defaults.log_format,
        };

        let upstream_timeout_secs = match get("UPSTREAM_TIMEOUT_SECS") {
            Some(v) => parse_num("UPSTREAM_TIMEOUT_SECS", v)?,
            None => defaults.upstream_timeout_secs,
        };

        Ok(Self {
            host: get("HOST").unwrap_or(defaults.host),
            port,
            gemini,
            document_ai,
            diagnostics,
            log_format,
            upstream_timeout_secs,
        })
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(pairs: &[(&str, &str)]) -> Result<AppConfig, ConfigError> {
        let env: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AppConfig::from_lookup(|key| env.get(key).cloned())
    }

    #[test]
    fn test_defaults() {
        let cfg = config(&[]).unwrap();
        assert_eq!(cfg.bind_addr(), "0.0.0.0:3000");
        assert!(cfg.gemini.is_none());
        assert!(cfg.document_ai.is_none());
        assert!(!cfg.diagnostics);
        assert_eq!(cfg.log_format, LogFormat::Pretty);
        assert_eq!(cfg.upstream_timeout(), Duration::from_secs(60));
    }

    #[test]
    fn test_full_environment() {
        let cfg = config(&[
            ("PORT", "8080"),
            ("HOST", "127.0.0.1"),
            ("GEMINI_API_KEY", "k"),
            ("GEMINI_MODEL", "gemini-1.5-pro"),
            ("DOCUMENT_AI_PROCESSOR", "projects/p/locations/eu/processors/x"),
            ("GOOGLE_ACCESS_TOKEN", "t"),
            ("DIAGNOSTICS", "true"),
            ("LOG_FORMAT", "json"),
        ])
        .unwrap();

        assert_eq!(cfg.bind_addr(), "127.0.0.1:8080");
        let gemini = cfg.gemini.unwrap();
        assert_eq!(gemini.model, "gemini-1.5-pro");
        assert_eq!(gemini.base_url, DEFAULT_GEMINI_BASE_URL);
        let doc_ai = cfg.document_ai.unwrap();
        assert_eq!(doc_ai.endpoint, None);
        assert!(cfg.diagnostics);
        assert_eq!(cfg.log_format, LogFormat::Json);
    }

    #[test]
    fn test_document_ai_needs_token() {
        let cfg = config(&[("DOCUMENT_AI_PROCESSOR", "projects/p/locations/us/processors/x")]).unwrap();
        assert!(cfg.document_ai.is_none());
    }

    #[test]
    fn test_empty_key_is_unset() {
        let cfg = config(&[("GEMINI_API_KEY", "  ")]).unwrap();
        assert!(cfg.gemini.is_none());
    }

    #[test]
    fn test_invalid_values() {
        assert_eq!(
            config(&[("PORT", "eighty")]).unwrap_err(),
            ConfigError::InvalidValue {
                key: "PORT",
                value: "eighty".to_string()
            }
        );
        assert!(config(&[("DIAGNOSTICS", "maybe")]).is_err());
        assert!(config(&[("LOG_FORMAT", "xml")]).is_err());
    }

    #[test]
    fn test_secrets_are_not_serialized() {
        let cfg = config(&[("GEMINI_API_KEY", "super-secret")]).unwrap();
        let json = serde_json::to_string(&cfg).unwrap();
        assert!(!json.contains("super-secret"));
        assert!(!format!("{cfg:?}").contains("super-secret"));
    }
}
