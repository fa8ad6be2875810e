use std::collections::HashMap;
use std::env;
use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Result};
use atelier_contracts::events::{payload, EventWriter};
use atelier_contracts::models::{
    ModelSelection, ModelSelector, CAPABILITY_ADVISORY, CAPABILITY_IMAGE, CAPABILITY_VIDEO,
    CAPABILITY_VOICE,
};
use atelier_contracts::storage::DEFAULT_QUOTA_BYTES;
use serde_json::json;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

const API_KEY_VARS: &[&str] = &["GEMINI_API_KEY", "GOOGLE_API_KEY", "VITE_GEMINI_API_KEY"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiKeyStatus {
    pub available: bool,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct AtelierConfig {
    pub api_key: Option<String>,
    pub api_base: String,
    pub advisory_model: ModelSelection,
    pub image_model: ModelSelection,
    pub video_model: ModelSelection,
    pub voice_model: ModelSelection,
    pub storage_quota_bytes: usize,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl AtelierConfig {
    /// Reads the process environment, with `env_file` (if any) filling in keys
    /// the environment does not set.
    pub fn from_env(env_file: Option<&Path>) -> Result<Self> {
        let file_vars = env_file.map(parse_dotenv).unwrap_or_default();
        Self::from_lookup(|key| non_empty_env(key).or_else(|| non_empty(file_vars.get(key))))
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let selector = ModelSelector::new(None);
        let select = |var: &str, capability: &str| -> Result<ModelSelection> {
            selector
                .select(lookup(var).as_deref(), capability)
                .map_err(|err| anyhow!(err))
        };

        Ok(Self {
            api_key: API_KEY_VARS.iter().find_map(|key| lookup(*key)),
            api_base: lookup("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
                .unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            advisory_model: select("ATELIER_ADVISORY_MODEL", CAPABILITY_ADVISORY)?,
            image_model: select("ATELIER_IMAGE_MODEL", CAPABILITY_IMAGE)?,
            video_model: select("ATELIER_VIDEO_MODEL", CAPABILITY_VIDEO)?,
            voice_model: select("ATELIER_VOICE_MODEL", CAPABILITY_VOICE)?,
            storage_quota_bytes: lookup("ATELIER_STORAGE_QUOTA_BYTES")
                .and_then(|value| value.parse::<usize>().ok())
                .unwrap_or(DEFAULT_QUOTA_BYTES),
            request_timeout: Duration::from_secs_f64(value_in_range(
                lookup("ATELIER_REQUEST_TIMEOUT_SECS"),
                90.0,
                5.0,
                600.0,
            )),
            transport_retries: value_in_range(lookup("ATELIER_TRANSPORT_RETRIES"), 2.0, 0.0, 4.0)
                .round() as usize,
            retry_backoff: Duration::from_secs_f64(1.2),
        })
    }

    pub fn api_key_status(&self) -> ApiKeyStatus {
        if self.api_key.is_some() {
            ApiKeyStatus {
                available: true,
                message: "API ready".to_string(),
            }
        } else {
            ApiKeyStatus {
                available: false,
                message: format!(
                    "No API key configured. Set {} in the environment.",
                    API_KEY_VARS.join(" or ")
                ),
            }
        }
    }

    /// Records the credential status and any model fallbacks in the event log.
    pub fn log_status(&self, events: &EventWriter) {
        let status = self.api_key_status();
        let fallbacks: Vec<_> = [
            &self.advisory_model,
            &self.image_model,
            &self.video_model,
            &self.voice_model,
        ]
        .into_iter()
        .filter_map(|selection| selection.fallback_reason.clone())
        .collect();
        let _ = events.emit(
            "api_status",
            payload(json!({
                "available": status.available,
                "message": status.message,
                "advisory_model": self.advisory_model.model.name,
                "image_model": self.image_model.model.name,
                "video_model": self.video_model.model.name,
                "voice_model": self.voice_model.model.name,
                "model_fallbacks": fallbacks,
            })),
        );
    }
}

/// Parses a `.env` file. Missing files read as empty.
pub fn parse_dotenv(path: &Path) -> HashMap<String, String> {
    let content = std::fs::read_to_string(path).unwrap_or_default();
    let mut vars = HashMap::new();
    for raw_line in content.lines() {
        let mut line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if let Some(stripped) = line.strip_prefix("export ") {
            line = stripped.trim();
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        vars.insert(key.to_string(), unquote(value.trim()).to_string());
    }
    vars
}

fn unquote(value: &str) -> &str {
    let bytes = value.as_bytes();
    if bytes.len() >= 2
        && ((bytes[0] == b'"' && bytes[bytes.len() - 1] == b'"')
            || (bytes[0] == b'\'' && bytes[bytes.len() - 1] == b'\''))
    {
        return &value[1..value.len() - 1];
    }
    value
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn non_empty(value: Option<&String>) -> Option<String> {
    value
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn value_in_range(raw: Option<String>, default: f64, min: f64, max: f64) -> f64 {
    raw.and_then(|value| value.trim().parse::<f64>().ok())
        .filter(|value| value.is_finite())
        .map(|value| value.clamp(min, max))
        .unwrap_or(default)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::time::Duration;

    use anyhow::Result;
    use tempfile::tempdir;

    use super::{parse_dotenv, AtelierConfig, DEFAULT_API_BASE};

    fn config_from(pairs: &[(&str, &str)]) -> Result<AtelierConfig> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(key, value)| (key.to_string(), value.to_string()))
            .collect();
        AtelierConfig::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn missing_key_is_a_status_not_an_error() -> Result<()> {
        let config = config_from(&[])?;
        let status = config.api_key_status();
        assert!(!status.available);
        assert!(status.message.contains("GEMINI_API_KEY"));
        assert_eq!(config.api_base, DEFAULT_API_BASE);
        assert_eq!(config.advisory_model.model.name, "gemini-3-pro-preview");
        assert_eq!(config.storage_quota_bytes, 5 * 1024 * 1024);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.transport_retries, 2);
        Ok(())
    }

    #[test]
    fn key_fallback_order() -> Result<()> {
        let config = config_from(&[("VITE_GEMINI_API_KEY", "vite"), ("GOOGLE_API_KEY", "google")])?;
        assert_eq!(config.api_key.as_deref(), Some("google"));
        assert!(config.api_key_status().available);
        Ok(())
    }

    #[test]
    fn unknown_model_falls_back_with_reason() -> Result<()> {
        let config = config_from(&[
            ("ATELIER_IMAGE_MODEL", "not-a-model"),
            ("ATELIER_VIDEO_MODEL", "veo-3.1-generate-preview"),
            ("GEMINI_API_BASE", "http://localhost:9000/v1beta/"),
        ])?;
        assert_eq!(config.image_model.model.name, "gemini-2.5-flash-image");
        assert!(config.image_model.fallback_reason.is_some());
        assert_eq!(config.video_model.model.name, "veo-3.1-generate-preview");
        assert_eq!(config.api_base, "http://localhost:9000/v1beta");
        Ok(())
    }

    #[test]
    fn numeric_settings_are_clamped() -> Result<()> {
        let config = config_from(&[
            ("ATELIER_TRANSPORT_RETRIES", "99"),
            ("ATELIER_REQUEST_TIMEOUT_SECS", "nonsense"),
            ("ATELIER_STORAGE_QUOTA_BYTES", "2048"),
        ])?;
        assert_eq!(config.transport_retries, 4);
        assert_eq!(config.request_timeout, Duration::from_secs(90));
        assert_eq!(config.storage_quota_bytes, 2048);
        Ok(())
    }

    #[test]
    fn dotenv_strips_exports_quotes_and_comments() -> Result<()> {
        let dir = tempdir()?;
        let path = dir.path().join(".env");
        std::fs::write(
            &path,
            "# comment\nexport GEMINI_API_KEY=\"abc 123\"\nATELIER_IMAGE_MODEL='gemini-3-pro-image-preview'\n\nBROKEN_LINE\n=novalue\n",
        )?;
        let vars = parse_dotenv(&path);
        assert_eq!(vars.get("GEMINI_API_KEY").map(String::as_str), Some("abc 123"));
        assert_eq!(
            vars.get("ATELIER_IMAGE_MODEL").map(String::as_str),
            Some("gemini-3-pro-image-preview")
        );
        assert_eq!(vars.len(), 2);
        assert!(parse_dotenv(&dir.path().join("missing.env")).is_empty());
        Ok(())
    }
}
