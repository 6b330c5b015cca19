//! Configuration types and loading.
//!
//! Config is loaded from a JSON file (e.g. `~/.whatgpt/config.json`) and environment.
//! Credentials and the bridge URL may be supplied through the environment (or a `.env`
//! file loaded by the CLI) and take precedence over the file.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub const DEFAULT_IMAGE_ENDPOINT: &str =
    "https://openapi.mtlab.meitu.com/v1/stable_diffusion_anime";
pub const DEFAULT_TEXT_ENDPOINT: &str = "https://api.openai.com/v1/chat/completions";
pub const DEFAULT_TEXT_MODEL: &str = "gpt-3.5-turbo";
pub const DEFAULT_BRIDGE_URL: &str = "ws://127.0.0.1:4119/ws";

/// Top-level application config.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    /// Generative backend endpoints and credentials.
    #[serde(default)]
    pub backends: BackendsConfig,

    /// Messaging bridge connection.
    #[serde(default)]
    pub bridge: BridgeConfig,

    /// Handler scheduling.
    #[serde(default)]
    pub dispatch: DispatchConfig,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackendsConfig {
    #[serde(default)]
    pub image: ImageBackendConfig,
    #[serde(default)]
    pub text: TextBackendConfig,
}

/// Image style-transfer backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImageBackendConfig {
    #[serde(default = "default_image_endpoint")]
    pub endpoint: String,
    /// Overridden by IMGAIKEY env.
    pub api_key: Option<String>,
    /// Overridden by IMGAISECRET env.
    pub api_secret: Option<String>,
}

/// Chat-completion backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TextBackendConfig {
    #[serde(default = "default_text_endpoint")]
    pub endpoint: String,
    #[serde(default = "default_text_model")]
    pub model: String,
    /// Overridden by OPENAIKEY env.
    pub api_key: Option<String>,
}

/// WebSocket bridge holding the live messaging session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BridgeConfig {
    /// Bridge URL (default ws://127.0.0.1:4119/ws). Overridden by WHATGPT_BRIDGE_URL env.
    #[serde(default = "default_bridge_url")]
    pub url: String,
    /// Client id announced in the connect request.
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DispatchConfig {
    /// Upper bound on concurrently running handlers. Absent means unbounded.
    #[serde(default)]
    pub max_concurrent_handlers: Option<usize>,
}

fn default_image_endpoint() -> String {
    DEFAULT_IMAGE_ENDPOINT.to_string()
}

fn default_text_endpoint() -> String {
    DEFAULT_TEXT_ENDPOINT.to_string()
}

fn default_text_model() -> String {
    DEFAULT_TEXT_MODEL.to_string()
}

fn default_bridge_url() -> String {
    DEFAULT_BRIDGE_URL.to_string()
}

fn default_client_id() -> String {
    "whatgpt".to_string()
}

impl Default for ImageBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_image_endpoint(),
            api_key: None,
            api_secret: None,
        }
    }
}

impl Default for TextBackendConfig {
    fn default() -> Self {
        Self {
            endpoint: default_text_endpoint(),
            model: default_text_model(),
            api_key: None,
        }
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            url: default_bridge_url(),
            client_id: default_client_id(),
        }
    }
}

/// Backend credentials after env/config resolution. Empty strings mean "not configured".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub text_api_key: String,
    pub image_api_key: String,
    pub image_api_secret: String,
}

impl Credentials {
    /// Names of credentials that resolved to nothing, for a startup warning.
    pub fn missing(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        if self.text_api_key.is_empty() {
            out.push("OPENAIKEY");
        }
        if self.image_api_key.is_empty() {
            out.push("IMGAIKEY");
        }
        if self.image_api_secret.is_empty() {
            out.push("IMGAISECRET");
        }
        out
    }
}

/// Non-empty trimmed env value.
fn env_value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|s| {
        let t = s.trim();
        if t.is_empty() {
            None
        } else {
            Some(t.to_string())
        }
    })
}

fn config_value(v: Option<&String>) -> Option<String> {
    v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty())
}

/// Resolve backend credentials: env OPENAIKEY, IMGAIKEY, IMGAISECRET override config.
pub fn resolve_credentials(config: &Config) -> Credentials {
    Credentials {
        text_api_key: env_value("OPENAIKEY")
            .or_else(|| config_value(config.backends.text.api_key.as_ref()))
            .unwrap_or_default(),
        image_api_key: env_value("IMGAIKEY")
            .or_else(|| config_value(config.backends.image.api_key.as_ref()))
            .unwrap_or_default(),
        image_api_secret: env_value("IMGAISECRET")
            .or_else(|| config_value(config.backends.image.api_secret.as_ref()))
            .unwrap_or_default(),
    }
}

/// Resolve the bridge URL: env WHATGPT_BRIDGE_URL overrides config.
pub fn resolve_bridge_url(config: &Config) -> String {
    env_value("WHATGPT_BRIDGE_URL").unwrap_or_else(|| config.bridge.url.trim().to_string())
}

/// Resolve config path from env or default.
pub fn default_config_path() -> PathBuf {
    std::env::var("WHATGPT_CONFIG_PATH").map(PathBuf::from).unwrap_or_else(|_| {
        dirs::home_dir()
            .map(|h| h.join(".whatgpt").join("config.json"))
            .unwrap_or_else(|| PathBuf::from("config.json"))
    })
}

/// Load config from the given path, or the default path (or WHATGPT_CONFIG_PATH). Missing
/// file => default config.
/// Returns the config and the path that was used.
pub fn load_config(path: Option<PathBuf>) -> Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(default_config_path);
    let config = if !path.exists() {
        log::debug!("config file not found, using defaults: {}", path.display());
        Config::default()
    } else {
        let s = std::fs::read_to_string(&path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        serde_json::from_str(&s)
            .with_context(|| format!("parsing config from {}", path.display()))?
    };
    Ok((config, path))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn defaults_point_at_public_backends() {
        let c = Config::default();
        assert_eq!(c.backends.image.endpoint, DEFAULT_IMAGE_ENDPOINT);
        assert_eq!(c.backends.text.endpoint, DEFAULT_TEXT_ENDPOINT);
        assert_eq!(c.backends.text.model, "gpt-3.5-turbo");
        assert_eq!(c.bridge.url, DEFAULT_BRIDGE_URL);
        assert!(c.dispatch.max_concurrent_handlers.is_none());
    }

    #[test]
    fn empty_object_parses_to_defaults() {
        let c: Config = serde_json::from_str("{}").unwrap();
        assert_eq!(c.backends.text.model, DEFAULT_TEXT_MODEL);
        assert_eq!(c.bridge.client_id, "whatgpt");
    }

    #[test]
    fn camel_case_keys() {
        let c: Config = serde_json::from_str(
            r#"{
                "backends": {
                    "image": { "apiKey": "k", "apiSecret": "s" },
                    "text": { "model": "gpt-4o-mini" }
                },
                "bridge": { "url": "ws://bridge:9000/ws" },
                "dispatch": { "maxConcurrentHandlers": 8 }
            }"#,
        )
        .unwrap();
        assert_eq!(c.backends.image.api_key.as_deref(), Some("k"));
        assert_eq!(c.backends.image.api_secret.as_deref(), Some("s"));
        assert_eq!(c.backends.image.endpoint, DEFAULT_IMAGE_ENDPOINT);
        assert_eq!(c.backends.text.model, "gpt-4o-mini");
        assert_eq!(c.bridge.url, "ws://bridge:9000/ws");
        assert_eq!(c.dispatch.max_concurrent_handlers, Some(8));
    }

    #[test]
    fn missing_credentials_are_listed() {
        let creds = Credentials {
            text_api_key: "sk".to_string(),
            ..Default::default()
        };
        assert_eq!(creds.missing(), vec!["IMGAIKEY", "IMGAISECRET"]);
    }

    #[test]
    fn load_config_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("absent.json");
        let (c, used) = load_config(Some(path.clone())).unwrap();
        assert_eq!(used, path);
        assert_eq!(c.bridge.url, DEFAULT_BRIDGE_URL);
    }

    #[test]
    fn load_config_reports_parse_errors() {
        let mut f = tempfile::NamedTempFile::new().unwrap();
        f.write_all(b"{ not json").unwrap();
        let err = load_config(Some(f.path().to_path_buf())).unwrap_err();
        assert!(err.to_string().contains("parsing config"));
    }
}
