use std::env;

use tracing::warn;

/// Runtime settings, resolved once from the environment at startup.
#[derive(Debug, Clone)]
pub struct Settings {
    pub port: u16,
    /// Captioning model inference endpoint. Empty means no model; the
    /// gateway still serves requests using fallback captions.
    pub model_endpoint: String,
    pub model_api_key: Option<String>,
    /// Tone-LLM provider. The LLM path is only taken when a key is present
    /// and `use_llm_for_tone` is set.
    pub llm_endpoint: String,
    pub llm_model: String,
    pub llm_api_key: Option<String>,
    pub llm_timeout_secs: u64,
    pub use_llm_for_tone: bool,
    pub cache_capacity: u64,
    pub cache_ttl_secs: u64,
    pub max_image_dim: u32,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: 8000,
            model_endpoint: "http://localhost:3001/caption".to_string(),
            model_api_key: None,
            llm_endpoint: "https://api.openai.com/v1/chat/completions".to_string(),
            llm_model: "gpt-3.5-turbo".to_string(),
            llm_api_key: None,
            llm_timeout_secs: 10,
            use_llm_for_tone: false,
            cache_capacity: 10_000,
            cache_ttl_secs: 3600,
            max_image_dim: 1024,
            max_upload_bytes: 10 * 1024 * 1024,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            port: env_parse("PORT", defaults.port),
            model_endpoint: env_string("MODEL_ENDPOINT")
                .unwrap_or(defaults.model_endpoint),
            model_api_key: env_string("MODEL_API_KEY"),
            llm_endpoint: env_string("LLM_ENDPOINT").unwrap_or(defaults.llm_endpoint),
            llm_model: env_string("LLM_MODEL").unwrap_or(defaults.llm_model),
            llm_api_key: env_string("OPENAI_API_KEY"),
            llm_timeout_secs: env_parse("LLM_TIMEOUT_SECS", defaults.llm_timeout_secs),
            use_llm_for_tone: env_bool("USE_LLM_FOR_TONE", defaults.use_llm_for_tone),
            cache_capacity: env_parse("CACHE_CAPACITY", defaults.cache_capacity),
            cache_ttl_secs: env_parse("CACHE_TTL_SECS", defaults.cache_ttl_secs),
            max_image_dim: env_parse("MAX_IMAGE_DIM", defaults.max_image_dim),
            max_upload_bytes: env_parse("MAX_UPLOAD_BYTES", defaults.max_upload_bytes),
        }
    }
}

fn env_string(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<T>().ok())
        .unwrap_or(default)
}

/// Flags accept the usual spellings (`1`/`0`, `yes`/`no`, `true`/`false`);
/// anything else keeps the default, loudly.
fn env_bool(key: &str, default: bool) -> bool {
    match env::var(key) {
        Ok(value) => parse_bool(&value).unwrap_or_else(|| {
            warn!("unrecognized value {value:?} for {key}, keeping default {default}");
            default
        }),
        Err(_) => default,
    }
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
