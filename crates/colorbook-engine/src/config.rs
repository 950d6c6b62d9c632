use std::env;
use std::time::Duration;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Transport and model settings shared by the image and chat clients.
#[derive(Debug, Clone, PartialEq)]
pub struct EngineConfig {
    pub api_base: String,
    pub api_key: Option<String>,
    pub image_model: Option<String>,
    pub text_model: Option<String>,
    pub request_timeout: Duration,
    pub transport_retries: usize,
    pub retry_backoff: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            api_base: DEFAULT_API_BASE.to_string(),
            api_key: None,
            image_model: None,
            text_model: None,
            request_timeout: Duration::from_secs(90),
            transport_retries: 2,
            retry_backoff: Duration::from_secs_f64(1.2),
        }
    }
}

impl EngineConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            api_base: non_empty_env("GEMINI_API_BASE")
                .map(|value| value.trim_end_matches('/').to_string())
                .unwrap_or(defaults.api_base),
            api_key: non_empty_env("GEMINI_API_KEY").or_else(|| non_empty_env("GOOGLE_API_KEY")),
            image_model: non_empty_env("COLORBOOK_IMAGE_MODEL"),
            text_model: non_empty_env("COLORBOOK_TEXT_MODEL"),
            request_timeout: Duration::from_secs_f64(env_f64(
                "COLORBOOK_REQUEST_TIMEOUT",
                defaults.request_timeout.as_secs_f64(),
                5.0,
                300.0,
            )),
            transport_retries: env_f64(
                "COLORBOOK_TRANSPORT_RETRIES",
                defaults.transport_retries as f64,
                0.0,
                4.0,
            )
            .round() as usize,
            retry_backoff: Duration::from_secs_f64(env_f64(
                "COLORBOOK_RETRY_BACKOFF",
                defaults.retry_backoff.as_secs_f64(),
                0.1,
                10.0,
            )),
        }
    }

    pub fn with_image_model(mut self, model: Option<String>) -> Self {
        if model.is_some() {
            self.image_model = model;
        }
        self
    }

    pub fn with_text_model(mut self, model: Option<String>) -> Self {
        if model.is_some() {
            self.text_model = model;
        }
        self
    }
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

fn env_f64(key: &str, default: f64, min: f64, max: f64) -> f64 {
    clamp_or_default(
        non_empty_env(key).and_then(|raw| raw.parse::<f64>().ok()),
        default,
        min,
        max,
    )
}

fn clamp_or_default(value: Option<f64>, default: f64, min: f64, max: f64) -> f64 {
    value
        .filter(|parsed| parsed.is_finite())
        .unwrap_or(default)
        .clamp(min, max)
}
