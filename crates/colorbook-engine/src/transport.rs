use std::thread;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use reqwest::blocking::{Client as HttpClient, Response as HttpResponse};
use serde_json::Value;

use crate::config::EngineConfig;

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Blocking JSON POST with a per-request timeout and linear backoff on
/// connect/timeout failures.
#[derive(Debug, Clone)]
pub(crate) struct JsonTransport {
    http: HttpClient,
    timeout: Duration,
    max_retries: usize,
    retry_backoff: Duration,
}

impl JsonTransport {
    pub(crate) fn new(config: &EngineConfig) -> Self {
        Self {
            http: HttpClient::new(),
            timeout: config.request_timeout,
            max_retries: config.transport_retries,
            retry_backoff: config.retry_backoff,
        }
    }

    pub(crate) fn post_json(
        &self,
        provider: &str,
        endpoint: &str,
        api_key: &str,
        payload: &Value,
        timeout: Option<Duration>,
    ) -> Result<Value> {
        let timeout = timeout.unwrap_or(self.timeout);
        for attempt in 0..=self.max_retries {
            tracing::debug!(provider, endpoint, attempt, "posting request");
            let response = self
                .http
                .post(endpoint)
                .header(API_KEY_HEADER, api_key)
                .timeout(timeout)
                .json(payload)
                .send();

            match response {
                Ok(ok) => return response_json_or_error(provider, ok),
                Err(raw) => {
                    let err = anyhow::Error::new(raw.without_url())
                        .context(format!("{provider} request failed ({endpoint})"));
                    if !is_retryable_transport_error(&err) || attempt >= self.max_retries {
                        return Err(err);
                    }
                    tracing::warn!(
                        provider,
                        attempt = attempt + 1,
                        max_retries = self.max_retries,
                        "transient transport failure, retrying"
                    );
                    thread::sleep(self.retry_backoff.mul_f64(attempt as f64 + 1.0));
                }
            }
        }

        bail!("{provider} request was never attempted")
    }
}

fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

fn is_retryable_transport_error(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<reqwest::Error>()
            .map(|reqwest_err| reqwest_err.is_timeout() || reqwest_err.is_connect())
            .unwrap_or(false)
    })
}

/// Flattens an error chain into one line for display to the user.
pub fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(": "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use anyhow::anyhow;
    use serde_json::json;

    use super::{error_chain_text, truncate_text, JsonTransport};
    use crate::config::EngineConfig;

    #[test]
    fn error_chain_text_joins_causes_outermost_first() {
        let err = anyhow!("quota exceeded")
            .context("Imagen request failed (429)")
            .context("Failed to generate image");
        assert_eq!(
            error_chain_text(&err, 2048),
            "Failed to generate image: Imagen request failed (429): quota exceeded"
        );
    }

    #[test]
    fn error_chain_text_skips_repeated_messages() {
        let err = anyhow!("offline").context("offline");
        assert_eq!(error_chain_text(&err, 2048), "offline");
    }

    #[test]
    fn truncate_text_marks_cut() {
        assert_eq!(truncate_text("abcdef", 3), "abc…");
        assert_eq!(truncate_text("abc", 3), "abc");
    }

    #[test]
    fn connect_failure_text_never_carries_the_api_key() {
        let config = EngineConfig {
            transport_retries: 0,
            request_timeout: Duration::from_secs(5),
            ..EngineConfig::default()
        };
        let transport = JsonTransport::new(&config);
        let result = transport.post_json(
            "Imagen",
            "http://127.0.0.1:1/v1beta/models/imagen-4.0-generate-001:predict",
            "SECRETKEY123",
            &json!({ "instances": [] }),
            None,
        );
        let Err(err) = result else {
            panic!("request to a closed port unexpectedly succeeded");
        };
        let text = error_chain_text(&err, 2048);
        assert!(text.starts_with("Imagen request failed"), "{text}");
        assert!(!text.contains("SECRETKEY123"), "{text}");
    }
}
