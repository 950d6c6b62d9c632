use std::collections::BTreeMap;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use colorbook_contracts::chat::{ChatMessage, ChatRole};
use colorbook_contracts::models::{ModelSelector, ModelSpec, TEXT_CAPABILITY};
use serde_json::{json, Value};

use crate::config::EngineConfig;
use crate::transport::JsonTransport;

pub const CHILD_PERSONA: &str = "You are a friendly, helpful, and imaginative assistant \
    designed to chat with children. Keep your responses positive, encouraging, and easy to \
    understand. Avoid complex topics and always prioritize safety and appropriateness for \
    young audiences. Use simple language and fun imagery.";

const EMPTY_REPLY: &str = "No text response received from the chatbot.";

#[derive(Debug, Clone, PartialEq)]
pub struct ChatRequest {
    pub history: Vec<ChatMessage>,
    pub message: String,
    pub system_instruction: String,
    pub model: String,
    pub timeout: Duration,
}

pub trait ChatProvider: Send + Sync {
    fn name(&self) -> &str;
    fn converse(&self, request: &ChatRequest) -> Result<String>;
}

/// The chat collaborator: history plus one new message in, reply text out.
pub struct ChatClient {
    providers: BTreeMap<String, Box<dyn ChatProvider>>,
    model: ModelSpec,
    fallback_reason: Option<String>,
    timeout: Duration,
}

impl ChatClient {
    pub fn from_config(config: &EngineConfig) -> Result<Self> {
        let selection = ModelSelector::new(None)
            .select(config.text_model.as_deref(), TEXT_CAPABILITY)
            .map_err(anyhow::Error::msg)?;
        let mut providers: BTreeMap<String, Box<dyn ChatProvider>> = BTreeMap::new();
        providers.insert("dryrun".to_string(), Box::new(DryrunChatProvider));
        providers.insert(
            "gemini".to_string(),
            Box::new(GeminiChatProvider::new(config)),
        );
        Ok(Self {
            providers,
            model: selection.model,
            fallback_reason: selection.fallback_reason,
            timeout: config.request_timeout,
        })
    }

    pub fn with_provider<P: ChatProvider + 'static>(provider: P, timeout: Duration) -> Self {
        let model = ModelSpec::new(
            &format!("{}-text", provider.name()),
            provider.name(),
            &[TEXT_CAPABILITY],
        );
        let mut providers: BTreeMap<String, Box<dyn ChatProvider>> = BTreeMap::new();
        providers.insert(provider.name().to_string(), Box::new(provider));
        Self {
            providers,
            model,
            fallback_reason: None,
            timeout,
        }
    }

    pub fn model(&self) -> &ModelSpec {
        &self.model
    }

    pub fn fallback_reason(&self) -> Option<&str> {
        self.fallback_reason.as_deref()
    }

    pub fn converse(&self, history: &[ChatMessage], message: &str) -> Result<String> {
        let Some(provider) = self.providers.get(&self.model.provider) else {
            bail!("chat provider '{}' not registered", self.model.provider);
        };
        let request = ChatRequest {
            history: history.to_vec(),
            message: message.to_string(),
            system_instruction: CHILD_PERSONA.to_string(),
            model: self.model.name.clone(),
            timeout: self.timeout,
        };
        let reply = provider
            .converse(&request)
            .context("Failed to get chat response")?;
        if reply.trim().is_empty() {
            bail!("Failed to get chat response: {EMPTY_REPLY}");
        }
        Ok(reply)
    }
}

/// Offline provider, replies deterministically from the message text.
pub struct DryrunChatProvider;

impl ChatProvider for DryrunChatProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    fn converse(&self, request: &ChatRequest) -> Result<String> {
        Ok(format!(
            "You said \"{}\". That sounds fun! (message {})",
            request.message.trim(),
            request.history.len() + 1
        ))
    }
}

pub struct GeminiChatProvider {
    api_base: String,
    api_key: Option<String>,
    transport: JsonTransport,
}

impl GeminiChatProvider {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            api_base: config.api_base.clone(),
            api_key: config.api_key.clone(),
            transport: JsonTransport::new(config),
        }
    }

    fn build_payload(request: &ChatRequest) -> Value {
        let mut contents: Vec<Value> = request
            .history
            .iter()
            .map(|message| {
                let role = match message.role {
                    ChatRole::User => "user",
                    ChatRole::Assistant => "model",
                };
                json!({ "role": role, "parts": [{ "text": message.content }] })
            })
            .collect();
        contents.push(json!({ "role": "user", "parts": [{ "text": request.message }] }));
        json!({
            "contents": contents,
            "systemInstruction": { "parts": [{ "text": request.system_instruction }] },
            "generationConfig": {
                "temperature": 0.7,
                "topP": 0.95,
                "topK": 64,
            },
        })
    }

    fn extract_text(response_payload: &Value) -> String {
        let mut out = String::new();
        let candidates = response_payload
            .get("candidates")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        if let Some(candidate) = candidates.first() {
            let parts = candidate
                .pointer("/content/parts")
                .and_then(Value::as_array)
                .cloned()
                .unwrap_or_default();
            for part in parts {
                if let Some(text) = part.get("text").and_then(Value::as_str) {
                    out.push_str(text);
                }
            }
        }
        out
    }
}

impl ChatProvider for GeminiChatProvider {
    fn name(&self) -> &str {
        "gemini"
    }

    fn converse(&self, request: &ChatRequest) -> Result<String> {
        let Some(api_key) = self.api_key.as_deref() else {
            bail!("GEMINI_API_KEY or GOOGLE_API_KEY not set");
        };
        let endpoint = format!(
            "{}/models/{}:generateContent",
            self.api_base,
            request.model.trim().trim_start_matches("models/")
        );
        let payload = Self::build_payload(request);
        let response = self.transport.post_json(
            "Gemini",
            &endpoint,
            api_key,
            &payload,
            Some(request.timeout),
        )?;
        let text = Self::extract_text(&response);
        if text.trim().is_empty() {
            bail!(EMPTY_REPLY);
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;

    struct CannedProvider(&'static str);

    impl ChatProvider for CannedProvider {
        fn name(&self) -> &str {
            "canned"
        }

        fn converse(&self, _request: &ChatRequest) -> Result<String> {
            if self.0 == "fail" {
                bail!("service unavailable");
            }
            Ok(self.0.to_string())
        }
    }

    fn sample_request() -> ChatRequest {
        ChatRequest {
            history: vec![
                ChatMessage::user("hi"),
                ChatMessage::assistant("Hello friend!"),
            ],
            message: "tell me a joke".to_string(),
            system_instruction: CHILD_PERSONA.to_string(),
            model: "gemini-2.5-flash".to_string(),
            timeout: Duration::from_secs(5),
        }
    }

    #[test]
    fn payload_maps_history_roles_and_appends_message_once() {
        let payload = GeminiChatProvider::build_payload(&sample_request());
        let contents = payload["contents"].as_array().cloned().unwrap_or_default();
        assert_eq!(contents.len(), 3);
        assert_eq!(contents[0]["role"], json!("user"));
        assert_eq!(contents[1]["role"], json!("model"));
        assert_eq!(contents[2]["parts"][0]["text"], json!("tell me a joke"));
        assert_eq!(payload["generationConfig"]["topK"], json!(64));
        assert_eq!(
            payload["systemInstruction"]["parts"][0]["text"],
            json!(CHILD_PERSONA)
        );
    }

    #[test]
    fn extract_text_joins_first_candidate_parts() {
        let payload = json!({
            "candidates": [
                { "content": { "parts": [{ "text": "Why did " }, { "text": "the cow cross?" }] } },
                { "content": { "parts": [{ "text": "ignored" }] } }
            ]
        });
        assert_eq!(
            GeminiChatProvider::extract_text(&payload),
            "Why did the cow cross?"
        );
        assert_eq!(GeminiChatProvider::extract_text(&json!({})), "");
    }

    #[test]
    fn client_wraps_failures_and_empty_replies() {
        let failing = ChatClient::with_provider(CannedProvider("fail"), Duration::from_secs(5));
        let err = failing
            .converse(&[], "hello")
            .err()
            .map(|err| format!("{err:#}"));
        assert_eq!(
            err.as_deref(),
            Some("Failed to get chat response: service unavailable")
        );

        let silent = ChatClient::with_provider(CannedProvider("   "), Duration::from_secs(5));
        let err = silent.converse(&[], "hello").err().map(|err| err.to_string());
        assert_eq!(
            err.as_deref(),
            Some("Failed to get chat response: No text response received from the chatbot.")
        );
    }

    #[test]
    fn dryrun_text_model_is_selectable() -> anyhow::Result<()> {
        let config = EngineConfig {
            text_model: Some("dryrun-text-1".to_string()),
            ..EngineConfig::default()
        };
        let client = ChatClient::from_config(&config)?;
        assert_eq!(client.model().provider, "dryrun");
        let reply = client.converse(&[], "hello")?;
        assert!(reply.contains("hello"));
        Ok(())
    }
}
