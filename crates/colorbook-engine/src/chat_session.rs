use colorbook_contracts::chat::ChatMessage;
use colorbook_contracts::error::{
    ChatError, PersistenceError, RemoteGenerationError, ValidationError,
};
use colorbook_contracts::storage::KeyValueStore;
use serde_json::Value;

use crate::text::ChatClient;
use crate::transport::error_chain_text;

pub const CHAT_HISTORY_KEY: &str = "colorbook.chat_history";

/// Conversation history that survives restarts. Storage problems are logged
/// and the session carries on with whatever is in memory.
pub struct ChatSessionStore {
    store: KeyValueStore,
    messages: Vec<ChatMessage>,
}

impl ChatSessionStore {
    pub fn load(mut store: KeyValueStore) -> Self {
        let messages = match store.get(CHAT_HISTORY_KEY) {
            None => Vec::new(),
            Some(raw) => decode_history(raw).unwrap_or_else(|err| {
                tracing::warn!(
                    path = %store.path().display(),
                    error = %err,
                    "ignoring unreadable chat history"
                );
                Vec::new()
            }),
        };
        Self { store, messages }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn append(&mut self, message: ChatMessage) {
        self.messages.push(message);
        self.persist();
    }

    pub fn clear(&mut self) {
        self.messages.clear();
        self.persist();
    }

    /// Records the user's message, asks the client for a reply and records
    /// that too. On failure the user's message stays in the history.
    pub fn send_turn(
        &mut self,
        client: &ChatClient,
        text: &str,
    ) -> Result<&ChatMessage, ChatError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(ValidationError::EmptyMessage.into());
        }
        let prior = self.messages.clone();
        self.append(ChatMessage::user(text));

        let reply = client
            .converse(&prior, text)
            .map_err(|err| RemoteGenerationError::new(error_chain_text(&err, 2048)))?;
        self.append(ChatMessage::assistant(reply));
        self.messages
            .last()
            .ok_or_else(|| RemoteGenerationError::new("chat history is empty").into())
    }

    fn persist(&mut self) {
        let outcome = if self.messages.is_empty() {
            self.store.remove(CHAT_HISTORY_KEY)
        } else {
            match serde_json::to_value(&self.messages) {
                Ok(value) => self.store.set(CHAT_HISTORY_KEY, value),
                Err(err) => Err(PersistenceError::Corrupt {
                    key: CHAT_HISTORY_KEY.to_string(),
                    message: err.to_string(),
                }),
            }
        };
        if let Err(err) = outcome {
            tracing::warn!(
                error = %err,
                "chat history not saved, keeping it for this session only"
            );
        }
    }
}

fn decode_history(raw: Value) -> Result<Vec<ChatMessage>, PersistenceError> {
    serde_json::from_value(raw).map_err(|err| PersistenceError::Corrupt {
        key: CHAT_HISTORY_KEY.to_string(),
        message: err.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use anyhow::bail;
    use colorbook_contracts::chat::ChatRole;
    use serde_json::json;

    use super::*;
    use crate::text::{ChatProvider, ChatRequest};

    struct CannedReply {
        reply: Option<&'static str>,
        history_sizes: Arc<Mutex<Vec<usize>>>,
    }

    impl ChatProvider for CannedReply {
        fn name(&self) -> &str {
            "canned"
        }

        fn converse(&self, request: &ChatRequest) -> anyhow::Result<String> {
            if let Ok(mut sizes) = self.history_sizes.lock() {
                sizes.push(request.history.len());
            }
            match self.reply {
                Some(reply) => Ok(reply.to_string()),
                None => bail!("network down"),
            }
        }
    }

    fn client(reply: Option<&'static str>) -> ChatClient {
        ChatClient::with_provider(
            CannedReply {
                reply,
                history_sizes: Arc::default(),
            },
            Duration::from_secs(5),
        )
    }

    #[test]
    fn hello_turn_is_persisted_and_reloaded() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("storage.json");
        let mut session = ChatSessionStore::load(KeyValueStore::new(&path));
        assert!(session.messages().is_empty());

        let reply = session.send_turn(&client(Some("Hi there!")), "hello")?;
        assert_eq!(reply, &ChatMessage::assistant("Hi there!"));
        assert_eq!(
            session.messages(),
            &[ChatMessage::user("hello"), ChatMessage::assistant("Hi there!")]
        );

        let reloaded = ChatSessionStore::load(KeyValueStore::new(&path));
        assert_eq!(reloaded.messages(), session.messages());
        Ok(())
    }

    #[test]
    fn history_sent_to_client_excludes_the_new_message() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let history_sizes = Arc::new(Mutex::new(Vec::new()));
        let chat = ChatClient::with_provider(
            CannedReply {
                reply: Some("ok"),
                history_sizes: Arc::clone(&history_sizes),
            },
            Duration::from_secs(5),
        );
        let mut session = ChatSessionStore::load(KeyValueStore::new(dir.path().join("s.json")));
        session.append(ChatMessage::user("first"));
        session.append(ChatMessage::assistant("reply"));

        session.send_turn(&chat, "second")?;
        assert_eq!(session.messages().len(), 4);
        let seen = history_sizes
            .lock()
            .map(|sizes| sizes.clone())
            .unwrap_or_default();
        assert_eq!(seen, vec![2]);
        Ok(())
    }

    #[test]
    fn failed_turn_keeps_user_message() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("storage.json");
        let mut session = ChatSessionStore::load(KeyValueStore::new(&path));
        match session.send_turn(&client(None), "are you there?") {
            Err(ChatError::Remote(err)) => {
                assert_eq!(err.message, "Failed to get chat response: network down");
            }
            other => bail!("expected a remote error, got {other:?}"),
        }
        assert_eq!(session.messages(), &[ChatMessage::user("are you there?")]);
        assert_eq!(
            ChatSessionStore::load(KeyValueStore::new(&path)).messages().len(),
            1
        );
        Ok(())
    }

    #[test]
    fn empty_message_is_rejected_without_appending() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let mut session = ChatSessionStore::load(KeyValueStore::new(dir.path().join("s.json")));
        assert_eq!(
            session.send_turn(&client(Some("hi")), "   ").err(),
            Some(ChatError::Validation(ValidationError::EmptyMessage))
        );
        assert!(session.messages().is_empty());
        Ok(())
    }

    #[test]
    fn clearing_removes_the_record() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("storage.json");
        let mut other = KeyValueStore::new(&path);
        other.set("colorbook.theme", json!("dark"))?;

        let mut session = ChatSessionStore::load(KeyValueStore::new(&path));
        session.append(ChatMessage::user("hi"));
        assert!(KeyValueStore::new(&path).contains(CHAT_HISTORY_KEY));

        session.clear();
        let mut reread = KeyValueStore::new(&path);
        assert!(!reread.contains(CHAT_HISTORY_KEY));
        assert_eq!(reread.get("colorbook.theme"), Some(json!("dark")));
        Ok(())
    }

    #[test]
    fn legacy_model_role_and_corrupt_records_load() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("storage.json");
        let mut raw = KeyValueStore::new(&path);
        raw.set(
            CHAT_HISTORY_KEY,
            json!([{ "role": "user", "content": "hi" }, { "role": "model", "content": "hello!" }]),
        )?;
        let session = ChatSessionStore::load(KeyValueStore::new(&path));
        assert_eq!(session.messages()[1].role, ChatRole::Assistant);

        raw.set(CHAT_HISTORY_KEY, json!({ "not": "a list" }))?;
        let session = ChatSessionStore::load(KeyValueStore::new(&path));
        assert!(session.messages().is_empty());
        Ok(())
    }
}
