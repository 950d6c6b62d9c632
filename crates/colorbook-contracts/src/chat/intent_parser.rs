use std::collections::BTreeMap;

use serde_json::Value;

use super::command_registry::{CommandSpec, NEW_BOOK_COMMAND, NO_ARG_COMMANDS, RETRY_COMMAND};

#[derive(Debug, Clone, PartialEq)]
pub struct Intent {
    pub action: String,
    pub raw: String,
    pub message: Option<String>,
    pub command_args: BTreeMap<String, Value>,
}

impl Intent {
    fn new(action: &str, raw: &str) -> Self {
        Self {
            action: action.to_string(),
            raw: raw.to_string(),
            message: None,
            command_args: BTreeMap::new(),
        }
    }
}

fn find_action(command: &str, specs: &[CommandSpec]) -> Option<&'static str> {
    specs
        .iter()
        .find(|spec| spec.command == command)
        .map(|spec| spec.action)
}

fn split_args(arg: &str) -> Vec<String> {
    if arg.trim().is_empty() {
        return Vec::new();
    }
    match shell_words::split(arg) {
        Ok(parts) => parts
            .into_iter()
            .filter(|value| !value.is_empty())
            .collect(),
        Err(_) => arg
            .split_whitespace()
            .map(str::to_string)
            .filter(|value| !value.is_empty())
            .collect(),
    }
}

fn parse_new_book_args(intent: &mut Intent, arg: &str) {
    let parts = split_args(arg);
    if let Some(theme) = parts.first() {
        intent
            .command_args
            .insert("theme".to_string(), Value::String(theme.clone()));
    }
    if let Some(name) = parts.get(1) {
        intent
            .command_args
            .insert("name".to_string(), Value::String(name.clone()));
    }
    if let Some(pages) = parts.get(2).and_then(|raw| raw.parse::<u64>().ok()) {
        intent
            .command_args
            .insert("pages".to_string(), Value::Number(pages.into()));
    }
}

/// Turns one line of interactive input into an action.
pub fn parse_intent(text: &str) -> Intent {
    let raw_trimmed = text.trim();
    if raw_trimmed.is_empty() {
        return Intent::new("noop", text);
    }

    if let Some(slash_tail) = raw_trimmed.strip_prefix('/') {
        let command_len = slash_tail
            .chars()
            .take_while(|ch| ch.is_ascii_alphanumeric() || *ch == '_')
            .count();
        if command_len > 0 {
            let command = slash_tail[..command_len].to_ascii_lowercase();
            let arg = slash_tail[command_len..].trim();

            if let Some(action) = find_action(&command, NO_ARG_COMMANDS) {
                return Intent::new(action, text);
            }

            if command == RETRY_COMMAND.command {
                let mut intent = Intent::new(RETRY_COMMAND.action, text);
                intent
                    .command_args
                    .insert("page".to_string(), Value::String(arg.to_string()));
                return intent;
            }

            if command == NEW_BOOK_COMMAND.command {
                let mut intent = Intent::new(NEW_BOOK_COMMAND.action, text);
                parse_new_book_args(&mut intent, arg);
                return intent;
            }

            let mut intent = Intent::new("unknown", text);
            intent
                .command_args
                .insert("command".to_string(), Value::String(command));
            intent
                .command_args
                .insert("arg".to_string(), Value::String(arg.to_string()));
            return intent;
        }
    }

    let mut intent = Intent::new("send", text);
    intent.message = Some(raw_trimmed.to_string());
    intent
}
