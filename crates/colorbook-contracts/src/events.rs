use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use chrono::{SecondsFormat, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// Book lifecycle events, one JSON line each.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BookEvent {
    BookStarted {
        book_id: String,
        theme: String,
        child_name: String,
        page_count: usize,
    },
    PageGenerating {
        book_id: String,
        page_id: String,
        slot: usize,
        prompt: String,
    },
    PageReady {
        book_id: String,
        page_id: String,
        width: u32,
        height: u32,
        bytes: usize,
    },
    PageFailed {
        book_id: String,
        page_id: String,
        error: String,
    },
    StaleResultDiscarded {
        book_id: String,
        page_id: String,
    },
    BookExported {
        book_id: String,
        file_name: String,
        page_count: usize,
    },
}

/// Append-only writer for `events.jsonl`.
///
/// Every line carries `type`, `session_id` and `ts`; event fields are
/// merged after the defaults.
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    session_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, session_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                session_id: session_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn session_id(&self) -> &str {
        &self.inner.session_id
    }

    pub fn emit(&self, event: &BookEvent) -> anyhow::Result<Value> {
        let fields = match serde_json::to_value(event)? {
            Value::Object(fields) => fields,
            other => anyhow::bail!("event did not serialize to an object: {other}"),
        };

        let mut line_payload = Map::new();
        line_payload.insert(
            "session_id".to_string(),
            Value::String(self.inner.session_id.clone()),
        );
        line_payload.insert("ts".to_string(), Value::String(now_utc_iso()));
        for (key, value) in fields {
            line_payload.insert(key, value);
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&line_payload)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(line_payload))
    }
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}
