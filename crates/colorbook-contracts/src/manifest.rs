use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::book::{Book, PageStatus};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PageEntry {
    pub page_id: String,
    pub slot: usize,
    pub prompt: String,
    pub status: PageStatus,
    pub image_file: Option<String>,
    pub error: Option<String>,
}

/// `book.json`, a snapshot of one book for whoever opens the output folder.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BookManifest {
    pub book_id: String,
    pub theme: String,
    pub child_name: String,
    pub created_at: String,
    pub pages: Vec<PageEntry>,
    pub document: Option<String>,
}

impl BookManifest {
    /// `image_file` names the file a ready page was saved under, if any.
    pub fn from_book(book: &Book, image_file: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            book_id: book.id().to_string(),
            theme: book.theme().to_string(),
            child_name: book.child_name().to_string(),
            created_at: book.created_at().to_string(),
            pages: book
                .pages()
                .iter()
                .map(|page| PageEntry {
                    page_id: page.id().to_string(),
                    slot: page.slot(),
                    prompt: page.prompt().to_string(),
                    status: page.status(),
                    image_file: if page.status() == PageStatus::Ready {
                        image_file(page.id().as_str())
                    } else {
                        None
                    },
                    error: page.error_message().map(str::to_string),
                })
                .collect(),
            document: None,
        }
    }
}

pub fn write_manifest(path: &Path, manifest: &BookManifest) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(manifest)? {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    payload.insert("updated_at".to_string(), Value::String(now_utc_iso()));

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Value};

    use super::{write_manifest, BookManifest};
    use crate::book::{Book, PageId, PageImage};

    #[test]
    fn write_manifest_records_page_states() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("book.json");

        let mut book = Book::create("jungle", "Noah", 2)?;
        if let Some(page) = book.page_mut(&PageId::for_slot(0)) {
            page.mark_ready(PageImage {
                bytes: vec![0],
                mime_type: "image/png".to_string(),
                width: 1,
                height: 1,
            });
        }
        if let Some(page) = book.page_mut(&PageId::for_slot(1)) {
            page.mark_failed("Failed to generate image: timeout");
        }
        let mut manifest = BookManifest::from_book(&book, |id| Some(format!("{id}.png")));
        manifest.document = Some("Noah-jungle-coloring-book.pdf".to_string());
        write_manifest(&path, &manifest)?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["theme"], json!("jungle"));
        assert_eq!(parsed["pages"][0]["status"], json!("ready"));
        assert_eq!(parsed["pages"][0]["image_file"], json!("page-1.png"));
        assert_eq!(parsed["pages"][1]["status"], json!("failed"));
        assert_eq!(parsed["pages"][1]["image_file"], Value::Null);
        assert_eq!(
            parsed["pages"][1]["error"],
            json!("Failed to generate image: timeout")
        );
        assert!(parsed.get("updated_at").and_then(Value::as_str).is_some());
        Ok(())
    }
}
