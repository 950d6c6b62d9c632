use std::fmt;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ValidationError;
use crate::prompts::{build_prompts, validate_book_request};

/// Identity of one generate-submit. A new id is minted for every book so
/// results that belong to a replaced book can be recognized.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BookId(String);

impl BookId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for BookId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BookId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PageId(String);

impl PageId {
    pub fn for_slot(slot: usize) -> Self {
        Self(format!("page-{}", slot + 1))
    }

    /// Accepts either a full id (`page-3`) or a one-based slot number (`3`).
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim().to_ascii_lowercase();
        let number = trimmed.strip_prefix("page-").unwrap_or(&trimmed);
        let slot_number = number.parse::<usize>().ok().filter(|value| *value > 0)?;
        Some(Self::for_slot(slot_number - 1))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PageStatus {
    Pending,
    Generating,
    Ready,
    Failed,
}

impl PageStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Generating => "generating",
            Self::Ready => "ready",
            Self::Failed => "failed",
        }
    }
}

/// Encoded image payload as returned by the image provider.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
    pub width: u32,
    pub height: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum PageState {
    Pending,
    Generating,
    Ready(PageImage),
    Failed(String),
}

/// One coloring page. The image and the error message live inside the
/// status, so a page can never hold both or hold one in the wrong state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    id: PageId,
    slot: usize,
    prompt: String,
    state: PageState,
}

impl Page {
    pub fn new(slot: usize, prompt: impl Into<String>) -> Self {
        Self {
            id: PageId::for_slot(slot),
            slot,
            prompt: prompt.into(),
            state: PageState::Pending,
        }
    }

    pub fn id(&self) -> &PageId {
        &self.id
    }

    pub fn slot(&self) -> usize {
        self.slot
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }

    pub fn status(&self) -> PageStatus {
        match self.state {
            PageState::Pending => PageStatus::Pending,
            PageState::Generating => PageStatus::Generating,
            PageState::Ready(_) => PageStatus::Ready,
            PageState::Failed(_) => PageStatus::Failed,
        }
    }

    pub fn image(&self) -> Option<&PageImage> {
        match &self.state {
            PageState::Ready(image) => Some(image),
            _ => None,
        }
    }

    pub fn error_message(&self) -> Option<&str> {
        match &self.state {
            PageState::Failed(message) => Some(message.as_str()),
            _ => None,
        }
    }

    pub fn mark_generating(&mut self) {
        self.state = PageState::Generating;
    }

    pub fn mark_ready(&mut self, image: PageImage) {
        self.state = PageState::Ready(image);
    }

    pub fn mark_failed(&mut self, message: impl Into<String>) {
        self.state = PageState::Failed(message.into());
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BookProgress {
    pub pending: usize,
    pub generating: usize,
    pub ready: usize,
    pub failed: usize,
}

impl BookProgress {
    pub fn total(&self) -> usize {
        self.pending + self.generating + self.ready + self.failed
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Book {
    id: BookId,
    theme: String,
    child_name: String,
    created_at: String,
    pages: Vec<Page>,
}

impl Book {
    /// Validates the request and lays out one pending page per slot.
    pub fn create(
        theme: &str,
        child_name: &str,
        page_count: usize,
    ) -> Result<Self, ValidationError> {
        validate_book_request(theme, child_name, page_count)?;
        let theme = theme.trim();
        let child_name = child_name.trim();
        let pages = build_prompts(child_name, theme, page_count)
            .into_iter()
            .enumerate()
            .map(|(slot, prompt)| Page::new(slot, prompt))
            .collect();
        Ok(Self {
            id: BookId::new(),
            theme: theme.to_string(),
            child_name: child_name.to_string(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false),
            pages,
        })
    }

    pub fn id(&self) -> &BookId {
        &self.id
    }

    pub fn theme(&self) -> &str {
        &self.theme
    }

    pub fn child_name(&self) -> &str {
        &self.child_name
    }

    pub fn created_at(&self) -> &str {
        &self.created_at
    }

    pub fn pages(&self) -> &[Page] {
        &self.pages
    }

    pub fn page(&self, id: &PageId) -> Option<&Page> {
        self.pages.iter().find(|page| page.id() == id)
    }

    pub fn page_mut(&mut self, id: &PageId) -> Option<&mut Page> {
        self.pages.iter_mut().find(|page| page.id() == id)
    }

    pub fn is_complete(&self) -> bool {
        !self.pages.is_empty() && self.pages.iter().all(|page| page.status() == PageStatus::Ready)
    }

    pub fn not_ready(&self) -> Vec<(String, PageStatus)> {
        self.pages
            .iter()
            .filter(|page| page.status() != PageStatus::Ready)
            .map(|page| (page.id().to_string(), page.status()))
            .collect()
    }

    pub fn progress(&self) -> BookProgress {
        let mut progress = BookProgress::default();
        for page in &self.pages {
            match page.status() {
                PageStatus::Pending => progress.pending += 1,
                PageStatus::Generating => progress.generating += 1,
                PageStatus::Ready => progress.ready += 1,
                PageStatus::Failed => progress.failed += 1,
            }
        }
        progress
    }
}
