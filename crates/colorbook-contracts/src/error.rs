use std::path::PathBuf;

use thiserror::Error;

use crate::book::PageStatus;

/// Bad user input, caught before any remote call is made.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("Please provide both a theme and a child's name.")]
    MissingBookInput,
    #[error("page count must be between 1 and {max} (got {requested})")]
    PageCount { requested: usize, max: usize },
    #[error("Please type a message first.")]
    EmptyMessage,
}

/// An image or chat provider call that did not produce a usable result.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct RemoteGenerationError {
    pub message: String,
}

impl RemoteGenerationError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Cannot export yet: {}", describe_not_ready(.not_ready))]
    Incomplete { not_ready: Vec<(String, PageStatus)> },
    #[error("Failed to create PDF: image for {page_id} could not be decoded: {message}")]
    ImageDecode { page_id: String, message: String },
    #[error("Failed to create PDF: {0}")]
    Encode(String),
    #[error("Failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

fn describe_not_ready(pages: &[(String, PageStatus)]) -> String {
    if pages.is_empty() {
        return "no pages have been generated".to_string();
    }
    pages
        .iter()
        .map(|(id, status)| format!("{id} is {}", status.as_str()))
        .collect::<Vec<String>>()
        .join(", ")
}

#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("stored record '{key}' is not valid: {message}")]
    Corrupt { key: String, message: String },
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error("no coloring book has been started")]
    NoActiveBook,
    #[error("unknown page '{0}'")]
    UnknownPage(String),
    #[error("{0} is still generating")]
    PageInFlight(String),
    #[error("{page_id} cannot be retried while {}", .status.as_str())]
    NotRetryable { page_id: String, status: PageStatus },
}

/// Why a chat turn produced no reply.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChatError {
    #[error(transparent)]
    Validation(#[from] ValidationError),
    #[error(transparent)]
    Remote(#[from] RemoteGenerationError),
}
