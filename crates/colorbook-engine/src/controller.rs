use anyhow::Result;
use colorbook_contracts::book::{Book, BookId, BookProgress, Page, PageId, PageStatus};
use colorbook_contracts::error::{AssemblyError, ControllerError, RemoteGenerationError};
use colorbook_contracts::events::{BookEvent, EventWriter};

use crate::assembler::{Document, DocumentAssembler};
use crate::images::{GeneratedImage, ImageClient};
use crate::transport::error_chain_text;

const ERROR_TEXT_LIMIT: usize = 2048;

/// Receives book lifecycle notifications. Every method defaults to a no-op.
pub trait BookObserver {
    fn book_started(&mut self, _book: &Book) {}
    fn page_changed(&mut self, _book: &Book, _page: &Page) {}
    fn stale_result(&mut self, _book_id: &BookId, _page_id: &PageId) {}
    fn book_exported(&mut self, _book: &Book, _document: &Document) {}
}

/// Writes every notification to the JSONL event log.
pub struct EventLogObserver {
    events: EventWriter,
}

impl EventLogObserver {
    pub fn new(events: EventWriter) -> Self {
        Self { events }
    }

    fn emit(&self, event: BookEvent) {
        if let Err(err) = self.events.emit(&event) {
            tracing::warn!(
                path = %self.events.path().display(),
                error = %err,
                "failed to append book event"
            );
        }
    }
}

impl BookObserver for EventLogObserver {
    fn book_started(&mut self, book: &Book) {
        self.emit(BookEvent::BookStarted {
            book_id: book.id().to_string(),
            theme: book.theme().to_string(),
            child_name: book.child_name().to_string(),
            page_count: book.pages().len(),
        });
    }

    fn page_changed(&mut self, book: &Book, page: &Page) {
        let book_id = book.id().to_string();
        let page_id = page.id().to_string();
        let event = match page.status() {
            PageStatus::Generating => BookEvent::PageGenerating {
                book_id,
                page_id,
                slot: page.slot(),
                prompt: page.prompt().to_string(),
            },
            PageStatus::Ready => {
                let (width, height, bytes) = page
                    .image()
                    .map(|image| (image.width, image.height, image.bytes.len()))
                    .unwrap_or_default();
                BookEvent::PageReady {
                    book_id,
                    page_id,
                    width,
                    height,
                    bytes,
                }
            }
            PageStatus::Failed => BookEvent::PageFailed {
                book_id,
                page_id,
                error: page.error_message().unwrap_or_default().to_string(),
            },
            PageStatus::Pending => return,
        };
        self.emit(event);
    }

    fn stale_result(&mut self, book_id: &BookId, page_id: &PageId) {
        self.emit(BookEvent::StaleResultDiscarded {
            book_id: book_id.to_string(),
            page_id: page_id.to_string(),
        });
    }

    fn book_exported(&mut self, book: &Book, document: &Document) {
        self.emit(BookEvent::BookExported {
            book_id: book.id().to_string(),
            file_name: document.file_name.clone(),
            page_count: document.page_count,
        });
    }
}

/// Proof that a page was moved to Generating for a particular book. The
/// result of the remote call is only applied while that book is current.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerationTicket {
    book_id: BookId,
    page_id: PageId,
    prompt: String,
}

impl GenerationTicket {
    pub fn book_id(&self) -> &BookId {
        &self.book_id
    }

    pub fn page_id(&self) -> &PageId {
        &self.page_id
    }

    pub fn prompt(&self) -> &str {
        &self.prompt
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Completion {
    Applied,
    Stale,
}

/// Owns the current book and drives each page through
/// `Pending -> Generating -> Ready | Failed`, with retries from Ready or
/// Failed. Starting a new book replaces the old one, and results still in
/// flight for the old book are discarded when they arrive.
#[derive(Default)]
pub struct PageController {
    book: Option<Book>,
    observers: Vec<Box<dyn BookObserver>>,
}

impl PageController {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_observer<O: BookObserver + 'static>(&mut self, observer: O) {
        self.observers.push(Box::new(observer));
    }

    pub fn book(&self) -> Option<&Book> {
        self.book.as_ref()
    }

    pub fn page(&self, page_id: &PageId) -> Option<&Page> {
        self.book.as_ref().and_then(|book| book.page(page_id))
    }

    pub fn is_complete(&self) -> bool {
        self.book.as_ref().map(Book::is_complete).unwrap_or(false)
    }

    pub fn progress(&self) -> BookProgress {
        self.book
            .as_ref()
            .map(Book::progress)
            .unwrap_or_default()
    }

    pub fn start_book(
        &mut self,
        theme: &str,
        child_name: &str,
        page_count: usize,
    ) -> Result<BookId, ControllerError> {
        let book = Book::create(theme, child_name, page_count)?;
        let book_id = book.id().clone();
        tracing::info!(
            book_id = %book_id,
            theme = book.theme(),
            pages = page_count,
            "starting coloring book"
        );
        for observer in &mut self.observers {
            observer.book_started(&book);
        }
        self.book = Some(book);
        Ok(book_id)
    }

    pub fn begin_generation(
        &mut self,
        page_id: &PageId,
    ) -> Result<GenerationTicket, ControllerError> {
        let book = self.book.as_mut().ok_or(ControllerError::NoActiveBook)?;
        let book_id = book.id().clone();
        let page = book
            .page_mut(page_id)
            .ok_or_else(|| ControllerError::UnknownPage(page_id.to_string()))?;
        if page.status() == PageStatus::Generating {
            return Err(ControllerError::PageInFlight(page_id.to_string()));
        }
        page.mark_generating();
        let ticket = GenerationTicket {
            book_id,
            page_id: page_id.clone(),
            prompt: page.prompt().to_string(),
        };
        self.notify_page(page_id);
        Ok(ticket)
    }

    pub fn complete_generation(
        &mut self,
        ticket: GenerationTicket,
        result: Result<GeneratedImage>,
    ) -> Completion {
        let current = self
            .book
            .as_mut()
            .filter(|book| book.id() == ticket.book_id());
        let Some(page) = current
            .and_then(|book| book.page_mut(ticket.page_id()))
            .filter(|page| page.status() == PageStatus::Generating)
        else {
            tracing::debug!(
                book_id = %ticket.book_id,
                page_id = %ticket.page_id,
                "discarding result for a book that is no longer current"
            );
            for observer in &mut self.observers {
                observer.stale_result(&ticket.book_id, &ticket.page_id);
            }
            return Completion::Stale;
        };

        match result {
            Ok(image) => {
                let image = image.into_page_image();
                tracing::info!(
                    page_id = %ticket.page_id,
                    width = image.width,
                    height = image.height,
                    "page ready"
                );
                page.mark_ready(image);
            }
            Err(err) => {
                let failure = RemoteGenerationError::new(error_chain_text(&err, ERROR_TEXT_LIMIT));
                tracing::warn!(page_id = %ticket.page_id, error = %failure, "page failed");
                page.mark_failed(failure.message);
            }
        }
        self.notify_page(&ticket.page_id);
        Completion::Applied
    }

    /// Marks the page Generating, calls the image client and applies the
    /// outcome. Returns the page's resulting status.
    pub fn generate_page(
        &mut self,
        client: &ImageClient,
        page_id: &PageId,
    ) -> Result<PageStatus, ControllerError> {
        let ticket = self.begin_generation(page_id)?;
        let result = client.generate(ticket.prompt());
        self.complete_generation(ticket, result);
        self.page(page_id)
            .map(Page::status)
            .ok_or_else(|| ControllerError::UnknownPage(page_id.to_string()))
    }

    /// Generates every Pending page one after another in slot order. A
    /// failed page does not stop the pages after it.
    pub fn run_book(&mut self, client: &ImageClient) -> Result<BookProgress, ControllerError> {
        let book = self.book.as_ref().ok_or(ControllerError::NoActiveBook)?;
        let pending: Vec<PageId> = book
            .pages()
            .iter()
            .filter(|page| page.status() == PageStatus::Pending)
            .map(|page| page.id().clone())
            .collect();
        for page_id in pending {
            self.generate_page(client, &page_id)?;
        }
        Ok(self.progress())
    }

    pub fn retry_page(
        &mut self,
        client: &ImageClient,
        page_id: &PageId,
    ) -> Result<PageStatus, ControllerError> {
        let page = self
            .book
            .as_ref()
            .ok_or(ControllerError::NoActiveBook)?
            .page(page_id)
            .ok_or_else(|| ControllerError::UnknownPage(page_id.to_string()))?;
        match page.status() {
            PageStatus::Failed | PageStatus::Ready => {}
            PageStatus::Generating => {
                return Err(ControllerError::PageInFlight(page_id.to_string()))
            }
            status @ PageStatus::Pending => {
                return Err(ControllerError::NotRetryable {
                    page_id: page_id.to_string(),
                    status,
                })
            }
        }
        tracing::info!(page_id = %page_id, "retrying page");
        self.generate_page(client, page_id)
    }

    pub fn export(&mut self, assembler: &DocumentAssembler) -> Result<Document, AssemblyError> {
        let Some(book) = self.book.as_ref() else {
            return Err(AssemblyError::Incomplete {
                not_ready: Vec::new(),
            });
        };
        let document = assembler.assemble(book)?;
        for observer in &mut self.observers {
            observer.book_exported(book, &document);
        }
        Ok(document)
    }

    fn notify_page(&mut self, page_id: &PageId) {
        let Some(book) = self.book.as_ref() else {
            return;
        };
        let Some(page) = book.page(page_id) else {
            return;
        };
        for observer in &mut self.observers {
            observer.page_changed(book, page);
        }
    }
}
