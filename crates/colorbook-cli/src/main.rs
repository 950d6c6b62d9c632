use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::io::{self, ErrorKind, Write};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use colorbook_contracts::book::{Book, Page, PageId, PageStatus};
use colorbook_contracts::chat::{
    parse_intent, ChatRole, Intent, BOOK_HELP_COMMANDS, CHAT_HELP_COMMANDS,
};
use colorbook_contracts::events::EventWriter;
use colorbook_contracts::manifest::{write_manifest, BookManifest};
use colorbook_contracts::prompts::DEFAULT_PAGE_COUNT;
use colorbook_contracts::storage::KeyValueStore;
use colorbook_engine::{
    BookObserver, ChatClient, ChatSessionStore, Document, DocumentAssembler, EngineConfig,
    EventLogObserver, ImageClient, PageController,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "colorbook", version, about = "Personalized coloring book generator")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Generate a coloring book and export it as a PDF.
    Book(BookArgs),
    /// Talk to the child-friendly chat assistant.
    Chat(ChatArgs),
}

#[derive(Debug, Parser)]
struct BookArgs {
    #[arg(long)]
    theme: String,
    #[arg(long)]
    name: String,
    #[arg(long, default_value_t = DEFAULT_PAGE_COUNT)]
    pages: usize,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
    /// Generate, export if every page succeeded, and exit.
    #[arg(long)]
    no_interactive: bool,
}

#[derive(Debug, Parser)]
struct ChatArgs {
    #[arg(long)]
    data_dir: Option<PathBuf>,
    #[arg(long)]
    text_model: Option<String>,
}

const DEFAULT_LOG_FILTER: &str = "colorbook=info,warn";
const STORAGE_FILE: &str = "storage.json";
const MANIFEST_FILE: &str = "book.json";

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("colorbook error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("COLORBOOK_LOG")
        .unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .with_target(false)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    match cli.command {
        Command::Book(args) => run_book(args),
        Command::Chat(args) => run_chat(args),
    }
}

fn run_book(args: BookArgs) -> Result<i32> {
    let config = EngineConfig::from_env().with_image_model(args.image_model.clone());
    let images = ImageClient::from_config(&config)?;
    if let Some(reason) = images.fallback_reason() {
        println!("{reason} Using {}.", images.model().name);
    }

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let session_id = uuid::Uuid::new_v4().to_string();

    let mut controller = PageController::new();
    controller.add_observer(EventLogObserver::new(EventWriter::new(
        events_path,
        session_id,
    )));
    controller.add_observer(ConsoleObserver);
    controller.add_observer(PageFileSaver::new(&args.out));
    let assembler = DocumentAssembler::new();

    if let Err(err) = controller.start_book(&args.theme, &args.name, args.pages) {
        println!("{err}");
        return Ok(2);
    }
    generate_all(&mut controller, &images)?;

    if args.no_interactive {
        return Ok(match export_book(&mut controller, &assembler, &args.out) {
            Some(_) => 0,
            None => 2,
        });
    }

    println!("Type /help for commands.");
    let mut line = String::new();
    while let Some(intent) = read_intent("book> ", &mut line)? {
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", BOOK_HELP_COMMANDS.join(" ")),
            "status" => match controller.book() {
                Some(book) => {
                    for row in status_lines(book) {
                        println!("{row}");
                    }
                }
                None => println!("No coloring book yet. Use /new <theme> <name> [pages]."),
            },
            "retry" => {
                let raw = value_as_non_empty_string(intent.command_args.get("page"))
                    .unwrap_or_default();
                let Some(page_id) = PageId::parse(&raw) else {
                    println!("Usage: /retry <page-id|number>");
                    continue;
                };
                if let Err(err) = controller.retry_page(&images, &page_id) {
                    println!("{err}");
                }
            }
            "export" => {
                export_book(&mut controller, &assembler, &args.out);
            }
            "new_book" => {
                let theme = value_as_non_empty_string(intent.command_args.get("theme"))
                    .unwrap_or_default();
                let name = value_as_non_empty_string(intent.command_args.get("name"))
                    .unwrap_or_default();
                let pages = intent
                    .command_args
                    .get("pages")
                    .and_then(Value::as_u64)
                    .map(|value| value as usize)
                    .unwrap_or(DEFAULT_PAGE_COUNT);
                match controller.start_book(&theme, &name, pages) {
                    Ok(_) => generate_all(&mut controller, &images)?,
                    Err(err) => println!("{err}"),
                }
            }
            "quit" => break,
            _ => println!("Unknown command. Type /help for commands."),
        }
    }
    Ok(0)
}

fn generate_all(controller: &mut PageController, images: &ImageClient) -> Result<()> {
    let progress = controller.run_book(images)?;
    println!(
        "{} of {} pages ready{}",
        progress.ready,
        progress.total(),
        if progress.failed > 0 {
            format!(", {} failed (use /retry <page>)", progress.failed)
        } else {
            String::new()
        }
    );
    Ok(())
}

fn export_book(
    controller: &mut PageController,
    assembler: &DocumentAssembler,
    out_dir: &Path,
) -> Option<PathBuf> {
    let exported = controller
        .export(assembler)
        .and_then(|document| document.write_to(out_dir));
    match exported {
        Ok(path) => {
            println!("Saved {}", path.display());
            Some(path)
        }
        Err(err) => {
            println!("{err}");
            None
        }
    }
}

fn run_chat(args: ChatArgs) -> Result<i32> {
    let config = EngineConfig::from_env().with_text_model(args.text_model.clone());
    let client = ChatClient::from_config(&config)?;
    if let Some(reason) = client.fallback_reason() {
        println!("{reason} Using {}.", client.model().name);
    }
    let data_dir = resolve_data_dir(args.data_dir)?;
    let mut session = ChatSessionStore::load(KeyValueStore::new(data_dir.join(STORAGE_FILE)));

    println!(
        "Chat started with {} earlier messages. Type /help for commands.",
        session.messages().len()
    );
    let mut line = String::new();
    while let Some(intent) = read_intent("you> ", &mut line)? {
        match intent.action.as_str() {
            "noop" => {}
            "help" => println!("Commands: {}", CHAT_HELP_COMMANDS.join(" ")),
            "history" => {
                for message in session.messages() {
                    println!("{}: {}", role_label(message.role), message.content);
                }
            }
            "clear" => {
                session.clear();
                println!("Chat history cleared.");
            }
            "send" => {
                let text = intent.message.clone().unwrap_or_default();
                match session.send_turn(&client, &text) {
                    Ok(reply) => println!("bot> {}", reply.content),
                    Err(err) => println!("{err}"),
                }
            }
            "quit" => break,
            _ => println!("Unknown command. Type /help for commands."),
        }
    }
    Ok(0)
}

fn read_intent(prompt: &str, line: &mut String) -> Result<Option<Intent>> {
    loop {
        print!("{prompt}");
        io::stdout().flush()?;
        line.clear();
        let read = match io::stdin().read_line(line) {
            Ok(read) => read,
            Err(err) if err.kind() == ErrorKind::Interrupted => continue,
            Err(err) => return Err(err.into()),
        };
        if read == 0 {
            return Ok(None);
        }
        return Ok(Some(parse_intent(line.trim_end_matches(['\n', '\r']))));
    }
}

fn resolve_data_dir(explicit: Option<PathBuf>) -> Result<PathBuf> {
    explicit
        .or_else(|| {
            env::var("COLORBOOK_DATA_DIR")
                .ok()
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
                .map(PathBuf::from)
        })
        .or_else(|| dirs::data_dir().map(|dir| dir.join("colorbook")))
        .context("could not determine a data directory, pass --data-dir")
}

fn role_label(role: ChatRole) -> &'static str {
    match role {
        ChatRole::User => "you",
        ChatRole::Assistant => "bot",
    }
}

fn status_lines(book: &Book) -> Vec<String> {
    let mut rows = vec![format!(
        "{} for {} ({} pages)",
        book.theme(),
        book.child_name(),
        book.pages().len()
    )];
    for page in book.pages() {
        let detail = match page.status() {
            PageStatus::Failed => page.error_message().unwrap_or_default().to_string(),
            PageStatus::Ready => page
                .image()
                .map(|image| format!("{}x{}", image.width, image.height))
                .unwrap_or_default(),
            PageStatus::Pending | PageStatus::Generating => page.prompt().to_string(),
        };
        rows.push(format!("  {:<8} {:<10} {detail}", page.id().as_str(), page.status().as_str()));
    }
    rows
}

fn value_as_non_empty_string(value: Option<&Value>) -> Option<String> {
    let raw = value
        .and_then(Value::as_str)
        .map(str::trim)
        .unwrap_or_default();
    if raw.is_empty() {
        None
    } else {
        Some(raw.to_string())
    }
}

fn image_file_name(page_id: &str, mime_type: &str) -> String {
    let extension = match mime_type {
        "image/jpeg" | "image/jpg" => "jpg",
        "image/webp" => "webp",
        _ => "png",
    };
    format!("{page_id}.{extension}")
}

struct ConsoleObserver;

impl BookObserver for ConsoleObserver {
    fn book_started(&mut self, book: &Book) {
        println!(
            "Creating a {}-page {} coloring book for {}",
            book.pages().len(),
            book.theme(),
            book.child_name()
        );
    }

    fn page_changed(&mut self, _book: &Book, page: &Page) {
        match page.status() {
            PageStatus::Generating => println!("{} generating...", page.id()),
            PageStatus::Ready => println!("{} ready", page.id()),
            PageStatus::Failed => println!(
                "{} failed: {}",
                page.id(),
                page.error_message().unwrap_or_default()
            ),
            PageStatus::Pending => {}
        }
    }
}

/// Saves each ready page image next to the PDF and keeps `book.json` in step
/// with the book.
struct PageFileSaver {
    out_dir: PathBuf,
    saved: BTreeMap<String, String>,
    document: Option<String>,
}

impl PageFileSaver {
    fn new(out_dir: &Path) -> Self {
        Self {
            out_dir: out_dir.to_path_buf(),
            saved: BTreeMap::new(),
            document: None,
        }
    }

    fn save_image(&mut self, page: &Page) -> Result<()> {
        let Some(image) = page.image() else {
            return Ok(());
        };
        let file_name = image_file_name(page.id().as_str(), &image.mime_type);
        let path = self.out_dir.join(&file_name);
        fs::write(&path, &image.bytes)
            .with_context(|| format!("failed to write {}", path.display()))?;
        self.saved.insert(page.id().to_string(), file_name);
        Ok(())
    }

    fn remove_file(&self, file_name: &str) {
        let path = self.out_dir.join(file_name);
        match fs::remove_file(&path) {
            Ok(()) => {}
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(path = %path.display(), error = %err, "failed to remove old file");
            }
        }
    }

    fn refresh_manifest(&self, book: &Book) {
        let mut manifest =
            BookManifest::from_book(book, |page_id| self.saved.get(page_id).cloned());
        manifest.document = self.document.clone();
        if let Err(err) = write_manifest(&self.out_dir.join(MANIFEST_FILE), &manifest) {
            tracing::warn!(error = %err, "failed to write book manifest");
        }
    }
}

impl BookObserver for PageFileSaver {
    fn book_started(&mut self, book: &Book) {
        for file_name in std::mem::take(&mut self.saved).into_values() {
            self.remove_file(&file_name);
        }
        if let Some(file_name) = self.document.take() {
            self.remove_file(&file_name);
        }
        self.refresh_manifest(book);
    }

    fn page_changed(&mut self, book: &Book, page: &Page) {
        if page.status() == PageStatus::Ready {
            if let Err(err) = self.save_image(page) {
                tracing::warn!(page_id = %page.id(), error = %err, "failed to save page image");
            }
        } else if let Some(file_name) = self.saved.remove(page.id().as_str()) {
            self.remove_file(&file_name);
        }
        self.refresh_manifest(book);
    }

    fn book_exported(&mut self, book: &Book, document: &Document) {
        self.document = Some(document.file_name.clone());
        self.refresh_manifest(book);
    }
}
