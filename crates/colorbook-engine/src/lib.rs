pub mod assembler;
pub mod chat_session;
pub mod config;
pub mod controller;
pub mod images;
pub mod layout;
pub mod text;
mod transport;

pub use assembler::{Document, DocumentAssembler};
pub use chat_session::{ChatSessionStore, CHAT_HISTORY_KEY};
pub use config::EngineConfig;
pub use controller::{BookObserver, Completion, EventLogObserver, GenerationTicket, PageController};
pub use images::{GeneratedImage, ImageClient, ImageProvider};
pub use text::{ChatClient, ChatProvider};
pub use transport::error_chain_text;
