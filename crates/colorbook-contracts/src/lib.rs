pub mod book;
pub mod chat;
pub mod error;
pub mod events;
pub mod manifest;
pub mod models;
pub mod prompts;
pub mod storage;
