pub mod chat;
pub mod content;
pub mod events;
pub mod models;
pub mod storage;
