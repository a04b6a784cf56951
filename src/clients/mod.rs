pub mod catalog;
pub mod embedding;
pub mod llm;

pub use catalog::{CatalogStore, RestCatalogStore, ScoredItem};
pub use embedding::{Embedder, HttpEmbedder};
pub use llm::{ChatClient, ChatMessage, HttpChatClient};
