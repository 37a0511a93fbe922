use thiserror::Error;

pub type Result<T> = std::result::Result<T, CoachError>;

#[derive(Error, Debug)]
pub enum CoachError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(#[from] embeddings::EmbeddingError),

    #[error("Vector index error: {0}")]
    Index(#[from] index::IndexError),

    #[error("Retrieval error: {0}")]
    Retrieval(#[from] retriever::RetrievalError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod index;
pub mod ingest;
pub mod retriever;

pub use retriever::{KnowledgeRetriever, RetrievalResponse, SearchResult};
