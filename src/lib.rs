use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Scope error: {0}")]
    Scope(String),

    #[error("Relationship graph error: {0}")]
    Graph(String),

    #[error("Provider error: {0}")]
    Provider(String),

    #[error("Operation cancelled")]
    Cancelled,

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

pub mod cancel;
pub mod commands;
pub mod config;
pub mod diff;
pub mod graph;
pub mod index;
pub mod intent;
pub mod model;
pub mod providers;
pub mod scope;
pub mod scoring;
pub mod store;
pub mod tags;
