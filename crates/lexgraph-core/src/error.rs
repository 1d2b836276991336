use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid level: {0}")]
    InvalidLevel(String),

    #[error("Invalid edge type: {0}")]
    InvalidEdgeType(String),

    #[error("Invalid property kind: {0}")]
    InvalidPropertyKind(String),

    #[error("Self-referential edge not allowed")]
    SelfReference,

    #[error("Validation error: {0}")]
    Validation(#[from] crate::schema::ValidationError),

    #[error("Grammar error: {0}")]
    Grammar(#[from] crate::grammar::GrammarError),

    #[error("Reference error: {0}")]
    Reference(#[from] crate::reference::ReferenceError),

    #[error("Store error: {0}")]
    Store(#[from] crate::storage::StoreError),

    #[error("Ingest error: {0}")]
    Ingest(#[from] crate::ingest::IngestError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),
}

pub type Result<T> = std::result::Result<T, Error>;
