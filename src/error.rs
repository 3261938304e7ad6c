use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("embedding failed: {0}")]
    EmbeddingFailure(String),

    #[error("embedding dimension mismatch: expected {expected}, found {found}")]
    EmbeddingShape { expected: usize, found: usize },

    #[error("malformed embedding: {0}")]
    MalformedEmbedding(String),

    #[error("retrieval failed: {0}")]
    Retrieval(String),

    #[error("invalid filter: {0}")]
    InvalidFilter(String),

    #[error("embedding codec error: {0}")]
    Codec(String),

    #[error("scoring error: {0}")]
    Scoring(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Redb(#[from] redb::Error),

    #[error("database open error: {0}")]
    RedbDatabase(#[from] redb::DatabaseError),

    #[error("database storage error: {0}")]
    RedbStorage(#[from] redb::StorageError),

    #[error("database transaction error: {0}")]
    RedbTransaction(#[from] redb::TransactionError),

    #[error("database table error: {0}")]
    RedbTable(#[from] redb::TableError),

    #[error("database commit error: {0}")]
    RedbCommit(#[from] redb::CommitError),

    #[error("line {line}: {source}")]
    Ingest {
        line: usize,
        #[source]
        source: Box<Error>,
    },

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{kind} not found: {name}")]
    NotFound { kind: &'static str, name: String },

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),
}
