use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("index error: {0}")]
    Tantivy(#[from] tantivy::TantivyError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("data directory does not exist and could not be created: {0}")]
    DataDir(PathBuf),

    #[error("line {line}: {message}")]
    Ingest { line: usize, message: String },

    #[error("retrieval failed for variant {variant:?}: {message}")]
    Retrieval { variant: String, message: String },

    #[error("retrieval timed out for variant {variant:?}")]
    Timeout { variant: String },
}
