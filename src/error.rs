use std::io;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, CrudError>;

#[derive(Debug, Error)]
pub enum CrudError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    #[error("store error: {0}")]
    Store(String),
    #[error("serialization error: {0}")]
    Serialization(String),
    #[error("corruption detected: {0}")]
    Corruption(&'static str),
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("subject {kind}/{id} already has mutations")]
    Collision { kind: String, id: String },
    #[error("{0} not found")]
    NotFound(&'static str),
    #[error("deadline exceeded")]
    DeadlineExceeded,
    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}
