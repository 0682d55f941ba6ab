use crate::core::tier::PrivacyTier;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Extraction error for {path}: {reason}")]
    Extraction { path: PathBuf, reason: String },

    #[error("Store write error: {0}")]
    StoreWrite(String),

    #[error("Store query error in {tier} partition: {reason}")]
    StoreQuery { tier: PrivacyTier, reason: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Embedding error: {0}")]
    Embedding(String),
}

impl Error {
    pub fn extraction(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        Error::Extraction {
            path: path.into(),
            reason: reason.to_string(),
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
