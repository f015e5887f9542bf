use std::io;
use std::path::PathBuf;
use thiserror::Error;

/// Errors surfaced by a [`crate::store::Persistence`] implementation.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Database(#[source] sqlx::Error),
    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
    /// A uniqueness constraint (`message_id` or `first_message_id`) rejected the write.
    #[error("uniqueness conflict on {constraint}")]
    Conflict { constraint: String },
    #[error("thread {0} not found")]
    ThreadNotFound(i32),
    #[error("invalid thread status `{0}`")]
    InvalidStatus(String),
}

impl StoreError {
    pub fn conflict(constraint: impl Into<String>) -> Self {
        StoreError::Conflict {
            constraint: constraint.into(),
        }
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match &err {
            sqlx::Error::Database(db_err) if db_err.is_unique_violation() => {
                let constraint = db_err.constraint().unwrap_or("unique constraint").to_string();
                log::debug!("unique violation on {}: {}", constraint, db_err.message());
                StoreError::Conflict { constraint }
            }
            _ => StoreError::Database(err),
        }
    }
}

/// Errors returned while resolving and storing a single message.
///
/// None of these abort a batch: the ingestor records them and moves on.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("message has no usable Message-ID")]
    MissingMessageId,
    #[error("store error while ingesting {message_id}: {source}")]
    Store {
        message_id: String,
        #[source]
        source: StoreError,
    },
}

/// Errors raised while loading runtime configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("required environment variable {0} is not set")]
    Missing(&'static str),
}

/// Errors raised while reading raw messages from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl SourceError {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        SourceError::Io {
            path: path.into(),
            source,
        }
    }
}
