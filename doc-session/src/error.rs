use thiserror::Error;

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Failed to serialize value for key '{key}': {source}")]
    Serialize {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Storage backend error: {0}")]
    Storage(String),

    #[error("Invalid session TTL: {0}")]
    InvalidTtl(String),
}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Storage(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, SessionError>;
