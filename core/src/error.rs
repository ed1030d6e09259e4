use thiserror::Error;

pub type KodiakResult<T> = Result<T, KodiakError>;

#[derive(Error, Debug)]
pub enum KodiakError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Table '{0}' not found")]
    TableNotFound(String),

    #[error("WAL error: {0}")]
    Wal(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}
