use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransferError {
    #[error("Invalid transfer configuration: {0}")]
    InvalidConfiguration(String),

    #[error("Content source I/O error: {0}")]
    Source(#[from] std::io::Error),

    #[error("Store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}

pub type TransferResult<T> = Result<T, TransferError>;
