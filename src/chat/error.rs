use thiserror::Error;

/// Everything a chat operation can fail with. Store-level failures surface
/// here and the hub turns them into an `errorNotice` for the one connection
/// that caused them.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("message not found")]
    NotFound,

    #[error("you are not the author of this message")]
    Forbidden,

    #[error("message has been deleted")]
    InvalidState,

    #[error("storage unavailable: {0}")]
    StorageUnavailable(#[from] sqlx::Error),

    #[error("{0}")]
    Validation(String),
}
