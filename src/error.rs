use thiserror::Error;

use crate::guard::DenyReason;
use crate::ids::RoomId;

/// Failures surfaced to the caller. Presence and fan-out failures never end
/// up here; they are absorbed where they happen.
#[derive(Debug, Error)]
pub enum ChatError {
    #[error("room {0} not found")]
    RoomNotFound(RoomId),
    #[error("access denied: {0}")]
    AccessDenied(DenyReason),
    #[error("not logged in")]
    NotLoggedIn,
    #[error("invalid message: {0}")]
    InvalidMessage(&'static str),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("upload failed: {0}")]
    Upload(#[from] std::io::Error),
}

pub type ChatResult<T> = Result<T, ChatError>;
