use axum::{http::StatusCode, response::{IntoResponse, Redirect, Response}};
use tracing::{debug, error};

use crate::{res, ChatError};

pub type AppResult<T> = Result<T, AppError>;

#[derive(Debug)]
pub struct AppError(pub anyhow::Error);

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        match self.0.downcast_ref::<ChatError>() {
            Some(ChatError::RoomNotFound(_)) => res::sorry("room"),
            // same page as a missing room
            Some(ChatError::AccessDenied(reason)) => {
                debug!(%reason, "access denied");
                res::sorry("room")
            }
            Some(ChatError::NotLoggedIn) => Redirect::to("/login").into_response(),
            Some(ChatError::InvalidMessage(why)) => (StatusCode::BAD_REQUEST, *why).into_response(),
            _ => {
                error!(error = ?self.0, "request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    format!("{}", self.0),
                )
                    .into_response()
            }
        }
    }
}

impl<E> From<E> for AppError
where
    E: Into<anyhow::Error>,
{
    fn from(err: E) -> Self {
        Self(err.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::guard::DenyReason;
    use crate::ids::RoomId;

    #[test]
    fn chat_errors_map_to_statuses() {
        let status = |e: ChatError| AppError::from(e).into_response().status();

        assert_eq!(status(ChatError::RoomNotFound(RoomId::from("x"))), StatusCode::NOT_FOUND);
        assert_eq!(status(ChatError::AccessDenied(DenyReason::NotAMember)), StatusCode::NOT_FOUND);
        assert_eq!(status(ChatError::NotLoggedIn), StatusCode::SEE_OTHER);
        assert_eq!(status(ChatError::InvalidMessage("empty message")), StatusCode::BAD_REQUEST);
        assert_eq!(
            status(ChatError::Database(sqlx::Error::RowNotFound)),
            StatusCode::INTERNAL_SERVER_ERROR
        );
    }
}
