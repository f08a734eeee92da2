use tower_sessions::Session;

use crate::{ids::UserId, AppResult, ChatError};

pub const USER_ID: &str = "user_id";
pub const RETURN_URL: &str = "return_url";

pub async fn current_user(session: &Session) -> AppResult<UserId> {
    Ok(session
        .get::<UserId>(USER_ID)
        .await?
        .ok_or(ChatError::NotLoggedIn)?)
}
