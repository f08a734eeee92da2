use axum::{debug_handler, extract::{Query, State}, response::{Html, IntoResponse, Redirect, Response}, Form};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::info;

use crate::{include_res, session::{RETURN_URL, USER_ID}, AppResult, Chat, ChatError};

#[derive(Deserialize)]
pub(crate) struct LoginQuery {
    pub(crate) return_url: Option<String>,
}

#[derive(Deserialize)]
pub(crate) struct LoginForm {
    pub(crate) username: String,
}

#[debug_handler]
pub async fn login_page(
    Query(LoginQuery { return_url }): Query<LoginQuery>,
    session: Session,
) -> AppResult<Response> {
    // only same-site paths
    if let Some(return_url) = return_url.filter(|url| url.starts_with('/') && !url.starts_with("//")) {
        session.insert(RETURN_URL, return_url).await?;
    }

    Ok(Html(include_res!(str, "/pages/login.html")).into_response())
}

/// Signs in as `username`, creating the account on first login.
#[debug_handler(state = crate::AppState)]
pub async fn login(
    State(chat): State<Chat>,
    session: Session,

    Form(LoginForm { username }): Form<LoginForm>,
) -> AppResult<Response> {
    let username = username.trim();
    if !valid_username(username) {
        return Err(ChatError::InvalidMessage("username must be 1 to 32 letters, digits, '-' or '_'").into());
    }

    let user = match chat.directory.user_by_name(username).await? {
        Some(user) => {
            info!(user = %user.id, username, "welcome back");
            user
        }
        None => {
            let user = chat.directory.create_user(username, false).await?;
            info!(user = %user.id, username, "user created");
            user
        }
    };

    session.cycle_id().await?;
    session.insert(USER_ID, &user.id).await?;

    let return_url: String = session.remove(RETURN_URL).await?.unwrap_or("/".to_string());
    Ok(Redirect::to(return_url.as_str()).into_response())
}

fn valid_username(username: &str) -> bool {
    (1..=32).contains(&username.chars().count())
        && username.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
