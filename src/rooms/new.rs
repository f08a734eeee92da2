use axum::{
    debug_handler,
    extract::{Path, State},
    response::{Html, IntoResponse, Redirect, Response},
    Form,
};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{include_res, res, session, AppResult, Chat, ChatError};

#[derive(Debug, Deserialize)]
pub(crate) struct NewRoomQuery {
    name: String,
}

#[debug_handler]
pub(crate) async fn new_room_page(session: Session) -> AppResult<Response> {
    if session.get::<String>(session::USER_ID).await?.is_none() {
        return Ok(Redirect::to("/login?return_url=/r/new").into_response());
    }

    Ok(Html(include_res!(str, "/pages/new_room.html")).into_response())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn new_room(
    State(chat): State<Chat>,
    session: Session,

    Form(NewRoomQuery { name }): Form<NewRoomQuery>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let name = name.trim();
    if name.is_empty() || name.chars().count() > 128 {
        return Err(ChatError::InvalidMessage("group name must be 1 to 128 characters").into());
    }

    let room_id = chat.directory.create_group(name, &user_id).await?;
    Ok(Redirect::to(&format!("/r/{room_id}")).into_response())
}

/// Opens (creating on first use) the private room with `username`.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn private_room(
    State(chat): State<Chat>,
    session: Session,
    Path(username): Path<String>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let Some(other) = chat.directory.user_by_name(&username).await? else {
        return Ok(res::sorry("user"));
    };
    if other.id == user_id {
        return Ok(Redirect::to("/").into_response());
    }

    let room_id = chat.directory.private_room(&user_id, &other.id).await?;
    Ok(Redirect::to(&format!("/r/{room_id}")).into_response())
}
