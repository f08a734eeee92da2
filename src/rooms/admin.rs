use axum::{
    debug_handler,
    extract::{Path, State},
    response::{IntoResponse, Redirect, Response},
    Form,
};
use tower_sessions::Session;

use crate::{
    directory::RoomKind,
    guard::{self, DenyReason},
    ids::{RoomId, UserId},
    session, AppResult, Chat, ChatError,
};

/// Rename and/or drop members. Fields: `name`, and `remove_members` repeated.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn edit(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,

    Form(fields): Form<Vec<(String, String)>>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_admin(&room, &user_id)?;

    for (key, value) in fields {
        match key.as_str() {
            "name" if !value.trim().is_empty() => {
                chat.directory.rename(&room_id, value.trim()).await?;
            }
            "remove_members" => {
                chat.remove_member(&room_id, &UserId(value)).await?;
            }
            _ => {}
        }
    }

    Ok(Redirect::to(&format!("/r/{room_id}")).into_response())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn delete(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_admin(&room, &user_id)?;

    chat.delete_room(&room_id).await?;
    Ok(Redirect::to("/").into_response())
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn leave(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    if room.kind == RoomKind::Public || !room.is_member(&user_id) {
        return Err(ChatError::AccessDenied(DenyReason::NotAMember).into());
    }

    chat.remove_member(&room_id, &user_id).await?;
    Ok(Redirect::to("/").into_response())
}
