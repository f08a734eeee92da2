use axum::{debug_handler, extract::State, response::{Html, IntoResponse, Redirect, Response}};
use tower_sessions::Session;

use crate::{ids::{RoomId, UserId}, include_res, res::escape, session, AppResult, Chat};

/// Room list with how many others are online in each.
#[debug_handler(state = crate::AppState)]
pub async fn index(
    State(chat): State<Chat>,
    session: Session
) -> AppResult<Response> {
    let Some(user_id) = session.get::<UserId>(session::USER_ID).await? else {
        return Ok(
            Redirect::to("/login")
                .into_response()
        );
    };

    let rooms = chat.directory.rooms_of(&user_id).await?;
    let room_ids: Vec<RoomId> = rooms.iter().map(|r| r.id.clone()).collect();
    let online = chat.presence.count_many_or_zero(&room_ids, Some(&user_id)).await;

    let mut room_items = String::new();
    for room in &rooms {
        room_items += &include_res!(str, "/pages/room_item.html")
            .replace("{id}", &escape(room.id.as_str()))
            .replace("{name}", &escape(room.title()))
            .replace("{kind}", room.kind.as_str())
            .replace("{online}", &online.get(&room.id).copied().unwrap_or(0).to_string());
    }

    Ok(
        Html(
            include_res!(str, "/pages/index.html")
                .replace("{room_items}", &room_items)
        ).into_response()
    )
}
