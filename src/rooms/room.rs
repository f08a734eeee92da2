use axum::{
    debug_handler,
    extract::{Path, Query, State},
    response::{Html, IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use tower_sessions::Session;

use crate::{
    directory::RoomKind,
    guard, include_res,
    ids::{RoomId, UserId},
    presence::OrEmpty,
    res::escape,
    session, AppResult, Chat,
};

use super::msg;

#[debug_handler(state = crate::AppState)]
pub(crate) async fn room(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let mut room = chat.room(&room_id).await?;
    guard::admit(chat.directory.as_ref(), &mut room, &user_id).await?;

    let msgs = chat.history.latest(&room_id).await?;
    let online = chat.presence.count(&room_id, Some(&user_id)).await.or_empty("count");

    let room_name = match room.kind {
        RoomKind::Private => {
            let other = room.members.iter().find(|m| **m != user_id);
            match other {
                Some(other) => chat
                    .directory
                    .user(other)
                    .await?
                    .map(|u| u.username)
                    .unwrap_or_else(|| other.to_string()),
                None => room.title().to_owned(),
            }
        }
        _ => room.title().to_owned(),
    };

    let admin_links = if guard::check_admin(&room, &user_id).is_ok() {
        format!(
            r#"<form method="post" action="/r/{id}/edit"><input name="name" placeholder="rename"><button>Save</button></form>
    <form method="post" action="/r/{id}/delete"><button>Delete room</button></form>"#,
            id = escape(room_id.as_str())
        )
    } else if room.kind == RoomKind::Group {
        format!(
            r#"<form method="post" action="/r/{}/leave"><button>Leave room</button></form>"#,
            escape(room_id.as_str())
        )
    } else {
        String::new()
    };

    let body = include_res!(str, "/pages/rooms/room.html")
        .replace("{room_id}", &escape(room_id.as_str()))
        .replace("{room_name}", &escape(&room_name))
        .replace("{online}", &online.to_string())
        .replace("{loaded}", &msgs.len().to_string())
        .replace("{admin_links}", &admin_links)
        .replace("{messages}", &msg::msgs_to_html(&msgs));

    Ok(Html(body).into_response())
}

#[derive(Deserialize)]
pub(crate) struct OlderQuery {
    #[serde(default)]
    offset: u32,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn older(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,
    Query(OlderQuery { offset }): Query<OlderQuery>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_visible(&room, &user_id)?;

    let msgs = chat.history.older(&room_id, offset).await?;
    Ok(Html(msg::msgs_to_html(&msgs)).into_response())
}

#[derive(Serialize)]
pub(crate) struct Online {
    count: u64,
    members: Vec<UserId>,
}

/// Who else is here, excluding the viewer.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn online(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,
) -> AppResult<Json<Online>> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_visible(&room, &user_id)?;

    let count = chat.presence.count(&room_id, Some(&user_id)).await.or_empty("count");
    let mut members: Vec<UserId> = chat
        .presence
        .members(&room_id, Some(&user_id))
        .await
        .or_empty("members")
        .into_iter()
        .collect();
    members.sort();

    Ok(Json(Online { count, members }))
}
