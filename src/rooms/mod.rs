mod admin;
mod msg;
mod new;
mod room;
mod ws;

use axum::{
    extract::DefaultBodyLimit,
    routing::{get, post},
    Router,
};

use crate::AppState;

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/new", get(new::new_room_page).post(new::new_room))
        .route("/with/{username}", get(new::private_room))
        .route("/{room_id}", get(room::room))
        .route("/{room_id}/older", get(room::older))
        .route("/{room_id}/online", get(room::online))
        .route("/{room_id}/messages", post(msg::send))
        .route(
            "/{room_id}/upload",
            post(msg::upload).layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES)),
        )
        .route("/{room_id}/m/{message_id}", get(msg::message))
        .route("/{room_id}/edit", post(admin::edit))
        .route("/{room_id}/delete", post(admin::delete))
        .route("/{room_id}/leave", post(admin::leave))
        .route("/{room_id}/ws", get(ws::room_ws))
}
