pub mod appresult;
pub mod auth;
pub mod broadcast;
pub mod chat;
pub mod config;
pub mod db;
pub mod directory;
pub mod error;
pub mod guard;
pub mod history;
pub mod ids;
pub mod index;
pub mod lifecycle;
pub mod messages;
pub mod presence;
pub mod res;
pub mod rooms;
pub mod session;

use axum::{extract::FromRef, routing::get, Router};
use tower_http::services::ServeDir;

pub use appresult::{AppError, AppResult};
pub use chat::Chat;
pub use error::{ChatError, ChatResult};

/// Request state; handlers extract the [`Chat`] through `FromRef`.
#[derive(Clone, FromRef)]
pub struct AppState {
    pub chat: Chat,
}

pub fn router(app_state: AppState) -> Router {
    let uploads = ServeDir::new(app_state.chat.upload_dir());

    Router::new()
        .route("/", get(index::index))
        .merge(auth::router())
        .nest("/r", rooms::router())
        .nest_service("/uploads", uploads)
        .with_state(app_state)
}
