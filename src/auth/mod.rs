use axum::{routing::get, Router};

use crate::AppState;

mod login;
mod logout;

pub use login::{login, login_page};
pub use logout::logout;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
}
