use axum::{
    debug_handler,
    extract::{Multipart, Path, State},
    http::StatusCode,
    response::{Html, IntoResponse, Response},
    Form,
};
use pulldown_cmark::{Event, Parser};
use serde::Deserialize;
use tower_sessions::Session;

use crate::{
    guard, include_res,
    ids::{MessageId, RoomId},
    messages::Message,
    res::{self, escape},
    session, AppResult, Chat, ChatError,
};

#[derive(Deserialize)]
pub(crate) struct SendMessageQuery {
    pub(crate) body: String,
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn send(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,

    Form(SendMessageQuery { body }): Form<SendMessageQuery>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_visible(&room, &user_id)?;

    let id = chat.send_message(&room_id, &user_id, &body).await?;
    message_response(&chat, &room_id, &id).await
}

#[debug_handler(state = crate::AppState)]
pub(crate) async fn upload(
    State(chat): State<Chat>,
    session: Session,
    Path(room_id): Path<RoomId>,

    mut multipart: Multipart,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_visible(&room, &user_id)?;

    while let Some(field) = multipart.next_field().await? {
        if field.name() != Some("file") {
            continue;
        }
        let filename = field.file_name().map(str::to_owned);
        let bytes = field.bytes().await?;
        if bytes.is_empty() {
            return Err(ChatError::InvalidMessage("empty file").into());
        }

        chat.upload_file(&room_id, &user_id, filename.as_deref(), &bytes).await?;
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    Err(ChatError::InvalidMessage("no file field").into())
}

/// Resolves a `message_handler` event to displayable HTML.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn message(
    State(chat): State<Chat>,
    session: Session,
    Path((room_id, message_id)): Path<(RoomId, MessageId)>,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;
    let room = chat.room(&room_id).await?;
    guard::check_visible(&room, &user_id)?;

    message_response(&chat, &room_id, &message_id).await
}

async fn message_response(chat: &Chat, room_id: &RoomId, message_id: &MessageId) -> AppResult<Response> {
    match chat.resolve_message(room_id, message_id).await? {
        Some(msg) => Ok(Html(msg_to_html(&msg)).into_response()),
        None => Ok(res::sorry("message")),
    }
}

pub(crate) fn msgs_to_html(msgs: &[Message]) -> String {
    msgs.iter().map(msg_to_html).collect()
}

pub(crate) fn msg_to_html(msg: &Message) -> String {
    let content = match (&msg.body, &msg.file) {
        (Some(body), _) => markdown(body),
        (None, Some(file)) if file.is_image() => format!(
            r#"<img src="/uploads/{}" alt="{}">"#,
            escape(&file.stored_name),
            escape(file.filename())
        ),
        (None, Some(file)) => format!(
            r#"<a href="/uploads/{}" download="{name}">{name}</a>"#,
            escape(&file.stored_name),
            name = escape(file.filename())
        ),
        (None, None) => "<em>(empty message)</em>".to_owned(),
    };

    include_res!(str, "/pages/rooms/message.html")
        .replace("{id}", &msg.id.to_string())
        .replace("{author_id}", &escape(msg.author_id.as_str()))
        .replace("{author}", &escape(&msg.author_name))
        .replace("{content}", &content)
}

/// Markdown to HTML, with raw HTML in the source shown as text.
fn markdown(body: &str) -> String {
    let parser = Parser::new(body).map(|event| match event {
        Event::Html(html) | Event::InlineHtml(html) => Event::Text(html),
        _ => event,
    });

    let mut html_output = String::new();
    pulldown_cmark::html::push_html(&mut html_output, parser);
    html_output
}
