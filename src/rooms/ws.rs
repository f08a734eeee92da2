use axum::{
    debug_handler,
    extract::{
        ws::{Message as WsMessage, WebSocket},
        Path, State, WebSocketUpgrade,
    },
    response::Response,
};
use futures_util::{Sink, SinkExt, Stream, StreamExt};
use serde::Deserialize;
use tower_sessions::Session;
use tracing::debug;

use crate::{
    ids::RoomId,
    lifecycle::{Connection, EventReceiver},
    session, AppResult, Chat,
};

#[derive(Deserialize)]
struct IncomingMessage {
    body: String,
}

/// Joins before upgrading, so a rejected user gets a plain not-found
/// response and is never registered as present.
#[debug_handler(state = crate::AppState)]
pub(crate) async fn room_ws(
    Path(room_id): Path<RoomId>,
    State(chat): State<Chat>,
    session: Session,

    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = session::current_user(&session).await?;

    let mut conn = chat.connection(user_id);
    let rx = conn.join(&room_id).await?;

    Ok(ws.on_upgrade(move |socket: WebSocket| {
        let (sender, receiver) = socket.split();
        drive(sender, receiver, chat, room_id, conn, rx)
    }))
}

/// Runs until the client closes, the transport fails, or the room drops the
/// subscription, then leaves the room.
async fn drive<S, R>(
    mut sender: S,
    mut receiver: R,
    chat: Chat,
    room_id: RoomId,
    mut conn: Connection,
    mut rx: EventReceiver,
) where
    S: Sink<WsMessage> + Unpin + Send + 'static,
    R: Stream<Item = Result<WsMessage, axum::Error>> + Unpin,
{
    let mut broadcast_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            if sender.send(WsMessage::Text(event.to_json().into())).await.is_err() {
                break;
            }
        }
    });

    loop {
        tokio::select! {
            frame = receiver.next() => match frame {
                Some(Ok(WsMessage::Text(text))) => {
                    let Ok(IncomingMessage { body }) = serde_json::from_str(text.as_str()) else {
                        continue;
                    };
                    if let Err(e) = chat.send_message(&room_id, conn.user_id(), &body).await {
                        debug!(room = %room_id, error = %e, "message over websocket rejected");
                    }
                }
                Some(Ok(WsMessage::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    debug!(room = %room_id, conn = %conn.id(), error = %e, "websocket error");
                    break;
                }
            },
            _ = &mut broadcast_task => break,
        }
    }

    broadcast_task.abort();
    conn.leave().await;
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use futures_util::{sink, stream};

    use super::*;
    use crate::{
        broadcast::Broadcaster, db, directory::SqliteDirectory, messages::SqliteMessageStore,
        presence::PresenceStore,
    };

    async fn chat() -> Chat {
        let db_pool = db::test_pool().await;
        Chat::new(
            Arc::new(SqliteDirectory::new(db_pool.clone())),
            Arc::new(SqliteMessageStore::new(db_pool)),
            PresenceStore::in_memory(),
            Broadcaster::default(),
            std::env::temp_dir(),
        )
    }

    async fn joined(chat: &Chat, username: &str) -> (RoomId, Connection, EventReceiver) {
        let room = RoomId::from(db::PUBLIC_ROOM);
        let user = chat.directory.create_user(username, false).await.unwrap().id;
        let mut conn = chat.connection(user);
        let rx = conn.join(&room).await.unwrap();
        (room, conn, rx)
    }

    #[tokio::test]
    async fn stream_end_leaves_the_room() {
        let chat = chat().await;
        let (room, conn, rx) = joined(&chat, "a").await;
        let user = conn.user_id().clone();
        assert!(chat.presence.is_online(&room, &user).await.unwrap());

        let frames = stream::iter(vec![Ok::<_, axum::Error>(WsMessage::Text(r#"{"body":"hi"}"#.into()))]);
        drive(sink::drain(), frames, chat.clone(), room.clone(), conn, rx).await;

        assert!(!chat.presence.is_online(&room, &user).await.unwrap());
        assert_eq!(chat.broadcaster.subscriber_count(&room).await, 0);
        let latest = chat.history.latest(&room).await.unwrap();
        assert_eq!(latest[0].body.as_deref(), Some("hi"));
    }

    #[tokio::test]
    async fn close_frame_and_transport_error_leave_the_room() {
        let chat = chat().await;

        let (room, conn, rx) = joined(&chat, "closer").await;
        let closer = conn.user_id().clone();
        let frames = stream::iter(vec![Ok::<_, axum::Error>(WsMessage::Close(None))]).chain(stream::pending());
        drive(sink::drain(), frames, chat.clone(), room.clone(), conn, rx).await;
        assert!(!chat.presence.is_online(&room, &closer).await.unwrap());

        let (room, conn, rx) = joined(&chat, "broken").await;
        let broken = conn.user_id().clone();
        let frames = stream::iter(vec![Err::<WsMessage, _>(axum::Error::new("connection reset"))]).chain(stream::pending());
        drive(sink::drain(), frames, chat.clone(), room.clone(), conn, rx).await;
        assert!(!chat.presence.is_online(&room, &broken).await.unwrap());

        assert_eq!(chat.presence.count(&room, None).await.unwrap(), 0);
        assert_eq!(chat.broadcaster.subscriber_count(&room).await, 0);
    }
}
