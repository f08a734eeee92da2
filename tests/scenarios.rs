use std::sync::Arc;
use std::time::Duration;

use roomcast::{
    broadcast::{Broadcaster, EventKind},
    db,
    directory::{Directory, SqliteDirectory},
    guard::DenyReason,
    ids::RoomId,
    messages::SqliteMessageStore,
    presence::PresenceStore,
    Chat, ChatError,
};
use sqlx::sqlite::SqlitePoolOptions;
use tokio::time::timeout;

async fn chat() -> Chat {
    let db_pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    db::migrate(&db_pool).await.unwrap();

    Chat::new(
        Arc::new(SqliteDirectory::new(db_pool.clone())),
        Arc::new(SqliteMessageStore::new(db_pool)),
        PresenceStore::in_memory(),
        Broadcaster::default(),
        std::env::temp_dir(),
    )
}

async fn wait_for_count(chat: &Chat, room: &RoomId, expected: u64) {
    timeout(Duration::from_secs(1), async {
        while chat.presence.count(room, None).await.unwrap() != expected {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("presence count settles");
}

#[tokio::test]
async fn private_room_message_reaches_the_other_member() {
    let chat = chat().await;
    let a = chat.directory.create_user("a", false).await.unwrap().id;
    let b = chat.directory.create_user("b", false).await.unwrap().id;
    let room = chat.directory.private_room(&a, &b).await.unwrap();

    let mut conn_a = chat.connection(a.clone());
    let _rx_a = conn_a.join(&room).await.unwrap();
    let mut conn_b = chat.connection(b.clone());
    let mut rx_b = conn_b.join(&room).await.unwrap();

    let sent = chat.send_message(&room, &a, "hi").await.unwrap();

    let event = timeout(Duration::from_millis(250), rx_b.recv()).await.unwrap().unwrap();
    assert_eq!(event.to_json(), format!(r#"{{"type":"message_handler","message_id":"{sent}"}}"#));
    let EventKind::Message { message_id } = &event.kind;
    let message = chat.resolve_message(&room, message_id).await.unwrap().unwrap();
    assert_eq!(message.body.as_deref(), Some("hi"));
    assert_eq!(message.author_id, a);

    assert_eq!(chat.presence.count(&room, Some(&b)).await.unwrap(), 1);
}

#[tokio::test]
async fn outsider_cannot_join_private_room() {
    let chat = chat().await;
    let a = chat.directory.create_user("a", true).await.unwrap().id;
    let b = chat.directory.create_user("b", true).await.unwrap().id;
    let c = chat.directory.create_user("c", true).await.unwrap().id;
    let room = chat.directory.private_room(&a, &b).await.unwrap();

    let mut conn = chat.connection(c.clone());
    let err = conn.join(&room).await.unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied(DenyReason::NotAMember)));
    assert!(!chat.presence.is_online(&room, &c).await.unwrap());
    assert_eq!(chat.broadcaster.subscriber_count(&room).await, 0);
}

#[tokio::test]
async fn verified_user_auto_joins_group_and_unverified_does_not() {
    let chat = chat().await;
    let admin = chat.directory.create_user("admin", true).await.unwrap().id;
    let verified = chat.directory.create_user("verified", true).await.unwrap().id;
    let unverified = chat.directory.create_user("unverified", false).await.unwrap().id;
    let room = chat.directory.create_group("crew", &admin).await.unwrap();

    let mut conn = chat.connection(verified.clone());
    conn.join(&room).await.unwrap();
    assert!(chat.room(&room).await.unwrap().is_member(&verified));

    let mut conn = chat.connection(unverified.clone());
    let err = conn.join(&room).await.unwrap_err();
    assert!(matches!(err, ChatError::AccessDenied(DenyReason::VerificationRequired)));
    assert!(!chat.room(&room).await.unwrap().is_member(&unverified));
}

#[tokio::test]
async fn dropped_connection_goes_offline() {
    let chat = chat().await;
    let admin = chat.directory.create_user("admin", true).await.unwrap().id;
    let room = chat.directory.create_group("crew", &admin).await.unwrap();

    let mut conn = chat.connection(admin.clone());
    let rx = conn.join(&room).await.unwrap();
    assert_eq!(chat.presence.count(&room, None).await.unwrap(), 1);

    drop(rx);
    drop(conn);
    wait_for_count(&chat, &room, 0).await;
    assert_eq!(chat.broadcaster.subscriber_count(&room).await, 0);
}

#[tokio::test]
async fn second_tab_keeps_user_online() {
    let chat = chat().await;
    let user = chat.directory.create_user("a", false).await.unwrap().id;
    let room = RoomId::from(db::PUBLIC_ROOM);

    let mut first = chat.connection(user.clone());
    let _rx1 = first.join(&room).await.unwrap();
    let mut second = chat.connection(user.clone());
    let _rx2 = second.join(&room).await.unwrap();

    first.leave().await;
    assert!(chat.presence.is_online(&room, &user).await.unwrap());

    second.leave().await;
    assert!(!chat.presence.is_online(&room, &user).await.unwrap());
}

#[tokio::test]
async fn history_pages_do_not_overlap() {
    let chat = chat().await;
    let user = chat.directory.create_user("a", false).await.unwrap().id;
    let room = RoomId::from(db::PUBLIC_ROOM);
    for i in 0..45 {
        chat.send_message(&room, &user, &format!("m{i}")).await.unwrap();
    }

    let latest = chat.history.latest(&room).await.unwrap();
    let older = chat.history.older(&room, latest.len() as u32).await.unwrap();
    assert_eq!(latest.len(), 30);
    assert_eq!(older.len(), 15);
    assert_eq!(latest[0].body.as_deref(), Some("m44"));
    assert_eq!(older.last().unwrap().body.as_deref(), Some("m0"));
    assert!(older.iter().all(|m| latest.iter().all(|l| l.id != m.id)));
}
