//! Windows over a room's persisted history, newest first.
//!
//! Windows are selected by offset: a count of messages to skip from the
//! newest. This is not stable under concurrent writes. A message appended
//! after a page was fetched shifts every later offset by one, so the next
//! older page can repeat the last message of the previous page (or, after a
//! deletion, skip one). Clients that need exact continuity must de-duplicate
//! by message id.

use std::sync::Arc;

use crate::error::ChatResult;
use crate::ids::RoomId;
use crate::messages::{Message, MessageStore};

/// Size of the page shown when a room is opened.
pub const INITIAL_PAGE: u32 = 30;
/// Size of each "load older" page.
pub const OLDER_PAGE: u32 = 20;
pub const MAX_PAGE: u32 = 100;

#[derive(Clone)]
pub struct HistoryPager {
    messages: Arc<dyn MessageStore>,
}

impl HistoryPager {
    pub fn new(messages: Arc<dyn MessageStore>) -> Self {
        Self { messages }
    }

    /// Up to `limit` messages (capped at [`MAX_PAGE`]) after skipping `offset`.
    pub async fn page(&self, room_id: &RoomId, offset: u32, limit: u32) -> ChatResult<Vec<Message>> {
        let limit = limit.min(MAX_PAGE);
        if limit == 0 {
            return Ok(Vec::new());
        }
        self.messages.page(room_id, offset, limit).await
    }

    pub async fn latest(&self, room_id: &RoomId) -> ChatResult<Vec<Message>> {
        self.page(room_id, 0, INITIAL_PAGE).await
    }

    pub async fn older(&self, room_id: &RoomId, offset: u32) -> ChatResult<Vec<Message>> {
        self.page(room_id, offset, OLDER_PAGE).await
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;
    use crate::db;
    use crate::ids::{MessageId, UserId};
    use crate::messages::{NewMessage, SqliteMessageStore};

    async fn seeded(n: usize) -> (HistoryPager, Arc<SqliteMessageStore>, RoomId, Vec<MessageId>) {
        let store = Arc::new(SqliteMessageStore::new(db::test_pool().await));
        let room = RoomId::from(db::PUBLIC_ROOM);
        let mut ids = Vec::new();
        for i in 0..n {
            let msg = NewMessage::text(UserId::from("u"), &format!("m{i}")).unwrap();
            ids.push(store.append(&room, msg).await.unwrap());
        }
        (HistoryPager::new(store.clone()), store, room, ids)
    }

    #[tokio::test]
    async fn consecutive_pages_do_not_overlap() {
        let (pager, _, room, ids) = seeded(45).await;

        let first = pager.page(&room, 0, 20).await.unwrap();
        let second = pager.page(&room, 20, 20).await.unwrap();
        assert_eq!(first.len(), 20);
        assert_eq!(second.len(), 20);

        let all: Vec<MessageId> = first.iter().chain(&second).map(|m| m.id).collect();
        let distinct: HashSet<MessageId> = all.iter().copied().collect();
        assert_eq!(distinct.len(), 40);

        let expected: Vec<MessageId> = ids.iter().rev().take(40).copied().collect();
        assert_eq!(all, expected);
    }

    #[tokio::test]
    async fn default_windows() {
        let (pager, _, room, _) = seeded(35).await;
        assert_eq!(pager.latest(&room).await.unwrap().len(), 30);
        assert_eq!(pager.older(&room, 30).await.unwrap().len(), 5);
        assert!(pager.older(&room, 100).await.unwrap().is_empty());
        assert!(pager.page(&room, 0, 0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn insert_between_pages_shifts_offsets() {
        let (pager, store, room, _) = seeded(25).await;

        let first = pager.page(&room, 0, 20).await.unwrap();
        store
            .append(&room, NewMessage::text(UserId::from("u"), "late").unwrap())
            .await
            .unwrap();
        let second = pager.page(&room, 20, 20).await.unwrap();

        // the oldest message of the first page comes back again
        assert_eq!(second.first().map(|m| m.id), first.last().map(|m| m.id));
    }
}
