use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, info};
use uuid::Uuid;

use crate::broadcast::{BroadcastEvent, Broadcaster, PublishReport};
use crate::directory::{Directory, Room};
use crate::error::{ChatError, ChatResult};
use crate::history::HistoryPager;
use crate::ids::{MessageId, RoomId, UserId};
use crate::lifecycle::Connection;
use crate::messages::{Attachment, Message, MessageStore, NewMessage};
use crate::presence::{OrEmpty, PresenceStore};

/// Everything the chat core needs, cloned into each request and connection.
#[derive(Clone)]
pub struct Chat {
    pub directory: Arc<dyn Directory>,
    pub messages: Arc<dyn MessageStore>,
    pub presence: PresenceStore,
    pub broadcaster: Broadcaster,
    pub history: HistoryPager,
    upload_dir: PathBuf,
}

impl Chat {
    pub fn new(
        directory: Arc<dyn Directory>,
        messages: Arc<dyn MessageStore>,
        presence: PresenceStore,
        broadcaster: Broadcaster,
        upload_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            history: HistoryPager::new(messages.clone()),
            directory,
            messages,
            presence,
            broadcaster,
            upload_dir: upload_dir.into(),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn connection(&self, user_id: UserId) -> Connection {
        Connection::new(
            user_id,
            self.directory.clone(),
            self.presence.clone(),
            self.broadcaster.clone(),
        )
    }

    pub async fn room(&self, room_id: &RoomId) -> ChatResult<Room> {
        self.directory
            .resolve_room(room_id)
            .await?
            .ok_or_else(|| ChatError::RoomNotFound(room_id.clone()))
    }

    /// Takes `user_id` out of the room. Their live connections to it are
    /// closed and they stop counting as online there.
    pub async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> ChatResult<()> {
        self.directory.remove_member(room_id, user_id).await?;
        let evicted = self.broadcaster.evict(room_id, Some(user_id)).await;
        self.presence.leave(room_id, user_id).await.or_empty("leave");
        info!(room = %room_id, user = %user_id, evicted, "member removed");
        Ok(())
    }

    /// Deletes the room and closes every live connection to it.
    pub async fn delete_room(&self, room_id: &RoomId) -> ChatResult<()> {
        self.directory.delete_room(room_id).await?;
        let evicted = self.broadcaster.evict(room_id, None).await;
        for user_id in self.presence.members(room_id, None).await.or_empty("members") {
            self.presence.leave(room_id, &user_id).await.or_empty("leave");
        }
        info!(room = %room_id, evicted, "connections to deleted room closed");
        Ok(())
    }

    /// Persists a text message, then announces it to the room.
    pub async fn send_message(&self, room_id: &RoomId, author_id: &UserId, body: &str) -> ChatResult<MessageId> {
        let message = NewMessage::text(author_id.clone(), body)?;
        self.append_and_publish(room_id, message).await
    }

    /// Stores an uploaded file and posts it as a message, keeping the
    /// original filename for display.
    pub async fn upload_file(
        &self,
        room_id: &RoomId,
        author_id: &UserId,
        original_filename: Option<&str>,
        bytes: &[u8],
    ) -> ChatResult<MessageId> {
        let original_filename = original_filename
            .and_then(|name| Path::new(name).file_name())
            .and_then(|name| name.to_str())
            .filter(|name| !name.is_empty())
            .map(str::to_owned);
        let extension = original_filename
            .as_deref()
            .and_then(|name| Path::new(name).extension())
            .and_then(|ext| ext.to_str())
            .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()));
        let stored_name = match extension {
            Some(ext) => format!("{}.{ext}", Uuid::now_v7().simple()),
            None => Uuid::now_v7().simple().to_string(),
        };

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        tokio::fs::write(self.upload_dir.join(&stored_name), bytes).await?;
        debug!(room = %room_id, stored_name, size = bytes.len(), "upload stored");

        let message = NewMessage::file(
            author_id.clone(),
            Attachment {
                stored_name,
                original_filename,
            },
        );
        self.append_and_publish(room_id, message).await
    }

    async fn append_and_publish(&self, room_id: &RoomId, message: NewMessage) -> ChatResult<MessageId> {
        let message_id = self.messages.append(room_id, message).await?;
        let report = self.publish_message(room_id, message_id).await;
        info!(
            room = %room_id,
            message = %message_id,
            delivered = report.delivered,
            dropped = report.dropped,
            "message published"
        );
        Ok(message_id)
    }

    /// Publishing is independent of the publisher holding a live connection
    /// and cannot fail the append that triggered it.
    pub async fn publish_message(&self, room_id: &RoomId, message_id: MessageId) -> PublishReport {
        self.broadcaster
            .publish(BroadcastEvent::message(room_id.clone(), message_id))
            .await
    }

    /// Resolves a broadcast reference back to the message.
    pub async fn resolve_message(&self, room_id: &RoomId, message_id: &MessageId) -> ChatResult<Option<Message>> {
        self.messages.get(room_id, message_id).await
    }
}
