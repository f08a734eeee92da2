//! Durable, per-room ordered message storage.

use std::path::Path;

use async_trait::async_trait;
use sqlx::SqlitePool;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::error::{ChatError, ChatResult};
use crate::ids::{MessageId, RoomId, UserId};

pub const MAX_BODY_LEN: usize = 300;

const IMAGE_EXTENSIONS: [&str; 7] = ["jpg", "jpeg", "png", "gif", "webp", "bmp", "svg"];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Attachment {
    /// Path under the upload directory.
    pub stored_name: String,
    pub original_filename: Option<String>,
}

impl Attachment {
    /// Name to show: the uploader's filename, else the stored one.
    pub fn filename(&self) -> &str {
        self.original_filename.as_deref().unwrap_or(&self.stored_name)
    }

    pub fn is_image(&self) -> bool {
        Path::new(&self.stored_name)
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub id: MessageId,
    pub room_id: RoomId,
    pub author_id: UserId,
    pub author_name: String,
    pub body: Option<String>,
    pub file: Option<Attachment>,
    /// Unix milliseconds.
    pub created: i64,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub author_id: UserId,
    pub body: Option<String>,
    pub file: Option<Attachment>,
}

impl NewMessage {
    pub fn text(author_id: UserId, body: &str) -> ChatResult<Self> {
        let body = body.trim();
        if body.is_empty() {
            return Err(ChatError::InvalidMessage("empty message"));
        }
        if body.chars().count() > MAX_BODY_LEN {
            return Err(ChatError::InvalidMessage("message longer than 300 characters"));
        }
        Ok(Self {
            author_id,
            body: Some(body.to_owned()),
            file: None,
        })
    }

    pub fn file(author_id: UserId, file: Attachment) -> Self {
        Self {
            author_id,
            body: None,
            file: Some(file),
        }
    }
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn append(&self, room_id: &RoomId, message: NewMessage) -> ChatResult<MessageId>;
    /// Newest first, skipping `offset` of the newest messages.
    async fn page(&self, room_id: &RoomId, offset: u32, limit: u32) -> ChatResult<Vec<Message>>;
    async fn get(&self, room_id: &RoomId, message_id: &MessageId) -> ChatResult<Option<Message>>;
}

#[derive(Clone)]
pub struct SqliteMessageStore {
    db_pool: SqlitePool,
}

impl SqliteMessageStore {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }
}

type MessageRow = (String, String, String, Option<String>, Option<String>, Option<String>, Option<String>, i64);

const SELECT_MESSAGE: &str = "SELECT m.id,m.room_id,m.author_id,u.username,m.body,m.file_path,m.original_filename,m.created
    FROM messages m LEFT JOIN users u ON u.id=m.author_id";

fn message_from_row(
    (id, room_id, author_id, author_name, body, file_path, original_filename, created): MessageRow,
) -> ChatResult<Message> {
    let id = Uuid::parse_str(&id).map_err(|e| sqlx::Error::Decode(e.into()))?;
    Ok(Message {
        id: MessageId(id),
        room_id: RoomId(room_id),
        author_id: UserId(author_id),
        author_name: author_name.unwrap_or_else(|| "Anonymous".to_owned()),
        body,
        file: file_path.map(|stored_name| Attachment {
            stored_name,
            original_filename,
        }),
        created,
    })
}

#[async_trait]
impl MessageStore for SqliteMessageStore {
    async fn append(&self, room_id: &RoomId, message: NewMessage) -> ChatResult<MessageId> {
        let id = MessageId::generate();
        let created = (OffsetDateTime::now_utc().unix_timestamp_nanos() / 1_000_000) as i64;
        let (file_path, original_filename) = match message.file {
            Some(Attachment { stored_name, original_filename }) => (Some(stored_name), original_filename),
            None => (None, None),
        };

        sqlx::query(
            "INSERT INTO messages (id,room_id,author_id,body,file_path,original_filename,created) VALUES (?,?,?,?,?,?,?)",
        )
        .bind(id.to_string())
        .bind(room_id.as_str())
        .bind(message.author_id.as_str())
        .bind(message.body)
        .bind(file_path)
        .bind(original_filename)
        .bind(created)
        .execute(&self.db_pool)
        .await?;

        Ok(id)
    }

    async fn page(&self, room_id: &RoomId, offset: u32, limit: u32) -> ChatResult<Vec<Message>> {
        let rows: Vec<MessageRow> = sqlx::query_as(&format!(
            "{SELECT_MESSAGE} WHERE m.room_id=? ORDER BY m.seq DESC LIMIT ? OFFSET ?"
        ))
        .bind(room_id.as_str())
        .bind(i64::from(limit))
        .bind(i64::from(offset))
        .fetch_all(&self.db_pool)
        .await?;

        rows.into_iter().map(message_from_row).collect()
    }

    async fn get(&self, room_id: &RoomId, message_id: &MessageId) -> ChatResult<Option<Message>> {
        let row: Option<MessageRow> = sqlx::query_as(&format!("{SELECT_MESSAGE} WHERE m.id=? AND m.room_id=?"))
            .bind(message_id.to_string())
            .bind(room_id.as_str())
            .fetch_optional(&self.db_pool)
            .await?;

        row.map(message_from_row).transpose()
    }
}
