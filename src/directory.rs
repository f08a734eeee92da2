//! Rooms, their members, and the users who hold them.

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::Serialize;
use sqlx::SqlitePool;
use tracing::info;
use uuid::Uuid;

use crate::error::ChatResult;
use crate::ids::{RoomId, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RoomKind {
    Public,
    /// Exactly two fixed members.
    Private,
    /// Named, admin-owned, open to verified users.
    Group,
}

impl RoomKind {
    pub fn as_str(&self) -> &'static str {
        use RoomKind::*;
        match self {
            Public => "public",
            Private => "private",
            Group => "group",
        }
    }
}

impl FromStr for RoomKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(RoomKind::Public),
            "private" => Ok(RoomKind::Private),
            "group" => Ok(RoomKind::Group),
            other => Err(format!("unknown room kind {other}")),
        }
    }
}

impl fmt::Display for RoomKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Room {
    pub id: RoomId,
    pub kind: RoomKind,
    pub name: Option<String>,
    pub members: Vec<UserId>,
    pub admin: Option<UserId>,
}

impl Room {
    pub fn is_member(&self, user_id: &UserId) -> bool {
        self.members.contains(user_id)
    }

    pub fn title(&self) -> &str {
        self.name.as_deref().unwrap_or(self.id.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: UserId,
    pub username: String,
    pub email_verified: bool,
}

/// Read access to rooms plus the handful of membership writes the chat needs.
#[async_trait]
pub trait Directory: Send + Sync {
    async fn resolve_room(&self, room_id: &RoomId) -> ChatResult<Option<Room>>;
    async fn has_verified_contact(&self, user_id: &UserId) -> ChatResult<bool>;
    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> ChatResult<()>;
    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> ChatResult<()>;
    /// Rooms `user_id` belongs to, plus every public room.
    async fn rooms_of(&self, user_id: &UserId) -> ChatResult<Vec<Room>>;

    async fn user(&self, user_id: &UserId) -> ChatResult<Option<User>>;
    async fn user_by_name(&self, username: &str) -> ChatResult<Option<User>>;
    async fn create_user(&self, username: &str, email_verified: bool) -> ChatResult<User>;

    async fn create_group(&self, name: &str, admin: &UserId) -> ChatResult<RoomId>;
    /// The private room shared by `a` and `b`, created on first use.
    async fn private_room(&self, a: &UserId, b: &UserId) -> ChatResult<RoomId>;
    async fn rename(&self, room_id: &RoomId, name: &str) -> ChatResult<()>;
    async fn delete_room(&self, room_id: &RoomId) -> ChatResult<()>;
}

#[derive(Clone)]
pub struct SqliteDirectory {
    db_pool: SqlitePool,
}

impl SqliteDirectory {
    pub fn new(db_pool: SqlitePool) -> Self {
        Self { db_pool }
    }

    async fn members(&self, room_id: &str) -> ChatResult<Vec<UserId>> {
        let members: Vec<(String,)> =
            sqlx::query_as("SELECT user_id FROM room_members WHERE room_id=? ORDER BY user_id")
                .bind(room_id)
                .fetch_all(&self.db_pool)
                .await?;
        Ok(members.into_iter().map(|(id,)| UserId(id)).collect())
    }

    async fn room_from_row(&self, (id, kind, name, admin): RoomRow) -> ChatResult<Room> {
        let kind = kind
            .parse()
            .map_err(|e: String| sqlx::Error::Decode(e.into()))?;
        let members = self.members(&id).await?;
        Ok(Room {
            id: RoomId(id),
            kind,
            name,
            members,
            admin: admin.map(UserId),
        })
    }
}

type RoomRow = (String, String, Option<String>, Option<String>);
type UserRow = (String, String, bool);

fn user_from_row((id, username, email_verified): UserRow) -> User {
    User {
        id: UserId(id),
        username,
        email_verified,
    }
}

#[async_trait]
impl Directory for SqliteDirectory {
    async fn resolve_room(&self, room_id: &RoomId) -> ChatResult<Option<Room>> {
        let row: Option<RoomRow> = sqlx::query_as("SELECT id,kind,name,admin_id FROM rooms WHERE id=?")
            .bind(room_id.as_str())
            .fetch_optional(&self.db_pool)
            .await?;
        match row {
            Some(row) => Ok(Some(self.room_from_row(row).await?)),
            None => Ok(None),
        }
    }

    async fn has_verified_contact(&self, user_id: &UserId) -> ChatResult<bool> {
        let verified: Option<(bool,)> = sqlx::query_as("SELECT email_verified FROM users WHERE id=?")
            .bind(user_id.as_str())
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(verified.is_some_and(|(v,)| v))
    }

    async fn add_member(&self, room_id: &RoomId, user_id: &UserId) -> ChatResult<()> {
        sqlx::query("INSERT OR IGNORE INTO room_members (room_id,user_id) VALUES (?,?)")
            .bind(room_id.as_str())
            .bind(user_id.as_str())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn remove_member(&self, room_id: &RoomId, user_id: &UserId) -> ChatResult<()> {
        sqlx::query("DELETE FROM room_members WHERE room_id=? AND user_id=?")
            .bind(room_id.as_str())
            .bind(user_id.as_str())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn rooms_of(&self, user_id: &UserId) -> ChatResult<Vec<Room>> {
        let rows: Vec<RoomRow> = sqlx::query_as(
            "SELECT id,kind,name,admin_id FROM rooms
             WHERE kind='public' OR id IN (SELECT room_id FROM room_members WHERE user_id=?)
             ORDER BY kind, id",
        )
        .bind(user_id.as_str())
        .fetch_all(&self.db_pool)
        .await?;

        let mut rooms = Vec::with_capacity(rows.len());
        for row in rows {
            rooms.push(self.room_from_row(row).await?);
        }
        Ok(rooms)
    }

    async fn user(&self, user_id: &UserId) -> ChatResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id,username,email_verified FROM users WHERE id=?")
            .bind(user_id.as_str())
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn user_by_name(&self, username: &str) -> ChatResult<Option<User>> {
        let row: Option<UserRow> = sqlx::query_as("SELECT id,username,email_verified FROM users WHERE username=?")
            .bind(username)
            .fetch_optional(&self.db_pool)
            .await?;
        Ok(row.map(user_from_row))
    }

    async fn create_user(&self, username: &str, email_verified: bool) -> ChatResult<User> {
        let id = UserId(Uuid::now_v7().simple().to_string());
        info!(user = %id, username, "adding user");
        sqlx::query("INSERT INTO users (id,username,email_verified) VALUES (?,?,?)")
            .bind(id.as_str())
            .bind(username)
            .bind(email_verified)
            .execute(&self.db_pool)
            .await?;
        Ok(User {
            id,
            username: username.to_owned(),
            email_verified,
        })
    }

    async fn create_group(&self, name: &str, admin: &UserId) -> ChatResult<RoomId> {
        let room_id = RoomId(Uuid::now_v7().simple().to_string());
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("INSERT INTO rooms (id,kind,name,admin_id) VALUES (?,'group',?,?)")
            .bind(room_id.as_str())
            .bind(name)
            .bind(admin.as_str())
            .execute(&mut *tx)
            .await?;
        sqlx::query("INSERT INTO room_members (room_id,user_id) VALUES (?,?)")
            .bind(room_id.as_str())
            .bind(admin.as_str())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;

        info!(room = %room_id, admin = %admin, "group created");
        Ok(room_id)
    }

    async fn private_room(&self, a: &UserId, b: &UserId) -> ChatResult<RoomId> {
        let existing: Option<(String,)> = sqlx::query_as(
            "SELECT r.id FROM rooms r
             JOIN room_members ma ON ma.room_id=r.id AND ma.user_id=?
             JOIN room_members mb ON mb.room_id=r.id AND mb.user_id=?
             WHERE r.kind='private'
             LIMIT 1",
        )
        .bind(a.as_str())
        .bind(b.as_str())
        .fetch_optional(&self.db_pool)
        .await?;
        if let Some((id,)) = existing {
            return Ok(RoomId(id));
        }

        let room_id = RoomId(Uuid::now_v7().simple().to_string());
        let mut tx = self.db_pool.begin().await?;
        sqlx::query("INSERT INTO rooms (id,kind) VALUES (?,'private')")
            .bind(room_id.as_str())
            .execute(&mut *tx)
            .await?;
        for user_id in [a, b] {
            sqlx::query("INSERT INTO room_members (room_id,user_id) VALUES (?,?)")
                .bind(room_id.as_str())
                .bind(user_id.as_str())
                .execute(&mut *tx)
                .await?;
        }
        tx.commit().await?;

        info!(room = %room_id, "private room created");
        Ok(room_id)
    }

    async fn rename(&self, room_id: &RoomId, name: &str) -> ChatResult<()> {
        sqlx::query("UPDATE rooms SET name=? WHERE id=?")
            .bind(name)
            .bind(room_id.as_str())
            .execute(&self.db_pool)
            .await?;
        Ok(())
    }

    async fn delete_room(&self, room_id: &RoomId) -> ChatResult<()> {
        let mut tx = self.db_pool.begin().await?;
        for query in [
            "DELETE FROM messages WHERE room_id=?",
            "DELETE FROM room_members WHERE room_id=?",
            "DELETE FROM rooms WHERE id=?",
        ] {
            sqlx::query(query).bind(room_id.as_str()).execute(&mut *tx).await?;
        }
        tx.commit().await?;

        info!(room = %room_id, "room deleted");
        Ok(())
    }
}
