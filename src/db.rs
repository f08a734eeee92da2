use sqlx::SqlitePool;

pub const PUBLIC_ROOM: &str = "public-chat";

// users.email_verified stands in for "holds a verified contact address".
const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
    id TEXT PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    email_verified INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rooms (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL,
    name TEXT,
    admin_id TEXT
);

CREATE TABLE IF NOT EXISTS room_members (
    room_id TEXT NOT NULL,
    user_id TEXT NOT NULL,
    PRIMARY KEY (room_id, user_id)
);

CREATE TABLE IF NOT EXISTS messages (
    seq INTEGER PRIMARY KEY AUTOINCREMENT,
    id TEXT NOT NULL UNIQUE,
    room_id TEXT NOT NULL,
    author_id TEXT NOT NULL,
    body TEXT,
    file_path TEXT,
    original_filename TEXT,
    created INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS messages_by_room ON messages (room_id, seq DESC);

INSERT OR IGNORE INTO rooms (id, kind) VALUES ('public-chat', 'public');
"#;

pub async fn migrate(db_pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::raw_sql(SCHEMA).execute(db_pool).await?;
    Ok(())
}

#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    // one connection: every in-memory connection is its own database
    let db_pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .unwrap();
    migrate(&db_pool).await.unwrap();
    db_pool
}

