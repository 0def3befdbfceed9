use anyhow::Result;
use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::Connection;
use std::path::Path;
use std::time::Duration;

pub type DbPool = Pool<SqliteConnectionManager>;

/// Initialize a single SQLite connection and run migrations. Used by tests
/// with `":memory:"`.
pub fn init_db<P: AsRef<Path>>(path: P) -> Result<Connection> {
    let conn = Connection::open(path)?;
    conn.execute_batch(SCHEMA)?;
    Ok(conn)
}

/// Open a connection pool against the database file, applying the schema on
/// every checkout (all statements are idempotent).
pub fn open_pool<P: AsRef<Path>>(path: P) -> Result<DbPool> {
    let manager = SqliteConnectionManager::file(path).with_init(|c| c.execute_batch(SCHEMA));
    let pool = Pool::new(manager)?;
    Ok(pool)
}

/// Open the pool, retrying on a fixed backoff instead of terminating when the
/// store is unavailable at startup.
pub async fn open_pool_with_retry<P: AsRef<Path>>(path: P, backoff: Duration) -> DbPool {
    loop {
        match open_pool(&path) {
            Ok(pool) => match pool.get() {
                Ok(_) => return pool,
                Err(e) => tracing::warn!(error = %e, "database checkout failed, retrying"),
            },
            Err(e) => tracing::warn!(error = %e, "database unavailable, retrying"),
        }
        tokio::time::sleep(backoff).await;
    }
}

// messages.room_id carries no foreign key: room deletion commits first and
// message cleanup follows best-effort, so rows may be briefly orphaned.
pub const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS users (
  id TEXT PRIMARY KEY,
  provider_id TEXT UNIQUE NOT NULL,
  name TEXT NOT NULL,
  avatar_url TEXT,
  is_online INTEGER NOT NULL DEFAULT 0,
  last_seen INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS rooms (
  id TEXT PRIMARY KEY,
  name TEXT NOT NULL,
  description TEXT NOT NULL DEFAULT '',
  is_default INTEGER NOT NULL DEFAULT 0,
  is_active INTEGER NOT NULL DEFAULT 1,
  created_by TEXT,
  created_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS room_members (
  room_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  PRIMARY KEY (room_id, user_id)
);

CREATE TABLE IF NOT EXISTS messages (
  id TEXT PRIMARY KEY,
  room_id TEXT NOT NULL,
  user_id TEXT NOT NULL,
  content TEXT,
  kind TEXT NOT NULL DEFAULT 'text',
  image_filename TEXT,
  image_original_name TEXT,
  image_mime TEXT,
  image_size INTEGER,
  image_url TEXT,
  is_edited INTEGER NOT NULL DEFAULT 0,
  edited_at INTEGER,
  created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_messages_room_time ON messages(room_id, created_at);
"#;
